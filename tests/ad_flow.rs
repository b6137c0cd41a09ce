//! End-to-end monitor behavior against the in-memory page.

use std::sync::Arc;
use std::time::Duration;

use adrush_cli::{config::AppConfig, supervisor::MonitorSupervisor};
use adrush_core_types::{NotificationKind, PageEvent};
use page_adapter::SimulatedPage;

const PLAYING: &str = "html5-video-player playing-mode";
const AD: &str = "html5-video-player playing-mode ad-showing";

async fn running(page: &Arc<SimulatedPage>) -> MonitorSupervisor {
    let supervisor = MonitorSupervisor::new(AppConfig::default(), page.clone());
    supervisor.start().await;
    supervisor
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

fn count(page: &SimulatedPage, kind: NotificationKind) -> usize {
    page.notifications()
        .iter()
        .filter(|note| note.kind == kind)
        .count()
}

#[tokio::test(start_paused = true)]
async fn speeds_up_during_an_ad_and_restores_after() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));
    assert_eq!(count(&page, NotificationKind::Speedup), 1);

    let status = supervisor.status().await.unwrap();
    assert!(status.ad_detected);

    page.set_player_classes(Some(PLAYING));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(1.0));
    assert_eq!(count(&page, NotificationKind::Restore), 1);
    assert!(!supervisor.status().await.unwrap().ad_detected);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_long_ad_announces_only_once() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(page.rate_of(&video), Some(16.0));
    assert_eq!(count(&page, NotificationKind::Speedup), 1);
    assert_eq!(count(&page, NotificationKind::Restore), 0);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restores_the_viewer_speed_not_a_default() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    page.force_rate(&video, 1.75);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));

    page.set_player_classes(Some(PLAYING));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(1.75));

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn never_restores_to_the_ad_speed() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    // The page was somehow already at the ad rate when the ad began.
    page.force_rate(&video, 16.0);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    settle().await;
    page.set_player_classes(Some(PLAYING));
    settle().await;

    assert_eq!(page.rate_of(&video), Some(1.0));

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn drift_is_corrected_mid_ad() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));

    // Page snaps the rate back while the ad is still showing.
    page.force_rate(&video, 1.0);
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));
    // Quiet correction, no second announcement.
    assert_eq!(count(&page, NotificationKind::Speedup), 1);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disable_mid_ad_restores_and_goes_quiet() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    page.force_rate(&video, 2.0);
    let supervisor = running(&page).await;
    settle().await;

    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));

    let reply = supervisor.set_enabled(false).await.unwrap();
    assert!(reply.success);
    assert!(!reply.enabled);
    settle().await;
    assert_eq!(page.rate_of(&video), Some(2.0));
    assert_eq!(count(&page, NotificationKind::Restore), 1);

    // Ad signal flapping while disabled changes nothing.
    page.set_player_classes(Some(PLAYING));
    settle().await;
    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(2.0));
    assert_eq!(count(&page, NotificationKind::Speedup), 1);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reenabling_picks_a_running_ad_back_up() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(AD));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    supervisor.set_enabled(false).await.unwrap();
    settle().await;
    assert_eq!(page.rate_of(&video), Some(1.0));

    supervisor.set_enabled(true).await.unwrap();
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn url_change_resets_ad_state() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(AD));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;
    assert!(supervisor.status().await.unwrap().ad_detected);
    assert_eq!(page.rate_of(&video), Some(16.0));

    // Single-page navigation: same document, new address, new content.
    page.set_url("https://www.youtube.com/watch?v=next");
    page.set_player_classes(Some(PLAYING));
    page.detach(&video);
    let next = page.add_video(true, 480.0, false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = supervisor.status().await.unwrap();
    assert!(status.enabled);
    assert!(!status.ad_detected);
    assert_eq!(page.rate_of(&next), Some(1.0));

    // The next ad is a fresh edge on the new page.
    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&next), Some(16.0));
    assert_eq!(count(&page, NotificationKind::Speedup), 2);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn navigated_event_resets_without_waiting_for_a_tick() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(AD));
    page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;
    assert!(supervisor.status().await.unwrap().ad_detected);

    page.set_url("https://www.youtube.com/watch?v=pushstate");
    page.emit(PageEvent::Navigated {
        url: "https://www.youtube.com/watch?v=pushstate".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!supervisor.status().await.unwrap().ad_detected);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn ad_that_starts_before_the_video_loads_still_speeds_it_up() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(AD));
    let supervisor = running(&page).await;
    settle().await;
    assert!(supervisor.status().await.unwrap().ad_detected);
    // The cue fires on the transition even though there is nothing to
    // accelerate yet.
    assert_eq!(count(&page, NotificationKind::Speedup), 1);

    // Player reported the ad before its media element was ready.
    let video = page.add_video(true, 30.0, false);
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));
    assert_eq!(count(&page, NotificationKind::Speedup), 1);

    page.set_player_classes(Some(PLAYING));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(1.0));

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_monitor_stops_reading_the_page() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    supervisor.set_enabled(false).await.unwrap();
    settle().await;
    let quiet = page.class_reads();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(page.class_reads(), quiet);

    supervisor.set_enabled(true).await.unwrap();
    settle().await;
    assert!(page.class_reads() > quiet);

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn replaced_video_element_is_picked_up() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let first = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    page.detach(&first);
    let second = page.add_video(true, 600.0, false);
    page.set_player_classes(Some(AD));
    settle().await;

    assert_eq!(page.rate_of(&first), Some(1.0));
    assert_eq!(page.rate_of(&second), Some(16.0));

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lifecycle_is_restartable_and_stop_is_safe_to_repeat() {
    let page = Arc::new(SimulatedPage::new());
    let supervisor = running(&page).await;
    settle().await;

    supervisor.stop().await;
    supervisor.stop().await;
    assert!(supervisor.status().await.is_err());

    // start() rebuilds from scratch, including after a stop.
    supervisor.start().await;
    assert!(supervisor.status().await.is_ok());
    supervisor.start().await;
    assert!(supervisor.status().await.is_ok());

    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn broken_page_does_not_kill_the_loop() {
    let page = Arc::new(SimulatedPage::new());
    page.set_player_classes(Some(PLAYING));
    let video = page.add_video(true, 600.0, false);
    let supervisor = running(&page).await;
    settle().await;

    page.set_broken(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    page.set_broken(false);

    page.set_player_classes(Some(AD));
    settle().await;
    assert_eq!(page.rate_of(&video), Some(16.0));

    supervisor.stop().await;
}
