//! In-memory `PagePort` double. Doubles as the stub backend when no browser
//! is reachable and as the fixture for the detection/speed-control tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use adrush_core_types::{MediaHandle, MediaStatus, Notification, PageEvent};

use crate::error::{PortError, PortErrorKind};
use crate::port::{page_event_bus, PageEventBus, PagePort};

#[derive(Clone, Debug)]
struct SimVideo {
    handle: MediaHandle,
    in_player: bool,
    attached: bool,
    ready: bool,
    rate: f64,
    duration: f64,
    paused: bool,
    current_time: f64,
    /// Number of upcoming rate writes the page "accepts" but immediately
    /// reverts, the way a player that owns its rate behaves.
    reject_sets: u32,
}

#[derive(Default)]
struct SimState {
    player_classes: Option<String>,
    videos: Vec<SimVideo>,
    url: String,
    notifications: Vec<Notification>,
    class_reads: u64,
    set_rate_calls: u64,
    broken: bool,
}

pub struct SimulatedPage {
    state: Mutex<SimState>,
    events: PageEventBus,
}

impl Default for SimulatedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPage {
    pub fn new() -> Self {
        let (events, _initial_rx) = page_event_bus(64);
        let state = SimState {
            url: "https://www.youtube.com/watch?v=sim".to_string(),
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
            events,
        }
    }

    fn guard(&self) -> Result<parking_lot::MutexGuard<'_, SimState>, PortError> {
        let state = self.state.lock();
        if state.broken {
            return Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint("simulated connection failure")
                .retriable(true));
        }
        Ok(state)
    }

    // -- test controls -------------------------------------------------

    pub fn set_player_classes(&self, classes: Option<&str>) {
        self.state.lock().player_classes = classes.map(str::to_string);
    }

    pub fn add_video(&self, in_player: bool, duration: f64, paused: bool) -> MediaHandle {
        let handle = MediaHandle::unique();
        self.state.lock().videos.push(SimVideo {
            handle: handle.clone(),
            in_player,
            attached: true,
            ready: true,
            rate: 1.0,
            duration,
            paused,
            current_time: 0.0,
            reject_sets: 0,
        });
        handle
    }

    pub fn detach(&self, handle: &MediaHandle) {
        let mut state = self.state.lock();
        if let Some(video) = state.videos.iter_mut().find(|v| &v.handle == handle) {
            video.attached = false;
        }
    }

    pub fn remove_all_videos(&self) {
        self.state.lock().videos.clear();
    }

    pub fn reject_next_sets(&self, handle: &MediaHandle, count: u32) {
        let mut state = self.state.lock();
        if let Some(video) = state.videos.iter_mut().find(|v| &v.handle == handle) {
            video.reject_sets = count;
        }
    }

    pub fn force_rate(&self, handle: &MediaHandle, rate: f64) {
        let mut state = self.state.lock();
        if let Some(video) = state.videos.iter_mut().find(|v| &v.handle == handle) {
            video.rate = rate;
        }
    }

    pub fn set_url(&self, url: &str) {
        let mut state = self.state.lock();
        state.url = url.to_string();
    }

    pub fn set_broken(&self, broken: bool) {
        self.state.lock().broken = broken;
    }

    pub fn emit(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    // -- test observations ---------------------------------------------

    pub fn rate_of(&self, handle: &MediaHandle) -> Option<f64> {
        self.state
            .lock()
            .videos
            .iter()
            .find(|v| &v.handle == handle)
            .map(|v| v.rate)
    }

    pub fn set_rate_calls(&self) -> u64 {
        self.state.lock().set_rate_calls
    }

    /// How many times the player's class list has been read.
    pub fn class_reads(&self) -> u64 {
        self.state.lock().class_reads
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }
}

#[async_trait]
impl PagePort for SimulatedPage {
    async fn player_classes(&self) -> Result<Option<String>, PortError> {
        let mut state = self.guard()?;
        state.class_reads += 1;
        Ok(state.player_classes.clone())
    }

    async fn video_in_player(&self) -> Result<Option<MediaHandle>, PortError> {
        let state = self.guard()?;
        Ok(state
            .videos
            .iter()
            .find(|v| v.in_player && v.attached && v.ready)
            .map(|v| v.handle.clone()))
    }

    async fn scan_videos(&self) -> Result<Option<MediaHandle>, PortError> {
        let state = self.guard()?;
        Ok(state
            .videos
            .iter()
            .find(|v| {
                v.attached && v.ready && (v.duration > 0.0 || !v.paused || v.current_time > 0.0)
            })
            .map(|v| v.handle.clone()))
    }

    async fn media_status(&self, handle: &MediaHandle) -> Result<Option<MediaStatus>, PortError> {
        let state = self.guard()?;
        Ok(state
            .videos
            .iter()
            .find(|v| &v.handle == handle)
            .map(|v| MediaStatus {
                attached: v.attached,
                ready: v.ready,
                rate: v.rate,
                duration: v.duration,
                paused: v.paused,
                current_time: v.current_time,
            }))
    }

    async fn set_playback_rate(&self, handle: &MediaHandle, rate: f64) -> Result<bool, PortError> {
        let mut state = self.guard()?;
        state.set_rate_calls += 1;
        let Some(video) = state.videos.iter_mut().find(|v| &v.handle == handle) else {
            return Ok(false);
        };
        if !video.attached {
            return Ok(false);
        }
        if video.reject_sets > 0 {
            video.reject_sets -= 1;
        } else {
            video.rate = rate;
        }
        Ok(true)
    }

    async fn current_url(&self) -> Result<String, PortError> {
        Ok(self.guard()?.url.clone())
    }

    async fn show_notification(&self, note: &Notification) -> Result<(), PortError> {
        self.guard()?.notifications.push(note.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_video_answers_but_refuses_writes() {
        let page = SimulatedPage::new();
        let handle = page.add_video(true, 30.0, false);
        page.detach(&handle);

        let status = page.media_status(&handle).await.unwrap().unwrap();
        assert!(!status.attached);
        assert!(!page.set_playback_rate(&handle, 16.0).await.unwrap());
        assert_eq!(page.rate_of(&handle), Some(1.0));
    }

    #[tokio::test]
    async fn rejected_sets_leave_the_rate_alone() {
        let page = SimulatedPage::new();
        let handle = page.add_video(true, 30.0, false);
        page.reject_next_sets(&handle, 2);

        assert!(page.set_playback_rate(&handle, 16.0).await.unwrap());
        assert_eq!(page.rate_of(&handle), Some(1.0));
        assert!(page.set_playback_rate(&handle, 16.0).await.unwrap());
        assert_eq!(page.rate_of(&handle), Some(1.0));
        assert!(page.set_playback_rate(&handle, 16.0).await.unwrap());
        assert_eq!(page.rate_of(&handle), Some(16.0));
        assert_eq!(page.set_rate_calls(), 3);
    }

    #[tokio::test]
    async fn scan_skips_inactive_videos() {
        let page = SimulatedPage::new();
        let idle = page.add_video(false, 0.0, true);
        let active = page.add_video(false, 42.0, true);

        let found = page.scan_videos().await.unwrap();
        assert_eq!(found.as_ref(), Some(&active));
        assert_ne!(found.as_ref(), Some(&idle));
    }
}
