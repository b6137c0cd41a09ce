//! Ad state transitions. Pure and synchronous; the monitor loop feeds it
//! readings and executes the directives it hands back.

use adrush_core_types::StatusReply;

use crate::config::AppConfig;
use crate::session::PlaybackSession;

/// What the monitor should do after a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Nothing changed.
    Idle,
    /// An ad just started: speed up and announce it.
    EnterAd { target: f64 },
    /// The ad ended (or monitoring was disabled mid-ad): restore and
    /// announce it.
    ExitAd { restore_to: f64 },
    /// Still in an ad but the page drifted off the target rate; re-apply
    /// quietly.
    Correct { target: f64 },
}

pub struct AdStateMachine {
    ad_speed: f64,
    max_supported_speed: f64,
    coarse_tolerance: f64,
    session: PlaybackSession,
}

impl AdStateMachine {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            ad_speed: cfg.ad_speed,
            max_supported_speed: cfg.max_supported_speed,
            coarse_tolerance: cfg.coarse_tolerance,
            session: PlaybackSession::new(cfg.start_enabled),
        }
    }

    /// Feed one reading. Transitions fire on signal edges only, so repeating
    /// the same reading is idempotent.
    pub fn evaluate(&mut self, ad_showing: bool, observed_rate: Option<f64>) -> Directive {
        if let Some(rate) = observed_rate {
            if rate.is_finite() && rate > 0.0 {
                self.session.current_speed = rate;
            }
        }

        if !self.session.enabled {
            return Directive::Idle;
        }

        match (self.session.ad_active, ad_showing) {
            (false, true) => {
                self.session
                    .capture_original(observed_rate, self.ad_speed, self.coarse_tolerance);
                self.session.ad_active = true;
                Directive::EnterAd {
                    target: self.ad_speed,
                }
            }
            (true, false) => {
                self.session.ad_active = false;
                Directive::ExitAd {
                    restore_to: self.session.original_speed,
                }
            }
            (true, true) => match observed_rate {
                Some(rate) if (rate - self.ad_speed).abs() > self.coarse_tolerance => {
                    Directive::Correct {
                        target: self.ad_speed,
                    }
                }
                _ => Directive::Idle,
            },
            (false, false) => match observed_rate {
                // Restore failed or the player forced the ad rate back on:
                // push the viewer's speed again.
                Some(rate) if (rate - self.ad_speed).abs() <= self.coarse_tolerance => {
                    Directive::Correct {
                        target: self.session.original_speed,
                    }
                }
                // Any other change outside an ad is the viewer's choice;
                // adopt it instead of fighting it.
                rate => {
                    self.session
                        .capture_original(rate, self.ad_speed, self.coarse_tolerance);
                    Directive::Idle
                }
            },
        }
    }

    /// Flip monitoring on or off. Disabling mid-ad restores the viewer's
    /// speed before the machine goes quiet.
    pub fn set_enabled(&mut self, enabled: bool) -> Directive {
        if enabled == self.session.enabled {
            return Directive::Idle;
        }
        self.session.enabled = enabled;
        if !enabled && self.session.ad_active {
            self.session.ad_active = false;
            return Directive::ExitAd {
                restore_to: self.session.original_speed,
            };
        }
        Directive::Idle
    }

    /// Compare the page address against the last one seen; remembers the
    /// new address when it differs.
    pub fn url_changed(&mut self, url: &str) -> bool {
        if self.session.last_url.as_deref() == Some(url) {
            return false;
        }
        let first_sighting = self.session.last_url.is_none();
        self.session.last_url = Some(url.to_string());
        !first_sighting
    }

    pub fn reset_for_navigation(&mut self, url: Option<String>) {
        self.session.reset_for_navigation(url);
    }

    pub fn enabled(&self) -> bool {
        self.session.enabled
    }

    pub fn ad_active(&self) -> bool {
        self.session.ad_active
    }

    pub fn status(&self) -> StatusReply {
        StatusReply {
            enabled: self.session.enabled,
            ad_detected: self.session.ad_active,
            current_speed: self.session.current_speed,
            max_supported_speed: self.max_supported_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> AdStateMachine {
        AdStateMachine::new(&AppConfig::default())
    }

    #[test]
    fn ad_edge_speeds_up_once() {
        let mut m = machine();
        assert_eq!(
            m.evaluate(true, Some(1.0)),
            Directive::EnterAd { target: 16.0 }
        );
        // Same reading again: the edge already fired.
        assert_eq!(m.evaluate(true, Some(16.0)), Directive::Idle);
        assert_eq!(m.evaluate(true, Some(16.0)), Directive::Idle);
    }

    #[test]
    fn ad_end_restores_the_captured_speed() {
        let mut m = machine();
        m.evaluate(true, Some(1.75));
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::ExitAd { restore_to: 1.75 }
        );
        assert_eq!(m.evaluate(false, Some(1.75)), Directive::Idle);
    }

    #[test]
    fn restore_never_reapplies_the_ad_speed() {
        let mut m = machine();
        // The page was already at the ad rate when the ad edge fired.
        m.evaluate(true, Some(16.0));
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::ExitAd { restore_to: 1.0 }
        );
    }

    #[test]
    fn drift_is_corrected_without_a_new_edge() {
        let mut m = machine();
        m.evaluate(true, Some(1.0));
        assert_eq!(m.evaluate(true, Some(16.0)), Directive::Idle);
        // Page snapped the rate back mid-ad.
        assert_eq!(
            m.evaluate(true, Some(1.0)),
            Directive::Correct { target: 16.0 }
        );
    }

    #[test]
    fn small_rate_wobble_is_ignored() {
        let mut m = machine();
        m.evaluate(true, Some(1.0));
        assert_eq!(m.evaluate(true, Some(15.95)), Directive::Idle);
    }

    #[test]
    fn noad_stuck_at_the_ad_rate_is_pushed_back() {
        let mut m = machine();
        m.evaluate(true, Some(1.75));
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::ExitAd { restore_to: 1.75 }
        );
        // The restore write did not stick.
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::Correct { target: 1.75 }
        );
    }

    #[test]
    fn manual_speed_changes_are_adopted_not_fought() {
        let mut m = machine();
        assert_eq!(m.evaluate(false, Some(2.5)), Directive::Idle);
        assert_eq!(m.evaluate(false, Some(2.5)), Directive::Idle);
        // The adopted speed is what gets defended later.
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::Correct { target: 2.5 }
        );
        m.evaluate(true, Some(2.5));
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::ExitAd { restore_to: 2.5 }
        );
    }

    #[test]
    fn missing_video_still_arms_the_ad_state() {
        let mut m = machine();
        assert_eq!(m.evaluate(true, None), Directive::EnterAd { target: 16.0 });
        assert!(m.ad_active());
        assert_eq!(
            m.evaluate(false, None),
            Directive::ExitAd { restore_to: 1.0 }
        );
    }

    #[test]
    fn disable_mid_ad_restores_first() {
        let mut m = machine();
        m.evaluate(true, Some(2.0));
        assert_eq!(m.set_enabled(false), Directive::ExitAd { restore_to: 2.0 });
        assert!(!m.enabled());
        // Further readings are ignored while disabled.
        assert_eq!(m.evaluate(true, Some(1.0)), Directive::Idle);
        assert!(!m.ad_active());
    }

    #[test]
    fn reenable_during_an_ad_fires_a_fresh_edge() {
        let mut m = machine();
        m.set_enabled(false);
        assert_eq!(m.evaluate(true, Some(1.0)), Directive::Idle);
        assert_eq!(m.set_enabled(true), Directive::Idle);
        assert_eq!(
            m.evaluate(true, Some(1.0)),
            Directive::EnterAd { target: 16.0 }
        );
    }

    #[test]
    fn toggle_is_idempotent() {
        let mut m = machine();
        assert_eq!(m.set_enabled(true), Directive::Idle);
        m.evaluate(true, Some(1.0));
        assert_eq!(m.set_enabled(false), Directive::ExitAd { restore_to: 1.0 });
        assert_eq!(m.set_enabled(false), Directive::Idle);
    }

    #[test]
    fn navigation_reset_clears_ad_progress() {
        let mut m = machine();
        m.evaluate(true, Some(2.0));
        m.reset_for_navigation(Some("https://example.test/watch?v=2".to_string()));
        assert!(!m.ad_active());
        // The next ad captures fresh state instead of the stale 2.0.
        assert_eq!(
            m.evaluate(true, Some(1.0)),
            Directive::EnterAd { target: 16.0 }
        );
        assert_eq!(
            m.evaluate(false, Some(16.0)),
            Directive::ExitAd { restore_to: 1.0 }
        );
    }

    #[test]
    fn url_comparison_fires_on_change_only() {
        let mut m = machine();
        assert!(!m.url_changed("https://example.test/a"));
        assert!(!m.url_changed("https://example.test/a"));
        assert!(m.url_changed("https://example.test/b"));
        assert!(!m.url_changed("https://example.test/b"));
    }

    #[test]
    fn status_reports_the_session() {
        let mut m = machine();
        m.evaluate(true, Some(1.5));
        let status = m.status();
        assert!(status.enabled);
        assert!(status.ad_detected);
        assert_eq!(status.current_speed, 1.5);
        assert_eq!(status.max_supported_speed, 16.0);
    }
}
