//! Per-page playback state, owned by the monitor task.

/// What the monitor believes about the page right now.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub enabled: bool,
    pub ad_active: bool,
    /// Last known non-ad playback rate. Never the ad rate itself; readings
    /// at or near it are refused on capture.
    pub original_speed: f64,
    /// Last playback rate observed or requested.
    pub current_speed: f64,
    pub last_url: Option<String>,
}

impl PlaybackSession {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ad_active: false,
            original_speed: 1.0,
            current_speed: 1.0,
            last_url: None,
        }
    }

    /// Adopt a rate reading as the viewer's speed. Readings that are absent,
    /// non-finite, non-positive, or within `tolerance` of the ad rate leave
    /// the previous capture in place.
    pub fn capture_original(&mut self, observed: Option<f64>, ad_speed: f64, tolerance: f64) {
        if let Some(rate) = observed {
            if rate.is_finite() && rate > 0.0 && (rate - ad_speed).abs() > tolerance {
                self.original_speed = rate;
            }
        }
    }

    /// Forget ad progress after a navigation. The enabled flag survives;
    /// everything tied to the old document does not.
    pub fn reset_for_navigation(&mut self, url: Option<String>) {
        self.ad_active = false;
        self.original_speed = 1.0;
        self.current_speed = 1.0;
        self.last_url = url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_adopts_a_sane_viewer_speed() {
        let mut session = PlaybackSession::new(true);
        session.capture_original(Some(2.0), 16.0, 0.1);
        assert_eq!(session.original_speed, 2.0);
    }

    #[test]
    fn capture_never_adopts_the_ad_speed() {
        let mut session = PlaybackSession::new(true);
        session.capture_original(Some(1.75), 16.0, 0.1);
        session.capture_original(Some(16.0), 16.0, 0.1);
        assert_eq!(session.original_speed, 1.75);

        session.capture_original(Some(16.05), 16.0, 0.1);
        assert_eq!(session.original_speed, 1.75);
    }

    #[test]
    fn capture_rejects_garbage_readings() {
        let mut session = PlaybackSession::new(true);
        session.capture_original(None, 16.0, 0.1);
        session.capture_original(Some(-3.0), 16.0, 0.1);
        session.capture_original(Some(0.0), 16.0, 0.1);
        session.capture_original(Some(f64::NAN), 16.0, 0.1);
        assert_eq!(session.original_speed, 1.0);
    }

    #[test]
    fn navigation_reset_keeps_the_enabled_flag() {
        let mut session = PlaybackSession::new(false);
        session.ad_active = true;
        session.original_speed = 2.0;
        session.reset_for_navigation(Some("https://example.test/next".to_string()));
        assert!(!session.enabled);
        assert!(!session.ad_active);
        assert_eq!(session.original_speed, 1.0);
        assert_eq!(session.last_url.as_deref(), Some("https://example.test/next"));
    }
}
