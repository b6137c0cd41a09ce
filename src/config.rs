use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

pub const DEFAULT_WATCH_URL: &str = "https://www.youtube.com/";
pub const DEFAULT_CONTROL_LISTEN: &str = "127.0.0.1:8642";

/// Runtime configuration for the monitor loop and the speed actuator.
///
/// The defaults reproduce the tuning the detection loop was calibrated with:
/// a 250ms poll, a 500ms settle window after navigation, and a bounded
/// set-verify retry of 20 attempts at 50ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Page to open when the browser comes up without a usable tab.
    pub watch_url: String,

    /// Playback rate applied while an ad is showing.
    pub ad_speed: f64,

    /// Upper bound the page is known to honor; reported over the control
    /// surface and used to clamp captured speeds.
    pub max_supported_speed: f64,

    /// Poll interval of the monitor loop.
    pub tick_interval_ms: u64,

    /// Quiet window after a navigation before evaluation resumes.
    pub settle_delay_ms: u64,

    /// Delay between set-rate attempts.
    pub set_retry_interval_ms: u64,

    /// Attempts before a rate write is abandoned.
    pub max_set_attempts: u32,

    /// Rate difference under which a write is skipped entirely.
    pub coarse_tolerance: f64,

    /// Rate difference under which a write counts as verified.
    pub fine_tolerance: f64,

    /// Player container class tokens that signal an ad.
    pub ad_markers: Vec<String>,

    /// CSS selector of the player container.
    pub player_selector: String,

    /// Address the control/status HTTP surface binds to.
    pub control_listen: SocketAddr,

    /// Whether monitoring starts enabled.
    pub start_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_url: DEFAULT_WATCH_URL.to_string(),
            ad_speed: 16.0,
            max_supported_speed: 16.0,
            tick_interval_ms: 250,
            settle_delay_ms: 500,
            set_retry_interval_ms: 50,
            max_set_attempts: 20,
            coarse_tolerance: 0.1,
            fine_tolerance: 0.05,
            ad_markers: vec!["ad-showing".to_string(), "ad-interrupting".to_string()],
            player_selector: "#movie_player".to_string(),
            control_listen: DEFAULT_CONTROL_LISTEN.parse().expect("valid default addr"),
            start_enabled: true,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `ADRUSH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(url) = env::var("ADRUSH_WATCH_URL") {
            cfg.watch_url = url;
        }
        if let Ok(raw) = env::var("ADRUSH_AD_SPEED") {
            cfg.ad_speed = raw
                .parse()
                .map_err(|_| AppError::config(format!("invalid ADRUSH_AD_SPEED: {raw}")))?;
        }
        if let Ok(raw) = env::var("ADRUSH_TICK_MS") {
            cfg.tick_interval_ms = raw
                .parse()
                .map_err(|_| AppError::config(format!("invalid ADRUSH_TICK_MS: {raw}")))?;
        }
        if let Ok(raw) = env::var("ADRUSH_CONTROL_LISTEN") {
            cfg.control_listen = raw
                .parse()
                .map_err(|_| AppError::config(format!("invalid ADRUSH_CONTROL_LISTEN: {raw}")))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.ad_speed.is_finite() || self.ad_speed <= 0.0 {
            return Err(AppError::config("ad_speed must be positive"));
        }
        if self.ad_speed > self.max_supported_speed {
            return Err(AppError::config(format!(
                "ad_speed {} exceeds max_supported_speed {}",
                self.ad_speed, self.max_supported_speed
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(AppError::config("tick_interval_ms must be nonzero"));
        }
        if self.max_set_attempts == 0 {
            return Err(AppError::config("max_set_attempts must be nonzero"));
        }
        if self.coarse_tolerance <= 0.0 || self.fine_tolerance <= 0.0 {
            return Err(AppError::config("tolerances must be positive"));
        }
        if self.ad_markers.is_empty() {
            return Err(AppError::config("at least one ad marker is required"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn set_retry_interval(&self) -> Duration {
        Duration::from_millis(self.set_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_ad_speed_above_supported_ceiling() {
        let cfg = AppConfig {
            ad_speed: 32.0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_tick() {
        let cfg = AppConfig {
            tick_interval_ms: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
