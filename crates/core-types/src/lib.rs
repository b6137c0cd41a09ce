//! Shared value types for the adrush kernel crates.
//!
//! Everything here is plain data: handles into the page-side element
//! registry, media status snapshots, page events, toast notifications and
//! the popup control envelope. Behavior lives in the adapter and the core
//! loop, never in this crate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key into the in-page media element registry.
///
/// Never an owning reference: the element behind a handle may detach or be
/// replaced at any time, so holders revalidate through
/// `PagePort::media_status` before every use.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MediaHandle(pub String);

impl MediaHandle {
    /// Mint a fresh handle key. Registry keys are never reused, so a stale
    /// handle can never alias a replaced element.
    pub fn unique() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Point-in-time snapshot of a media element, as reported by the page.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatus {
    /// Still part of the document tree.
    pub attached: bool,
    /// Has at least metadata loaded (`readyState >= 1`).
    pub ready: bool,
    /// Current playback rate.
    pub rate: f64,
    pub duration: f64,
    pub paused: bool,
    pub current_time: f64,
}

impl MediaStatus {
    /// A handle is usable only while its element is attached with metadata.
    pub fn is_usable(&self) -> bool {
        self.attached && self.ready
    }

    /// Activity heuristic used by the whole-document fallback scan.
    pub fn looks_active(&self) -> bool {
        self.duration > 0.0 || !self.paused || self.current_time > 0.0
    }
}

/// Events surfaced by a page port to the monitor supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PageEvent {
    /// The player container changed (class attribute or child list).
    PlayerMutated,
    /// The document title node changed; a single-page navigation may have
    /// happened, compare addresses to find out.
    TitleChanged,
    /// The tab reported a new address.
    Navigated { url: String },
    /// The browser connection is gone; monitoring cannot continue.
    ConnectionLost { message: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Speedup,
    Restore,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Speedup => "speedup",
            NotificationKind::Restore => "restore",
        }
    }
}

/// Ephemeral toast request. At most one toast is live at a time; the page
/// side removes any prior instance before rendering a new one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn speedup(ad_speed: f64) -> Self {
        Self {
            message: format!("Ad detected - {ad_speed}x speed"),
            kind: NotificationKind::Speedup,
        }
    }

    pub fn restore() -> Self {
        Self {
            message: "Normal speed restored".to_string(),
            kind: NotificationKind::Restore,
        }
    }
}

/// Control-channel request envelope. Wire-compatible with the browser
/// extension messages the popup sends (`action` discriminator, camelCase).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    ToggleExtension { enabled: bool },
    GetStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToggleReply {
    pub success: bool,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub enabled: bool,
    pub ad_detected: bool,
    pub current_speed: f64,
    pub max_supported_speed: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorReply {
    pub success: bool,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Toggle(ToggleReply),
    Status(StatusReply),
    Error(ErrorReply),
}

impl ControlResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorReply {
            success: false,
            error: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_request_matches_popup_wire_format() {
        let toggle: ControlRequest =
            serde_json::from_value(json!({ "action": "toggleExtension", "enabled": false }))
                .unwrap();
        assert!(matches!(
            toggle,
            ControlRequest::ToggleExtension { enabled: false }
        ));

        let status: ControlRequest =
            serde_json::from_value(json!({ "action": "getStatus" })).unwrap();
        assert!(matches!(status, ControlRequest::GetStatus));
    }

    #[test]
    fn status_reply_serializes_camel_case() {
        let reply = StatusReply {
            enabled: true,
            ad_detected: true,
            current_speed: 16.0,
            max_supported_speed: 16.0,
        };
        let value = serde_json::to_value(ControlResponse::Status(reply)).unwrap();
        assert_eq!(value["adDetected"], json!(true));
        assert_eq!(value["currentSpeed"], json!(16.0));
        assert_eq!(value["maxSupportedSpeed"], json!(16.0));
    }

    #[test]
    fn media_status_parses_page_payload() {
        let status: MediaStatus = serde_json::from_value(json!({
            "attached": true,
            "ready": true,
            "rate": 1.5,
            "duration": 212.4,
            "paused": false,
            "currentTime": 31.0,
        }))
        .unwrap();
        assert!(status.is_usable());
        assert!(status.looks_active());
        assert_eq!(status.rate, 1.5);
    }

    #[test]
    fn detached_status_is_not_usable() {
        let status = MediaStatus {
            attached: false,
            ready: true,
            rate: 1.0,
            duration: 0.0,
            paused: true,
            current_time: 0.0,
        };
        assert!(!status.is_usable());
        assert!(!status.looks_active());
    }
}
