use async_trait::async_trait;
use tokio::sync::broadcast;

use adrush_core_types::{MediaHandle, MediaStatus, Notification, PageEvent};

use crate::error::PortError;

/// Broadcast bus carrying page events to the monitor supervisor.
pub type PageEventBus = broadcast::Sender<PageEvent>;

pub fn page_event_bus(capacity: usize) -> (PageEventBus, broadcast::Receiver<PageEvent>) {
    broadcast::channel(capacity.max(1))
}

/// The browser seam. Everything the detection/speed-control loop needs from
/// the page, and nothing else: class reads, media element discovery and
/// revalidation, playback-rate writes, address reads, toast rendering.
///
/// Every method must be cheap and safe to call at tick frequency. "Element
/// not there" is expressed as `Ok(None)` / `Ok(false)`, never as an error;
/// errors mean the conversation with the browser itself failed.
#[async_trait]
pub trait PagePort: Send + Sync {
    /// Current class string of the player container, `None` when the
    /// container is absent from the document.
    async fn player_classes(&self) -> Result<Option<String>, PortError>;

    /// Media element inside the player container with metadata loaded.
    async fn video_in_player(&self) -> Result<Option<MediaHandle>, PortError>;

    /// Whole-document fallback: any media element exhibiting activity
    /// (positive duration, playing, or nonzero position) with metadata.
    async fn scan_videos(&self) -> Result<Option<MediaHandle>, PortError>;

    /// Revalidate a handle. `None` when the registry entry is gone or the
    /// element has left the document.
    async fn media_status(&self, handle: &MediaHandle) -> Result<Option<MediaStatus>, PortError>;

    /// Write the playback rate. `false` when the handle no longer resolves
    /// to an attached element (the write was not attempted).
    async fn set_playback_rate(&self, handle: &MediaHandle, rate: f64) -> Result<bool, PortError>;

    /// Current page address, for single-page-navigation detection.
    async fn current_url(&self) -> Result<String, PortError>;

    /// Render a transient toast, superseding any prior one.
    async fn show_notification(&self, note: &Notification) -> Result<(), PortError>;

    /// Subscribe to structural/navigation events for this page.
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;
}
