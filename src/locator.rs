//! Media element discovery with a revalidated cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use adrush_core_types::{MediaHandle, MediaStatus};
use page_adapter::{PagePort, PortError};

/// Finds the media element to control. The last good handle is cached and
/// revalidated on every lookup; a stale handle is dropped before the player
/// container is queried, with a whole-document scan as the fallback.
pub struct VideoLocator {
    page: Arc<dyn PagePort>,
    cached: Mutex<Option<MediaHandle>>,
}

impl VideoLocator {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self {
            page,
            cached: Mutex::new(None),
        }
    }

    /// Current media element, if any, together with its status snapshot.
    pub async fn find(&self) -> Result<Option<(MediaHandle, MediaStatus)>, PortError> {
        let cached = self.cached.lock().clone();
        if let Some(handle) = cached {
            match self.page.media_status(&handle).await? {
                Some(status) if status.is_usable() => return Ok(Some((handle, status))),
                _ => {
                    debug!(target: "locator", handle = %handle.as_str(), "cached media handle went stale");
                    self.invalidate();
                }
            }
        }

        let found = match self.page.video_in_player().await? {
            Some(handle) => Some(handle),
            None => self.page.scan_videos().await?,
        };

        let Some(handle) = found else {
            return Ok(None);
        };
        let Some(status) = self.page.media_status(&handle).await? else {
            return Ok(None);
        };
        if !status.is_usable() {
            return Ok(None);
        }

        *self.cached.lock() = Some(handle.clone());
        Ok(Some((handle, status)))
    }

    /// Playback rate of the located element, if one can be found.
    pub async fn current_rate(&self) -> Option<f64> {
        match self.find().await {
            Ok(located) => located.map(|(_, status)| status.rate),
            Err(_) => None,
        }
    }

    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
