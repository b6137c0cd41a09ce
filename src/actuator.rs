//! Playback-rate writes with bounded set-and-verify retry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use adrush_core_types::MediaHandle;
use page_adapter::{PagePort, PortError};

use crate::metrics;

struct Inflight {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Writes a playback rate and keeps nudging until the page honors it or the
/// attempt budget runs out. Pages that own their player reset the rate right
/// back, so every write is verified after a short pause.
///
/// Only one retry task runs at a time; a newer target supersedes an older
/// one, and a detached element aborts the task immediately.
pub struct SpeedActuator {
    page: Arc<dyn PagePort>,
    retry_interval: Duration,
    max_attempts: u32,
    coarse_tolerance: f64,
    fine_tolerance: f64,
    inflight: Mutex<Option<Inflight>>,
}

impl SpeedActuator {
    pub fn new(
        page: Arc<dyn PagePort>,
        retry_interval: Duration,
        max_attempts: u32,
        coarse_tolerance: f64,
        fine_tolerance: f64,
    ) -> Self {
        Self {
            page,
            retry_interval,
            max_attempts,
            coarse_tolerance,
            fine_tolerance,
            inflight: Mutex::new(None),
        }
    }

    /// Request a rate change. Returns `true` when the request was accepted
    /// against a live element; verification continues in the background.
    pub async fn apply(&self, handle: &MediaHandle, target: f64) -> Result<bool, PortError> {
        if !target.is_finite() || target <= 0.0 {
            warn!(target: "actuator", target_rate = target, "refusing invalid playback rate");
            return Ok(false);
        }

        let status = match self.page.media_status(handle).await? {
            Some(status) if status.attached => status,
            _ => return Ok(false),
        };

        self.cancel_pending();

        if (status.rate - target).abs() < self.coarse_tolerance {
            debug!(target: "actuator", rate = status.rate, "already at requested rate");
            return Ok(true);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::drive(
            Arc::clone(&self.page),
            handle.clone(),
            target,
            self.retry_interval,
            self.max_attempts,
            self.fine_tolerance,
            cancel.clone(),
        ));
        *self.inflight.lock() = Some(Inflight { cancel, task });
        Ok(true)
    }

    /// Abort any in-flight retry without touching the element again.
    pub fn cancel_pending(&self) {
        if let Some(inflight) = self.inflight.lock().take() {
            inflight.cancel.cancel();
            inflight.task.abort();
        }
    }

    /// Wait for the current retry task to finish. Test hook; the monitor
    /// loop never blocks on actuation.
    pub async fn settled(&self) {
        let task = self.inflight.lock().take().map(|inflight| inflight.task);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn drive(
        page: Arc<dyn PagePort>,
        handle: MediaHandle,
        target: f64,
        retry_interval: Duration,
        max_attempts: u32,
        fine_tolerance: f64,
        cancel: CancellationToken,
    ) {
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return;
            }

            metrics::record_set_attempt();
            match page.set_playback_rate(&handle, target).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "actuator", attempt, "element gone, abandoning rate write");
                    return;
                }
                Err(err) => {
                    warn!(target: "actuator", attempt, ?err, "rate write failed");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(retry_interval) => {}
            }

            match page.media_status(&handle).await {
                Ok(Some(status)) if status.attached => {
                    if (status.rate - target).abs() < fine_tolerance {
                        debug!(target: "actuator", attempt, rate = status.rate, "rate verified");
                        return;
                    }
                }
                Ok(_) => {
                    debug!(target: "actuator", attempt, "element gone during verification");
                    return;
                }
                Err(err) => {
                    warn!(target: "actuator", attempt, ?err, "verification read failed");
                    return;
                }
            }
        }

        metrics::record_set_exhausted();
        warn!(
            target: "actuator",
            target_rate = target,
            attempts = max_attempts,
            "page kept rejecting the playback rate"
        );
    }
}
