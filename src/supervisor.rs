//! The monitor loop: one task that owns all evaluation for a page.
//!
//! Mutation and navigation events from the page port wake the loop early;
//! a fixed-interval tick backstops anything the observers miss. Every
//! evaluation runs on this one task, so state transitions are serialized by
//! construction.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adrush_core_types::{PageEvent, StatusReply, ToggleReply};
use page_adapter::PagePort;

use crate::actuator::SpeedActuator;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::locator::VideoLocator;
use crate::metrics;
use crate::notify::NotificationPresenter;
use crate::probe::AdSignalProbe;
use crate::state_machine::{AdStateMachine, Directive};

enum ControlCommand {
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<ToggleReply>,
    },
    Status {
        reply: oneshot::Sender<StatusReply>,
    },
}

/// Owns the monitor task for one page. `start` always tears down any
/// previous incarnation before spawning a fresh one; `stop` is safe to call
/// any number of times.
pub struct MonitorSupervisor {
    cfg: AppConfig,
    page: Arc<dyn PagePort>,
    running: tokio::sync::Mutex<Running>,
}

#[derive(Default)]
struct Running {
    command_tx: Option<mpsc::Sender<ControlCommand>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Running {
    async fn teardown(&mut self) {
        self.command_tx = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(target: "supervisor", ?err, "monitor task ended abnormally");
                }
            }
        }
    }
}

impl MonitorSupervisor {
    pub fn new(cfg: AppConfig, page: Arc<dyn PagePort>) -> Self {
        Self {
            cfg,
            page,
            running: tokio::sync::Mutex::new(Running::default()),
        }
    }

    /// (Re)spawn the monitor task, tearing down any previous one first.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        running.teardown().await;

        let (command_tx, command_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let worker = Worker::new(self.cfg.clone(), Arc::clone(&self.page), command_rx);
        running.task = Some(tokio::spawn(worker.run(cancel.clone())));
        running.cancel = Some(cancel);
        running.command_tx = Some(command_tx);
        info!(target: "supervisor", "monitor started");
    }

    /// Stop the monitor task and wait for it to wind down.
    pub async fn stop(&self) {
        self.running.lock().await.teardown().await;
        info!(target: "supervisor", "monitor stopped");
    }

    async fn sender(&self) -> Result<mpsc::Sender<ControlCommand>> {
        self.running
            .lock()
            .await
            .command_tx
            .clone()
            .ok_or(AppError::MonitorStopped)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<ToggleReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender()
            .await?
            .send(ControlCommand::SetEnabled {
                enabled,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AppError::MonitorStopped)?;
        reply_rx.await.map_err(|_| AppError::MonitorStopped)
    }

    pub async fn status(&self) -> Result<StatusReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender()
            .await?
            .send(ControlCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| AppError::MonitorStopped)?;
        reply_rx.await.map_err(|_| AppError::MonitorStopped)
    }
}

struct Worker {
    cfg: AppConfig,
    page: Arc<dyn PagePort>,
    probe: AdSignalProbe,
    locator: VideoLocator,
    actuator: SpeedActuator,
    presenter: NotificationPresenter,
    machine: AdStateMachine,
    commands: mpsc::Receiver<ControlCommand>,
    events: broadcast::Receiver<PageEvent>,
    settle_until: Option<Instant>,
}

impl Worker {
    fn new(
        cfg: AppConfig,
        page: Arc<dyn PagePort>,
        commands: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        let probe = AdSignalProbe::new(Arc::clone(&page), cfg.ad_markers.clone());
        let locator = VideoLocator::new(Arc::clone(&page));
        let actuator = SpeedActuator::new(
            Arc::clone(&page),
            cfg.set_retry_interval(),
            cfg.max_set_attempts,
            cfg.coarse_tolerance,
            cfg.fine_tolerance,
        );
        let presenter = NotificationPresenter::new(Arc::clone(&page));
        let machine = AdStateMachine::new(&cfg);
        let events = page.subscribe();
        Self {
            cfg,
            page,
            probe,
            locator,
            actuator,
            presenter,
            machine,
            commands,
            events,
            settle_until: None,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut tick = interval(self.cfg.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(cmd) = self.commands.recv() => {
                    self.handle_command(cmd).await;
                }
                event = self.events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(target: "supervisor", missed, "page event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Port dropped its sender; the tick keeps polling.
                            self.events = self.page.subscribe();
                        }
                    }
                }
                _ = tick.tick() => {
                    metrics::record_tick();
                    self.check_navigation().await;
                    self.evaluate().await;
                }
            }
        }

        // Leave the page at the viewer's speed on the way out.
        let parting = self.machine.set_enabled(false);
        self.execute(parting, false).await;
        self.actuator.settled().await;
    }

    async fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::SetEnabled { enabled, reply } => {
                let directive = self.machine.set_enabled(enabled);
                self.execute(directive, true).await;
                info!(target: "supervisor", enabled, "monitoring toggled");
                let _ = reply.send(ToggleReply {
                    success: true,
                    enabled,
                });
            }
            ControlCommand::Status { reply } => {
                let _ = reply.send(self.machine.status());
            }
        }
    }

    async fn handle_event(&mut self, event: PageEvent) {
        match event {
            PageEvent::PlayerMutated => {
                if !self.settling() {
                    self.evaluate().await;
                }
            }
            PageEvent::TitleChanged => {
                // Title churn is how single-page navigations announce
                // themselves; the address comparison decides.
                self.check_navigation().await;
                if !self.settling() {
                    self.evaluate().await;
                }
            }
            PageEvent::Navigated { url } => {
                self.navigation_reset(Some(url));
            }
            PageEvent::ConnectionLost { message } => {
                warn!(target: "supervisor", message, "page connection lost");
                self.locator.invalidate();
                self.actuator.cancel_pending();
            }
        }
    }

    fn settling(&self) -> bool {
        self.settle_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    async fn check_navigation(&mut self) {
        let url = match self.page.current_url().await {
            Ok(url) => url,
            Err(err) => {
                debug!(target: "supervisor", ?err, "address read failed");
                return;
            }
        };
        if self.machine.url_changed(&url) {
            self.navigation_reset(Some(url));
        }
    }

    fn navigation_reset(&mut self, url: Option<String>) {
        debug!(target: "supervisor", url = url.as_deref().unwrap_or("?"), "navigation detected, resetting");
        metrics::record_navigation_reset();
        self.locator.invalidate();
        self.actuator.cancel_pending();
        self.machine.reset_for_navigation(url);
        // Give the new page a moment before evaluation resumes.
        self.settle_until = Some(Instant::now() + self.cfg.settle_delay());
    }

    async fn evaluate(&mut self) {
        if self.settling() {
            return;
        }
        // Disabled means hands off the page; the toggle path already
        // restored the viewer's speed.
        if !self.machine.enabled() {
            return;
        }

        let signal = match self.probe.sample().await {
            Ok(signal) => signal,
            Err(err) => {
                metrics::record_probe_failure();
                warn!(target: "supervisor", ?err, "ad signal read failed");
                return;
            }
        };

        let located = match self.locator.find().await {
            Ok(located) => located,
            Err(err) => {
                debug!(target: "supervisor", ?err, "media lookup failed");
                None
            }
        };
        let observed_rate = located.as_ref().map(|(_, status)| status.rate);

        let directive = self.machine.evaluate(signal.ad_showing, observed_rate);
        if !matches!(directive, Directive::Idle) {
            debug!(
                target: "supervisor",
                ad = signal.ad_showing,
                rate = ?observed_rate,
                ?directive,
                "state transition"
            );
        }

        let handle = located.map(|(handle, _)| handle);
        match directive {
            Directive::Idle => {}
            Directive::EnterAd { target } => {
                metrics::record_ad_detected();
                // The cue announces the transition itself; whether the rate
                // write lands is the actuator's business.
                self.presenter.speedup(target).await;
                if let Some(handle) = handle {
                    match self.actuator.apply(&handle, target).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(target: "supervisor", "ad started but the element refused the write")
                        }
                        Err(err) => warn!(target: "supervisor", ?err, "speedup failed"),
                    }
                } else {
                    debug!(target: "supervisor", "ad started with no media element yet");
                }
            }
            Directive::ExitAd { restore_to } => {
                metrics::record_speed_restore();
                if let Some(handle) = handle {
                    match self.actuator.apply(&handle, restore_to).await {
                        Ok(true) => self.presenter.restore().await,
                        Ok(false) => {
                            debug!(target: "supervisor", "ad ended but the element is gone")
                        }
                        Err(err) => warn!(target: "supervisor", ?err, "restore failed"),
                    }
                }
            }
            Directive::Correct { target } => {
                if let Some(handle) = handle {
                    if let Err(err) = self.actuator.apply(&handle, target).await {
                        warn!(target: "supervisor", ?err, "drift correction failed");
                    }
                }
            }
        }
    }

    /// Execute a directive outside the tick path (toggle, shutdown). The
    /// media element is looked up on demand.
    async fn execute(&mut self, directive: Directive, announce: bool) {
        match directive {
            Directive::Idle => {}
            Directive::ExitAd { restore_to } => {
                metrics::record_speed_restore();
                let located = self.locator.find().await.ok().flatten();
                if let Some((handle, _)) = located {
                    match self.actuator.apply(&handle, restore_to).await {
                        Ok(true) if announce => self.presenter.restore().await,
                        Ok(_) => {}
                        Err(err) => warn!(target: "supervisor", ?err, "restore failed"),
                    }
                }
            }
            // Toggling on never speeds up by itself; the next reading does.
            Directive::EnterAd { .. } | Directive::Correct { .. } => {}
        }
    }
}
