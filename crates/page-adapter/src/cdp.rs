use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adrush_core_types::{MediaHandle, MediaStatus, Notification, PageEvent};

use crate::config::PageConfig;
use crate::error::{PortError, PortErrorKind};
use crate::metrics;
use crate::port::{PageEventBus, PagePort};
use crate::scripts;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// Session bookkeeping for the one page target we drive.
#[derive(Default)]
struct Tracked {
    target_id: Option<String>,
    session_id: Option<String>,
    last_url: Option<String>,
}

/// `PagePort` over a flat-session CDP conversation.
///
/// The event loop attaches to the first page target that appears, enables the
/// Page domain, registers the signal binding and installs the mutation
/// observers. Everything else is `Runtime.evaluate` with by-value results.
pub struct CdpPagePort {
    cfg: PageConfig,
    transport: Arc<dyn CdpTransport>,
    events: PageEventBus,
    tracked: Arc<RwLock<Tracked>>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CdpPagePort {
    pub fn new(cfg: PageConfig, transport: Arc<dyn CdpTransport>, events: PageEventBus) -> Self {
        Self {
            cfg,
            transport,
            events,
            tracked: Arc::new(RwLock::new(Tracked::default())),
            cancel: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Connect to the browser and start consuming its event stream.
    pub async fn start(&self) -> Result<(), PortError> {
        self.transport.start().await?;

        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let tracked = Arc::clone(&self.tracked);
        let cancel = self.cancel.clone();
        let player_selector = self.cfg.player_selector.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = transport.next_event() => {
                        match event {
                            Some(event) => {
                                Self::handle_event(
                                    &transport,
                                    &events,
                                    &tracked,
                                    &player_selector,
                                    event,
                                )
                                .await;
                            }
                            None => {
                                let _ = events.send(PageEvent::ConnectionLost {
                                    message: "cdp event stream ended".to_string(),
                                });
                                // The transport recreates its runtime lazily;
                                // back off before polling it again.
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(task);

        info!(target: "page-cdp", "cdp page port started");
        Ok(())
    }

    /// Open a tab at `url` when the browser came up without one we can use.
    pub async fn create_page(&self, url: &str) -> Result<(), PortError> {
        self.send_browser("Target.createTarget", json!({ "url": url }))
            .await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }

    async fn handle_event(
        transport: &Arc<dyn CdpTransport>,
        events: &PageEventBus,
        tracked: &Arc<RwLock<Tracked>>,
        player_selector: &str,
        event: TransportEvent,
    ) {
        match event.method.as_str() {
            "Target.targetCreated" => {
                let info = &event.params["targetInfo"];
                if info["type"].as_str() != Some("page") {
                    return;
                }
                let already_tracked = tracked.read().target_id.is_some();
                if already_tracked {
                    return;
                }
                if let Some(target_id) = info["targetId"].as_str() {
                    debug!(target: "page-cdp", target_id, "attaching to page target");
                    let result = transport
                        .send_command(
                            CommandTarget::Browser,
                            "Target.attachToTarget",
                            json!({ "targetId": target_id, "flatten": true }),
                        )
                        .await;
                    if let Err(err) = result {
                        warn!(target: "page-cdp", ?err, "failed to attach to page target");
                    }
                }
            }
            "Target.attachedToTarget" => {
                let info = &event.params["targetInfo"];
                if info["type"].as_str() != Some("page") {
                    return;
                }
                let session_id = match event.params["sessionId"].as_str() {
                    Some(id) => id.to_string(),
                    None => return,
                };
                {
                    let mut guard = tracked.write();
                    // First page wins; later tabs are ignored.
                    if guard.session_id.is_some() {
                        return;
                    }
                    guard.target_id = info["targetId"].as_str().map(str::to_string);
                    guard.session_id = Some(session_id.clone());
                    guard.last_url = info["url"].as_str().map(str::to_string);
                }
                info!(target: "page-cdp", session = %session_id, "page session attached");
                Self::prepare_session(transport, &session_id, player_selector).await;
            }
            "Target.targetInfoChanged" => {
                let info = &event.params["targetInfo"];
                let target_id = info["targetId"].as_str();
                let url = info["url"].as_str();
                let changed = {
                    let mut guard = tracked.write();
                    if guard.target_id.as_deref() != target_id {
                        false
                    } else {
                        match url {
                            Some(url) if guard.last_url.as_deref() != Some(url) => {
                                guard.last_url = Some(url.to_string());
                                true
                            }
                            _ => false,
                        }
                    }
                };
                if changed {
                    if let Some(url) = url {
                        metrics::record_page_event();
                        let _ = events.send(PageEvent::Navigated {
                            url: url.to_string(),
                        });
                    }
                }
            }
            "Target.targetDestroyed" | "Target.detachedFromTarget" => {
                let gone_target = event.params["targetId"].as_str();
                let gone_session = event.params["sessionId"].as_str();
                let lost = {
                    let mut guard = tracked.write();
                    let matches_target =
                        gone_target.is_some() && guard.target_id.as_deref() == gone_target;
                    let matches_session =
                        gone_session.is_some() && guard.session_id.as_deref() == gone_session;
                    if matches_target || matches_session {
                        *guard = Tracked::default();
                        true
                    } else {
                        false
                    }
                };
                if lost {
                    metrics::record_page_event();
                    let _ = events.send(PageEvent::ConnectionLost {
                        message: "page target went away".to_string(),
                    });
                }
            }
            "Page.lifecycleEvent" => {
                if event.params["name"].as_str() != Some("load") {
                    return;
                }
                let session = tracked.read().session_id.clone();
                let same_session = session.as_deref() == event.session_id.as_deref();
                if let (Some(session_id), true) = (session, same_session) {
                    // A full load wipes the observers with the document.
                    Self::install_observers(transport, &session_id, player_selector).await;
                }
            }
            "Runtime.bindingCalled" => {
                if event.params["name"].as_str() != Some(scripts::SIGNAL_BINDING) {
                    return;
                }
                match event.params["payload"].as_str() {
                    Some("player") => {
                        metrics::record_page_event();
                        let _ = events.send(PageEvent::PlayerMutated);
                    }
                    Some("title") => {
                        metrics::record_page_event();
                        let _ = events.send(PageEvent::TitleChanged);
                    }
                    other => {
                        debug!(target: "page-cdp", ?other, "unrecognized binding payload");
                    }
                }
            }
            _ => {}
        }
    }

    async fn prepare_session(
        transport: &Arc<dyn CdpTransport>,
        session_id: &str,
        player_selector: &str,
    ) {
        let session = CommandTarget::Session(session_id.to_string());
        let setup: [(&str, Value); 3] = [
            ("Page.enable", json!({})),
            ("Page.setLifecycleEventsEnabled", json!({ "enabled": true })),
            (
                "Runtime.addBinding",
                json!({ "name": scripts::SIGNAL_BINDING }),
            ),
        ];
        for (method, params) in setup {
            if let Err(err) = transport.send_command(session.clone(), method, params).await {
                warn!(target: "page-cdp", method, ?err, "session setup command failed");
            }
        }
        Self::install_observers(transport, session_id, player_selector).await;
    }

    async fn install_observers(
        transport: &Arc<dyn CdpTransport>,
        session_id: &str,
        player_selector: &str,
    ) {
        let expression = scripts::install_observers(player_selector);
        let result = transport
            .send_command(
                CommandTarget::Session(session_id.to_string()),
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await;
        match result {
            Ok(value) => {
                let outcome = value["result"]["value"].as_str().unwrap_or("unknown");
                debug!(target: "page-cdp", outcome, "observer install evaluated");
            }
            Err(err) => {
                warn!(target: "page-cdp", ?err, "observer install failed");
            }
        }
    }

    fn session(&self) -> Result<String, PortError> {
        self.tracked
            .read()
            .session_id
            .clone()
            .ok_or_else(|| PortError::new(PortErrorKind::NoSession).retriable(true))
    }

    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, PortError> {
        metrics::record_command(method);
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
            .map_err(|err| {
                metrics::record_command_failure(method);
                err
            })
    }

    /// Evaluate an expression in the tracked page and return its by-value
    /// result. Page-side exceptions surface as `EvalFailed`.
    async fn eval(&self, expression: String) -> Result<Value, PortError> {
        let session_id = self.session()?;
        metrics::record_command("Runtime.evaluate");
        let reply = self
            .transport
            .send_command(
                CommandTarget::Session(session_id),
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await
            .map_err(|err| {
                metrics::record_command_failure("Runtime.evaluate");
                err
            })?;

        if let Some(details) = reply.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("page-side exception");
            metrics::record_command_failure("Runtime.evaluate");
            return Err(PortError::new(PortErrorKind::EvalFailed).with_hint(text.to_string()));
        }

        Ok(reply
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl PagePort for CdpPagePort {
    async fn player_classes(&self) -> Result<Option<String>, PortError> {
        let value = self
            .eval(scripts::player_classes(&self.cfg.player_selector))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn video_in_player(&self) -> Result<Option<MediaHandle>, PortError> {
        let value = self
            .eval(scripts::video_in_player(&self.cfg.player_selector))
            .await?;
        Ok(value.as_str().map(|key| MediaHandle(key.to_string())))
    }

    async fn scan_videos(&self) -> Result<Option<MediaHandle>, PortError> {
        let value = self.eval(scripts::scan_videos()).await?;
        Ok(value.as_str().map(|key| MediaHandle(key.to_string())))
    }

    async fn media_status(&self, handle: &MediaHandle) -> Result<Option<MediaStatus>, PortError> {
        let value = self.eval(scripts::media_status(handle.as_str())).await?;
        if value.is_null() {
            return Ok(None);
        }
        let status: MediaStatus = serde_json::from_value(value).map_err(|err| {
            PortError::new(PortErrorKind::EvalFailed)
                .with_hint(format!("malformed media status: {err}"))
        })?;
        Ok(Some(status))
    }

    async fn set_playback_rate(&self, handle: &MediaHandle, rate: f64) -> Result<bool, PortError> {
        let value = self
            .eval(scripts::set_playback_rate(handle.as_str(), rate))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn current_url(&self) -> Result<String, PortError> {
        let value = self.eval(scripts::current_url().to_string()).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PortError::new(PortErrorKind::EvalFailed).with_hint("non-string url"))
    }

    async fn show_notification(&self, note: &Notification) -> Result<(), PortError> {
        self.eval(scripts::show_toast(note)).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }
}
