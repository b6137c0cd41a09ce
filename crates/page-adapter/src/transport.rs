use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PageConfig;
use crate::error::{PortError, PortErrorKind};

/// A decoded CDP event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Raw command/event conversation with one Chromium instance. Method ids are
/// protocol strings; params and results are plain JSON.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), PortError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError>;
}

pub struct ChromiumTransport {
    cfg: PageConfig,
    state: Mutex<Option<Arc<RuntimeState>>>,
}

impl ChromiumTransport {
    pub fn new(cfg: PageConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(None),
        }
    }

    /// Lazily (re)establish the websocket runtime. A runtime whose loop has
    /// exited is replaced on the next use.
    async fn runtime(&self) -> Result<Arc<RuntimeState>, PortError> {
        let mut guard = self.state.lock().await;
        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(Arc::clone(rt));
            }
        }
        let runtime = Arc::new(RuntimeState::start(self.cfg.clone()).await?);
        *guard = Some(Arc::clone(&runtime));
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), PortError> {
        let runtime = self.runtime().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);

        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                serde_json::json!({ "discover": true }),
                deadline,
            )
            .await?;
        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setAutoAttach",
                serde_json::json!({
                    "autoAttach": true,
                    "waitForDebuggerOnStart": false,
                    "flatten": true,
                }),
                deadline,
            )
            .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "page-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, PortError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: PageConfig) -> Result<Self, PortError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = Arc::clone(&alive);
        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "page-transport", ?err, "transport loop terminated with error");
            }
        });

        info!(target: "page-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, PortError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(PortError::new(PortErrorKind::Timeout).with_hint("command timed out")),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn browser_config(cfg: &PageConfig) -> Result<BrowserConfig, PortError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(PortError::new(PortErrorKind::CdpIo).with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            )));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                PortError::new(PortErrorKind::Internal)
                    .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?;
            cwd.join(&cfg.user_data_dir)
        };
        fs::create_dir_all(&profile_dir).map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("failed to ensure user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--remote-allow-origins=*",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder.build().map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("browser config error: {err}"))
        })
    }

    async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), PortError> {
        let mut child = config.launch().map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        let ws_url = Self::await_devtools_url(&mut child).await?;

        Ok((Some(child), ws_url))
    }

    /// Wait for the launched Chromium to print its DevTools websocket address
    /// on stderr. The child keeps the rest of its stderr; only the banner is
    /// consumed.
    async fn await_devtools_url(child: &mut Child) -> Result<String, PortError> {
        let stderr = child.stderr.take().ok_or_else(|| {
            PortError::new(PortErrorKind::Internal)
                .with_hint("chromium child has no stderr handle")
        })?;
        let mut lines = BufReader::new(stderr).lines();

        let scan = async {
            while let Some(line) = lines.next().await {
                let line = line.map_err(|err| {
                    PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string())
                })?;
                if let Some(url) = devtools_banner_url(&line) {
                    return Ok(url.to_string());
                }
            }
            Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint("chromium exited before announcing a devtools websocket url"))
        };

        tokio::time::timeout(Duration::from_secs(20), scan)
            .await
            .map_err(|_| {
                PortError::new(PortErrorKind::Timeout)
                    .with_hint("no devtools websocket url within the launch window")
                    .retriable(true)
            })?
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PortError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, PortError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::submit(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::resolve(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::forward(event, &event_tx).await {
                                warn!(target: "page-transport", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let port_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(port_err.clone()));
                            }
                            return Err(port_err);
                        }
                        None => {
                            let err = PortError::new(PortErrorKind::CdpIo)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn submit(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, PortError>>>,
    ) -> Result<(), PortError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let port_err = PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(port_err.clone()));
                Err(port_err)
            }
        }
    }

    fn resolve(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, PortError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);
        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn forward(
        event: CdpEventMessage,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), PortError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| PortError::new(PortErrorKind::Internal).with_hint(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, PortError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            let retriable = error.code >= 500;
            Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint(format!("cdp error {}: {}", error.code, error.message))
                .retriable(retriable))
        } else {
            Err(PortError::new(PortErrorKind::Internal).with_hint("empty cdp response"))
        }
    }

    fn map_cdp_error(err: CdpError) -> PortError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => PortError::new(PortErrorKind::Timeout)
                .with_hint(hint)
                .retriable(true),
            CdpError::JavascriptException(_) | CdpError::Serde(_) => {
                PortError::new(PortErrorKind::EvalFailed).with_hint(hint)
            }
            _ => PortError::new(PortErrorKind::CdpIo)
                .with_hint(hint)
                .retriable(true),
        }
    }
}

/// Pick the websocket address out of Chromium's startup banner, ignoring the
/// unrelated stderr noise around it.
fn devtools_banner_url(line: &str) -> Option<&str> {
    let (_, rest) = line.rsplit_once("listening on ")?;
    let candidate = rest.trim();
    if candidate.starts_with("ws") && candidate.contains("devtools/browser") {
        Some(candidate)
    } else {
        None
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "page-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "page-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_url_is_extracted_from_the_startup_line() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/9b3f-1c";
        assert_eq!(
            devtools_banner_url(line),
            Some("ws://127.0.0.1:9222/devtools/browser/9b3f-1c")
        );
    }

    #[test]
    fn unrelated_stderr_lines_are_skipped() {
        assert_eq!(devtools_banner_url("[WARNING] gpu process launch failed"), None);
        assert_eq!(
            devtools_banner_url("DevTools listening on http://127.0.0.1:9222/json"),
            None
        );
        assert_eq!(devtools_banner_url("listening on ws://host/other/endpoint"), None);
    }
}
