use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adrush_cli::{config::AppConfig, metrics, server, supervisor::MonitorSupervisor};
use page_adapter::{CdpPagePort, ChromiumTransport, PageConfig, PagePort, SimulatedPage};

#[derive(Parser, Debug)]
#[command(
    name = "adrush",
    version,
    about = "Fast-forwards in-page video ads and restores normal speed when they end"
)]
struct Cli {
    /// Page to open when the browser starts without a usable tab
    #[arg(long)]
    url: Option<String>,

    /// Attach to an already-running browser instead of launching one
    #[arg(long, value_name = "WS_URL")]
    ws_url: Option<String>,

    /// Run the browser headless
    #[arg(long)]
    headless: bool,

    /// Address for the control/status/metrics HTTP surface
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Run against an in-memory page instead of a browser
    #[arg(long)]
    stub: bool,

    /// Start with monitoring disabled
    #[arg(long)]
    disabled: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    metrics::register_metrics();

    info!("starting adrush v{}", env!("CARGO_PKG_VERSION"));

    let mut cfg = AppConfig::from_env()?;
    if let Some(url) = cli.url.clone() {
        cfg.watch_url = url;
    }
    if let Some(listen) = cli.listen.as_deref() {
        cfg.control_listen = listen
            .parse()
            .with_context(|| format!("invalid listen address: {listen}"))?;
    }
    if cli.disabled {
        cfg.start_enabled = false;
    }
    cfg.validate()?;

    let page = build_page(&cli, &cfg).await;

    let supervisor = Arc::new(MonitorSupervisor::new(cfg.clone(), page));
    supervisor.start().await;

    let server_task = server::spawn_control_server(cfg.control_listen, Arc::clone(&supervisor));

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    supervisor.stop().await;
    server_task.abort();

    info!("goodbye");
    Ok(())
}

/// Bring up the CDP-backed page, falling back to the in-memory stub when no
/// browser can be reached.
async fn build_page(cli: &Cli, cfg: &AppConfig) -> Arc<dyn PagePort> {
    if cli.stub {
        info!("running in stub mode, no browser will be launched");
        return Arc::new(SimulatedPage::new());
    }

    let mut page_cfg = PageConfig::default();
    page_cfg.headless = page_cfg.headless || cli.headless;
    page_cfg.websocket_url = cli.ws_url.clone();
    page_cfg.player_selector = cfg.player_selector.clone();

    let (bus, _rx) = page_adapter::page_event_bus(256);
    let transport = Arc::new(ChromiumTransport::new(page_cfg.clone()));
    let port = Arc::new(CdpPagePort::new(page_cfg, transport, bus));

    match port.start().await {
        Ok(()) => {
            if let Err(err) = port.create_page(&cfg.watch_url).await {
                warn!(?err, url = %cfg.watch_url, "failed to open the watch page");
            }
            port
        }
        Err(err) => {
            error!(?err, "browser unreachable, falling back to stub mode");
            Arc::new(SimulatedPage::new())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().context("invalid log level")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
