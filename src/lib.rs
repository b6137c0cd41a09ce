//! adrush: watches a streaming page for in-player ads and fast-forwards
//! through them, restoring the viewer's playback speed when they end.
//!
//! The page is reached over the Chrome DevTools Protocol through the
//! `page-adapter` crate; everything in here is browser-agnostic and runs the
//! same against the simulated page used in tests.

pub mod actuator;
pub mod config;
pub mod control;
pub mod errors;
pub mod locator;
pub mod metrics;
pub mod notify;
pub mod probe;
pub mod server;
pub mod session;
pub mod state_machine;
pub mod supervisor;

pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use supervisor::MonitorSupervisor;
