//! Browser seam for the ad speed controller.
//!
//! `PagePort` is the only surface the control loop sees. `CdpPagePort`
//! implements it over a raw Chrome DevTools Protocol conversation;
//! `SimulatedPage` implements it in memory for tests and for running
//! without a browser.

pub mod cdp;
pub mod config;
pub mod error;
pub mod metrics;
pub mod port;
pub mod scripts;
pub mod sim;
pub mod transport;

pub use cdp::CdpPagePort;
pub use config::PageConfig;
pub use error::{PortError, PortErrorKind};
pub use port::{page_event_bus, PageEventBus, PagePort};
pub use sim::SimulatedPage;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
