use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, Registry};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub page_events: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static PAGE_EVENTS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref PORT_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("adrush_port_commands_total", "Total CDP commands executed"),
        &["method"]
    )
    .unwrap();
    static ref PORT_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "adrush_port_command_failures_total",
            "Total CDP command failures"
        ),
        &["method"]
    )
    .unwrap();
    static ref PORT_PAGE_EVENTS_TOTAL: IntCounter = IntCounter::new(
        "adrush_port_page_events_total",
        "Total page events emitted to the supervisor"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register page-adapter metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, PORT_COMMANDS_TOTAL.clone());
    register(registry, PORT_COMMAND_FAILURES_TOTAL.clone());
    register(registry, PORT_PAGE_EVENTS_TOTAL.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    PORT_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    PORT_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn record_page_event() {
    PAGE_EVENTS.fetch_add(1, Ordering::Relaxed);
    PORT_PAGE_EVENTS_TOTAL.inc();
}

pub fn snapshot() -> PortMetricsSnapshot {
    PortMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        page_events: PAGE_EVENTS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    COMMANDS.store(0, Ordering::Relaxed);
    COMMAND_FAILURES.store(0, Ordering::Relaxed);
    PAGE_EVENTS.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_and_failures() {
        reset();
        record_command("Runtime.evaluate");
        record_command_failure("Runtime.evaluate");
        record_page_event();
        let snap = snapshot();
        assert_eq!(snap.commands, 1);
        assert_eq!(snap.command_failures, 1);
        assert_eq!(snap.page_events, 1);
    }
}
