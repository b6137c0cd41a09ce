use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, IntCounter, Registry};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorMetricsSnapshot {
    pub ticks: u64,
    pub ads_detected: u64,
    pub speed_restores: u64,
    pub set_attempts: u64,
    pub set_exhausted: u64,
    pub navigation_resets: u64,
    pub probe_failures: u64,
}

static TICKS: AtomicU64 = AtomicU64::new(0);
static ADS_DETECTED: AtomicU64 = AtomicU64::new(0);
static SPEED_RESTORES: AtomicU64 = AtomicU64::new(0);
static SET_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static SET_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static NAVIGATION_RESETS: AtomicU64 = AtomicU64::new(0);
static PROBE_FAILURES: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref TICKS_TOTAL: IntCounter =
        IntCounter::new("adrush_monitor_ticks_total", "Monitor loop ticks").unwrap();
    static ref ADS_DETECTED_TOTAL: IntCounter =
        IntCounter::new("adrush_ads_detected_total", "Ad-start edges observed").unwrap();
    static ref SPEED_RESTORES_TOTAL: IntCounter = IntCounter::new(
        "adrush_speed_restores_total",
        "Speed restorations after an ad"
    )
    .unwrap();
    static ref SET_ATTEMPTS_TOTAL: IntCounter = IntCounter::new(
        "adrush_set_attempts_total",
        "Playback-rate write attempts"
    )
    .unwrap();
    static ref SET_EXHAUSTED_TOTAL: IntCounter = IntCounter::new(
        "adrush_set_exhausted_total",
        "Rate writes abandoned after the attempt budget"
    )
    .unwrap();
    static ref NAVIGATION_RESETS_TOTAL: IntCounter = IntCounter::new(
        "adrush_navigation_resets_total",
        "Monitor resets caused by navigation"
    )
    .unwrap();
    static ref PROBE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "adrush_probe_failures_total",
        "Ad-signal reads that failed"
    )
    .unwrap();
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, TICKS_TOTAL.clone());
        register(registry, ADS_DETECTED_TOTAL.clone());
        register(registry, SPEED_RESTORES_TOTAL.clone());
        register(registry, SET_ATTEMPTS_TOTAL.clone());
        register(registry, SET_EXHAUSTED_TOTAL.clone());
        register(registry, NAVIGATION_RESETS_TOTAL.clone());
        register(registry, PROBE_FAILURES_TOTAL.clone());
        page_adapter::metrics::register_metrics(registry);
    });
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register monitor metric");
        }
    }
}

pub fn record_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    TICKS_TOTAL.inc();
}

pub fn record_ad_detected() {
    ADS_DETECTED.fetch_add(1, Ordering::Relaxed);
    ADS_DETECTED_TOTAL.inc();
}

pub fn record_speed_restore() {
    SPEED_RESTORES.fetch_add(1, Ordering::Relaxed);
    SPEED_RESTORES_TOTAL.inc();
}

pub fn record_set_attempt() {
    SET_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
    SET_ATTEMPTS_TOTAL.inc();
}

pub fn record_set_exhausted() {
    SET_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
    SET_EXHAUSTED_TOTAL.inc();
}

pub fn record_navigation_reset() {
    NAVIGATION_RESETS.fetch_add(1, Ordering::Relaxed);
    NAVIGATION_RESETS_TOTAL.inc();
}

pub fn record_probe_failure() {
    PROBE_FAILURES.fetch_add(1, Ordering::Relaxed);
    PROBE_FAILURES_TOTAL.inc();
}

pub fn snapshot() -> MonitorMetricsSnapshot {
    MonitorMetricsSnapshot {
        ticks: TICKS.load(Ordering::Relaxed),
        ads_detected: ADS_DETECTED.load(Ordering::Relaxed),
        speed_restores: SPEED_RESTORES.load(Ordering::Relaxed),
        set_attempts: SET_ATTEMPTS.load(Ordering::Relaxed),
        set_exhausted: SET_EXHAUSTED.load(Ordering::Relaxed),
        navigation_resets: NAVIGATION_RESETS.load(Ordering::Relaxed),
        probe_failures: PROBE_FAILURES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = snapshot();
        record_tick();
        record_ad_detected();
        record_speed_restore();
        let after = snapshot();
        assert_eq!(after.ticks, before.ticks + 1);
        assert_eq!(after.ads_detected, before.ads_detected + 1);
        assert_eq!(after.speed_restores, before.speed_restores + 1);
    }
}
