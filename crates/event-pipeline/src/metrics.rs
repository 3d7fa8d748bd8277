use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use devpipe_core_types::EventType;
use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, IntGauge, Registry};
use serde::Serialize;
use tracing::error;

lazy_static! {
    static ref EVENTS_EMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("devpipe_events_emitted_total", "Records placed on the output queue"),
        &["type"]
    )
    .unwrap();
    static ref EVENTS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("devpipe_events_dropped_total", "Raw events that produced no record"),
        &["reason"]
    )
    .unwrap();
    static ref RESET_TOTAL: IntCounter =
        IntCounter::new("devpipe_pipeline_resets_total", "Full reconnect resets").unwrap();
    static ref REFERENCE_ENTRIES: IntGauge = IntGauge::new(
        "devpipe_reference_entries",
        "Diff baselines held for the current session"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(target: "event-pipeline", ?err, "failed to register pipeline metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, EVENTS_EMITTED_TOTAL.clone());
    register(registry, EVENTS_DROPPED_TOTAL.clone());
    register(registry, RESET_TOTAL.clone());
    register(registry, REFERENCE_ENTRIES.clone());
}

/// Why a raw event did not reach the output queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Paused,
    Suppressed,
    RateLimited,
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Paused => "paused",
            DropReason::Suppressed => "suppressed",
            DropReason::RateLimited => "rate_limited",
            DropReason::Malformed => "malformed",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub emitted: u64,
    pub network_requests: u64,
    pub network_diffs: u64,
    pub bundles: u64,
    pub clicks: u64,
    pub navigations: u64,
    pub new_tabs: u64,
    pub dropped_paused: u64,
    pub suppressed: u64,
    pub rate_limited: u64,
    pub malformed: u64,
    pub reference_entries: u64,
}

/// Per-pipeline counters behind the `stats` command. Prometheus counters are fed alongside.
#[derive(Clone, Default)]
pub struct PipelineStats {
    inner: Arc<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    network_requests: AtomicU64,
    network_diffs: AtomicU64,
    bundles: AtomicU64,
    clicks: AtomicU64,
    navigations: AtomicU64,
    new_tabs: AtomicU64,
    session_starts: AtomicU64,
    dropped_paused: AtomicU64,
    suppressed: AtomicU64,
    rate_limited: AtomicU64,
    malformed: AtomicU64,
    reference_entries: AtomicU64,
}

impl PipelineStats {
    pub fn record_emitted(&self, kind: EventType) {
        let counter = match kind {
            EventType::SessionStart => &self.inner.session_starts,
            EventType::NetworkRequest => &self.inner.network_requests,
            EventType::NetworkDiff => &self.inner.network_diffs,
            EventType::ResourceBundle => &self.inner.bundles,
            EventType::UiClick => &self.inner.clicks,
            EventType::PageNavigation => &self.inner.navigations,
            EventType::NewTabOpened => &self.inner.new_tabs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        EVENTS_EMITTED_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Paused => &self.inner.dropped_paused,
            DropReason::Suppressed => &self.inner.suppressed,
            DropReason::RateLimited => &self.inner.rate_limited,
            DropReason::Malformed => &self.inner.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        EVENTS_DROPPED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_reset(&self) {
        RESET_TOTAL.inc();
    }

    pub fn set_reference_entries(&self, count: usize) {
        self.inner
            .reference_entries
            .store(count as u64, Ordering::Relaxed);
        REFERENCE_ENTRIES.set(count as i64);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &self.inner;
        let mut snap = PipelineSnapshot {
            emitted: 0,
            network_requests: load(&inner.network_requests),
            network_diffs: load(&inner.network_diffs),
            bundles: load(&inner.bundles),
            clicks: load(&inner.clicks),
            navigations: load(&inner.navigations),
            new_tabs: load(&inner.new_tabs),
            dropped_paused: load(&inner.dropped_paused),
            suppressed: load(&inner.suppressed),
            rate_limited: load(&inner.rate_limited),
            malformed: load(&inner.malformed),
            reference_entries: load(&inner.reference_entries),
        };
        snap.emitted = snap.network_requests
            + snap.network_diffs
            + snap.bundles
            + snap.clicks
            + snap.navigations
            + snap.new_tabs
            + load(&inner.session_starts);
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sums_emitted_kinds() {
        let stats = PipelineStats::default();
        stats.record_emitted(EventType::SessionStart);
        stats.record_emitted(EventType::UiClick);
        stats.record_emitted(EventType::UiClick);
        stats.record_dropped(DropReason::RateLimited);
        let snap = stats.snapshot();
        assert_eq!(snap.emitted, 3);
        assert_eq!(snap.clicks, 2);
        assert_eq!(snap.rate_limited, 1);
    }

    #[test]
    fn registering_twice_is_harmless() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        PipelineStats::default().record_emitted(EventType::NetworkRequest);
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "devpipe_events_emitted_total"));
    }
}
