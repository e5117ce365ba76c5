use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so the labels survive text exposition.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "catalog_sync",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub source: String,
    pub phase: String,
}

impl PhaseLabels {
    pub fn new(source: &str, phase: catalog_core::ScanPhase) -> Self {
        Self {
            source: source.to_string(),
            phase: phase.as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RunLabels {
    pub chain: String,
    pub status: String,
}

impl RunLabels {
    pub fn new(chain: &str, status: crate::sync_service::types::RunStatus) -> Self {
        Self {
            chain: chain.to_string(),
            status: status.as_db_str().to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SyncMetrics {
    /// Items mapped and handed to the writer.
    pub items_discovered_total: Family<PhaseLabels, Counter>,
    pub items_written_total: Family<PhaseLabels, Counter>,
    /// Items the store rejected; each one also has a failure record.
    pub items_failed_total: Family<PhaseLabels, Counter>,
    /// Raw records dropped because they could not be mapped.
    pub mapping_failures_total: Family<PhaseLabels, Counter>,
    pub phases_failed_total: Family<PhaseLabels, Counter>,
    pub chains_enqueued_total: Counter,
    /// Enqueue requests dropped because the chain was already running or queued.
    pub chains_skipped_total: Counter,
    pub throttle_delays_total: Counter,
    pub runs_total: Family<RunLabels, Counter>,
    /// 1 while the UI reports active playback.
    pub playback_active: Gauge,
}

impl SyncMetrics {
    fn init() -> Self {
        Self {
            items_discovered_total: Family::default(),
            items_written_total: Family::default(),
            items_failed_total: Family::default(),
            mapping_failures_total: Family::default(),
            phases_failed_total: Family::default(),
            chains_enqueued_total: Counter::default(),
            chains_skipped_total: Counter::default(),
            throttle_delays_total: Counter::default(),
            runs_total: Family::default(),
            playback_active: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "items_discovered",
            "Total number of catalog items discovered by phase handlers",
            metrics.items_discovered_total.clone(),
        );
        sub_registry.register(
            "items_written",
            "Total number of catalog items upserted into the store",
            metrics.items_written_total.clone(),
        );
        sub_registry.register(
            "items_failed",
            "Total number of catalog items the store rejected",
            metrics.items_failed_total.clone(),
        );
        sub_registry.register(
            "mapping_failures",
            "Total number of provider records that could not be mapped",
            metrics.mapping_failures_total.clone(),
        );
        sub_registry.register(
            "phases_failed",
            "Total number of scan phases aborted by a provider error",
            metrics.phases_failed_total.clone(),
        );
        sub_registry.register(
            "chains_enqueued",
            "Total number of sync chains enqueued",
            metrics.chains_enqueued_total.clone(),
        );
        sub_registry.register(
            "chains_skipped",
            "Total number of sync requests skipped because the chain was already active",
            metrics.chains_skipped_total.clone(),
        );
        sub_registry.register(
            "throttle_delays",
            "Total number of heavy steps delayed by active playback",
            metrics.throttle_delays_total.clone(),
        );
        sub_registry.register(
            "runs",
            "Total number of finished sync chains by status",
            metrics.runs_total.clone(),
        );
        sub_registry.register(
            "playback_active",
            "Playback activity flag (1 playing, 0 idle)",
            metrics.playback_active.clone(),
        );
        metrics
    }
}

pub static SYNC_METRICS: OnceCell<SyncMetrics> = OnceCell::const_new();

#[cfg(test)]
mod tests {
    use super::{register_build_info_metric, PhaseLabels, SyncMetrics};
    use crate::build_info;
    use catalog_core::ScanPhase;
    use prometheus_client::{encoding::text::encode, registry::Registry};

    #[test]
    fn build_info_metric_contains_version_and_commit_labels() {
        let mut registry = Registry::default();
        register_build_info_metric(&mut registry, "catalog");

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("catalog_build_info"));
        assert!(encoded.contains("service=\"catalog_sync\""));
        assert!(encoded.contains(&format!("version=\"{}\"", build_info::VERSION)));
        assert!(encoded.contains(&format!("commit=\"{}\"", build_info::short_commit_hash())));
    }

    #[test]
    fn phase_counters_are_labelled_by_source_and_phase() {
        let mut registry = Registry::default();
        let metrics = SyncMetrics::register(&mut registry, "sync");
        metrics
            .items_written_total
            .get_or_create(&PhaseLabels::new("xtream", ScanPhase::Movies))
            .inc_by(3);

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("sync_items_written_total{source=\"xtream\",phase=\"movies\"} 3"));
    }
}
