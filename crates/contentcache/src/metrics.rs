//! Metrics Recorder (§2 component 9, §6 `metrics_prometheus`): monotonic
//! counters and histograms via the `metrics` facade, exported on demand
//! through `metrics-exporter-prometheus`'s text renderer. Nothing here
//! binds a listening socket — exposing the rendered text over HTTP is the
//! caller's job.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub const CACHE_REQUESTS_TOTAL: &str = "contentcache_requests_total";
pub const CACHE_HITS_TOTAL: &str = "contentcache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "contentcache_misses_total";
pub const BLOOM_FILTER_HITS_TOTAL: &str = "contentcache_bloom_filter_hits_total";
pub const DEDUPE_HITS_TOTAL: &str = "contentcache_dedupe_hits_total";
pub const ERRORS_TOTAL: &str = "contentcache_errors_total";
pub const GET_DURATION_SECONDS: &str = "contentcache_get_duration_seconds";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs a process-local Prometheus recorder and hands back the handle
/// used to render its current state as text. Safe to call more than once
/// (e.g. from multiple `Cache` instances in one process): only the first
/// call installs a recorder, later calls reuse its handle.
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn install() -> Self {
        let handle = HANDLE
            .get_or_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .expect("exactly one metrics recorder is installed per process")
            })
            .clone();
        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
