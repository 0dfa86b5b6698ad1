//! Cache metrics for observability

use crate::keys::RankedSetKey;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static CACHE_OPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rankset_cache_ops_total",
        "Sorted-set cache operations by command, key family and status",
        &["op", "key", "status"]
    )
    .expect("Failed to register rankset cache ops metric")
});

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_ok(&self, op: &str, key: &str) {
        CACHE_OPS_TOTAL
            .with_label_values(&[op, RankedSetKey::label(key), "ok"])
            .inc();
    }

    pub fn record_error(&self, op: &str, key: &str) {
        CACHE_OPS_TOTAL
            .with_label_values(&[op, RankedSetKey::label(key), "error"])
            .inc();
    }
}
