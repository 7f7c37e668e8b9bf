//! Counters recorded when the `metrics` feature is enabled.
//!
//! Every function here is a no-op without the feature.

#[cfg(feature = "metrics")]
const ITEMS_PROCESSED: &str = "sluiceway_items_processed_total";
#[cfg(feature = "metrics")]
const ERRORS_REPORTED: &str = "sluiceway_errors_reported_total";
#[cfg(feature = "metrics")]
const DRAINS: &str = "sluiceway_drains_total";
#[cfg(feature = "metrics")]
const PIPELINES_CONSTRUCTED: &str = "sluiceway_pipelines_constructed_total";

/// Record one input item fully processed by a stage
#[inline]
pub(crate) fn record_processed(stage: &str) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(ITEMS_PROCESSED, "stage" => stage.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// Record one error reported on a stage's event channel
#[inline]
pub(crate) fn record_error(stage: &str) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(ERRORS_REPORTED, "stage" => stage.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// Record a drain signal
#[inline]
pub(crate) fn record_drain(stage: &str) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(DRAINS, "stage" => stage.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// Record a per-key pipeline constructed by a router
#[inline]
pub(crate) fn record_pipeline(router: &str) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(PIPELINES_CONSTRUCTED, "router" => router.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = router;
}
