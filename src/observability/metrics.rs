//! Metrics collection using metrics-rs.

use metrics::{counter, histogram, Unit};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BRIDGE_BYTES_SENT: &str = "strata_bridge_bytes_sent";
const BRIDGE_BYTES_RECEIVED: &str = "strata_bridge_bytes_received";
const COLLECTIVE_BYTES: &str = "strata_collective_bytes";
const DATASETS_DELIVERED: &str = "strata_datasets_delivered";
const COMPRESS_TIME_NS: &str = "strata_compress_time_ns";
const INFLATE_TIME_NS: &str = "strata_inflate_time_ns";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        BRIDGE_BYTES_SENT,
        Unit::Bytes,
        "Total bytes sent over tier bridges"
    );
    metrics::describe_counter!(
        BRIDGE_BYTES_RECEIVED,
        Unit::Bytes,
        "Total bytes received over tier bridges"
    );
    metrics::describe_counter!(
        COLLECTIVE_BYTES,
        Unit::Bytes,
        "Total payload bytes moved by group collectives"
    );
    metrics::describe_counter!(
        DATASETS_DELIVERED,
        Unit::Count,
        "Datasets handed to downstream consumers"
    );
    metrics::describe_histogram!(
        COMPRESS_TIME_NS,
        Unit::Nanoseconds,
        "Time to compress one serialized buffer"
    );
    metrics::describe_histogram!(
        INFLATE_TIME_NS,
        Unit::Nanoseconds,
        "Time to decompress one serialized buffer"
    );
}

/// Record bytes sent over a tier bridge.
pub fn record_bridge_bytes_sent(bytes: u64) {
    counter!(BRIDGE_BYTES_SENT).increment(bytes);
}

/// Record bytes received over a tier bridge.
pub fn record_bridge_bytes_received(bytes: u64) {
    counter!(BRIDGE_BYTES_RECEIVED).increment(bytes);
}

/// Record payload bytes moved by a collective operation.
pub fn record_collective_bytes(bytes: u64) {
    counter!(COLLECTIVE_BYTES).increment(bytes);
}

/// Record a dataset delivered to a downstream consumer.
pub fn record_dataset_delivered() {
    counter!(DATASETS_DELIVERED).increment(1);
}

/// Record time spent compressing one buffer.
pub fn record_compress_time(elapsed: Duration) {
    histogram!(COMPRESS_TIME_NS).record(elapsed.as_nanos() as f64);
}

/// Record time spent decompressing one buffer.
pub fn record_inflate_time(elapsed: Duration) {
    histogram!(INFLATE_TIME_NS).record(elapsed.as_nanos() as f64);
}
