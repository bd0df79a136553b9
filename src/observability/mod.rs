//! Observability features: metrics for data movement.
//!
//! Strata exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `strata_bridge_bytes_sent` | Counter | Bytes sent over tier bridges |
//! | `strata_bridge_bytes_received` | Counter | Bytes received over tier bridges |
//! | `strata_collective_bytes` | Counter | Payload bytes moved by collectives |
//! | `strata_datasets_delivered` | Counter | Datasets handed to downstream consumers |
//! | `strata_compress_time_ns` | Histogram | Time to compress one buffer |
//! | `strata_inflate_time_ns` | Histogram | Time to decompress one buffer |
//!
//! Metrics are recorded automatically during router execution. Install a
//! metrics exporter (prometheus, statsd, ...) to collect them.

mod metrics;

pub use metrics::{
    init_metrics, record_bridge_bytes_received, record_bridge_bytes_sent, record_collective_bytes,
    record_compress_time, record_dataset_delivered, record_inflate_time,
};
