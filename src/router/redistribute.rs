//! Boundary to the M-to-N redistribution collaborator.

use crate::dataset::DataSet;
use crate::error::Result;

/// Rebalances a partitioned dataset across a different number of
/// partitions.
///
/// Consumed, not implemented, by this crate: the router calls it on every
/// data-tier rank when a render tier of a different size must receive
/// pass-through data. `input` is this rank's partition (absent when the
/// rank holds none); the return value is this rank's share of the
/// rebalanced result. The router never calls this when
/// `output_count == input_count`.
pub trait Redistribute: Send {
    /// Rebalance `input_count` partitions into `output_count` partitions,
    /// returning the local output partition.
    fn redistribute(
        &self,
        input: Option<&DataSet>,
        input_count: usize,
        output_count: usize,
    ) -> Result<DataSet>;
}
