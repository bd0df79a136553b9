//! # Strata
//!
//! Cross-tier data movement for distributed visualization pipelines.
//!
//! Strata routes a partitioned dataset between the tiers of a
//! visualization pipeline (a data-processing tier, an optional render
//! tier, and an optional single client) under four delivery modes:
//! pass-through, clone (replicate everywhere), collect (gather to the
//! final consumer), and collect-and-pass-through. The same router runs
//! whether the tiers share one process group or are separate groups
//! connected only by point-to-point sockets.
//!
//! ## Features
//!
//! - **Mode routing**: one decision tree covering every supported
//!   (mode, topology, tier) combination; unsupported combinations are
//!   explicit errors, not silent fallbacks
//! - **rkyv serialization**: datasets cross process boundaries as flat
//!   buffers, with optional zlib compression detected from magic bytes
//! - **Collectives and bridges**: blocking group collectives within a
//!   tier, tagged three-message socket exchanges between tiers
//! - **Cheap pass-through**: datasets are Arc-backed, so delivering data
//!   in place never copies the bulk arrays
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//! use std::sync::Arc;
//!
//! // One rank of a four-process group, replicating everywhere.
//! let mut router = DataRouter::builder()
//!     .mode(MoveMode::Clone)
//!     .output_kind(DataKind::PolyMesh)
//!     .group(Arc::new(group))
//!     .build();
//!
//! let output = router.execute(Some(&local_partition))?;
//! assert_eq!(output.num_points(), total_points_across_ranks);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod dataset;
pub mod error;
pub mod marshal;
pub mod observability;
pub mod router;
pub mod transport;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::BufferSet;
    pub use crate::dataset::{DataKind, DataSet};
    pub use crate::error::{Error, Result};
    pub use crate::marshal::Marshaller;
    pub use crate::router::{DataRouter, MoveMode, Redistribute, Tier, Topology};
    pub use crate::transport::{
        BridgeChannel, ClientLink, Collective, LocalGroup, ProcessGroup, RenderLink, TcpBridge,
    };
}

pub use error::{Error, Result};
