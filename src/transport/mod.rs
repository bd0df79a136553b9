//! Transport adapters for moving serialized buffers between processes.
//!
//! Two families, both blocking:
//!
//! - [`ProcessGroup`] / [`Collective`]: group-wide collective operations
//!   (broadcast, gather, all-gather) over a tier's process group. Every
//!   member of a group must reach a collective for it to complete; a
//!   member that skips a call its peers are making hangs the group.
//! - [`PointToPoint`] / [`TcpBridge`] / [`BridgeChannel`]: a fixed
//!   point-to-point socket pairing one process in one tier with one
//!   process in a neighboring tier, exchanging buffer sets as a strict
//!   three-message sequence on fixed tags.
//!
//! [`LocalGroup`] is an in-process [`ProcessGroup`] implementation backed
//! by channels; it drives the integration tests and single-machine
//! multi-tier harnesses. An MPI-backed group is an external drop-in.

mod bridge;
mod collective;
mod group;

pub use bridge::{
    BridgeChannel, BridgeTags, ClientLink, PointToPoint, RenderLink, TcpBridge, CLIENT_TIER_TAGS,
    RENDER_TIER_TAGS,
};
pub use collective::Collective;
pub use group::{LocalGroup, ProcessGroup};
