//! Mode router: delivers a dataset across tiers under a configured mode.
//!
//! Each pipeline execution hands the router at most one local input
//! dataset; the router produces exactly one local output (possibly empty)
//! by sequencing buffer-set builds, collective exchanges, bridge
//! transfers, and redistribution calls. Which sequence runs is a pure
//! function of (topology, mode, tier):
//!
//! - **Single group** (no bridges): pass-through copies input to output;
//!   clone gather-alls to every rank; collect gathers to rank 0.
//! - **Data + render tiers**: pass-through only; partitions are
//!   rebalanced to the render-tier size and shipped over the per-rank
//!   bridges; other modes are an explicit unsupported combination.
//! - **Data + client tiers**: clone gather-alls then rank 0 ships the
//!   replica to the client; collect gathers to rank 0 and ships;
//!   collect-and-pass-through does both a collect-to-client and a local
//!   pass-through from the same input.
//! - **Data + render + client**: pass-through feeds the render tier;
//!   clone gathers to rank 0, ships to the client, and fans out through
//!   render rank 0's broadcast; collect feeds only the client;
//!   collect-and-pass-through runs the render-tier delivery and the
//!   collect-to-client back to back.
//!
//! Every process participating in a given collective must reach that call;
//! the router guarantees this by deriving the call sequence from
//! configuration that is identical on all peers.

mod redistribute;

pub use redistribute::Redistribute;

use crate::buffer::BufferSet;
use crate::dataset::{DataKind, DataSet};
use crate::error::{Error, Result};
use crate::marshal::Marshaller;
use crate::observability::record_dataset_delivered;
use crate::transport::{
    ClientLink, Collective, ProcessGroup, RenderLink, CLIENT_TIER_TAGS, RENDER_TIER_TAGS,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, error, warn};

/// Delivery policy for one router instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveMode {
    /// Leave partitions where they are (or move them to the render tier
    /// when one exists).
    PassThrough,
    /// Replicate the full dataset on every receiving process.
    Clone,
    /// Gather the full dataset onto the single final consumer.
    Collect,
    /// Collect to the consumer and pass partitions through, both from the
    /// same input.
    CollectAndPassThrough,
}

impl MoveMode {
    /// Get the human-readable name of the mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass-through",
            Self::Clone => "clone",
            Self::Collect => "collect",
            Self::CollectAndPassThrough => "collect-and-pass-through",
        }
    }
}

impl fmt::Display for MoveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The tier a process belongs to, fixed for the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Data-processing tier.
    Data,
    /// Render tier.
    Render,
    /// The single client process.
    Client,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "data",
            Self::Render => "render",
            Self::Client => "client",
        };
        write!(f, "{name}")
    }
}

/// Which tiers exist as distinct process groups.
///
/// Must be configured identically on every participating process; the
/// per-process links may legitimately differ (unpaired data ranks carry
/// no render channel, non-root data ranks no client channel).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// All tiers collapse onto one process group; only collectives run.
    SingleGroup,
    /// Separate data and render tiers, no client (batch mode).
    DataRender,
    /// Separate data tier and client (client/server mode).
    DataClient,
    /// Separate data, render, and client tiers.
    DataRenderClient,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SingleGroup => "single-group",
            Self::DataRender => "data+render",
            Self::DataClient => "data+client",
            Self::DataRenderClient => "data+render+client",
        };
        write!(f, "{name}")
    }
}

/// Routes one dataset per pipeline execution across tiers.
///
/// Build with [`DataRouter::builder`]. The router owns its transports for
/// the lifetime of the run; every [`execute`](DataRouter::execute) call is
/// independent and leaves no buffers behind.
pub struct DataRouter {
    mode: MoveMode,
    tier: Tier,
    topology: Topology,
    output_kind: DataKind,
    marshaller: Marshaller,
    group: Option<Collective>,
    client_link: Option<ClientLink>,
    render_link: Option<RenderLink>,
    redistribute: Option<Box<dyn Redistribute>>,
    skip_gather_to_root: bool,
}

/// Builder for [`DataRouter`].
pub struct DataRouterBuilder {
    mode: MoveMode,
    tier: Tier,
    topology: Topology,
    output_kind: DataKind,
    compress: bool,
    group: Option<Arc<dyn ProcessGroup>>,
    client_link: Option<ClientLink>,
    render_link: Option<RenderLink>,
    redistribute: Option<Box<dyn Redistribute>>,
    skip_gather_to_root: bool,
}

impl Default for DataRouterBuilder {
    fn default() -> Self {
        Self {
            mode: MoveMode::PassThrough,
            tier: Tier::Data,
            topology: Topology::SingleGroup,
            output_kind: DataKind::PolyMesh,
            compress: false,
            group: None,
            client_link: None,
            render_link: None,
            redistribute: None,
            skip_gather_to_root: false,
        }
    }
}

impl DataRouterBuilder {
    /// Set the delivery mode.
    pub fn mode(mut self, mode: MoveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set this process's tier role.
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the tier topology (must match on every participating process).
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the concrete kind allocated for the output slot.
    pub fn output_kind(mut self, kind: DataKind) -> Self {
        self.output_kind = kind;
        self
    }

    /// Compress serialized buffers. Must be configured identically on
    /// both ends of every exchange.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Attach this tier's process group.
    pub fn group(mut self, group: Arc<dyn ProcessGroup>) -> Self {
        self.group = Some(group);
        self
    }

    /// Attach the client link state.
    pub fn client_link(mut self, link: ClientLink) -> Self {
        self.client_link = Some(link);
        self
    }

    /// Attach the render-tier link state.
    pub fn render_link(mut self, link: RenderLink) -> Self {
        self.render_link = Some(link);
        self
    }

    /// Attach the M-to-N redistribution collaborator.
    pub fn redistribute(mut self, engine: Box<dyn Redistribute>) -> Self {
        self.redistribute = Some(engine);
        self
    }

    /// Skip the gather in collect-style deliveries: rank 0 passes its own
    /// partition through and other ranks produce nothing. Used when the
    /// surrounding system knows the data is already resident on rank 0.
    pub fn skip_gather_to_root(mut self, skip: bool) -> Self {
        self.skip_gather_to_root = skip;
        self
    }

    /// Build the router.
    pub fn build(self) -> DataRouter {
        DataRouter {
            mode: self.mode,
            tier: self.tier,
            topology: self.topology,
            output_kind: self.output_kind,
            marshaller: Marshaller::new(self.compress),
            group: self.group.map(Collective::new),
            client_link: self.client_link,
            render_link: self.render_link,
            redistribute: self.redistribute,
            skip_gather_to_root: self.skip_gather_to_root,
        }
    }
}

impl DataRouter {
    /// Start configuring a router.
    pub fn builder() -> DataRouterBuilder {
        DataRouterBuilder::default()
    }

    /// The configured delivery mode.
    pub fn mode(&self) -> MoveMode {
        self.mode
    }

    /// This process's tier role.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The configured topology.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// The kind allocated for output objects.
    pub fn output_kind(&self) -> DataKind {
        self.output_kind
    }

    /// Whether this process ends up holding data a downstream renderer
    /// should consume, given the configured mode and topology.
    pub fn output_generated_locally(&self) -> bool {
        use MoveMode::*;
        match self.tier {
            Tier::Render => matches!(self.mode, PassThrough | Clone | CollectAndPassThrough),
            Tier::Data => match self.topology {
                // A render tier exists, so this process only stages data.
                Topology::DataRender | Topology::DataRenderClient => false,
                _ => matches!(self.mode, PassThrough | Clone | CollectAndPassThrough),
            },
            Tier::Client => match self.topology {
                // Built-in mode: the client holds whatever the group holds.
                Topology::SingleGroup => true,
                _ => matches!(self.mode, Collect | Clone | CollectAndPassThrough),
            },
        }
    }

    /// Move one dataset. `input` is this process's local partition, absent
    /// on processes that hold none; the return value is this process's
    /// local output, empty wherever the mode delivers nothing here.
    ///
    /// Configuration errors (a transport the topology requires but the
    /// builder was not given) are reported once and leave the affected
    /// output empty. An unsupported (mode, topology) combination is an
    /// [`Error::Unsupported`]. Transport failures surface as errors.
    pub fn execute(&mut self, input: Option<&DataSet>) -> Result<DataSet> {
        let _span = debug_span!(
            "move-data",
            mode = %self.mode,
            tier = %self.tier,
            topology = %self.topology,
        )
        .entered();

        if self.output_kind == DataKind::ImageVolume
            && self.mode == MoveMode::PassThrough
            && matches!(
                self.topology,
                Topology::DataRender | Topology::DataRenderClient
            )
        {
            error!("image volume delivery to the render tier is not supported");
            return Ok(DataSet::empty(self.output_kind));
        }

        let output = match self.topology {
            Topology::SingleGroup => self.run_single_group(input)?,
            Topology::DataRender => self.run_data_render(input)?,
            Topology::DataClient => self.run_data_client(input)?,
            Topology::DataRenderClient => self.run_three_tier(input)?,
        };
        if !output.is_empty() {
            record_dataset_delivered();
        }
        Ok(output)
    }

    // ------------------------------------------------------------------
    // Topology branches
    // ------------------------------------------------------------------

    /// Client, data, and render roles all share one process group.
    fn run_single_group(&mut self, input: Option<&DataSet>) -> Result<DataSet> {
        match self.mode {
            // Clone is used for plots and picking.
            MoveMode::Clone => self.gather_all(input),
            // Collect for rendering on rank 0.
            MoveMode::Collect => self.gather_to_root(input),
            // Pass-through for compositing.
            MoveMode::PassThrough => Ok(self.pass_through(input)),
            MoveMode::CollectAndPassThrough => {
                // The gathered copy feeds a root-side consumer; the local
                // output is the pass-through regardless.
                let _collected = self.gather_to_root(input)?;
                Ok(self.pass_through(input))
            }
        }
    }

    /// Separate data and render tiers, no client: batch rendering. Only
    /// pass-through is defined here.
    fn run_data_render(&mut self, input: Option<&DataSet>) -> Result<DataSet> {
        if self.mode != MoveMode::PassThrough {
            return Err(Error::Unsupported(format!(
                "mode {} over a render bridge without a client",
                self.mode
            )));
        }
        match self.tier {
            Tier::Data => {
                let rebalanced = self.redistribute_for_render(input)?;
                self.send_to_render(&rebalanced)?;
                // The data now lives on the render tier, not here.
                Ok(DataSet::empty(self.output_kind))
            }
            Tier::Render => self.receive_from_data_tier(),
            // No client participates in this topology.
            Tier::Client => Ok(DataSet::empty(self.output_kind)),
        }
    }

    /// Separate data tier and client: classic client/server.
    fn run_data_client(&mut self, input: Option<&DataSet>) -> Result<DataSet> {
        match (self.mode, self.tier) {
            (MoveMode::PassThrough, Tier::Data) => Ok(self.pass_through(input)),
            // Nothing meaningful crosses to the client in this mode.
            (MoveMode::PassThrough, Tier::Client) => Ok(DataSet::empty(self.output_kind)),

            (MoveMode::Clone, Tier::Data) => {
                let output = self.gather_all(input)?;
                self.send_to_client(&output)?;
                Ok(output)
            }
            (MoveMode::Collect, Tier::Data) => {
                let output = self.gather_to_root(input)?;
                self.send_to_client(&output)?;
                Ok(output)
            }
            (MoveMode::CollectAndPassThrough, Tier::Data) => {
                // Collect into a throwaway object for the client; the real
                // output is the pass-through of the same input.
                let collected = self.gather_to_root(input)?;
                self.send_to_client(&collected)?;
                Ok(self.pass_through(input))
            }
            (
                MoveMode::Clone | MoveMode::Collect | MoveMode::CollectAndPassThrough,
                Tier::Client,
            ) => self.client_receive(),

            (_, Tier::Render) => {
                error!("render tier role has no place in a data+client topology");
                Ok(DataSet::empty(self.output_kind))
            }
        }
    }

    /// Separate data, render, and client tiers.
    fn run_three_tier(&mut self, input: Option<&DataSet>) -> Result<DataSet> {
        match (self.mode, self.tier) {
            (MoveMode::PassThrough, Tier::Data) => {
                let rebalanced = self.redistribute_for_render(input)?;
                self.send_to_render(&rebalanced)?;
                Ok(DataSet::empty(self.output_kind))
            }
            (MoveMode::PassThrough, Tier::Render) => self.receive_from_data_tier(),
            (MoveMode::PassThrough, Tier::Client) => Ok(DataSet::empty(self.output_kind)),

            (MoveMode::Clone, Tier::Data) => {
                // Only rank 0 needs the merged copy: it feeds the client
                // and render rank 0, which fans out with a broadcast.
                let output = self.gather_to_root(input)?;
                self.send_to_client(&output)?;
                self.root_send_to_render_root(&output)?;
                Ok(output)
            }
            (MoveMode::Clone, Tier::Render) => {
                let received = self.render_root_receive()?;
                self.render_broadcast(received)
            }
            (MoveMode::Clone, Tier::Client) => self.client_receive(),

            (MoveMode::Collect, Tier::Data) => {
                let output = self.gather_to_root(input)?;
                self.send_to_client(&output)?;
                Ok(output)
            }
            // The render tier never receives data in collect mode.
            (MoveMode::Collect, Tier::Render) => Ok(DataSet::empty(self.output_kind)),
            (MoveMode::Collect, Tier::Client) => self.client_receive(),

            (MoveMode::CollectAndPassThrough, Tier::Data) => {
                // Pass through to the render tier...
                let rebalanced = self.redistribute_for_render(input)?;
                self.send_to_render(&rebalanced)?;
                drop(rebalanced);
                // ...and independently collect to the client. Both run
                // unconditionally; the local output ends empty.
                let collected = self.gather_to_root(input)?;
                self.send_to_client(&collected)?;
                Ok(DataSet::empty(self.output_kind))
            }
            (MoveMode::CollectAndPassThrough, Tier::Render) => self.receive_from_data_tier(),
            (MoveMode::CollectAndPassThrough, Tier::Client) => self.client_receive(),
        }
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    fn group_rank(&self) -> usize {
        self.group.as_ref().map(Collective::rank).unwrap_or(0)
    }

    fn pass_through(&self, input: Option<&DataSet>) -> DataSet {
        debug!("pass-through");
        match input {
            Some(data) => data.clone(),
            None => DataSet::empty(self.output_kind),
        }
    }

    /// Marshal this rank's contribution to a collective; an absent input
    /// contributes a zero-length entry rather than failing.
    fn marshal_input(&self, input: Option<&DataSet>) -> Result<Vec<u8>> {
        match input {
            Some(data) => self.marshaller.marshal(data),
            None => Ok(Vec::new()),
        }
    }

    /// Replicate the merged dataset on every rank of this tier's group.
    fn gather_all(&self, input: Option<&DataSet>) -> Result<DataSet> {
        let Some(group) = &self.group else {
            return Ok(self.pass_through(input));
        };
        if group.size() <= 1 {
            return Ok(self.pass_through(input));
        }

        let local = self.marshal_input(input)?;
        let set = group.gather_all(&local)?;
        Ok(set.reconstruct(&self.marshaller, self.output_kind))
    }

    /// Gather the merged dataset onto rank 0 of this tier's group; other
    /// ranks produce the empty dataset.
    fn gather_to_root(&self, input: Option<&DataSet>) -> Result<DataSet> {
        let Some(group) = &self.group else {
            return Ok(self.pass_through(input));
        };
        if group.size() <= 1 {
            return Ok(self.pass_through(input));
        }
        if self.skip_gather_to_root {
            return Ok(if group.rank() == 0 {
                self.pass_through(input)
            } else {
                DataSet::empty(self.output_kind)
            });
        }

        let local = self.marshal_input(input)?;
        match group.gather_to_root(&local, 0)? {
            Some(set) => Ok(set.reconstruct(&self.marshaller, self.output_kind)),
            None => Ok(DataSet::empty(self.output_kind)),
        }
    }

    /// Rebalance this rank's partition toward the render-tier size,
    /// skipping the engine entirely when the sizes already match.
    fn redistribute_for_render(&self, input: Option<&DataSet>) -> Result<DataSet> {
        let Some(link) = &self.render_link else {
            error!("no render link configured for a render-tier delivery");
            return Ok(DataSet::empty(self.output_kind));
        };

        let available = self.group.as_ref().map(Collective::size).unwrap_or(1);
        let mut target = link.connections;
        if target > available {
            warn!(
                requested = target,
                available,
                "render tier is larger than the data tier; clamping"
            );
            target = available;
        }
        if target == available {
            // Equal sizes: plain local pass-through. The engine's own
            // contract for N == M is unspecified.
            return Ok(self.pass_through(input));
        }

        let _span = debug_span!("redistribute", from = available, to = target).entered();
        match &self.redistribute {
            Some(engine) => engine.redistribute(input, available, target),
            None => {
                error!("no redistribution engine configured");
                Ok(DataSet::empty(self.output_kind))
            }
        }
    }

    /// Ship a dataset to this rank's paired render-tier process. Ranks
    /// without a pairing skip silently.
    fn send_to_render(&mut self, data: &DataSet) -> Result<()> {
        let marshaller = self.marshaller;
        let Some(link) = self.render_link.as_mut() else {
            error!("no render link configured for a render-tier delivery");
            return Ok(());
        };
        let Some(channel) = link.channel.as_mut() else {
            // More data ranks than render ranks: unpaired ranks have
            // nothing to ship.
            return Ok(());
        };

        let _span = debug_span!("send-to-render-tier").entered();
        let set = BufferSet::single(marshaller.marshal(data)?);
        channel.send_set(&RENDER_TIER_TAGS, &set)
    }

    /// Receive this render-tier rank's partition from its paired data
    /// rank.
    fn receive_from_data_tier(&mut self) -> Result<DataSet> {
        let marshaller = self.marshaller;
        let kind = self.output_kind;
        let Some(channel) = self
            .render_link
            .as_mut()
            .and_then(|link| link.channel.as_mut())
        else {
            error!("every render-tier process should have a bridge to the data tier");
            return Ok(DataSet::empty(kind));
        };

        let _span = debug_span!("receive-from-data-tier").entered();
        let set = channel.recv_set(&RENDER_TIER_TAGS)?;
        Ok(set.reconstruct(&marshaller, kind))
    }

    /// Data rank 0 forwards the merged dataset to render rank 0.
    fn root_send_to_render_root(&mut self, data: &DataSet) -> Result<()> {
        if self.group_rank() != 0 {
            return Ok(());
        }
        let marshaller = self.marshaller;
        let Some(channel) = self
            .render_link
            .as_mut()
            .and_then(|link| link.channel.as_mut())
        else {
            // Rank 0 at least should be paired.
            error!("missing render bridge on the data-tier root");
            return Ok(());
        };

        let _span = debug_span!("send-to-render-root").entered();
        let set = BufferSet::single(marshaller.marshal(data)?);
        channel.send_set(&RENDER_TIER_TAGS, &set)
    }

    /// Render rank 0 receives the merged dataset from data rank 0; other
    /// render ranks produce the empty dataset and wait for the broadcast.
    fn render_root_receive(&mut self) -> Result<DataSet> {
        if self.group_rank() != 0 {
            return Ok(DataSet::empty(self.output_kind));
        }
        let marshaller = self.marshaller;
        let kind = self.output_kind;
        let Some(channel) = self
            .render_link
            .as_mut()
            .and_then(|link| link.channel.as_mut())
        else {
            error!("missing data-tier bridge on the render-tier root");
            return Ok(DataSet::empty(kind));
        };

        let _span = debug_span!("receive-from-data-root").entered();
        let set = channel.recv_set(&RENDER_TIER_TAGS)?;
        Ok(set.reconstruct(&marshaller, kind))
    }

    /// Fan the root's dataset out to every rank of the render group.
    fn render_broadcast(&self, data: DataSet) -> Result<DataSet> {
        let Some(group) = &self.group else {
            return Ok(data);
        };
        if group.size() <= 1 {
            return Ok(data);
        }

        if group.rank() == 0 {
            let payload = self.marshaller.marshal(&data)?;
            group.broadcast(Some(&payload), 0)?;
            // The root already holds the object; no reconstruction.
            Ok(data)
        } else {
            let set = group.broadcast(None, 0)?;
            Ok(set.reconstruct(&self.marshaller, self.output_kind))
        }
    }

    /// Data rank 0 ships a dataset to the client.
    fn send_to_client(&mut self, data: &DataSet) -> Result<()> {
        if self.group_rank() != 0 {
            return Ok(());
        }
        let marshaller = self.marshaller;
        let Some(channel) = self
            .client_link
            .as_mut()
            .and_then(|link| link.channel.as_mut())
        else {
            error!("no client bridge on the data-tier root");
            return Ok(());
        };

        let _span = debug_span!("send-to-client").entered();
        let set = BufferSet::single(marshaller.marshal(data)?);
        channel.send_set(&CLIENT_TIER_TAGS, &set)
    }

    /// The client receives the dataset shipped by data rank 0.
    fn client_receive(&mut self) -> Result<DataSet> {
        let marshaller = self.marshaller;
        let kind = self.output_kind;
        let Some(channel) = self
            .client_link
            .as_mut()
            .and_then(|link| link.channel.as_mut())
        else {
            error!("missing data-tier bridge on the client");
            return Ok(DataSet::empty(kind));
        };

        let _span = debug_span!("receive-from-data-tier").entered();
        let set = channel.recv_set(&CLIENT_TIER_TAGS)?;
        Ok(set.reconstruct(&marshaller, kind))
    }
}
