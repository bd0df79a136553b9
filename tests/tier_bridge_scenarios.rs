//! Delivery scenarios across physically separate tiers: data to render
//! (batch) and data to render to client, wired over localhost TCP.

mod common;

use common::{channel_pair, grid_with_cells, CountingRedistribute};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use strata::dataset::{DataKind, DataSet};
use strata::router::{DataRouter, MoveMode, Tier, Topology};
use strata::transport::{BridgeChannel, ClientLink, LocalGroup, RenderLink};

struct TierOutputs {
    data: Vec<DataSet>,
    render: Vec<DataSet>,
    client: Option<DataSet>,
}

/// Run one delivery across a data tier, a render tier, and an optional
/// client, with data rank `i` bridged to render rank `i`.
fn run_tiers(
    mode: MoveMode,
    ranks: usize,
    cell_counts: &[usize],
    with_client: bool,
    redistribute_calls: &Arc<AtomicUsize>,
) -> TierOutputs {
    common::init_logging();
    let topology = if with_client {
        Topology::DataRenderClient
    } else {
        Topology::DataRender
    };

    let mut data_channels = Vec::new();
    let mut render_channels = Vec::new();
    for _ in 0..ranks {
        let (a, b) = channel_pair();
        data_channels.push(Some(a));
        render_channels.push(Some(b));
    }

    let (client_data_end, client_end) = if with_client {
        let (a, b) = channel_pair();
        (Some(a), Some(b))
    } else {
        (None, None)
    };

    let mut client_ends = vec![client_data_end];
    let cell_counts = cell_counts.to_vec();

    let data_handles: Vec<_> = LocalGroup::create(ranks)
        .into_iter()
        .enumerate()
        .map(|(rank, group)| {
            let render_channel = data_channels[rank].take();
            let client_channel = if rank == 0 {
                client_ends[0].take()
            } else {
                None
            };
            let calls = redistribute_calls.clone();
            let cells = cell_counts[rank];
            thread::spawn(move || {
                let mut builder = DataRouter::builder()
                    .mode(mode)
                    .tier(Tier::Data)
                    .topology(topology)
                    .output_kind(DataKind::UnstructuredGrid)
                    .group(Arc::new(group))
                    .render_link(RenderLink::new(ranks, render_channel))
                    .redistribute(Box::new(CountingRedistribute::new(
                        calls,
                        DataKind::UnstructuredGrid,
                    )));
                if with_client {
                    builder = builder.client_link(ClientLink::new(client_channel));
                }
                let mut router = builder.build();
                let input = grid_with_cells(cells);
                router.execute(Some(&input)).unwrap()
            })
        })
        .collect();

    let render_handles: Vec<_> = LocalGroup::create(ranks)
        .into_iter()
        .enumerate()
        .map(|(rank, group)| {
            let channel = render_channels[rank].take();
            thread::spawn(move || {
                let mut router = DataRouter::builder()
                    .mode(mode)
                    .tier(Tier::Render)
                    .topology(topology)
                    .output_kind(DataKind::UnstructuredGrid)
                    .group(Arc::new(group))
                    .render_link(RenderLink::new(ranks, channel))
                    .build();
                router.execute(None).unwrap()
            })
        })
        .collect();

    let client_handle = client_end.map(|channel: BridgeChannel| {
        thread::spawn(move || {
            let mut router = DataRouter::builder()
                .mode(mode)
                .tier(Tier::Client)
                .topology(Topology::DataRenderClient)
                .output_kind(DataKind::UnstructuredGrid)
                .client_link(ClientLink::new(Some(channel)))
                .build();
            router.execute(None).unwrap()
        })
    });

    TierOutputs {
        data: data_handles.into_iter().map(|h| h.join().unwrap()).collect(),
        render: render_handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect(),
        client: client_handle.map(|h| h.join().unwrap()),
    }
}

/// Batch pass-through with equal tier sizes: the engine is never called,
/// partitions land on their paired render ranks, data ranks are drained.
#[test]
fn pass_through_skips_redistribution_for_equal_tiers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let outputs = run_tiers(MoveMode::PassThrough, 2, &[5, 7], false, &calls);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    for output in &outputs.data {
        assert!(output.is_empty());
    }
    assert_eq!(outputs.render[0].num_cells(), 5);
    assert_eq!(outputs.render[1].num_cells(), 7);
    assert!(outputs.client.is_none());
}

/// Three-tier clone: rank 0 gathers, feeds the client and render rank 0,
/// and the render tier's broadcast replicates the union everywhere.
#[test]
fn three_tier_clone_fans_out_through_render_root() {
    let calls = Arc::new(AtomicUsize::new(0));
    let outputs = run_tiers(MoveMode::Clone, 2, &[5, 7], true, &calls);

    // Clone never rebalances.
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Data rank 0 keeps its merged copy; rank 1 holds nothing.
    assert_eq!(outputs.data[0].num_cells(), 12);
    assert!(outputs.data[1].is_empty());

    for output in &outputs.render {
        assert_eq!(output.num_cells(), 12);
    }
    assert_eq!(outputs.client.unwrap().num_cells(), 12);
}

/// Three-tier collect: only the client receives; the render tier idles.
#[test]
fn three_tier_collect_feeds_client_only() {
    let calls = Arc::new(AtomicUsize::new(0));
    let outputs = run_tiers(MoveMode::Collect, 2, &[5, 7], true, &calls);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(outputs.data[0].num_cells(), 12);
    assert!(outputs.data[1].is_empty());
    for output in &outputs.render {
        assert!(output.is_empty());
    }
    assert_eq!(outputs.client.unwrap().num_cells(), 12);
}

/// Three-tier collect-and-pass-through: partitions reach their paired
/// render ranks, the union reaches the client, and the data tier ends
/// empty.
#[test]
fn three_tier_collect_and_pass_through_does_both() {
    let calls = Arc::new(AtomicUsize::new(0));
    let outputs = run_tiers(MoveMode::CollectAndPassThrough, 2, &[5, 7], true, &calls);

    // Equal tier sizes, so the engine is still skipped.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    for output in &outputs.data {
        assert!(output.is_empty());
    }
    assert_eq!(outputs.render[0].num_cells(), 5);
    assert_eq!(outputs.render[1].num_cells(), 7);
    assert_eq!(outputs.client.unwrap().num_cells(), 12);
}

/// A render tier smaller than the data tier: every data rank runs the
/// engine, unpaired data ranks skip their bridge send.
#[test]
fn shrinking_pass_through_invokes_the_engine() {
    let calls = Arc::new(AtomicUsize::new(0));

    let (data_end, render_end) = channel_pair();
    let mut data_channels = vec![Some(data_end), None];

    let data_handles: Vec<_> = LocalGroup::create(2)
        .into_iter()
        .enumerate()
        .map(|(rank, group)| {
            let channel = data_channels[rank].take();
            let calls = calls.clone();
            thread::spawn(move || {
                let mut router = DataRouter::builder()
                    .mode(MoveMode::PassThrough)
                    .tier(Tier::Data)
                    .topology(Topology::DataRender)
                    .output_kind(DataKind::UnstructuredGrid)
                    .group(Arc::new(group))
                    .render_link(RenderLink::new(1, channel))
                    .redistribute(Box::new(CountingRedistribute::new(
                        calls,
                        DataKind::UnstructuredGrid,
                    )))
                    .build();
                let input = grid_with_cells(3);
                router.execute(Some(&input)).unwrap()
            })
        })
        .collect();

    let render_handle = thread::spawn(move || {
        let mut router = DataRouter::builder()
            .mode(MoveMode::PassThrough)
            .tier(Tier::Render)
            .topology(Topology::DataRender)
            .output_kind(DataKind::UnstructuredGrid)
            .render_link(RenderLink::new(1, Some(render_end)))
            .build();
        router.execute(None).unwrap()
    });

    for handle in data_handles {
        assert!(handle.join().unwrap().is_empty());
    }
    // The pass-through stub hands rank 0's partition to the render rank.
    assert_eq!(render_handle.join().unwrap().num_cells(), 3);
    // Both data ranks consulted the engine.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
