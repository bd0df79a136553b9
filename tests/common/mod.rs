//! Shared fixtures for the router integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use strata::dataset::{AttributeArray, DataSet, PolyMesh, UnstructuredGrid};
use strata::error::{Error, Result};
use strata::router::Redistribute;
use strata::transport::{BridgeChannel, PointToPoint, ProcessGroup, TcpBridge};

/// Install a quiet tracing subscriber once; set `RUST_LOG` to see the
/// router's movement spans while debugging a scenario.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A one-point mesh carrying a single "value" scalar.
pub fn point_mesh(x: f64, value: f64) -> DataSet {
    let mut mesh = PolyMesh {
        points: vec![[x, 0.0, 0.0]],
        ..PolyMesh::default()
    };
    mesh.cells.push_cell(&[0]);
    mesh.point_data
        .push_array(AttributeArray::new("value", vec![value]));
    mesh.into()
}

/// An unstructured grid with `cells` single-point cells.
pub fn grid_with_cells(cells: usize) -> DataSet {
    let mut grid = UnstructuredGrid {
        points: (0..cells).map(|i| [i as f64, 0.0, 0.0]).collect(),
        ..UnstructuredGrid::default()
    };
    for i in 0..cells {
        grid.cells.push_cell(&[i as u64]);
        grid.cell_types.push(1);
    }
    grid.into()
}

/// The sorted "value" scalars of a mesh's point data.
pub fn sorted_values(data: &DataSet) -> Vec<f64> {
    let DataSet::PolyMesh(mesh) = data else {
        panic!("expected a poly mesh");
    };
    let mut values = mesh
        .point_data
        .array("value")
        .expect("mesh carries a value array")
        .values
        .clone();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values
}

/// A connected pair of TCP bridges over localhost.
pub fn tcp_bridge_pair() -> (TcpBridge, TcpBridge) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let connector = thread::spawn(move || TcpBridge::connect(addr).unwrap());
    let accepted = TcpBridge::accept(&listener).unwrap();
    (connector.join().unwrap(), accepted)
}

/// A connected pair of bridge channels over localhost TCP.
pub fn channel_pair() -> (BridgeChannel, BridgeChannel) {
    let (a, b) = tcp_bridge_pair();
    (BridgeChannel::tcp(a), BridgeChannel::tcp(b))
}

/// A process group that records every collective call and refuses to
/// perform any. For asserting that a code path issues no group traffic.
pub struct CountingGroup {
    size: usize,
    rank: usize,
    calls: Arc<AtomicUsize>,
}

impl CountingGroup {
    pub fn new(size: usize, rank: usize, calls: Arc<AtomicUsize>) -> Self {
        Self { size, rank, calls }
    }

    fn refuse(&self) -> Error {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Error::Transport("collective issued against a counting stub".into())
    }
}

impl ProcessGroup for CountingGroup {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_gather(&self, _value: u64) -> Result<Vec<u64>> {
        Err(self.refuse())
    }

    fn all_gather_v(&self, _local: &[u8], _lengths: &[u64], _offsets: &[u64]) -> Result<Vec<u8>> {
        Err(self.refuse())
    }

    fn gather_v(
        &self,
        _local: &[u8],
        _lengths: &[u64],
        _offsets: &[u64],
        _root: usize,
    ) -> Result<Option<Vec<u8>>> {
        Err(self.refuse())
    }

    fn broadcast(&self, _payload: Option<&[u8]>, _root: usize) -> Result<Vec<u8>> {
        Err(self.refuse())
    }
}

/// A redistribution stub that counts invocations and passes the local
/// partition through unchanged.
pub struct CountingRedistribute {
    calls: Arc<AtomicUsize>,
    output_kind: strata::dataset::DataKind,
}

impl CountingRedistribute {
    pub fn new(calls: Arc<AtomicUsize>, output_kind: strata::dataset::DataKind) -> Self {
        Self { calls, output_kind }
    }
}

impl Redistribute for CountingRedistribute {
    fn redistribute(
        &self,
        input: Option<&DataSet>,
        _input_count: usize,
        _output_count: usize,
    ) -> Result<DataSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(input
            .cloned()
            .unwrap_or_else(|| DataSet::empty(self.output_kind)))
    }
}

/// A point-to-point stub that records tags as messages flow, for
/// asserting the three-message bridge ordering.
pub struct RecordingLink {
    pub inner: Box<dyn PointToPoint>,
    pub sent_tags: Arc<std::sync::Mutex<Vec<u16>>>,
}

impl PointToPoint for RecordingLink {
    fn send(&mut self, tag: u16, payload: &[u8]) -> Result<()> {
        self.sent_tags.lock().unwrap().push(tag);
        self.inner.send(tag, payload)
    }

    fn recv(&mut self, tag: u16, expected_len: usize) -> Result<Vec<u8>> {
        self.inner.recv(tag, expected_len)
    }
}
