//! Dataset model: the typed payloads moved between tiers.
//!
//! A [`DataSet`] is one of a small closed set of dataset kinds (polygonal
//! mesh, unstructured grid, image volume, graph, multi-block composite).
//! The enum wraps its concrete payload in an [`Arc`], so cloning a dataset
//! is a cheap structural-sharing copy; the bulk arrays are never duplicated
//! when a dataset is passed through unchanged.
//!
//! Attribute arrays attached to points/cells/vertices/edges live in an
//! [`Attributes`] set. An attribute set may mark one of its arrays as the
//! active global-id array; reconstruction after a gather clears that flag
//! (the array itself is kept) so a later append does not misread ids that
//! were only unique within one rank's partition.

mod merge;

pub use merge::merge_pieces;

use std::fmt;
use std::sync::Arc;

/// Type tag identifying a dataset kind.
///
/// The tag is used both to allocate the correct concrete output object and
/// to decide whether kind-specific metadata (image extent/origin) must be
/// carried alongside the generic serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Polygonal mesh.
    PolyMesh,
    /// Unstructured grid.
    UnstructuredGrid,
    /// Axis-aligned image volume.
    ImageVolume,
    /// Directed graph.
    DirectedGraph,
    /// Undirected graph.
    UndirectedGraph,
    /// Multi-block composite of other datasets.
    MultiBlock,
}

impl DataKind {
    /// Get the human-readable name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PolyMesh => "poly-mesh",
            Self::UnstructuredGrid => "unstructured-grid",
            Self::ImageVolume => "image-volume",
            Self::DirectedGraph => "directed-graph",
            Self::UndirectedGraph => "undirected-graph",
            Self::MultiBlock => "multi-block",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named data array attached to points, cells, vertices or edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeArray {
    /// Array name.
    pub name: String,
    /// One value per element.
    pub values: Vec<f64>,
}

impl AttributeArray {
    /// Create a named array from its values.
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// A set of attribute arrays plus active-attribute bookkeeping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    arrays: Vec<AttributeArray>,
    active_global_ids: Option<usize>,
}

impl Attributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an array, returning its index.
    pub fn push_array(&mut self, array: AttributeArray) -> usize {
        self.arrays.push(array);
        self.arrays.len() - 1
    }

    /// All arrays in insertion order.
    pub fn arrays(&self) -> &[AttributeArray] {
        &self.arrays
    }

    /// Look up an array by name.
    pub fn array(&self, name: &str) -> Option<&AttributeArray> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// Number of arrays.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Check whether the set has no arrays.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Mark the array at `index` as the active global-id array, or clear
    /// the designation with `None`. An out-of-range index clears it.
    pub fn set_active_global_ids(&mut self, index: Option<usize>) {
        self.active_global_ids = index.filter(|&i| i < self.arrays.len());
    }

    /// Index of the active global-id array, if one is designated.
    pub fn active_global_ids_index(&self) -> Option<usize> {
        self.active_global_ids
    }

    /// The active global-id array, if one is designated.
    pub fn active_global_ids(&self) -> Option<&AttributeArray> {
        self.active_global_ids.and_then(|i| self.arrays.get(i))
    }
}

/// Cell storage as offsets plus flat connectivity.
///
/// `offsets` always has `len() + 1` entries starting at 0; cell `i` spans
/// `connectivity[offsets[i]..offsets[i + 1]]`.
#[derive(Clone, Debug, PartialEq)]
pub struct CellArray {
    /// Cell boundaries into `connectivity` (n+1 entries, first is 0).
    pub offsets: Vec<u64>,
    /// Flat point-id list for all cells.
    pub connectivity: Vec<u64>,
}

impl Default for CellArray {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            connectivity: Vec::new(),
        }
    }
}

impl CellArray {
    /// Create an empty cell array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Check whether there are no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one cell given its point ids.
    pub fn push_cell(&mut self, point_ids: &[u64]) {
        self.connectivity.extend_from_slice(point_ids);
        self.offsets.push(self.connectivity.len() as u64);
    }

    /// The point ids of cell `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn cell(&self, i: usize) -> &[u64] {
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize;
        &self.connectivity[start..end]
    }

    /// Iterate over cells as point-id slices.
    pub fn iter(&self) -> impl Iterator<Item = &[u64]> + '_ {
        (0..self.len()).map(move |i| self.cell(i))
    }
}

/// Polygonal mesh: points plus polygonal cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyMesh {
    /// Point coordinates.
    pub points: Vec<[f64; 3]>,
    /// Polygonal cells.
    pub cells: CellArray,
    /// Per-point attributes.
    pub point_data: Attributes,
    /// Per-cell attributes.
    pub cell_data: Attributes,
}

/// Unstructured grid: points plus typed cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnstructuredGrid {
    /// Point coordinates.
    pub points: Vec<[f64; 3]>,
    /// Cell connectivity.
    pub cells: CellArray,
    /// One cell-type code per cell.
    pub cell_types: Vec<u8>,
    /// Per-point attributes.
    pub point_data: Attributes,
    /// Per-cell attributes.
    pub cell_data: Attributes,
}

/// The inverted extent marking an image volume with no voxels.
pub const EMPTY_EXTENT: [i32; 6] = [0, -1, 0, -1, 0, -1];

/// Axis-aligned image volume.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageVolume {
    /// Voxel extent as index ranges `[x0, x1, y0, y1, z0, z1]` (inclusive).
    pub extent: [i32; 6],
    /// World-space origin of index (0, 0, 0).
    pub origin: [f64; 3],
    /// Voxel spacing along each axis.
    pub spacing: [f64; 3],
    /// Per-point (voxel corner) attributes.
    pub point_data: Attributes,
    /// Per-cell (voxel) attributes.
    pub cell_data: Attributes,
}

impl Default for ImageVolume {
    fn default() -> Self {
        Self {
            extent: EMPTY_EXTENT,
            origin: [0.0; 3],
            spacing: [1.0; 3],
            point_data: Attributes::new(),
            cell_data: Attributes::new(),
        }
    }
}

impl ImageVolume {
    /// Point dimensions along each axis (0 for an empty extent).
    pub fn dimensions(&self) -> [usize; 3] {
        let d = |lo: i32, hi: i32| (hi - lo + 1).max(0) as usize;
        [
            d(self.extent[0], self.extent[1]),
            d(self.extent[2], self.extent[3]),
            d(self.extent[4], self.extent[5]),
        ]
    }

    /// Cell dimensions along each axis. A flat axis (one point) still
    /// contributes a factor of one.
    pub fn cell_dimensions(&self) -> [usize; 3] {
        self.dimensions().map(|d| match d {
            0 => 0,
            1 => 1,
            n => n - 1,
        })
    }

    /// Total number of points.
    pub fn num_points(&self) -> u64 {
        let [x, y, z] = self.dimensions();
        (x * y * z) as u64
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> u64 {
        let [x, y, z] = self.cell_dimensions();
        (x * y * z) as u64
    }
}

/// Graph dataset: vertices plus edges, directed or not.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    /// Whether edges are directed.
    pub directed: bool,
    /// Number of vertices.
    pub num_vertices: u64,
    /// Edges as `[source, target]` vertex-id pairs.
    pub edges: Vec<[u64; 2]>,
    /// Per-vertex attributes.
    pub vertex_data: Attributes,
    /// Per-edge attributes.
    pub edge_data: Attributes,
}

/// Multi-block composite dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiBlock {
    /// Child datasets.
    pub blocks: Vec<DataSet>,
}

/// A dataset payload routed between tiers.
///
/// Cloning is cheap: the payload is behind an [`Arc`], so a clone shares
/// the bulk arrays with the original. This is what a pass-through delivery
/// hands downstream.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSet {
    /// Polygonal mesh.
    PolyMesh(Arc<PolyMesh>),
    /// Unstructured grid.
    UnstructuredGrid(Arc<UnstructuredGrid>),
    /// Image volume.
    ImageVolume(Arc<ImageVolume>),
    /// Directed or undirected graph.
    Graph(Arc<Graph>),
    /// Multi-block composite.
    MultiBlock(Arc<MultiBlock>),
}

impl From<PolyMesh> for DataSet {
    fn from(value: PolyMesh) -> Self {
        Self::PolyMesh(Arc::new(value))
    }
}

impl From<UnstructuredGrid> for DataSet {
    fn from(value: UnstructuredGrid) -> Self {
        Self::UnstructuredGrid(Arc::new(value))
    }
}

impl From<ImageVolume> for DataSet {
    fn from(value: ImageVolume) -> Self {
        Self::ImageVolume(Arc::new(value))
    }
}

impl From<Graph> for DataSet {
    fn from(value: Graph) -> Self {
        Self::Graph(Arc::new(value))
    }
}

impl From<MultiBlock> for DataSet {
    fn from(value: MultiBlock) -> Self {
        Self::MultiBlock(Arc::new(value))
    }
}

impl DataSet {
    /// Create a default-initialized dataset of the given kind.
    pub fn empty(kind: DataKind) -> Self {
        match kind {
            DataKind::PolyMesh => PolyMesh::default().into(),
            DataKind::UnstructuredGrid => UnstructuredGrid::default().into(),
            DataKind::ImageVolume => ImageVolume::default().into(),
            DataKind::DirectedGraph => Graph {
                directed: true,
                ..Graph::default()
            }
            .into(),
            DataKind::UndirectedGraph => Graph::default().into(),
            DataKind::MultiBlock => MultiBlock::default().into(),
        }
    }

    /// The kind tag of this dataset.
    pub fn kind(&self) -> DataKind {
        match self {
            Self::PolyMesh(_) => DataKind::PolyMesh,
            Self::UnstructuredGrid(_) => DataKind::UnstructuredGrid,
            Self::ImageVolume(_) => DataKind::ImageVolume,
            Self::Graph(g) => {
                if g.directed {
                    DataKind::DirectedGraph
                } else {
                    DataKind::UndirectedGraph
                }
            }
            Self::MultiBlock(_) => DataKind::MultiBlock,
        }
    }

    /// Total number of points.
    pub fn num_points(&self) -> u64 {
        match self {
            Self::PolyMesh(m) => m.points.len() as u64,
            Self::UnstructuredGrid(g) => g.points.len() as u64,
            Self::ImageVolume(v) => v.num_points(),
            Self::Graph(_) => 0,
            Self::MultiBlock(b) => b.blocks.iter().map(DataSet::num_points).sum(),
        }
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> u64 {
        match self {
            Self::PolyMesh(m) => m.cells.len() as u64,
            Self::UnstructuredGrid(g) => g.cells.len() as u64,
            Self::ImageVolume(v) => v.num_cells(),
            Self::Graph(_) => 0,
            Self::MultiBlock(b) => b.blocks.iter().map(DataSet::num_cells).sum(),
        }
    }

    /// Total number of graph vertices.
    pub fn num_vertices(&self) -> u64 {
        match self {
            Self::Graph(g) => g.num_vertices,
            Self::MultiBlock(b) => b.blocks.iter().map(DataSet::num_vertices).sum(),
            _ => 0,
        }
    }

    /// Check whether the dataset holds no points and no vertices.
    pub fn is_empty(&self) -> bool {
        self.num_points() == 0 && self.num_vertices() == 0
    }

    /// Clear the active global-id designation on point and cell attribute
    /// sets, walking into every block of a composite. The arrays are kept.
    ///
    /// Reconstructed partitions were valid, non-overlapping per-rank
    /// pieces; leaving the flag set would make a later append treat the
    /// per-rank ids as globally meaningful.
    pub fn demote_global_ids(&mut self) {
        match self {
            Self::PolyMesh(m) => {
                let m = Arc::make_mut(m);
                m.point_data.set_active_global_ids(None);
                m.cell_data.set_active_global_ids(None);
            }
            Self::UnstructuredGrid(g) => {
                let g = Arc::make_mut(g);
                g.point_data.set_active_global_ids(None);
                g.cell_data.set_active_global_ids(None);
            }
            Self::ImageVolume(v) => {
                let v = Arc::make_mut(v);
                v.point_data.set_active_global_ids(None);
                v.cell_data.set_active_global_ids(None);
            }
            // Graphs carry no point/cell attribute sets.
            Self::Graph(_) => {}
            Self::MultiBlock(b) => {
                let b = Arc::make_mut(b);
                for block in &mut b.blocks {
                    block.demote_global_ids();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_array_push_and_iter() {
        let mut cells = CellArray::new();
        assert!(cells.is_empty());

        cells.push_cell(&[0, 1, 2]);
        cells.push_cell(&[2, 3]);

        assert_eq!(cells.len(), 2);
        assert_eq!(cells.cell(0), &[0, 1, 2]);
        assert_eq!(cells.cell(1), &[2, 3]);

        let collected: Vec<_> = cells.iter().collect();
        assert_eq!(collected, vec![&[0u64, 1, 2][..], &[2, 3][..]]);
    }

    #[test]
    fn test_attributes_active_global_ids() {
        let mut attrs = Attributes::new();
        let idx = attrs.push_array(AttributeArray::new("gids", vec![3.0, 1.0]));

        attrs.set_active_global_ids(Some(idx));
        assert_eq!(attrs.active_global_ids().unwrap().name, "gids");

        // Out-of-range designation is ignored.
        attrs.set_active_global_ids(Some(17));
        assert!(attrs.active_global_ids().is_none());
    }

    #[test]
    fn test_empty_kinds() {
        for kind in [
            DataKind::PolyMesh,
            DataKind::UnstructuredGrid,
            DataKind::ImageVolume,
            DataKind::DirectedGraph,
            DataKind::UndirectedGraph,
            DataKind::MultiBlock,
        ] {
            let ds = DataSet::empty(kind);
            assert_eq!(ds.kind(), kind);
            assert!(ds.is_empty());
            assert_eq!(ds.num_points(), 0);
            assert_eq!(ds.num_cells(), 0);
        }
    }

    #[test]
    fn test_image_volume_counts() {
        let vol = ImageVolume {
            extent: [0, 9, 0, 9, 0, 0],
            ..ImageVolume::default()
        };
        assert_eq!(vol.dimensions(), [10, 10, 1]);
        assert_eq!(vol.num_points(), 100);
        assert_eq!(vol.num_cells(), 81);

        assert_eq!(ImageVolume::default().num_points(), 0);
        assert_eq!(ImageVolume::default().num_cells(), 0);
    }

    #[test]
    fn test_clone_shares_payload() {
        let mesh = PolyMesh {
            points: vec![[0.0, 0.0, 0.0]; 1024],
            ..PolyMesh::default()
        };
        let ds: DataSet = mesh.into();
        let copy = ds.clone();

        let (DataSet::PolyMesh(a), DataSet::PolyMesh(b)) = (&ds, &copy) else {
            panic!("wrong kind");
        };
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_demote_global_ids_walks_composite() {
        let mut point_data = Attributes::new();
        let idx = point_data.push_array(AttributeArray::new("gids", vec![0.0, 1.0]));
        point_data.set_active_global_ids(Some(idx));

        let leaf = PolyMesh {
            points: vec![[0.0; 3]; 2],
            point_data,
            ..PolyMesh::default()
        };
        let mut composite: DataSet = MultiBlock {
            blocks: vec![leaf.into()],
        }
        .into();

        composite.demote_global_ids();

        let DataSet::MultiBlock(b) = &composite else {
            panic!("wrong kind");
        };
        let DataSet::PolyMesh(m) = &b.blocks[0] else {
            panic!("wrong kind");
        };
        assert!(m.point_data.active_global_ids().is_none());
        // The array itself is kept.
        assert!(m.point_data.array("gids").is_some());
    }
}
