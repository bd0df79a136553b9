//! Wire representation of datasets, serialized with rkyv.
//!
//! The envelope pairs a free-form text header (writer metadata) with the
//! generic payload. The payload is a structural mirror of [`DataSet`] with
//! one deliberate difference: the image-volume body carries only point
//! dimensions and spacing. Extent offsets and origin are not part of the
//! generic serialization; the adapter encodes them in the text header and
//! re-applies them after reading. This also means image blocks nested in a
//! composite come back with a zero-based extent and a zero origin; the
//! header convention only covers a top-level volume.

use crate::dataset::{
    AttributeArray, Attributes, CellArray, DataSet, Graph, ImageVolume, MultiBlock, PolyMesh,
    UnstructuredGrid,
};

/// Everything the writer produces for one dataset.
#[derive(Clone, Debug, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct WireEnvelope {
    /// Writer metadata carried alongside the payload (empty when unused).
    pub header: String,
    /// The generic payload.
    pub body: WireBody,
}

#[derive(Clone, Debug, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct WireAttributeArray {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct WireAttributes {
    pub arrays: Vec<WireAttributeArray>,
    pub active_global_ids: Option<u32>,
}

#[derive(Clone, Debug, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub(crate) struct WireCells {
    pub offsets: Vec<u64>,
    pub connectivity: Vec<u64>,
}

/// Generic serialized form of one dataset.
#[derive(Clone, Debug, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
#[rkyv(serialize_bounds(
    __S: rkyv::ser::Writer + rkyv::ser::Allocator,
    __S::Error: rkyv::rancor::Source,
))]
#[rkyv(deserialize_bounds(__D::Error: rkyv::rancor::Source))]
#[rkyv(bytecheck(bounds(__C: rkyv::validation::ArchiveContext, __C::Error: rkyv::rancor::Source)))]
pub(crate) enum WireBody {
    PolyMesh {
        points: Vec<[f64; 3]>,
        cells: WireCells,
        point_data: WireAttributes,
        cell_data: WireAttributes,
    },
    UnstructuredGrid {
        points: Vec<[f64; 3]>,
        cells: WireCells,
        cell_types: Vec<u8>,
        point_data: WireAttributes,
        cell_data: WireAttributes,
    },
    ImageVolume {
        /// Point dimensions only; extent offsets and origin are not
        /// preserved by the generic form.
        dims: [u64; 3],
        spacing: [f64; 3],
        point_data: WireAttributes,
        cell_data: WireAttributes,
    },
    Graph {
        directed: bool,
        num_vertices: u64,
        edges: Vec<[u64; 2]>,
        vertex_data: WireAttributes,
        edge_data: WireAttributes,
    },
    MultiBlock {
        #[rkyv(omit_bounds)]
        blocks: Vec<WireBody>,
    },
}

impl WireAttributes {
    fn from_attributes(attrs: &Attributes) -> Self {
        Self {
            arrays: attrs
                .arrays()
                .iter()
                .map(|a| WireAttributeArray {
                    name: a.name.clone(),
                    values: a.values.clone(),
                })
                .collect(),
            active_global_ids: attrs.active_global_ids_index().map(|i| i as u32),
        }
    }

    fn into_attributes(self) -> Attributes {
        let mut out = Attributes::new();
        for array in self.arrays {
            out.push_array(AttributeArray::new(array.name, array.values));
        }
        out.set_active_global_ids(self.active_global_ids.map(|i| i as usize));
        out
    }
}

impl WireCells {
    fn from_cells(cells: &CellArray) -> Self {
        Self {
            offsets: cells.offsets.clone(),
            connectivity: cells.connectivity.clone(),
        }
    }

    fn into_cells(self) -> CellArray {
        let mut offsets = self.offsets;
        if offsets.is_empty() {
            offsets.push(0);
        }
        CellArray {
            offsets,
            connectivity: self.connectivity,
        }
    }
}

impl WireBody {
    pub(crate) fn from_dataset(data: &DataSet) -> Self {
        match data {
            DataSet::PolyMesh(m) => Self::PolyMesh {
                points: m.points.clone(),
                cells: WireCells::from_cells(&m.cells),
                point_data: WireAttributes::from_attributes(&m.point_data),
                cell_data: WireAttributes::from_attributes(&m.cell_data),
            },
            DataSet::UnstructuredGrid(g) => Self::UnstructuredGrid {
                points: g.points.clone(),
                cells: WireCells::from_cells(&g.cells),
                cell_types: g.cell_types.clone(),
                point_data: WireAttributes::from_attributes(&g.point_data),
                cell_data: WireAttributes::from_attributes(&g.cell_data),
            },
            DataSet::ImageVolume(v) => Self::ImageVolume {
                dims: v.dimensions().map(|d| d as u64),
                spacing: v.spacing,
                point_data: WireAttributes::from_attributes(&v.point_data),
                cell_data: WireAttributes::from_attributes(&v.cell_data),
            },
            DataSet::Graph(g) => Self::Graph {
                directed: g.directed,
                num_vertices: g.num_vertices,
                edges: g.edges.clone(),
                vertex_data: WireAttributes::from_attributes(&g.vertex_data),
                edge_data: WireAttributes::from_attributes(&g.edge_data),
            },
            DataSet::MultiBlock(b) => Self::MultiBlock {
                blocks: b.blocks.iter().map(WireBody::from_dataset).collect(),
            },
        }
    }

    pub(crate) fn into_dataset(self) -> DataSet {
        match self {
            Self::PolyMesh {
                points,
                cells,
                point_data,
                cell_data,
            } => PolyMesh {
                points,
                cells: cells.into_cells(),
                point_data: point_data.into_attributes(),
                cell_data: cell_data.into_attributes(),
            }
            .into(),
            Self::UnstructuredGrid {
                points,
                cells,
                cell_types,
                point_data,
                cell_data,
            } => UnstructuredGrid {
                points,
                cells: cells.into_cells(),
                cell_types,
                point_data: point_data.into_attributes(),
                cell_data: cell_data.into_attributes(),
            }
            .into(),
            Self::ImageVolume {
                dims,
                spacing,
                point_data,
                cell_data,
            } => {
                // A zero-based extent is all the generic form can restore;
                // the real extent/origin come back via the header.
                let extent_hi = dims.map(|d| d as i32 - 1);
                ImageVolume {
                    extent: [
                        0,
                        extent_hi[0],
                        0,
                        extent_hi[1],
                        0,
                        extent_hi[2],
                    ],
                    origin: [0.0; 3],
                    spacing,
                    point_data: point_data.into_attributes(),
                    cell_data: cell_data.into_attributes(),
                }
                .into()
            }
            Self::Graph {
                directed,
                num_vertices,
                edges,
                vertex_data,
                edge_data,
            } => Graph {
                directed,
                num_vertices,
                edges,
                vertex_data: vertex_data.into_attributes(),
                edge_data: edge_data.into_attributes(),
            }
            .into(),
            Self::MultiBlock { blocks } => MultiBlock {
                blocks: blocks.into_iter().map(WireBody::into_dataset).collect(),
            }
            .into(),
        }
    }
}
