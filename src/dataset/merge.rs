//! Append-style merging of dataset pieces gathered from multiple ranks.
//!
//! After a gather-style exchange every contributing rank's partition has
//! been deserialized into its own [`DataSet`]; this module folds those
//! pieces into the single object handed downstream. Merging one piece is
//! the identity; merging zero pieces yields the empty dataset of the
//! requested kind.

use crate::dataset::{
    AttributeArray, Attributes, CellArray, DataKind, DataSet, Graph, ImageVolume, MultiBlock,
    PolyMesh, UnstructuredGrid,
};
use tracing::warn;

/// Merge gathered pieces into a single dataset of `kind`.
///
/// Datasets merge as an append-like union: points are concatenated, cell
/// connectivity is re-offset, and attribute arrays are appended by name
/// (arrays not present in every piece are dropped). Composites union their
/// block lists. Image volumes are placed into the bounding extent of all
/// pieces. Pieces of a different kind than requested are skipped with a
/// report.
pub fn merge_pieces(pieces: Vec<DataSet>, kind: DataKind) -> DataSet {
    let mut pieces: Vec<DataSet> = pieces
        .into_iter()
        .filter(|p| {
            if p.kind() == kind {
                true
            } else {
                warn!(got = %p.kind(), want = %kind, "skipping piece of mismatched kind");
                false
            }
        })
        .collect();

    if pieces.is_empty() {
        return DataSet::empty(kind);
    }
    if pieces.len() == 1 {
        return pieces.remove(0);
    }

    match kind {
        DataKind::PolyMesh => merge_poly_meshes(&pieces),
        DataKind::UnstructuredGrid => merge_unstructured_grids(&pieces),
        DataKind::ImageVolume => merge_image_volumes(&pieces),
        DataKind::DirectedGraph | DataKind::UndirectedGraph => merge_graphs(&pieces),
        DataKind::MultiBlock => merge_multi_blocks(&pieces),
    }
}

/// Append attribute sets, keeping only the arrays present in every piece
/// (in the first piece's order). The merged set never designates an active
/// global-id array.
fn append_attributes(sets: &[&Attributes]) -> Attributes {
    let mut out = Attributes::new();
    let Some(first) = sets.first() else {
        return out;
    };

    for array in first.arrays() {
        let mut values = array.values.clone();
        let mut present_everywhere = true;
        for set in &sets[1..] {
            match set.array(&array.name) {
                Some(other) => values.extend_from_slice(&other.values),
                None => {
                    present_everywhere = false;
                    break;
                }
            }
        }
        if present_everywhere {
            out.push_array(AttributeArray::new(array.name.clone(), values));
        }
    }
    out
}

/// Append `cells` into `into`, shifting point ids by `point_offset`.
fn append_cells(into: &mut CellArray, cells: &CellArray, point_offset: u64) {
    let base = into.connectivity.len() as u64;
    into.connectivity
        .extend(cells.connectivity.iter().map(|id| id + point_offset));
    into.offsets
        .extend(cells.offsets.iter().skip(1).map(|off| off + base));
}

fn merge_poly_meshes(pieces: &[DataSet]) -> DataSet {
    let meshes: Vec<&PolyMesh> = pieces
        .iter()
        .filter_map(|p| match p {
            DataSet::PolyMesh(m) => Some(m.as_ref()),
            _ => None,
        })
        .collect();

    let mut out = PolyMesh::default();
    for mesh in &meshes {
        let point_offset = out.points.len() as u64;
        out.points.extend_from_slice(&mesh.points);
        append_cells(&mut out.cells, &mesh.cells, point_offset);
    }
    out.point_data = append_attributes(&meshes.iter().map(|m| &m.point_data).collect::<Vec<_>>());
    out.cell_data = append_attributes(&meshes.iter().map(|m| &m.cell_data).collect::<Vec<_>>());
    out.into()
}

fn merge_unstructured_grids(pieces: &[DataSet]) -> DataSet {
    let grids: Vec<&UnstructuredGrid> = pieces
        .iter()
        .filter_map(|p| match p {
            DataSet::UnstructuredGrid(g) => Some(g.as_ref()),
            _ => None,
        })
        .collect();

    let mut out = UnstructuredGrid::default();
    for grid in &grids {
        let point_offset = out.points.len() as u64;
        out.points.extend_from_slice(&grid.points);
        append_cells(&mut out.cells, &grid.cells, point_offset);
        out.cell_types.extend_from_slice(&grid.cell_types);
    }
    out.point_data = append_attributes(&grids.iter().map(|g| &g.point_data).collect::<Vec<_>>());
    out.cell_data = append_attributes(&grids.iter().map(|g| &g.cell_data).collect::<Vec<_>>());
    out.into()
}

/// Place each piece's voxels into the bounding extent of all pieces.
///
/// Collected volumes are non-overlapping per-rank sub-extents of one
/// global volume, so placement by extent reassembles the original; where
/// pieces do overlap, later pieces win. Origin and spacing come from the
/// first piece.
fn merge_image_volumes(pieces: &[DataSet]) -> DataSet {
    let volumes: Vec<&ImageVolume> = pieces
        .iter()
        .filter_map(|p| match p {
            DataSet::ImageVolume(v) => Some(v.as_ref()),
            _ => None,
        })
        .filter(|v| v.num_points() > 0)
        .collect();

    let Some(first) = volumes.first() else {
        return DataSet::empty(DataKind::ImageVolume);
    };

    let mut extent = first.extent;
    for vol in &volumes[1..] {
        for axis in 0..3 {
            extent[2 * axis] = extent[2 * axis].min(vol.extent[2 * axis]);
            extent[2 * axis + 1] = extent[2 * axis + 1].max(vol.extent[2 * axis + 1]);
        }
    }

    let mut out = ImageVolume {
        extent,
        origin: first.origin,
        spacing: first.spacing,
        ..ImageVolume::default()
    };
    out.point_data = place_volume_attributes(&volumes, &out, false);
    out.cell_data = place_volume_attributes(&volumes, &out, true);
    out.into()
}

/// Copy per-point (or per-cell) arrays from each piece into the union
/// volume by extent. Only arrays present in every piece survive.
fn place_volume_attributes(volumes: &[&ImageVolume], union: &ImageVolume, cells: bool) -> Attributes {
    let union_dims = if cells {
        union.cell_dimensions()
    } else {
        union.dimensions()
    };
    let union_len = union_dims[0] * union_dims[1] * union_dims[2];

    let select = |v: &ImageVolume| -> (Attributes, [usize; 3]) {
        if cells {
            (v.cell_data.clone(), v.cell_dimensions())
        } else {
            (v.point_data.clone(), v.dimensions())
        }
    };

    let (first_attrs, _) = select(volumes[0]);
    let mut out = Attributes::new();

    'arrays: for array in first_attrs.arrays() {
        let mut values = vec![0.0f64; union_len];
        for vol in volumes {
            let (attrs, dims) = select(vol);
            let Some(piece) = attrs.array(&array.name) else {
                continue 'arrays;
            };
            let off = [
                (vol.extent[0] - union.extent[0]) as usize,
                (vol.extent[2] - union.extent[2]) as usize,
                (vol.extent[4] - union.extent[4]) as usize,
            ];
            for z in 0..dims[2] {
                for y in 0..dims[1] {
                    for x in 0..dims[0] {
                        let src = x + dims[0] * (y + dims[1] * z);
                        let dst = (x + off[0])
                            + union_dims[0] * ((y + off[1]) + union_dims[1] * (z + off[2]));
                        if let (Some(&v), Some(slot)) = (piece.values.get(src), values.get_mut(dst))
                        {
                            *slot = v;
                        }
                    }
                }
            }
        }
        out.push_array(AttributeArray::new(array.name.clone(), values));
    }
    out
}

/// Disjoint union: vertex ids of later pieces are shifted past the vertices
/// already merged.
fn merge_graphs(pieces: &[DataSet]) -> DataSet {
    let graphs: Vec<&Graph> = pieces
        .iter()
        .filter_map(|p| match p {
            DataSet::Graph(g) => Some(g.as_ref()),
            _ => None,
        })
        .collect();

    let mut out = Graph {
        directed: graphs.first().map(|g| g.directed).unwrap_or(false),
        ..Graph::default()
    };
    for graph in &graphs {
        let offset = out.num_vertices;
        out.num_vertices += graph.num_vertices;
        out.edges
            .extend(graph.edges.iter().map(|[s, t]| [s + offset, t + offset]));
    }
    out.vertex_data =
        append_attributes(&graphs.iter().map(|g| &g.vertex_data).collect::<Vec<_>>());
    out.edge_data = append_attributes(&graphs.iter().map(|g| &g.edge_data).collect::<Vec<_>>());
    out.into()
}

fn merge_multi_blocks(pieces: &[DataSet]) -> DataSet {
    let mut out = MultiBlock::default();
    for piece in pieces {
        if let DataSet::MultiBlock(b) = piece {
            out.blocks.extend(b.blocks.iter().cloned());
        }
    }
    out.into()
}
