//! Buffer sets: length/offset-addressed serialized payloads.
//!
//! A [`BufferSet`] holds the serialized contributions of one or more
//! processes as `(length, offset)` ranges into a single flat backing
//! buffer, the shape produced by gather-style collectives and carried by
//! tier bridges. Slicing is cheap ([`bytes::Bytes`] backing); a set is
//! built immediately before a transport call and dropped right after its
//! contents have been reconstructed into a dataset.

use crate::dataset::{merge_pieces, DataKind, DataSet};
use crate::error::{Error, Result};
use crate::marshal::Marshaller;
use bytes::Bytes;
use smallvec::SmallVec;
use tracing::error;

/// Per-rank length/offset bookkeeping, inline for typical tier sizes.
type RankArray = SmallVec<[u64; 8]>;

/// An ordered set of serialized buffers over one flat backing array.
///
/// Invariants, enforced at construction: `offsets[0] == 0`,
/// `offsets[i] == offsets[i - 1] + lengths[i - 1]`, and the lengths sum to
/// the backing buffer's size. Entries may be zero-length: a rank with
/// nothing to contribute still occupies its slot.
#[derive(Clone, Debug, Default)]
pub struct BufferSet {
    lengths: RankArray,
    offsets: RankArray,
    bytes: Bytes,
}

impl BufferSet {
    /// Create a set with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a set holding exactly one buffer.
    pub fn single(payload: Vec<u8>) -> Self {
        let mut lengths = RankArray::new();
        let mut offsets = RankArray::new();
        lengths.push(payload.len() as u64);
        offsets.push(0);
        Self {
            lengths,
            offsets,
            bytes: Bytes::from(payload),
        }
    }

    /// Wrap the result of a gather-style exchange: one length per
    /// contributor plus the concatenated payload. Offsets are computed.
    pub fn from_gathered(lengths: &[u64], flat: Vec<u8>) -> Result<Self> {
        let mut offsets = RankArray::with_capacity(lengths.len());
        let mut total: u64 = 0;
        for &len in lengths {
            offsets.push(total);
            total += len;
        }
        if total != flat.len() as u64 {
            return Err(Error::Transport(format!(
                "gathered payload is {} bytes but lengths sum to {}",
                flat.len(),
                total
            )));
        }
        Ok(Self {
            lengths: RankArray::from_slice(lengths),
            offsets,
            bytes: Bytes::from(flat),
        })
    }

    /// Number of contributing buffers.
    pub fn count(&self) -> usize {
        self.lengths.len()
    }

    /// Check whether the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Total backing-buffer length.
    pub fn total_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Per-contributor lengths, in rank order.
    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// Per-contributor offsets, in rank order.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// The concatenated payload.
    pub fn payload(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero-copy slice of entry `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.count()`.
    pub fn slice(&self, i: usize) -> Bytes {
        let start = self.offsets[i] as usize;
        let end = start + self.lengths[i] as usize;
        self.bytes.slice(start..end)
    }

    /// Iterate over entries as zero-copy slices.
    pub fn iter(&self) -> impl Iterator<Item = Bytes> + '_ {
        (0..self.count()).map(move |i| self.slice(i))
    }

    /// Deserialize every entry and merge the pieces into one dataset of
    /// the `expected` kind.
    ///
    /// Zero-length entries are ranks that had nothing to contribute and
    /// are skipped. An entry that fails to parse is reported and skipped;
    /// the result degrades toward empty rather than failing the execution.
    /// An entirely empty set reconstructs to `DataSet::empty(expected)`.
    pub fn reconstruct(&self, marshaller: &Marshaller, expected: DataKind) -> DataSet {
        if self.is_empty() || self.total_len() == 0 {
            return DataSet::empty(expected);
        }

        let mut pieces = Vec::with_capacity(self.count());
        for (i, entry) in self.iter().enumerate() {
            if entry.is_empty() {
                continue;
            }
            match marshaller.unmarshal(&entry, expected) {
                Ok(piece) => pieces.push(piece),
                Err(e) => {
                    error!(entry = i, "buffer did not reconstruct: {e}");
                }
            }
        }
        merge_pieces(pieces, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PolyMesh;

    #[test]
    fn test_single_entry_invariants() {
        let set = BufferSet::single(vec![1, 2, 3, 4]);
        assert_eq!(set.count(), 1);
        assert_eq!(set.total_len(), 4);
        assert_eq!(set.lengths(), &[4]);
        assert_eq!(set.offsets(), &[0]);
        assert_eq!(&set.slice(0)[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_from_gathered_computes_offsets() {
        let set = BufferSet::from_gathered(&[2, 0, 3], vec![10, 11, 20, 21, 22]).unwrap();
        assert_eq!(set.count(), 3);
        assert_eq!(set.offsets(), &[0, 2, 2]);
        assert_eq!(&set.slice(0)[..], &[10, 11]);
        assert!(set.slice(1).is_empty());
        assert_eq!(&set.slice(2)[..], &[20, 21, 22]);
    }

    #[test]
    fn test_from_gathered_rejects_bad_total() {
        assert!(BufferSet::from_gathered(&[2, 2], vec![0, 1, 2]).is_err());
    }

    #[test]
    fn test_reconstruct_empty_set() {
        let marshaller = Marshaller::new(false);
        let out = BufferSet::empty().reconstruct(&marshaller, DataKind::UnstructuredGrid);
        assert_eq!(out.kind(), DataKind::UnstructuredGrid);
        assert!(out.is_empty());
    }

    #[test]
    fn test_reconstruct_skips_zero_length_entries() {
        let marshaller = Marshaller::new(false);
        let mesh: DataSet = PolyMesh {
            points: vec![[1.0, 2.0, 3.0]],
            ..PolyMesh::default()
        }
        .into();
        let payload = marshaller.marshal(&mesh).unwrap();
        let len = payload.len() as u64;

        // Rank 1 contributed nothing.
        let set = BufferSet::from_gathered(&[len, 0], payload).unwrap();
        let out = set.reconstruct(&marshaller, DataKind::PolyMesh);
        assert_eq!(out, mesh);
    }

    #[test]
    fn test_reconstruct_skips_malformed_entries() {
        let marshaller = Marshaller::new(false);
        let mesh: DataSet = PolyMesh {
            points: vec![[1.0, 2.0, 3.0]],
            ..PolyMesh::default()
        }
        .into();
        let good = marshaller.marshal(&mesh).unwrap();
        let good_len = good.len() as u64;

        let mut flat = good;
        flat.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let set = BufferSet::from_gathered(&[good_len, 4], flat).unwrap();

        let out = set.reconstruct(&marshaller, DataKind::PolyMesh);
        assert_eq!(out, mesh);
    }
}
