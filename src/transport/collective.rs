//! Gather and broadcast sequencing over a process group.
//!
//! These wrappers fix the two-phase shape of every variable-length
//! exchange: first an all-gather of the scalar buffer length (every rank
//! needs the per-rank lengths to compute offsets and size the exchange,
//! even when only the root keeps the result), then the payload exchange
//! itself.

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::observability::record_collective_bytes;
use crate::transport::ProcessGroup;
use std::sync::Arc;
use tracing::debug_span;

/// Collective buffer exchanges over a [`ProcessGroup`].
#[derive(Clone)]
pub struct Collective {
    group: Arc<dyn ProcessGroup>,
}

impl Collective {
    /// Wrap a process group.
    pub fn new(group: Arc<dyn ProcessGroup>) -> Self {
        Self { group }
    }

    /// Number of members in the group.
    pub fn size(&self) -> usize {
        self.group.size()
    }

    /// This member's rank.
    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    fn prefix_offsets(lengths: &[u64]) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(lengths.len());
        let mut total = 0u64;
        for &len in lengths {
            offsets.push(total);
            total += len;
        }
        (offsets, total)
    }

    /// Every member ends up with the concatenation of all members'
    /// buffers, ordered by rank. A member with nothing to send passes an
    /// empty slice and occupies a zero-length slot.
    pub fn gather_all(&self, local: &[u8]) -> Result<BufferSet> {
        let _span = debug_span!("gather-all").entered();

        let lengths = self.group.all_gather(local.len() as u64)?;
        let (offsets, total) = Self::prefix_offsets(&lengths);
        let flat = self.group.all_gather_v(local, &lengths, &offsets)?;
        record_collective_bytes(total);
        BufferSet::from_gathered(&lengths, flat)
    }

    /// Gather every member's buffer to `root`. Returns the set on the
    /// root and `None` elsewhere.
    pub fn gather_to_root(&self, local: &[u8], root: usize) -> Result<Option<BufferSet>> {
        let _span = debug_span!("gather-to-0").entered();

        // The length exchange is still an all-gather: every member must
        // know the offsets and total to size the gather correctly.
        let lengths = self.group.all_gather(local.len() as u64)?;
        let (offsets, total) = Self::prefix_offsets(&lengths);
        record_collective_bytes(total);
        match self.group.gather_v(local, &lengths, &offsets, root)? {
            Some(flat) => Ok(Some(BufferSet::from_gathered(&lengths, flat)?)),
            None => Ok(None),
        }
    }

    /// Broadcast one buffer from `root` to every member. The root passes
    /// its payload; other members receive the length first, size their
    /// buffer, then receive the payload.
    pub fn broadcast(&self, local: Option<&[u8]>, root: usize) -> Result<BufferSet> {
        let _span = debug_span!("broadcast").entered();

        if self.group.rank() == root {
            let payload = local
                .ok_or_else(|| Error::Config("broadcast root requires a payload".into()))?;
            let len = payload.len() as u64;
            self.group.broadcast(Some(&len.to_le_bytes()), root)?;
            self.group.broadcast(Some(payload), root)?;
            record_collective_bytes(len);
            Ok(BufferSet::single(payload.to_vec()))
        } else {
            let len_bytes = self.group.broadcast(None, root)?;
            let arr: [u8; 8] = len_bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::Transport("malformed broadcast length".into()))?;
            let expected = u64::from_le_bytes(arr);

            let payload = self.group.broadcast(None, root)?;
            if payload.len() as u64 != expected {
                return Err(Error::Transport(format!(
                    "broadcast payload is {} bytes but {} were announced",
                    payload.len(),
                    expected
                )));
            }
            record_collective_bytes(expected);
            Ok(BufferSet::single(payload))
        }
    }
}
