//! Process-group collectives: the consumed library boundary plus an
//! in-process implementation over kanal channels.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A group of cooperating processes exposing synchronous collectives.
///
/// All operations block until the exchange completes locally. Correctness
/// requires that every member execute the same sequence of collective
/// calls; there is no timeout or cancellation at this layer.
pub trait ProcessGroup: Send + Sync {
    /// Number of members in the group.
    fn size(&self) -> usize;

    /// This member's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Exchange one scalar: every member receives every member's value,
    /// ordered by rank.
    fn all_gather(&self, value: u64) -> Result<Vec<u64>>;

    /// Variable-length all-gather: every member receives the concatenation
    /// of all members' buffers, laid out by the given per-rank lengths and
    /// offsets (which every member must have computed identically).
    fn all_gather_v(&self, local: &[u8], lengths: &[u64], offsets: &[u64]) -> Result<Vec<u8>>;

    /// Variable-length gather to `root`: returns the concatenation on the
    /// root and `None` elsewhere. Lengths and offsets must be known on
    /// every member so the exchange can be sized.
    fn gather_v(
        &self,
        local: &[u8],
        lengths: &[u64],
        offsets: &[u64],
        root: usize,
    ) -> Result<Option<Vec<u8>>>;

    /// Broadcast a buffer from `root` to every member. The root passes
    /// `Some(payload)` and gets it echoed back; other members pass `None`
    /// and receive the root's payload.
    fn broadcast(&self, payload: Option<&[u8]>, root: usize) -> Result<Vec<u8>>;
}

/// One message between group members.
struct Packet {
    seq: u64,
    src: usize,
    bytes: Vec<u8>,
}

/// In-process [`ProcessGroup`] over kanal channels.
///
/// [`LocalGroup::create`] hands out one member per simulated rank; move
/// each member onto its own thread. Packets carry a per-member sequence
/// number (one per collective call), and packets that arrive ahead of the
/// collective that wants them wait in a stash, so back-to-back
/// collectives never steal each other's traffic. This relies on every
/// member executing the same sequence of collective calls, which is the
/// same invariant real group transports require.
pub struct LocalGroup {
    rank: usize,
    senders: Vec<kanal::Sender<Packet>>,
    inbox: kanal::Receiver<Packet>,
    stash: Mutex<HashMap<(u64, usize), Vec<u8>>>,
    seq: AtomicU64,
}

impl LocalGroup {
    /// Create the members of a group of the given size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn create(size: usize) -> Vec<LocalGroup> {
        assert!(size > 0, "a process group needs at least one member");

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| kanal::unbounded::<Packet>()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalGroup {
                rank,
                senders: senders.clone(),
                inbox,
                stash: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            })
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn post(&self, dst: usize, seq: u64, bytes: Vec<u8>) -> Result<()> {
        self.senders[dst]
            .send(Packet {
                seq,
                src: self.rank,
                bytes,
            })
            .map_err(|_| Error::Transport("process group member disconnected".into()))
    }

    /// Receive the packet for (`seq`, `src`), stashing any packet that
    /// belongs to a different exchange.
    fn take(&self, seq: u64, src: usize) -> Result<Vec<u8>> {
        if let Some(bytes) = self
            .stash
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(seq, src))
        {
            return Ok(bytes);
        }
        loop {
            let packet = self
                .inbox
                .recv()
                .map_err(|_| Error::Transport("process group member disconnected".into()))?;
            if packet.seq == seq && packet.src == src {
                return Ok(packet.bytes);
            }
            self.stash
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert((packet.seq, packet.src), packet.bytes);
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn size(&self) -> usize {
        self.senders.len()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_gather(&self, value: u64) -> Result<Vec<u64>> {
        let seq = self.next_seq();
        let bytes = value.to_le_bytes();
        for dst in 0..self.size() {
            if dst != self.rank {
                self.post(dst, seq, bytes.to_vec())?;
            }
        }

        let mut out = vec![0u64; self.size()];
        out[self.rank] = value;
        for src in 0..self.size() {
            if src == self.rank {
                continue;
            }
            let received = self.take(seq, src)?;
            let arr: [u8; 8] = received
                .as_slice()
                .try_into()
                .map_err(|_| Error::Transport("malformed scalar packet".into()))?;
            out[src] = u64::from_le_bytes(arr);
        }
        Ok(out)
    }

    fn all_gather_v(&self, local: &[u8], lengths: &[u64], offsets: &[u64]) -> Result<Vec<u8>> {
        if lengths.len() != self.size() || offsets.len() != self.size() {
            return Err(Error::Config(
                "length/offset arrays must have one entry per rank".into(),
            ));
        }
        let seq = self.next_seq();
        for dst in 0..self.size() {
            if dst != self.rank {
                self.post(dst, seq, local.to_vec())?;
            }
        }

        let total: u64 = lengths.iter().sum();
        let mut flat = vec![0u8; total as usize];
        for src in 0..self.size() {
            let start = offsets[src] as usize;
            let end = start + lengths[src] as usize;
            if src == self.rank {
                flat[start..end].copy_from_slice(local);
            } else {
                let received = self.take(seq, src)?;
                if received.len() != lengths[src] as usize {
                    return Err(Error::Transport(format!(
                        "rank {src} sent {} bytes but announced {}",
                        received.len(),
                        lengths[src]
                    )));
                }
                flat[start..end].copy_from_slice(&received);
            }
        }
        Ok(flat)
    }

    fn gather_v(
        &self,
        local: &[u8],
        lengths: &[u64],
        offsets: &[u64],
        root: usize,
    ) -> Result<Option<Vec<u8>>> {
        if lengths.len() != self.size() || offsets.len() != self.size() {
            return Err(Error::Config(
                "length/offset arrays must have one entry per rank".into(),
            ));
        }
        let seq = self.next_seq();
        if self.rank != root {
            self.post(root, seq, local.to_vec())?;
            return Ok(None);
        }

        let total: u64 = lengths.iter().sum();
        let mut flat = vec![0u8; total as usize];
        for src in 0..self.size() {
            let start = offsets[src] as usize;
            let end = start + lengths[src] as usize;
            if src == self.rank {
                flat[start..end].copy_from_slice(local);
            } else {
                let received = self.take(seq, src)?;
                if received.len() != lengths[src] as usize {
                    return Err(Error::Transport(format!(
                        "rank {src} sent {} bytes but announced {}",
                        received.len(),
                        lengths[src]
                    )));
                }
                flat[start..end].copy_from_slice(&received);
            }
        }
        Ok(Some(flat))
    }

    fn broadcast(&self, payload: Option<&[u8]>, root: usize) -> Result<Vec<u8>> {
        let seq = self.next_seq();
        if self.rank == root {
            let bytes = payload
                .ok_or_else(|| Error::Config("broadcast root requires a payload".into()))?;
            for dst in 0..self.size() {
                if dst != self.rank {
                    self.post(dst, seq, bytes.to_vec())?;
                }
            }
            Ok(bytes.to_vec())
        } else {
            self.take(seq, root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_on_members<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(LocalGroup) -> T + Send + Sync + Clone + 'static,
        T: Send + 'static,
    {
        let members = LocalGroup::create(size);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let f = f.clone();
                thread::spawn(move || f(member))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_all_gather_scalars() {
        let results = run_on_members(4, |g| g.all_gather(g.rank() as u64 * 10).unwrap());
        for result in results {
            assert_eq!(result, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_all_gather_v_concatenates_by_rank() {
        let results = run_on_members(3, |g| {
            let local = vec![g.rank() as u8; g.rank() + 1];
            let lengths = g.all_gather(local.len() as u64).unwrap();
            let mut offsets = Vec::new();
            let mut total = 0;
            for &len in &lengths {
                offsets.push(total);
                total += len;
            }
            g.all_gather_v(&local, &lengths, &offsets).unwrap()
        });
        for result in results {
            assert_eq!(result, vec![0, 1, 1, 2, 2, 2]);
        }
    }

    #[test]
    fn test_gather_v_root_only() {
        let results = run_on_members(3, |g| {
            let local = vec![g.rank() as u8 + 1];
            let lengths = vec![1, 1, 1];
            let offsets = vec![0, 1, 2];
            g.gather_v(&local, &lengths, &offsets, 0).unwrap()
        });
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
        assert!(results.contains(&Some(vec![1, 2, 3])));
    }

    #[test]
    fn test_broadcast_from_root() {
        let results = run_on_members(4, |g| {
            let payload = if g.rank() == 2 {
                Some(&b"hello"[..])
            } else {
                None
            };
            g.broadcast(payload, 2).unwrap()
        });
        for result in results {
            assert_eq!(result, b"hello");
        }
    }

    #[test]
    fn test_back_to_back_collectives_do_not_cross() {
        // The stash has to keep fast members' later packets from being
        // consumed by slow members' earlier collectives.
        let results = run_on_members(3, |g| {
            if g.rank() == 0 {
                thread::sleep(std::time::Duration::from_millis(20));
            }
            let first = g.all_gather(g.rank() as u64).unwrap();
            let second = g.all_gather(100 + g.rank() as u64).unwrap();
            (first, second)
        });
        for (first, second) in results {
            assert_eq!(first, vec![0, 1, 2]);
            assert_eq!(second, vec![100, 101, 102]);
        }
    }

    #[test]
    fn test_broadcast_root_requires_payload() {
        let mut members = LocalGroup::create(1);
        let g = members.remove(0);
        assert!(g.broadcast(None, 0).is_err());
    }
}
