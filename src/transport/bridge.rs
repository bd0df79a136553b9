//! Point-to-point tier bridges.
//!
//! A bridge pairs exactly one process in one tier with one process in a
//! neighboring tier over a preconfigured socket. Buffer sets cross the
//! bridge as a strict three-message sequence, each message on its own
//! fixed tag:
//!
//! ```text
//! 1. contributor count        (u32, tag T)
//! 2. per-contributor lengths  (count × u64, tag T+1)
//! 3. concatenated payload     (sum of lengths bytes, tag T+2)
//! ```
//!
//! The receiver computes offsets from the length array before touching
//! the payload message, so its receive buffer is always sized from
//! already-received information.
//!
//! ## Frame format
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Tag: u16 (LE)                        │
//! │ Length: u64 (LE)                     │
//! ├──────────────────────────────────────┤
//! │ Payload                              │
//! └──────────────────────────────────────┘
//! ```

use crate::buffer::BufferSet;
use crate::error::{Error, Result};
use crate::observability::{record_bridge_bytes_received, record_bridge_bytes_sent};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// The tag triple used by one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTags {
    /// Tag of the contributor-count message.
    pub count: u16,
    /// Tag of the length-array message.
    pub lengths: u16,
    /// Tag of the payload message.
    pub payload: u16,
}

/// Tags for the data-tier to render-tier bridge.
pub const RENDER_TIER_TAGS: BridgeTags = BridgeTags {
    count: 23480,
    lengths: 23481,
    payload: 23482,
};

/// Tags for the data-tier to client bridge.
pub const CLIENT_TIER_TAGS: BridgeTags = BridgeTags {
    count: 23490,
    lengths: 23491,
    payload: 23492,
};

/// A blocking, tagged, point-to-point message transport.
///
/// `recv` takes the expected payload length because the protocol always
/// lets the receiver derive it from an earlier message; a frame whose tag
/// or length disagrees is a transport error, not a resynchronization
/// point.
pub trait PointToPoint: Send {
    /// Send one tagged message.
    fn send(&mut self, tag: u16, payload: &[u8]) -> Result<()>;

    /// Receive one message, which must carry `tag` and exactly
    /// `expected_len` payload bytes.
    fn recv(&mut self, tag: u16, expected_len: usize) -> Result<Vec<u8>>;
}

/// Frame header size: tag (2) + length (8).
const FRAME_HEADER: usize = 10;

/// A [`PointToPoint`] transport over a TCP stream.
pub struct TcpBridge {
    stream: TcpStream,
    bytes_sent: u64,
    bytes_received: u64,
}

impl TcpBridge {
    /// Connect to the peer end of a bridge.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// Accept one bridge connection from a listener.
    pub fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _addr) = listener.accept()?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an existing TCP stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Total bytes sent, including frame headers.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes received, including frame headers.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl PointToPoint for TcpBridge {
    fn send(&mut self, tag: u16, payload: &[u8]) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER];
        header[0..2].copy_from_slice(&tag.to_le_bytes());
        header[2..10].copy_from_slice(&(payload.len() as u64).to_le_bytes());

        self.stream.write_all(&header)?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;

        let sent = (FRAME_HEADER + payload.len()) as u64;
        self.bytes_sent += sent;
        record_bridge_bytes_sent(sent);
        Ok(())
    }

    fn recv(&mut self, tag: u16, expected_len: usize) -> Result<Vec<u8>> {
        let mut header = [0u8; FRAME_HEADER];
        self.stream.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Transport("bridge closed by peer".into())
            } else {
                Error::Io(e)
            }
        })?;

        let got_tag = u16::from_le_bytes([header[0], header[1]]);
        let got_len = u64::from_le_bytes(header[2..10].try_into().expect("header is 10 bytes"));

        if got_tag != tag {
            return Err(Error::Transport(format!(
                "unexpected message tag {got_tag} (want {tag})"
            )));
        }
        if got_len != expected_len as u64 {
            return Err(Error::Transport(format!(
                "message carries {got_len} bytes but {expected_len} were announced"
            )));
        }

        let mut payload = vec![0u8; expected_len];
        self.stream.read_exact(&mut payload)?;

        let received = (FRAME_HEADER + expected_len) as u64;
        self.bytes_received += received;
        record_bridge_bytes_received(received);
        Ok(payload)
    }
}

/// The three-message buffer-set exchange over any [`PointToPoint`] link.
pub struct BridgeChannel {
    link: Box<dyn PointToPoint>,
}

impl BridgeChannel {
    /// Wrap a point-to-point link.
    pub fn new(link: Box<dyn PointToPoint>) -> Self {
        Self { link }
    }

    /// Wrap a TCP bridge.
    pub fn tcp(bridge: TcpBridge) -> Self {
        Self::new(Box::new(bridge))
    }

    /// Send a buffer set: count, then lengths, then payload.
    pub fn send_set(&mut self, tags: &BridgeTags, set: &BufferSet) -> Result<()> {
        let count = set.count() as u32;
        self.link.send(tags.count, &count.to_le_bytes())?;

        let mut lengths = Vec::with_capacity(set.count() * 8);
        for &len in set.lengths() {
            lengths.extend_from_slice(&len.to_le_bytes());
        }
        self.link.send(tags.lengths, &lengths)?;
        self.link.send(tags.payload, set.payload())
    }

    /// Receive a buffer set: count, then lengths, then payload.
    pub fn recv_set(&mut self, tags: &BridgeTags) -> Result<BufferSet> {
        let count_bytes = self.link.recv(tags.count, 4)?;
        let count =
            u32::from_le_bytes(count_bytes.as_slice().try_into().expect("count is 4 bytes"))
                as usize;

        let length_bytes = self.link.recv(tags.lengths, count * 8)?;
        let lengths: Vec<u64> = length_bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes")))
            .collect();

        // Offsets and total are derived before the payload message is
        // read, so the receive buffer is sized from the length array.
        let total: u64 = lengths.iter().sum();
        let payload = self.link.recv(tags.payload, total as usize)?;
        BufferSet::from_gathered(&lengths, payload)
    }
}

/// The data-to-render-tier connection state of one process.
///
/// This object exists on every data-tier and render-tier rank whenever a
/// distinct render tier is configured. When the data tier has more ranks
/// than the render tier, unpaired data ranks carry no channel; skipping
/// the bridge step there is normal, not an error.
pub struct RenderLink {
    /// Render-tier size (the redistribution target count).
    pub connections: usize,
    /// This rank's socket pairing, if it has one.
    pub channel: Option<BridgeChannel>,
}

impl RenderLink {
    /// Create the render-tier link state for one rank.
    pub fn new(connections: usize, channel: Option<BridgeChannel>) -> Self {
        Self {
            connections,
            channel,
        }
    }
}

/// The data-to-client connection state of one process.
///
/// Exists on every data-tier rank whenever a distinct client is
/// configured; only data rank 0 (and the client itself) carries the
/// channel.
pub struct ClientLink {
    /// This rank's socket pairing, if it has one.
    pub channel: Option<BridgeChannel>,
}

impl ClientLink {
    /// Create the client link state for one rank.
    pub fn new(channel: Option<BridgeChannel>) -> Self {
        Self { channel }
    }
}
