//! Serialization adapter: dataset to byte buffer and back.
//!
//! ## Buffer layout
//!
//! ```text
//! Compressed:
//! ┌──────────────────────────────────────┐
//! │ Magic: "zlib" (4 bytes)              │
//! │ Uncompressed length: u32 (LE)        │
//! ├──────────────────────────────────────┤
//! │ zlib-compressed envelope             │
//! └──────────────────────────────────────┘
//!
//! Uncompressed:
//! ┌──────────────────────────────────────┐
//! │ Envelope (rkyv-serialized)           │
//! │ - text header (writer metadata)      │
//! │ - generic payload                    │
//! └──────────────────────────────────────┘
//! ```
//!
//! Compression is decided by the sender's configuration but detected by
//! the receiver from the magic bytes alone, so both ends of an exchange
//! agree as long as the configuration was distributed consistently.
//!
//! The generic payload does not preserve an image volume's extent offsets
//! or origin; for that kind the adapter writes the text header
//! `EXTENT x0 x1 y0 y1 z0 z1 ORIGIN ox oy oz` and re-applies the parsed
//! values to a fresh volume after reading.

mod wire;

use crate::dataset::{DataKind, DataSet, ImageVolume};
use crate::error::{Error, Result};
use crate::observability::{record_compress_time, record_inflate_time};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::time::Instant;
use tracing::{error, warn};
use wire::{WireBody, WireEnvelope};

/// Magic bytes marking a zlib-compressed buffer.
pub const COMPRESSION_MAGIC: [u8; 4] = *b"zlib";

/// Size of the magic-plus-length prefix on compressed buffers.
const COMPRESSION_HEADER: usize = 8;

/// Converts datasets to and from flat byte buffers.
///
/// The compression setting is fixed at construction; it applies to every
/// [`marshal`](Marshaller::marshal) call. Decoding never consults it.
#[derive(Clone, Copy, Debug)]
pub struct Marshaller {
    compress: bool,
}

impl Marshaller {
    /// Create a marshaller, optionally compressing serialized buffers.
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// Whether this marshaller compresses outgoing buffers.
    pub fn compression(&self) -> bool {
        self.compress
    }

    /// Serialize a dataset into a flat buffer.
    pub fn marshal(&self, data: &DataSet) -> Result<Vec<u8>> {
        let header = match data {
            DataSet::ImageVolume(v) => image_header(v),
            _ => String::new(),
        };
        let envelope = WireEnvelope {
            header,
            body: WireBody::from_dataset(data),
        };
        let raw = rkyv::to_bytes::<rkyv::rancor::Error>(&envelope)
            .map_err(|e| Error::Marshal(e.to_string()))?;

        if !self.compress {
            return Ok(raw.to_vec());
        }
        if raw.len() > u32::MAX as usize {
            return Err(Error::Marshal(format!(
                "{} bytes exceed the compressed-buffer length field",
                raw.len()
            )));
        }

        let start = Instant::now();
        let mut out = Vec::with_capacity(raw.len() / 2 + COMPRESSION_HEADER);
        out.extend_from_slice(&COMPRESSION_MAGIC);
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        let mut encoder = ZlibEncoder::new(out, Compression::default());
        encoder.write_all(&raw)?;
        let out = encoder.finish()?;
        record_compress_time(start.elapsed());
        Ok(out)
    }

    /// Deserialize a dataset of the `expected` kind from a flat buffer.
    ///
    /// A buffer whose payload parses to a different kind is reported and
    /// produces the empty dataset of the expected kind; a buffer that does
    /// not parse at all is a [`Error::Marshal`] the caller treats as a
    /// degraded piece.
    pub fn unmarshal(&self, bytes: &[u8], expected: DataKind) -> Result<DataSet> {
        let inflated;
        let raw: &[u8] = if bytes.len() > 4 && bytes[..4] == COMPRESSION_MAGIC {
            if bytes.len() < COMPRESSION_HEADER {
                return Err(Error::Marshal("truncated compression header".into()));
            }
            let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
            let start = Instant::now();
            let mut out = Vec::with_capacity(declared);
            ZlibDecoder::new(&bytes[COMPRESSION_HEADER..])
                .read_to_end(&mut out)
                .map_err(|e| Error::Marshal(format!("inflate failed: {e}")))?;
            record_inflate_time(start.elapsed());
            if out.len() != declared {
                warn!(
                    declared,
                    actual = out.len(),
                    "uncompressed length does not match the buffer header"
                );
            }
            inflated = out;
            &inflated
        } else {
            bytes
        };

        // rkyv access requires an aligned buffer; the transport hands us
        // arbitrary slices.
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(raw);
        let envelope = rkyv::from_bytes::<WireEnvelope, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Marshal(format!("payload did not parse: {e}")))?;

        let mut data = envelope.body.into_dataset();
        // Reconstructed pieces were valid per-rank partitions; their
        // global-id designations must not survive into the merge.
        data.demote_global_ids();

        let data = match (expected, data) {
            (DataKind::ImageVolume, DataSet::ImageVolume(vol)) => {
                restore_image_metadata(&vol, &envelope.header).into()
            }
            (_, other) => other,
        };

        if data.kind() != expected {
            error!(got = %data.kind(), want = %expected, "buffer holds the wrong dataset kind");
            return Ok(DataSet::empty(expected));
        }
        Ok(data)
    }
}

/// Writer-metadata header for an image volume.
fn image_header(vol: &ImageVolume) -> String {
    let e = vol.extent;
    let o = vol.origin;
    format!(
        "EXTENT {} {} {} {} {} {} ORIGIN {} {} {}",
        e[0], e[1], e[2], e[3], e[4], e[5], o[0], o[1], o[2]
    )
}

/// Rebuild a volume with the extent/origin parsed from the header, keeping
/// everything else from the generic read.
fn restore_image_metadata(vol: &ImageVolume, header: &str) -> ImageVolume {
    let mut fresh = vol.clone();
    match parse_image_header(header) {
        Some((extent, origin)) => {
            fresh.extent = extent;
            fresh.origin = origin;
        }
        None => {
            warn!("extent and origin may not have been restored correctly");
        }
    }
    fresh
}

fn parse_image_header(header: &str) -> Option<([i32; 6], [f64; 3])> {
    let mut tokens = header.split_whitespace();
    if tokens.next()? != "EXTENT" {
        return None;
    }
    let mut extent = [0i32; 6];
    for slot in &mut extent {
        *slot = tokens.next()?.parse().ok()?;
    }
    if tokens.next()? != "ORIGIN" {
        return None;
    }
    let mut origin = [0f64; 3];
    for slot in &mut origin {
        *slot = tokens.next()?.parse().ok()?;
    }
    Some((extent, origin))
}
