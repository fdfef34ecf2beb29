//! Binary telemetry frames
//!
//! Layout (40 bytes, every multi-byte field big-endian):
//!
//!   0   u8   stream id
//!   1   u8   frame version
//!   2   u16  reserved (zero)
//!   4   u32  sequence, per stream, wrapping
//!   8   u64  timestamp, unix milliseconds
//!   16  f32  depth
//!   20  f32  x5 stream fields
//!
//! Drill: depth, rpm, wob, torque, hook load, spp
//! Geo:   depth, gamma, rop, gas, inclination, azimuth

use axum::body::Bytes;

use crate::sample::RigSample;
use crate::types::StreamDefinition;

pub const FRAME_VERSION: u8 = 1;
pub const FRAME_LEN: usize = 40;
pub const FIELD_COUNT: usize = 6;

const HEADER_LEN: usize = 16;

/// Float payload of one frame, in wire order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFields {
    pub stream: StreamDefinition,
    pub values: [f32; FIELD_COUNT],
}

impl FrameFields {
    pub fn drill(sample: &RigSample) -> Self {
        Self {
            stream: StreamDefinition::Drill,
            values: [
                sample.depth,
                sample.rpm,
                sample.wob,
                sample.torque,
                sample.hook_load,
                sample.spp,
            ],
        }
    }

    pub fn geo(sample: &RigSample) -> Self {
        Self {
            stream: StreamDefinition::Geo,
            values: [
                sample.depth,
                sample.gamma,
                sample.rop,
                sample.gas,
                sample.inclination,
                sample.azimuth,
            ],
        }
    }
}

/// Encoded frame ready for fan-out
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub stream: StreamDefinition,
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub bytes: Bytes,
}

/// Write one frame into `buf`, replacing its contents
pub fn encode_into(
    buf: &mut Vec<u8>,
    stream: StreamDefinition,
    sequence: u32,
    timestamp_ms: u64,
    values: &[f32; FIELD_COUNT],
) {
    buf.clear();
    buf.push(stream.code());
    buf.push(FRAME_VERSION);
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(&timestamp_ms.to_be_bytes());
    for value in values {
        buf.extend_from_slice(&value.to_be_bytes());
    }
    debug_assert_eq!(buf.len(), FRAME_LEN);
}

#[derive(Debug)]
struct StreamSlot {
    buf: Vec<u8>,
    next_sequence: u32,
}

impl StreamSlot {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
            next_sequence: 0,
        }
    }
}

/// Per-stream sequence counters and scratch buffers
#[derive(Debug)]
pub struct FrameEncoder {
    drill: StreamSlot,
    geo: StreamSlot,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            drill: StreamSlot::new(),
            geo: StreamSlot::new(),
        }
    }

    fn slot(&mut self, stream: StreamDefinition) -> &mut StreamSlot {
        match stream {
            StreamDefinition::Drill => &mut self.drill,
            StreamDefinition::Geo => &mut self.geo,
        }
    }

    /// Sequence the next frame of `stream` will carry
    pub fn next_sequence(&self, stream: StreamDefinition) -> u32 {
        match stream {
            StreamDefinition::Drill => self.drill.next_sequence,
            StreamDefinition::Geo => self.geo.next_sequence,
        }
    }

    pub fn encode(&mut self, fields: &FrameFields, timestamp_ms: u64) -> TelemetryFrame {
        let slot = self.slot(fields.stream);
        let sequence = slot.next_sequence;
        slot.next_sequence = sequence.wrapping_add(1);

        encode_into(&mut slot.buf, fields.stream, sequence, timestamp_ms, &fields.values);

        TelemetryFrame {
            stream: fields.stream,
            sequence,
            timestamp_ms,
            bytes: Bytes::copy_from_slice(&slot.buf),
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side view of a frame, used by tooling and tests
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub stream: StreamDefinition,
    pub version: u8,
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub values: [f32; FIELD_COUNT],
}

pub fn decode(bytes: &[u8]) -> Option<DecodedFrame> {
    if bytes.len() != FRAME_LEN {
        return None;
    }
    let stream = StreamDefinition::from_code(bytes[0] as u64)?;
    let sequence = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
    let timestamp_ms = u64::from_be_bytes(bytes[8..16].try_into().ok()?);

    let mut values = [0f32; FIELD_COUNT];
    for (i, chunk) in bytes[HEADER_LEN..].chunks_exact(4).enumerate() {
        values[i] = f32::from_be_bytes(chunk.try_into().ok()?);
    }

    Some(DecodedFrame {
        stream,
        version: bytes[1],
        sequence,
        timestamp_ms,
        values,
    })
}
