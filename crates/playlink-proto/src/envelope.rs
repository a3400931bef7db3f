//! Binary envelope used on the negotiated data channel.
//!
//! ```text
//! +--------+---------+----------------+-----------+----------------+
//! | header | latency | latency trace  | event tag | event fields   |
//! | 1 byte | 0 | 1   | (if flag = 1)  | 1 byte    | varints / f32  |
//! +--------+---------+----------------+-----------+----------------+
//! ```
//!
//! The header packs the protocol version (3 bits) and the payload type
//! (5 bits). Only `input` payloads travel over the data channel; the other
//! payload types exist so foreign frames can be recognised and rejected.

use time::OffsetDateTime;

use crate::input::InputEvent;
use crate::latency::{LatencyTrace, StageStamp};
use crate::wire::{
    Cursor, WireError, read_header, write_header, write_str, write_var_i64, write_var_u32,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Ice,
    Sdp,
    Join,
    Answer,
    Input,
}

impl PayloadType {
    pub fn as_u8(self) -> u8 {
        match self {
            PayloadType::Ice => 0,
            PayloadType::Sdp => 1,
            PayloadType::Join => 2,
            PayloadType::Answer => 3,
            PayloadType::Input => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PayloadType::Ice),
            1 => Some(PayloadType::Sdp),
            2 => Some(PayloadType::Join),
            3 => Some(PayloadType::Answer),
            4 => Some(PayloadType::Input),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadType::Ice => "ice",
            PayloadType::Sdp => "sdp",
            PayloadType::Join => "join",
            PayloadType::Answer => "answer",
            PayloadType::Input => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Input(InputEvent),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Input(_) => PayloadType::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub latency: Option<LatencyTrace>,
    pub payload: Payload,
}

impl Envelope {
    pub fn input(event: InputEvent, latency: LatencyTrace) -> Self {
        Self {
            latency: Some(latency),
            payload: Payload::Input(event),
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let mut buf = Vec::with_capacity(48);
    write_header(&mut buf, envelope.payload_type().as_u8());
    match &envelope.latency {
        Some(trace) => {
            buf.push(1);
            encode_trace(&mut buf, trace);
        }
        None => buf.push(0),
    }
    match &envelope.payload {
        Payload::Input(event) => event.encode(&mut buf),
    }
    buf
}

/// Decodes one envelope. Unknown payload types yield `Ok(None)` so newer hosts
/// can add message kinds without breaking older peers.
pub fn decode_envelope(bytes: &[u8]) -> Result<Option<Envelope>, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    let Some(payload_type) = PayloadType::from_u8(kind) else {
        return Ok(None);
    };
    if payload_type != PayloadType::Input {
        return Err(WireError::UnexpectedPayload(payload_type.as_str()));
    }
    let latency = if cursor.read_bool()? {
        Some(decode_trace(&mut cursor)?)
    } else {
        None
    };
    let event = InputEvent::decode(&mut cursor)?;
    if cursor.remaining() != 0 {
        return Err(WireError::InvalidData("trailing bytes after envelope"));
    }
    Ok(Some(Envelope {
        latency,
        payload: Payload::Input(event),
    }))
}

fn encode_trace(buf: &mut Vec<u8>, trace: &LatencyTrace) {
    write_str(buf, &trace.sequence_id);
    write_var_u32(buf, trace.timestamps().len() as u32);
    for stamp in trace.timestamps() {
        write_str(buf, &stamp.stage);
        write_var_i64(buf, saturating_nanos(stamp.time));
    }
}

/// Nanoseconds since the epoch, pinned to the `i64` range the wire carries.
fn saturating_nanos(time: OffsetDateTime) -> i64 {
    let nanos = time.unix_timestamp_nanos();
    i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
}

fn decode_trace(cursor: &mut Cursor<'_>) -> Result<LatencyTrace, WireError> {
    let sequence_id = cursor.read_str()?;
    let count = cursor.read_var_u32()? as usize;
    let mut timestamps = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let stage = cursor.read_str()?;
        let nanos = cursor.read_var_i64()?;
        let time = OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
            .map_err(|_| WireError::InvalidData("timestamp out of range"))?;
        timestamps.push(StageStamp { stage, time });
    }
    Ok(LatencyTrace::from_parts(sequence_id, timestamps))
}
