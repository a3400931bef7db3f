use crate::PROTOCOL_VERSION;

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
pub(crate) const TYPE_MASK: u8 = 0b0001_1111;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown input event tag: {0}")]
    UnknownEventTag(u8),
    #[error("payload type {0} is not carried on this channel")]
    UnexpectedPayload(&'static str),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("malformed json: {0}")]
    Json(String),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Json(err.to_string())
    }
}

pub(crate) fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

pub(crate) fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok(byte & TYPE_MASK)
}

pub(crate) fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

pub(crate) fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub(crate) fn write_var_i32(buf: &mut Vec<u8>, value: i32) {
    write_var_u32(buf, ((value << 1) ^ (value >> 31)) as u32);
}

pub(crate) fn write_var_i64(buf: &mut Vec<u8>, value: i64) {
    write_var_u64(buf, ((value << 1) ^ (value >> 63)) as u64);
}

pub(crate) fn write_str(buf: &mut Vec<u8>, value: &str) {
    write_var_u32(buf, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[derive(Clone, Copy)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    pub(crate) fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    pub(crate) fn read_var_i32(&mut self) -> Result<i32, WireError> {
        let raw = self.read_var_u32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    pub(crate) fn read_var_i64(&mut self) -> Result<i64, WireError> {
        let raw = self.read_var_u64()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidData("invalid boolean")),
        }
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.read_bytes(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_var_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidData("invalid utf-8"))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}
