use std::fmt::Write as FmtWrite;

/// Longest legal VarInt encoding of a 32-bit value.
pub const MAX_VARINT_BYTES: usize = 5;
/// Strings are capped at 32767 UTF-16 units, i.e. at most three UTF-8 bytes each.
pub const MAX_STRING_BYTES: usize = 32_767 * 3;

pub const PACKET_HANDSHAKE: u32 = 0x00;
pub const PACKET_PING: u32 = 0x01;
pub const PACKET_DISCONNECT: u32 = 0x00;
pub const PACKET_STATUS_RESPONSE: u32 = 0x00;
pub const PACKET_PONG: u32 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("varint longer than {MAX_VARINT_BYTES} bytes")]
    VarIntTooLong,
    #[error("varint does not fit in 32 bits")]
    VarIntOverflow,
    #[error("unexpected end of data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("string length {0} exceeds limit {MAX_STRING_BYTES}")]
    StringTooLong(usize),
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame length is zero")]
    EmptyFrame,
}

#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            pos: offset.min(data.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        let value = *self.data.get(self.pos).ok_or(FrameError::Truncated {
            needed: 1,
            available: 0,
        })?;
        self.pos += 1;
        Ok(value)
    }

    pub fn read_var_int(&mut self) -> Result<u32, FrameError> {
        let mut value: u32 = 0;
        for index in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            let bits = (byte & 0x7f) as u32;
            if index == MAX_VARINT_BYTES - 1 && bits > 0x0f {
                return Err(FrameError::VarIntOverflow);
            }
            value |= bits << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FrameError::VarIntTooLong)
    }

    pub fn read_utf(&mut self) -> Result<String, FrameError> {
        let len = self.read_var_int()? as usize;
        if len > MAX_STRING_BYTES {
            return Err(FrameError::StringTooLong(len));
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
    }

    pub fn read_unsigned_short(&mut self) -> Result<u16, FrameError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_long_raw(&mut self) -> Result<[u8; 8], FrameError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(raw)
    }

    pub fn read_long(&mut self) -> Result<i64, FrameError> {
        self.read_long_raw().map(i64::from_be_bytes)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < len {
            return Err(FrameError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let start = self.pos;
        self.pos = self.data.len();
        &self.data[start..]
    }
}

#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_var_int(&mut self, value: u32) {
        let mut value = value;
        loop {
            if value & !0x7f == 0 {
                self.data.push(value as u8);
                return;
            }
            self.data.push((value & 0x7f) as u8 | 0x80);
            value >>= 7;
        }
    }

    pub fn write_utf(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.write_var_int(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    pub fn write_unsigned_short(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_long(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

pub fn read_var_int(data: &[u8], offset: usize) -> Result<(u32, usize), FrameError> {
    let mut reader = PacketReader::at(data, offset);
    let value = reader.read_var_int()?;
    Ok((value, reader.position()))
}

pub fn write_var_int(value: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(MAX_VARINT_BYTES);
    writer.write_var_int(value);
    writer.into_vec()
}

pub fn read_utf(data: &[u8], offset: usize) -> Result<(String, usize), FrameError> {
    let mut reader = PacketReader::at(data, offset);
    let value = reader.read_utf()?;
    Ok((value, reader.position()))
}

pub fn write_utf(value: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(value.len() + MAX_VARINT_BYTES);
    writer.write_utf(value);
    writer.into_vec()
}

pub fn read_unsigned_short(data: &[u8], offset: usize) -> Result<(u16, usize), FrameError> {
    let mut reader = PacketReader::at(data, offset);
    let value = reader.read_unsigned_short()?;
    Ok((value, reader.position()))
}

pub fn read_long(data: &[u8], offset: usize) -> Result<(i64, usize), FrameError> {
    let mut reader = PacketReader::at(data, offset);
    let value = reader.read_long()?;
    Ok((value, reader.position()))
}

/// Builds `VarInt(len) ++ VarInt(kind) ++ payload` as one buffer so the frame
/// goes out in a single write.
pub fn frame_packet(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = PacketWriter::with_capacity(payload.len() + MAX_VARINT_BYTES);
    body.write_var_int(kind);
    body.write_bytes(payload);

    let mut framed = PacketWriter::with_capacity(body.len() + MAX_VARINT_BYTES);
    framed.write_var_int(body.len() as u32);
    framed.write_bytes(body.as_slice());
    framed.into_vec()
}

/// Decodes the length prefix at the start of `data`.
///
/// Returns `Ok(None)` while the prefix is still incomplete, otherwise the
/// declared body length and the number of prefix bytes consumed.
pub fn decode_frame_header(
    data: &[u8],
    max_len: usize,
) -> Result<Option<(usize, usize)>, FrameError> {
    let prefix_len = data
        .iter()
        .take(MAX_VARINT_BYTES)
        .position(|byte| byte & 0x80 == 0);
    let prefix_len = match prefix_len {
        Some(index) => index + 1,
        None if data.len() < MAX_VARINT_BYTES => return Ok(None),
        None => return Err(FrameError::VarIntTooLong),
    };
    let (len, _) = read_var_int(&data[..prefix_len], 0)?;
    let len = len as usize;
    if len == 0 {
        return Err(FrameError::EmptyFrame);
    }
    if len > max_len {
        return Err(FrameError::FrameTooLarge { len, max: max_len });
    }
    Ok(Some((len, prefix_len)))
}

pub fn hex_dump(bytes: &[u8], max: usize) -> String {
    let shown = max.min(bytes.len());
    let mut line = String::with_capacity(shown * 3 + 16);
    for (idx, byte) in bytes[..shown].iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:02x}", byte);
    }
    if bytes.len() > shown {
        let _ = write!(line, " trunc={}", bytes.len() - shown);
    }
    line
}
