use crate::net::packet::{FrameError, PacketReader};

const FML_MARKER: &str = "FML";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
    Unknown(u32),
}

impl From<u32> for NextState {
    fn from(value: u32) -> Self {
        match value {
            1 => NextState::Status,
            2 => NextState::Login,
            other => NextState::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    /// Declared address with NULs removed and control characters escaped.
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
    pub forge: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub name: String,
}

pub fn parse_handshake(reader: &mut PacketReader<'_>) -> Result<Handshake, FrameError> {
    let protocol_version = reader.read_var_int()?;
    let raw_address = reader.read_utf()?;
    let server_port = reader.read_unsigned_short()?;
    let next_state = NextState::from(reader.read_var_int()?);
    let (server_address, forge) = sanitize_address(&raw_address);
    Ok(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state,
        forge,
    })
}

/// Decodes a whole Login Start frame: length prefix, packet kind, then the
/// player name. Anything after the name is ignored.
pub fn parse_login_start(data: &[u8]) -> Result<LoginStart, FrameError> {
    let mut reader = PacketReader::new(data);
    let _frame_len = reader.read_var_int()?;
    let _kind = reader.read_var_int()?;
    let name = reader.read_utf()?;
    Ok(LoginStart { name })
}

pub fn sanitize_address(raw: &str) -> (String, bool) {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\0' => {}
            '\r' => cleaned.push_str("\\r"),
            '\t' => cleaned.push_str("\\t"),
            '\n' => cleaned.push_str("\\n"),
            other => cleaned.push(other),
        }
    }
    match cleaned.strip_suffix(FML_MARKER) {
        Some(stripped) => (stripped.to_string(), true),
        None => (cleaned, false),
    }
}
