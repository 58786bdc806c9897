use std::io::{self, Read, Write};
use std::net::SocketAddr;

use tracing::{debug, info};

use crate::descriptor::DescriptorCell;
use crate::net::connection::{is_stall, FrameConnection, InboundFrame, ReadError};
use crate::net::handshake::{parse_handshake, parse_login_start, Handshake, NextState};
use crate::net::packet::{FrameError, PacketReader, PACKET_HANDSHAKE, PACKET_PING};
use crate::net::status::{disconnect_frame, pong_frame, status_response_frame};
use crate::wake::{WakeOutcome, WakeTrigger};

/// Status clients follow the response with an empty request and a ping.
const STATUS_FOLLOW_UP_FRAMES: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    #[error("unknown packet kind {0}")]
    UnknownPacketKind(u32),
    #[error("unknown handshake state {0}")]
    UnknownHandshakeState(u32),
    #[error("response encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<ReadError> for ProtocolError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Frame(err) => ProtocolError::MalformedFrame(err),
            ReadError::Io(err) => ProtocolError::Io(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub peer: SocketAddr,
    /// Address as shown in logs: `fqdn/ip` when hostnames are enabled.
    pub client: String,
    pub handshake: Option<Handshake>,
}

impl ConnectionContext {
    pub fn new(peer: SocketAddr, client: String) -> Self {
        Self {
            peer,
            client,
            handshake: None,
        }
    }

    pub fn tag(&self) -> String {
        format!("{}:{}", self.client, self.peer.port())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Closed,
    Status { ponged: bool },
    Login {
        name: Option<String>,
        wake: Option<WakeOutcome>,
    },
    Pong,
}

pub fn route_connection<S: Read + Write>(
    conn: &mut FrameConnection<S>,
    ctx: &mut ConnectionContext,
    descriptor: &DescriptorCell,
    wake: Option<&WakeTrigger>,
) -> Result<Exchange, ProtocolError> {
    let Some(frame) = conn.read_frame()? else {
        return Ok(Exchange::Closed);
    };
    match frame.kind {
        PACKET_HANDSHAKE => handle_handshake(conn, ctx, &frame, descriptor, wake),
        PACKET_PING => {
            answer_ping(conn, ctx, &frame)?;
            Ok(Exchange::Pong)
        }
        other => Err(ProtocolError::UnknownPacketKind(other)),
    }
}

fn handle_handshake<S: Read + Write>(
    conn: &mut FrameConnection<S>,
    ctx: &mut ConnectionContext,
    frame: &InboundFrame,
    descriptor: &DescriptorCell,
    wake: Option<&WakeTrigger>,
) -> Result<Exchange, ProtocolError> {
    let handshake = parse_handshake(&mut PacketReader::new(&frame.payload))?;
    let forge_note = if handshake.forge {
        "(using ForgeModLoader) "
    } else {
        ""
    };
    let target = format!("{}:{}", handshake.server_address, handshake.server_port);
    let next_state = handshake.next_state;
    ctx.handshake = Some(handshake);

    match next_state {
        NextState::Status => {
            info!(
                "[{}] Received client {forge_note}ping packet ({target}).",
                ctx.tag()
            );
            let response = status_response_frame(&descriptor.read())?;
            conn.send(&response)?;
            let ponged = status_follow_up(conn, ctx)?;
            Ok(Exchange::Status { ponged })
        }
        NextState::Login => {
            let name = if conn.buffered().is_empty() {
                None
            } else {
                Some(parse_login_start(conn.buffered())?.name).filter(|name| !name.is_empty())
            };
            match name.as_deref() {
                Some(name) => info!(
                    "[{}] {name} tries to connect to the server {forge_note}({target}).",
                    ctx.tag()
                ),
                None => info!(
                    "[{}] Tries to connect to the server {forge_note}({target}).",
                    ctx.tag()
                ),
            }
            let kick = disconnect_frame(&descriptor.kick_message())?;
            conn.send(&kick)?;
            let wake = wake.map(|trigger| trigger.trigger(&ctx.client, descriptor));
            Ok(Exchange::Login { name, wake })
        }
        NextState::Unknown(state) => Err(ProtocolError::UnknownHandshakeState(state)),
    }
}

fn answer_ping<S: Read + Write>(
    conn: &mut FrameConnection<S>,
    ctx: &ConnectionContext,
    frame: &InboundFrame,
) -> Result<(), ProtocolError> {
    let payload = PacketReader::new(&frame.payload).read_long_raw()?;
    conn.send(&pong_frame(&payload))?;
    info!("[{}] Responded with pong packet.", ctx.tag());
    Ok(())
}

/// Reads what a status client sends after the response. Skips the empty
/// status request, answers a ping, and treats a closed or quiet peer as done.
fn status_follow_up<S: Read + Write>(
    conn: &mut FrameConnection<S>,
    ctx: &ConnectionContext,
) -> Result<bool, ProtocolError> {
    for _ in 0..STATUS_FOLLOW_UP_FRAMES {
        let frame = match conn.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(ReadError::Io(err)) if is_quiet_close(&err) => {
                debug!("[{}] status follow-up ended: {err}", ctx.tag());
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        match frame.kind {
            PACKET_HANDSHAKE if frame.payload.is_empty() => continue,
            PACKET_PING => {
                answer_ping(conn, ctx, &frame)?;
                return Ok(true);
            }
            other => {
                debug!("[{}] ignoring packet {other} after status", ctx.tag());
                return Ok(false);
            }
        }
    }
    Ok(false)
}

fn is_quiet_close(err: &io::Error) -> bool {
    is_stall(err)
        || matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof
        )
}
