use serde::Serialize;
use uuid::Uuid;

use crate::descriptor::ServerDescriptor;
use crate::net::packet::{
    frame_packet, write_utf, PACKET_DISCONNECT, PACKET_PONG, PACKET_STATUS_RESPONSE,
};

#[derive(Debug, Serialize)]
struct StatusDocument<'a> {
    version: VersionInfo<'a>,
    players: PlayersInfo<'a>,
    description: TextComponent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VersionInfo<'a> {
    name: &'a str,
    protocol: i32,
}

#[derive(Debug, Serialize)]
struct PlayersInfo<'a> {
    max: u32,
    online: u32,
    sample: Vec<PlayerSample<'a>>,
}

#[derive(Debug, Serialize)]
struct PlayerSample<'a> {
    name: &'a str,
    id: String,
}

#[derive(Debug, Serialize)]
struct TextComponent<'a> {
    text: &'a str,
}

/// Renders the status document. Every sample entry gets a fresh random id.
pub fn build_status_json(descriptor: &ServerDescriptor) -> serde_json::Result<String> {
    let sample = descriptor
        .samples
        .iter()
        .map(|name| PlayerSample {
            name: name.as_str(),
            id: Uuid::new_v4().to_string(),
        })
        .collect();
    let favicon = descriptor
        .icon
        .as_deref()
        .filter(|icon| !icon.is_empty());
    let document = StatusDocument {
        version: VersionInfo {
            name: &descriptor.version_text,
            protocol: descriptor.protocol,
        },
        players: PlayersInfo {
            max: descriptor.player_max,
            online: descriptor.player_online,
            sample,
        },
        description: TextComponent {
            text: &descriptor.motd,
        },
        favicon,
    };
    serde_json::to_string(&document)
}

pub fn build_disconnect_json(kick_message: &str) -> serde_json::Result<String> {
    serde_json::to_string(&TextComponent { text: kick_message })
}

pub fn status_response_frame(descriptor: &ServerDescriptor) -> serde_json::Result<Vec<u8>> {
    let json = build_status_json(descriptor)?;
    Ok(frame_packet(PACKET_STATUS_RESPONSE, &write_utf(&json)))
}

pub fn disconnect_frame(kick_message: &str) -> serde_json::Result<Vec<u8>> {
    let json = build_disconnect_json(kick_message)?;
    Ok(frame_packet(PACKET_DISCONNECT, &write_utf(&json)))
}

pub fn pong_frame(payload: &[u8; 8]) -> Vec<u8> {
    frame_packet(PACKET_PONG, payload)
}
