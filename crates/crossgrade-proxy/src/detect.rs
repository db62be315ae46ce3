//! Backend version detection and status response rewriting.

use crate::network::Handshake;
use anyhow::{Context, Result};
use bytes::BytesMut;
use crossgrade_protocol_core::{read_string, write_string, Connection, MAX_STRING_LEN};
use crossgrade_types::{ProtocolVersion, KNOWN_VERSIONS};
use serde_json::Value;
use tracing::{debug, info, warn};

const STATUS_REQUEST: i32 = 0x00;
const STATUS_RESPONSE: i32 = 0x00;

/// Ask the backend which protocol it speaks with a status ping.
pub async fn detect_backend(addr: &str) -> Result<ProtocolVersion> {
    let mut conn = Connection::connect(addr)
        .await
        .with_context(|| format!("connecting to backend {}", addr))?;

    let (host, port) = split_host_port(addr);
    // Servers answer the status request regardless of the version we announce.
    let newest = KNOWN_VERSIONS.last().map(|v| v.id()).unwrap_or(-1);
    let handshake = Handshake {
        protocol: newest,
        address: host.to_string(),
        port,
        next_state: 1,
    };
    conn.write_packet(Handshake::ID, &handshake.encode()).await?;
    conn.write_packet(STATUS_REQUEST, &[]).await?;

    let (id, mut data) = conn.read_packet().await?;
    if id != STATUS_RESPONSE {
        anyhow::bail!("Backend answered status request with packet 0x{:02X}", id);
    }
    let json = read_string(&mut data, MAX_STRING_LEN)?;
    let protocol = status_protocol(&json)?;
    let version = ProtocolVersion::from_id(protocol);
    if version.is_known() {
        info!("Detected backend version {}", version);
    } else {
        warn!("Backend reports unknown protocol {}", protocol);
    }
    Ok(version)
}

/// `version.protocol` from a status response.
pub fn status_protocol(json: &str) -> Result<i32> {
    let value: Value = serde_json::from_str(json)?;
    value
        .pointer("/version/protocol")
        .and_then(Value::as_i64)
        .map(|p| p as i32)
        .ok_or_else(|| anyhow::anyhow!("Status response has no version.protocol"))
}

/// Report the client's own protocol in a backend status response so the
/// server list shows it as compatible. Unparseable responses are left alone.
pub fn rewrite_status(json: &str, client: ProtocolVersion) -> String {
    let mut value: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            debug!("Leaving unparseable status response alone: {}", e);
            return json.to_string();
        }
    };
    match value.get_mut("version").and_then(Value::as_object_mut) {
        Some(version) => {
            version.insert("protocol".into(), Value::from(client.id()));
        }
        None => return json.to_string(),
    }
    value.to_string()
}

/// Re-encode a status response payload with the rewritten JSON.
pub fn rewrite_status_packet(payload: &mut BytesMut, client: ProtocolVersion) -> Result<BytesMut> {
    let json = read_string(payload, MAX_STRING_LEN)?;
    let mut out = BytesMut::new();
    write_string(&mut out, &rewrite_status(&json, client));
    Ok(out)
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(25565)),
        None => (addr, 25565),
    }
}
