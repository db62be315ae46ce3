use crate::config::ProxyConfig;
use crate::detect;
use anyhow::Result;
use bytes::BytesMut;
use crossgrade_pipeline::{Outcome, ProtocolRegistry, UserConnection};
use crossgrade_protocol_core::{
    read_string, read_u16, read_varint, write_string, write_u16, write_varint, Connection, ConnectionState,
    Direction, MAX_STRING_LEN,
};
use crossgrade_types::{ProtocolVersion, TextComponent};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

// Status
const STATUS_RESPONSE: i32 = 0x00;
const PING: i32 = 0x01;

// Login, identical in every supported version
const LOGIN_DISCONNECT: i32 = 0x00;
const ENCRYPTION_REQUEST: i32 = 0x01;
const SET_COMPRESSION: i32 = 0x03;

/// State shared by every connection task.
pub struct ProxyContext {
    pub config: ProxyConfig,
    pub registry: ProtocolRegistry,
    detected: OnceCell<ProtocolVersion>,
}

impl ProxyContext {
    pub fn new(config: ProxyConfig, registry: ProtocolRegistry) -> Self {
        Self {
            config,
            registry,
            detected: OnceCell::new(),
        }
    }

    /// The configured backend version, or the one reported by the first
    /// successful status ping.
    pub async fn backend_version(&self) -> Result<ProtocolVersion> {
        if let Some(version) = self.config.backend_version()? {
            return Ok(version);
        }
        self.detected
            .get_or_try_init(|| detect::detect_backend(&self.config.backend))
            .await
            .copied()
    }
}

/// The first packet of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: i32,
    pub address: String,
    pub port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub const ID: i32 = 0x00;

    /// The address is not held to hostname length since IP forwarding setups
    /// append player data to it.
    pub fn decode(data: &mut BytesMut) -> Result<Self> {
        Ok(Self {
            protocol: read_varint(data)?,
            address: read_string(data, MAX_STRING_LEN)?,
            port: read_u16(data)?,
            next_state: read_varint(data)?,
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, self.protocol);
        write_string(&mut buf, &self.address);
        write_u16(&mut buf, self.port);
        write_varint(&mut buf, self.next_state);
        buf
    }

    /// The same handshake announcing a different protocol.
    pub fn with_protocol(&self, version: ProtocolVersion) -> Self {
        Self {
            protocol: version.id(),
            ..self.clone()
        }
    }
}

/// Serve one client from handshake until either side hangs up.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<ProxyContext>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let conn = Connection::new(stream);

    if let Err(e) = handle_client(conn, &ctx, &peer).await {
        debug!("Connection {} ended: {:#}", peer, e);
    }
}

async fn handle_client(mut client: Connection, ctx: &ProxyContext, peer: &str) -> Result<()> {
    let (id, mut data) = client.read_packet().await?;
    if id != Handshake::ID {
        anyhow::bail!("Expected handshake, got packet 0x{:02X}", id);
    }
    let handshake = Handshake::decode(&mut data)?;
    let client_version = ProtocolVersion::from_id(handshake.protocol);
    let server_version = ctx.backend_version().await?;
    debug!(
        "Handshake from {}: client={}, server={}, next_state={}",
        peer, client_version, server_version, handshake.next_state
    );

    match ConnectionState::from_handshake_next(handshake.next_state) {
        Some(ConnectionState::Status) => {
            proxy_status(client, ctx, &handshake, client_version, server_version).await
        }
        Some(ConnectionState::Login) => {
            proxy_login(client, ctx, &handshake, client_version, server_version, peer).await
        }
        _ => Err(anyhow::anyhow!("Invalid next state: {}", handshake.next_state)),
    }
}

async fn proxy_status(
    mut client: Connection,
    ctx: &ProxyContext,
    handshake: &Handshake,
    client_version: ProtocolVersion,
    server_version: ProtocolVersion,
) -> Result<()> {
    let mut backend = Connection::connect(&ctx.config.backend).await?;
    backend
        .write_packet(Handshake::ID, &handshake.with_protocol(server_version).encode())
        .await?;
    let supported = ctx.registry.resolve(client_version, server_version).is_ok();

    loop {
        let (id, data) = client.read_packet().await?;
        backend.write_packet(id, &data).await?;

        let (reply_id, mut reply) = backend.read_packet().await?;
        if reply_id == STATUS_RESPONSE && id != PING && supported {
            reply = detect::rewrite_status_packet(&mut reply, client_version)?;
        }
        client.write_packet(reply_id, &reply).await?;

        if id == PING {
            return Ok(());
        }
    }
}

async fn proxy_login(
    mut client: Connection,
    ctx: &ProxyContext,
    handshake: &Handshake,
    client_version: ProtocolVersion,
    server_version: ProtocolVersion,
    peer: &str,
) -> Result<()> {
    let connection = match UserConnection::new(
        &ctx.registry,
        client_version,
        server_version,
        ConnectionState::Login,
        ctx.config.debug,
    ) {
        Ok(connection) => connection,
        Err(e) => {
            info!("Refusing {}: {}", peer, e);
            client
                .write_packet(LOGIN_DISCONNECT, &disconnect_payload(&e.to_string()))
                .await?;
            return Ok(());
        }
    };
    info!(
        "{} joining with {} through {} hop(s) to {}",
        peer,
        client_version,
        connection.pipeline().len(),
        server_version
    );

    let mut backend = Connection::connect(&ctx.config.backend).await?;
    backend
        .write_packet(Handshake::ID, &handshake.with_protocol(server_version).encode())
        .await?;

    relay(client, backend, connection).await
}

/// Pump packets both ways through the connection's pipeline.
async fn relay(client: Connection, backend: Connection, mut connection: UserConnection) -> Result<()> {
    let (mut client_rx, mut client_tx) = client.into_split();
    let (mut server_rx, mut server_tx) = backend.into_split();

    loop {
        tokio::select! {
            packet = client_rx.read_packet() => {
                let (id, data) = packet?;
                let result = connection.transform(Direction::Serverbound, id, data)?;
                log_outcome(Direction::Serverbound, id, &result.outcome);
                for packet in result.packets {
                    server_tx.write_packet(packet.id, &packet.payload).await?;
                }
            }
            packet = server_rx.read_packet() => {
                let (id, data) = packet?;
                let state = connection.state();
                if state == ConnectionState::Login && id == ENCRYPTION_REQUEST {
                    let reason = "The backend server runs in online mode, which cannot be proxied";
                    client_tx.write_packet(LOGIN_DISCONNECT, &disconnect_payload(reason)).await?;
                    anyhow::bail!("{}", reason);
                }
                let threshold = if state == ConnectionState::Login && id == SET_COMPRESSION {
                    Some(read_varint(&mut data.clone())?)
                } else {
                    None
                };

                let result = match connection.transform(Direction::Clientbound, id, data) {
                    Ok(result) => result,
                    Err(e) => {
                        if connection.state() == ConnectionState::Login {
                            client_tx
                                .write_packet(LOGIN_DISCONNECT, &disconnect_payload(&e.to_string()))
                                .await?;
                        }
                        warn!("Closing connection on malformed packet 0x{:02X}: {}", id, e);
                        return Err(e.into());
                    }
                };
                log_outcome(Direction::Clientbound, id, &result.outcome);
                for packet in result.packets {
                    client_tx.write_packet(packet.id, &packet.payload).await?;
                }

                // Both peers switch once the packet has been seen.
                if let Some(threshold) = threshold {
                    debug!("Compression threshold {}", threshold);
                    client_rx.set_compression(threshold);
                    client_tx.set_compression(threshold);
                    server_rx.set_compression(threshold);
                    server_tx.set_compression(threshold);
                }
            }
        }
    }
}

fn log_outcome(direction: Direction, id: i32, outcome: &Outcome) {
    if let Outcome::Dropped(reason) = outcome {
        trace!("Dropped {} packet 0x{:02X}: {:?}", direction, id, reason);
    }
}

/// Login disconnect payload: a JSON text component.
fn disconnect_payload(reason: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    write_string(&mut buf, &TextComponent::plain(reason).to_json());
    buf
}
