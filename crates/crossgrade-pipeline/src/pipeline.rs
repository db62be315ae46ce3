use crate::connection::ProtocolInfo;
use crate::registry::TransformerPath;
use crate::storage::ConnectionStorage;
use crate::transformer::{PacketContext, ProtocolTransformer};
use bytes::BytesMut;
use crossgrade_protocol_core::{ConnectionState, Direction, PacketEnvelope, ProtocolError, ProtocolResult};
use crossgrade_types::ProtocolVersion;
use std::backtrace::Backtrace;
use std::sync::Arc;
use tracing::{debug, trace};

/// A packet ready to be framed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub id: i32,
    pub payload: BytesMut,
}

/// Everything known about a failed packet. Only collected in debug mode.
#[derive(Debug)]
pub struct Diagnostic {
    pub transformer: String,
    pub direction: Direction,
    pub state: ConnectionState,
    pub packet_id: i32,
    pub error: ProtocolError,
    pub backtrace: Backtrace,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed on {} {:?} packet 0x{:02X}: {}",
            self.transformer, self.direction, self.state, self.packet_id, self.error
        )
    }
}

#[derive(Debug)]
pub enum DropReason {
    /// A handler cancelled the packet on purpose.
    Cancelled,
    /// A chain step failed. The diagnostic is only present in debug mode.
    Failed(Option<Box<Diagnostic>>),
}

#[derive(Debug)]
pub enum Outcome {
    Forwarded,
    Dropped(DropReason),
}

/// Result of running one packet through the pipeline.
#[derive(Debug)]
pub struct Transformed {
    /// Packets to forward, in order: injected-before, the packet itself, injected-after.
    pub packets: Vec<RawPacket>,
    pub outcome: Outcome,
    /// Id of the original packet as it left the last hop it reached.
    pub final_id: i32,
}

impl Transformed {
    pub fn is_forwarded(&self) -> bool {
        matches!(self.outcome, Outcome::Forwarded)
    }
}

/// The ordered transformer chain between one client version and one backend version.
#[derive(Clone)]
pub struct ProtocolPipeline {
    transformers: TransformerPath,
    client_version: ProtocolVersion,
    server_version: ProtocolVersion,
    debug: bool,
}

impl ProtocolPipeline {
    pub fn new(
        transformers: TransformerPath,
        client_version: ProtocolVersion,
        server_version: ProtocolVersion,
    ) -> Self {
        Self {
            transformers,
            client_version,
            server_version,
            debug: false,
        }
    }

    /// Collect full diagnostics for failed packets.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn transformers(&self) -> &[Arc<ProtocolTransformer>] {
        &self.transformers
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn client_version(&self) -> ProtocolVersion {
        self.client_version
    }

    pub fn server_version(&self) -> ProtocolVersion {
        self.server_version
    }

    /// Run every transformer's init hooks, client side first.
    pub fn init(&self, storage: &mut ConnectionStorage, info: &ProtocolInfo) {
        for transformer in self.transformers.iter() {
            transformer.init(storage, info);
        }
    }

    /// Rewrite one packet. Clientbound packets enter at the server-adjacent
    /// hop, serverbound ones at the client-adjacent hop.
    ///
    /// Only malformed input is returned as `Err`; every other failure drops
    /// the packet and is reported through [`Outcome::Dropped`].
    pub fn transform(
        &self,
        direction: Direction,
        state: ConnectionState,
        envelope: PacketEnvelope,
        storage: &mut ConnectionStorage,
    ) -> ProtocolResult<Transformed> {
        let hops: Vec<usize> = match direction {
            Direction::Clientbound => (0..self.transformers.len()).rev().collect(),
            Direction::Serverbound => (0..self.transformers.len()).collect(),
        };
        let info = ProtocolInfo {
            client_version: self.client_version,
            server_version: self.server_version,
            state,
        };
        self.run(direction, &info, &hops, envelope, storage)
    }

    fn run(
        &self,
        direction: Direction,
        info: &ProtocolInfo,
        hops: &[usize],
        mut env: PacketEnvelope,
        storage: &mut ConnectionStorage,
    ) -> ProtocolResult<Transformed> {
        let mut before = Vec::new();
        let mut after = Vec::new();

        for (position, &index) in hops.iter().enumerate() {
            let transformer = &self.transformers[index];
            let incoming = env.id();
            let Some(remap) = transformer.remap(direction, info.state, incoming) else {
                continue;
            };
            env.set_id(remap.new_id);
            // Fields written by the previous hop, or by whoever built an injected packet.
            env.reset_reader();

            let mut ctx = PacketContext {
                storage: &mut *storage,
                info,
                transformer,
            };
            let result = remap.chain.apply(&mut env, &mut ctx);
            let (sent_before, sent_after) = env.take_injected();

            if let Err(error) = result {
                if error.is_fatal() {
                    return Err(error);
                }
                let reason = self.failure(transformer, direction, info.state, incoming, error);
                return Ok(Transformed {
                    packets: before.into_iter().chain(after).collect(),
                    outcome: Outcome::Dropped(reason),
                    final_id: env.id(),
                });
            }

            // Injected packets continue from the hop after the one that sent them.
            let rest = &hops[position + 1..];
            for injected in sent_before {
                before.extend(self.run(direction, info, rest, injected, storage)?.packets);
            }
            for injected in sent_after {
                after.extend(self.run(direction, info, rest, injected, storage)?.packets);
            }

            if env.is_cancelled() {
                trace!(
                    "{} cancelled {} packet 0x{:02X}",
                    transformer.name(),
                    direction,
                    incoming
                );
                return Ok(Transformed {
                    packets: before.into_iter().chain(after).collect(),
                    outcome: Outcome::Dropped(DropReason::Cancelled),
                    final_id: env.id(),
                });
            }
        }

        let id = env.id();
        let outcome = match env.serialize() {
            Ok(payload) => {
                before.push(RawPacket { id, payload });
                Outcome::Forwarded
            }
            Err(error) => {
                let last = hops.last().map(|&i| &self.transformers[i]);
                Outcome::Dropped(self.encode_failure(last, direction, info.state, id, error))
            }
        };
        before.extend(after);
        Ok(Transformed {
            packets: before,
            outcome,
            final_id: id,
        })
    }

    fn failure(
        &self,
        transformer: &ProtocolTransformer,
        direction: Direction,
        state: ConnectionState,
        packet_id: i32,
        error: ProtocolError,
    ) -> DropReason {
        debug!(
            "{} dropped {} {:?} packet 0x{:02X}: {}",
            transformer.name(),
            direction,
            state,
            packet_id,
            error
        );
        if !self.debug {
            return DropReason::Failed(None);
        }
        DropReason::Failed(Some(Box::new(Diagnostic {
            transformer: transformer.name().to_string(),
            direction,
            state,
            packet_id,
            error,
            backtrace: Backtrace::force_capture(),
        })))
    }

    fn encode_failure(
        &self,
        transformer: Option<&Arc<ProtocolTransformer>>,
        direction: Direction,
        state: ConnectionState,
        packet_id: i32,
        error: ProtocolError,
    ) -> DropReason {
        match transformer {
            Some(transformer) => self.failure(transformer, direction, state, packet_id, error),
            None => {
                debug!("Failed to encode {} packet 0x{:02X}: {}", direction, packet_id, error);
                DropReason::Failed(None)
            }
        }
    }
}

impl std::fmt::Debug for ProtocolPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolPipeline")
            .field(
                "transformers",
                &self.transformers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolRegistry;
    use crate::storage::StorableObject;
    use crate::trackers::EntityTracker;
    use crate::transformer::FieldChain;
    use crossgrade_mappings::{IdMapping, MappingCategory, MappingData};
    use crossgrade_protocol_core::{
        read_i32, read_u8, read_varint, write_i32, write_u8, write_varint, FieldType,
    };

    const V1: ProtocolVersion = ProtocolVersion::new(2001, "v1");
    const V2: ProtocolVersion = ProtocolVersion::new(2002, "v2");
    const V3: ProtocolVersion = ProtocolVersion::new(2003, "v3");
    const V4: ProtocolVersion = ProtocolVersion::new(2004, "v4");

    const JOIN_GAME: i32 = 0x25;
    const SET_SLOT: i32 = 0x16;

    #[derive(Debug, Default)]
    struct Hops(Vec<&'static str>);
    impl StorableObject for Hops {}

    fn record(name: &'static str) -> FieldChain {
        FieldChain::new().handler(move |_, ctx| {
            ctx.storage.get_or_insert_with(Hops::default).0.push(name);
            Ok(())
        })
    }

    /// Client v4 <- v3 <- v2 <- server v1. Hop 2 (v3 -> v2) remaps item 113 to 118.
    fn three_hops() -> ProtocolRegistry {
        let items = IdMapping::from_pairs("items", [(113, 118)]).unwrap();
        let mappings = Arc::new(MappingData::new().with(MappingCategory::Items, items));

        let hop3 = ProtocolTransformer::builder("v2-to-v1", V2, V1)
            .register_clientbound(ConnectionState::Play, JOIN_GAME, JOIN_GAME, record("v2-to-v1"))
            .build();
        let hop2 = ProtocolTransformer::builder("v3-to-v2", V3, V2)
            .mappings(mappings)
            .register_clientbound(
                ConnectionState::Play,
                JOIN_GAME,
                JOIN_GAME + 1,
                record("v3-to-v2").map(FieldType::Int).handler(|env, ctx| {
                    let item: i32 = env.read(&FieldType::VarInt)?;
                    let mapped = ctx
                        .mappings()
                        .map_or(item, |m| m.new_id(MappingCategory::Items, item));
                    env.write(FieldType::VarInt, mapped);
                    Ok(())
                }),
            )
            .register_clientbound(ConnectionState::Play, SET_SLOT, SET_SLOT, FieldChain::cancel())
            .build();
        let hop1 = ProtocolTransformer::builder("v4-to-v3", V4, V3)
            .register_clientbound(
                ConnectionState::Play,
                JOIN_GAME + 1,
                JOIN_GAME + 1,
                record("v4-to-v3").handler(|env, ctx| {
                    let entity: i32 = env.passthrough(&FieldType::Int)?;
                    ctx.storage
                        .get_or_insert_with(EntityTracker::default)
                        .on_join(entity);
                    Ok(())
                }),
            )
            .build();

        let mut builder = ProtocolRegistry::builder();
        for v in [V1, V2, V3, V4] {
            builder.register_version(v);
        }
        builder.register(hop3).register(hop2).register(hop1);
        builder.build().unwrap()
    }

    fn join_game_payload(entity: i32, item: i32) -> BytesMut {
        let mut buf = BytesMut::new();
        write_i32(&mut buf, entity);
        write_varint(&mut buf, item);
        write_u8(&mut buf, 0xAB);
        buf
    }

    #[test]
    fn test_join_game_through_three_hops() {
        let registry = three_hops();
        let pipeline = registry.pipeline(V4, V1, false).unwrap();
        assert_eq!(pipeline.len(), 3);

        let mut storage = ConnectionStorage::new();
        let env = PacketEnvelope::new(JOIN_GAME, join_game_payload(42, 113));
        let result = pipeline
            .transform(Direction::Clientbound, ConnectionState::Play, env, &mut storage)
            .unwrap();

        assert!(result.is_forwarded());
        assert_eq!(result.packets.len(), 1);
        let mut packet = result.packets[0].clone();
        assert_eq!(packet.id, JOIN_GAME + 1);
        assert_eq!(read_i32(&mut packet.payload).unwrap(), 42);
        assert_eq!(read_varint(&mut packet.payload).unwrap(), 118);
        assert_eq!(read_u8(&mut packet.payload).unwrap(), 0xAB);
        assert!(packet.payload.is_empty());

        let tracker = storage.get::<EntityTracker>().unwrap();
        assert_eq!(tracker.client_entity_id(), Some(42));
        assert!(tracker.entity_type(42).unwrap().is_player());
        assert_eq!(
            storage.get::<Hops>().unwrap().0,
            vec!["v2-to-v1", "v3-to-v2", "v4-to-v3"]
        );
    }

    #[test]
    fn test_unregistered_packet_is_identity() {
        let registry = three_hops();
        let pipeline = registry.pipeline(V4, V1, false).unwrap();
        let mut storage = ConnectionStorage::new();
        let payload = join_game_payload(1, 2);
        let result = pipeline
            .transform(
                Direction::Serverbound,
                ConnectionState::Play,
                PacketEnvelope::new(0x03, payload.clone()),
                &mut storage,
            )
            .unwrap();
        assert_eq!(result.packets, vec![RawPacket { id: 0x03, payload }]);
    }

    #[test]
    fn test_cancel_at_middle_hop() {
        let registry = three_hops();
        let pipeline = registry.pipeline(V4, V1, false).unwrap();
        let mut storage = ConnectionStorage::new();
        let result = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::new(SET_SLOT, BytesMut::new()),
                &mut storage,
            )
            .unwrap();
        assert!(result.packets.is_empty());
        assert!(matches!(result.outcome, Outcome::Dropped(DropReason::Cancelled)));
    }

    fn single(chain: FieldChain) -> ProtocolPipeline {
        let transformer = ProtocolTransformer::builder("v2-to-v1", V2, V1)
            .register_clientbound(ConnectionState::Play, 0x01, 0x01, chain)
            .build();
        ProtocolPipeline::new(Arc::from(vec![Arc::new(transformer)]), V2, V1)
    }

    #[test]
    fn test_step_failure_drops_packet() {
        let pipeline = single(FieldChain::new().handler(|_, _| Err(anyhow::anyhow!("boom").into())));
        let mut storage = ConnectionStorage::new();
        let result = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::create(0x01),
                &mut storage,
            )
            .unwrap();
        assert!(result.packets.is_empty());
        assert!(matches!(result.outcome, Outcome::Dropped(DropReason::Failed(None))));

        let pipeline = pipeline.with_debug(true);
        let result = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::create(0x01),
                &mut storage,
            )
            .unwrap();
        let Outcome::Dropped(DropReason::Failed(Some(diag))) = result.outcome else {
            panic!("expected a diagnostic");
        };
        assert_eq!(diag.transformer, "v2-to-v1");
        assert_eq!(diag.packet_id, 0x01);
    }

    #[test]
    fn test_malformed_input_is_fatal() {
        let pipeline = single(FieldChain::new().map(FieldType::Long));
        let mut storage = ConnectionStorage::new();
        let err = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::new(0x01, BytesMut::from(&[1u8, 2][..])),
                &mut storage,
            )
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_injected_packets_keep_order() {
        let pipeline = single(FieldChain::new().handler(|env, _| {
            let mut before = PacketEnvelope::create(0x10);
            before.write(FieldType::VarInt, 1i32);
            env.send(before);
            env.schedule_send(PacketEnvelope::create(0x11));
            Ok(())
        }));
        let mut storage = ConnectionStorage::new();
        let result = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::create(0x01),
                &mut storage,
            )
            .unwrap();
        let ids: Vec<i32> = result.packets.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0x10, 0x01, 0x11]);
        assert_eq!(result.packets[0].payload.to_vec(), vec![1]);
    }

    #[test]
    fn test_injected_packet_skips_issuing_hop() {
        // The server-adjacent hop injects 0x01; the client hop must still see it,
        // the issuing hop must not.
        let server_hop = ProtocolTransformer::builder("v2-to-v1", V2, V1)
            .register_clientbound(
                ConnectionState::Play,
                0x01,
                0x02,
                FieldChain::new().handler(|env, _| {
                    let mut extra = PacketEnvelope::create(0x01);
                    extra.write(FieldType::Boolean, true);
                    env.send(extra);
                    env.cancel();
                    Ok(())
                }),
            )
            .build();
        let client_hop = ProtocolTransformer::builder("v3-to-v2", V3, V2)
            .register_clientbound(ConnectionState::Play, 0x01, 0x05, FieldChain::new())
            .build();
        let pipeline = ProtocolPipeline::new(
            Arc::from(vec![Arc::new(client_hop), Arc::new(server_hop)]),
            V3,
            V1,
        );
        let mut storage = ConnectionStorage::new();
        let result = pipeline
            .transform(
                Direction::Clientbound,
                ConnectionState::Play,
                PacketEnvelope::create(0x01),
                &mut storage,
            )
            .unwrap();
        assert!(matches!(result.outcome, Outcome::Dropped(DropReason::Cancelled)));
        assert_eq!(result.packets, vec![RawPacket { id: 0x05, payload: BytesMut::from(&[1u8][..]) }]);
    }

    #[test]
    fn test_injected_packet_is_readable_by_later_hop() {
        // Fields written into an injected packet must be visible to the next hop's chain.
        let client_hop = ProtocolTransformer::builder("v3-to-v2", V3, V2)
            .register_serverbound(
                ConnectionState::Play,
                0x01,
                0x01,
                FieldChain::new().handler(|env, _| {
                    let mut click = PacketEnvelope::create(0x07);
                    click.write(FieldType::UnsignedByte, 4u8);
                    click.write(FieldType::VarInt, 300i32);
                    env.schedule_send(click);
                    Ok(())
                }),
            )
            .build();
        let server_hop = ProtocolTransformer::builder("v2-to-v1", V2, V1)
            .register_serverbound(
                ConnectionState::Play,
                0x07,
                0x09,
                FieldChain::new()
                    .map(FieldType::UnsignedByte)
                    .transform(FieldType::VarInt, FieldType::Int, |id: i32| Ok(id + 1)),
            )
            .build();
        let pipeline = ProtocolPipeline::new(
            Arc::from(vec![Arc::new(client_hop), Arc::new(server_hop)]),
            V3,
            V1,
        );
        let mut storage = ConnectionStorage::new();
        let result = pipeline
            .transform(
                Direction::Serverbound,
                ConnectionState::Play,
                PacketEnvelope::create(0x01),
                &mut storage,
            )
            .unwrap();

        assert!(result.is_forwarded());
        assert_eq!(result.packets.len(), 2);
        assert_eq!(result.packets[0].id, 0x01);
        let mut click = result.packets[1].clone();
        assert_eq!(click.id, 0x09);
        assert_eq!(read_u8(&mut click.payload).unwrap(), 4);
        assert_eq!(read_i32(&mut click.payload).unwrap(), 301);
        assert!(click.payload.is_empty());
    }
}
