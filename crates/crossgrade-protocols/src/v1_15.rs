//! 1.15 clients on 1.14.4 servers.
//!
//! Join game and respawn gained a hashed seed, spawn packets lost their
//! metadata, and chunk biomes moved into a 4x4x4 grid ahead of the sections.
//! Block-digging acknowledgements moved to 0x08, pushing everything after it up one.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::{anyhow, Result};
use crossgrade_mappings::{MappingCategory, MappingData};
use crossgrade_pipeline::{EntityTracker, EntityType, FieldChain, PacketContext, ProtocolTransformer, WorldTracker};
use crossgrade_protocol_core::{ConnectionState, Direction, FieldType, PacketEnvelope, ProtocolResult};
use crossgrade_types::{Environment, Identifier, V1_14_4, V1_15};
use std::sync::Arc;

// Clientbound play, 1.14.4 ids
const SPAWN_MOB: i32 = 0x03;
const SPAWN_PLAYER: i32 = 0x05;
const CHUNK_DATA: i32 = 0x21;
const JOIN_GAME: i32 = 0x25;
const DESTROY_ENTITIES: i32 = 0x37;
const RESPAWN: i32 = 0x3A;
const ACKNOWLEDGE_DIGGING: i32 = 0x5C;

// Clientbound play, 1.15 ids
const ACKNOWLEDGE_DIGGING_1_15: i32 = 0x08;
const CHUNK_DATA_1_15: i32 = 0x22;
const JOIN_GAME_1_15: i32 = 0x26;
const DESTROY_ENTITIES_1_15: i32 = 0x38;
const RESPAWN_1_15: i32 = 0x3B;
const ENTITY_METADATA_1_15: i32 = 0x44;

/// Ids from here up to the old digging acknowledgement move up by one.
const SHIFT_START: i32 = 0x08;

const OLD_BIOMES: usize = 256;
const NEW_BIOMES: usize = 1024;

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, data) = pair_mappings(MappingData::new(), data, options)?;
    let show_death_screen = !options.instant_respawn;

    let mut builder = ProtocolTransformer::builder("1.15->1.14.4", V1_15, V1_14_4)
        .mappings(Arc::new(mappings))
        .on_connection_init(|storage, _| {
            storage.get_or_insert_with(EntityTracker::default);
            storage.get_or_insert_with(WorldTracker::default);
        })
        .register_clientbound(
            ConnectionState::Play,
            JOIN_GAME,
            JOIN_GAME_1_15,
            FieldChain::new()
                .map(FieldType::Int)
                .map(FieldType::UnsignedByte)
                .map(FieldType::Int)
                .handler(|env, ctx| {
                    let entity_id: i32 = env.get(&FieldType::Int, 0)?;
                    let dimension: i32 = env.get(&FieldType::Int, 1)?;
                    ctx.storage.require_mut::<EntityTracker>()?.on_join(entity_id);
                    ctx.storage
                        .require_mut::<WorldTracker>()?
                        .set_world(Environment::from_id(dimension), None);
                    Ok(())
                })
                .create(FieldType::Long, 0i64)
                .map(FieldType::UnsignedByte)
                .map(FieldType::String)
                .map(FieldType::VarInt)
                .map(FieldType::Boolean)
                .create(FieldType::Boolean, show_death_screen),
        )
        .register_clientbound(
            ConnectionState::Play,
            RESPAWN,
            RESPAWN_1_15,
            FieldChain::new()
                .map(FieldType::Int)
                .handler(|env, ctx| {
                    let dimension: i32 = env.get(&FieldType::Int, 0)?;
                    ctx.storage
                        .require_mut::<WorldTracker>()?
                        .set_world(Environment::from_id(dimension), None);
                    Ok(())
                })
                .create(FieldType::Long, 0i64),
        )
        .register_clientbound(
            ConnectionState::Play,
            DESTROY_ENTITIES,
            DESTROY_ENTITIES_1_15,
            FieldChain::new().map(FieldType::VarIntArray).handler(|env, ctx| {
                let ids: Vec<i32> = env.get(&FieldType::VarIntArray, 0)?;
                let tracker = ctx.storage.require_mut::<EntityTracker>()?;
                for id in ids {
                    tracker.remove(id);
                }
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            SPAWN_MOB,
            SPAWN_MOB,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::Uuid)
                .handler(|env, ctx| {
                    let entity_id: i32 = env.get(&FieldType::VarInt, 0)?;
                    let old_type: i32 = env.read(&FieldType::VarInt)?;
                    let new_type = entity_type_to_client(ctx, old_type);
                    env.write(FieldType::VarInt, new_type);
                    ctx.storage
                        .require_mut::<EntityTracker>()?
                        .add_entity(entity_id, numeric_type(new_type));

                    // position, rotation and velocity
                    for _ in 0..3 {
                        env.passthrough::<f64>(&FieldType::Double)?;
                    }
                    for _ in 0..3 {
                        env.passthrough::<i8>(&FieldType::Byte)?;
                    }
                    for _ in 0..3 {
                        env.passthrough::<i16>(&FieldType::Short)?;
                    }
                    split_metadata(env, entity_id)
                }),
        )
        .register_clientbound(
            ConnectionState::Play,
            SPAWN_PLAYER,
            SPAWN_PLAYER,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::Uuid)
                .map(FieldType::Double)
                .map(FieldType::Double)
                .map(FieldType::Double)
                .map(FieldType::Byte)
                .map(FieldType::Byte)
                .handler(|env, ctx| {
                    let entity_id: i32 = env.get(&FieldType::VarInt, 0)?;
                    ctx.storage
                        .require_mut::<EntityTracker>()?
                        .add_entity(entity_id, EntityType::player());
                    split_metadata(env, entity_id)
                }),
        )
        .register_clientbound(
            ConnectionState::Play,
            CHUNK_DATA,
            CHUNK_DATA_1_15,
            FieldChain::new()
                .map(FieldType::Int)
                .map(FieldType::Int)
                .map(FieldType::Boolean)
                .map(FieldType::VarInt)
                .map(FieldType::Nbt)
                .handler(|env, _| {
                    let full_chunk: bool = env.get(&FieldType::Boolean, 0)?;
                    let data: Vec<u8> = env.read(&FieldType::ByteArray)?;
                    if !full_chunk {
                        env.write(FieldType::ByteArray, data);
                        return Ok(());
                    }
                    let (sections, biomes) = split_biomes(data)?;
                    for biome in biomes {
                        env.write(FieldType::Int, biome);
                    }
                    env.write(FieldType::ByteArray, sections);
                    Ok(())
                }),
        )
        .register_clientbound(ConnectionState::Play, ACKNOWLEDGE_DIGGING, ACKNOWLEDGE_DIGGING_1_15, FieldChain::new());

    for id in SHIFT_START..ACKNOWLEDGE_DIGGING {
        if !builder.is_registered(Direction::Clientbound, ConnectionState::Play, id) {
            builder = builder.register_clientbound(ConnectionState::Play, id, id + 1, FieldChain::new());
        }
    }

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn entity_type_to_client(ctx: &PacketContext<'_>, old: i32) -> i32 {
    match ctx.mappings() {
        Some(mappings) if mappings.has(MappingCategory::Entities) => mappings.new_id(MappingCategory::Entities, old),
        _ => old,
    }
}

/// Entities are tracked by registry id until a name is needed.
fn numeric_type(id: i32) -> EntityType {
    EntityType(Identifier::new("registry", id.to_string()))
}

/// Move the trailing metadata into its own packet sent right after the spawn.
fn split_metadata(env: &mut PacketEnvelope, entity_id: i32) -> ProtocolResult<()> {
    let metadata = env.read_remaining()?;
    let mut packet = PacketEnvelope::create(ENTITY_METADATA_1_15);
    packet.write(FieldType::VarInt, entity_id);
    packet.write(FieldType::RemainingBytes, metadata);
    env.schedule_send(packet);
    Ok(())
}

/// Cut the 256 column biomes off the end of a full chunk's data and spread
/// them over the 4x4x4 grid, sampling the middle of each cell.
fn split_biomes(mut data: Vec<u8>) -> ProtocolResult<(Vec<u8>, Vec<i32>)> {
    let Some(start) = data.len().checked_sub(OLD_BIOMES * 4) else {
        return Err(anyhow!("full chunk data too short for biomes: {} bytes", data.len()).into());
    };
    let old: Vec<i32> = data[start..]
        .chunks_exact(4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    data.truncate(start);

    let mut layer = [0i32; 16];
    for (i, biome) in layer.iter_mut().enumerate() {
        let x = ((i & 3) << 2) + 2;
        let z = ((i >> 2) << 2) + 2;
        *biome = old[z << 4 | x];
    }
    let biomes = layer.iter().copied().cycle().take(NEW_BIOMES).collect();
    Ok((data, biomes))
}
