//! 1.20.3 clients on 1.20.2 servers.
//!
//! Text components are sent as NBT instead of JSON strings, resource packs are
//! pushed and popped by UUID, and serverbound slot-state updates are new.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::Result;
use bytes::BytesMut;
use crossgrade_mappings::{MappingCategory, MappingData};
use crossgrade_pipeline::{EntityTracker, FieldChain, PacketContext, ProtocolTransformer};
use crossgrade_protocol_core::component::json_str_to_tag;
use crossgrade_protocol_core::{
    ChunkSection, ConnectionState, Direction, FieldType, PacketEnvelope, ProtocolError, ProtocolResult,
};
use crossgrade_types::{V1_20_2, V1_20_3};
use std::sync::Arc;
use uuid::Uuid;

// Clientbound play, 1.20.2 ids
const BLOCK_UPDATE: i32 = 0x09;
const BOSSBAR: i32 = 0x0A;
const DISCONNECT: i32 = 0x1B;
const DISGUISED_CHAT: i32 = 0x1C;
const CHUNK_DATA: i32 = 0x25;
const OPEN_SCREEN: i32 = 0x31;
const RESOURCE_PACK: i32 = 0x42;
const SYSTEM_CHAT: i32 = 0x67;
const TAB_LIST: i32 = 0x68;

// Clientbound play, 1.20.3 ids
const RESOURCE_PACK_POP: i32 = 0x43;
const RESOURCE_PACK_PUSH: i32 = 0x44;

// Clientbound configuration: (1.20.2 id, 1.20.3 id)
const CONFIG_DISCONNECT: i32 = 0x01;
const CONFIG_RESOURCE_PACK: (i32, i32) = (0x06, 0x07);
const CONFIG_RESOURCE_PACK_POP: i32 = 0x06;
const CONFIG_FEATURE_FLAGS: (i32, i32) = (0x07, 0x08);
const CONFIG_UPDATE_TAGS: (i32, i32) = (0x08, 0x09);

// Serverbound play, 1.20.3 ids
const CONTAINER_SLOT_STATE_CHANGED: i32 = 0x0E;
const RESOURCE_PACK_STATUS: (i32, i32) = (0x28, 0x27);
const CONFIG_RESOURCE_PACK_STATUS: i32 = 0x05;

const BOSSBAR_ADD: i32 = 0;
const BOSSBAR_UPDATE_TITLE: i32 = 3;

const STATUS_DOWNLOADED: i32 = 4;
const STATUS_FAILED_DOWNLOAD: i32 = 2;

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, data) = pair_mappings(MappingData::new(), data, options)?;

    let mut builder = ProtocolTransformer::builder("1.20.3->1.20.2", V1_20_3, V1_20_2)
        .mappings(Arc::new(mappings))
        .on_connection_init(|storage, _| {
            storage.get_or_insert_with(EntityTracker::default);
        })
        .register_clientbound(
            ConnectionState::Play,
            BOSSBAR,
            BOSSBAR,
            FieldChain::new()
                .map(FieldType::Uuid)
                .map(FieldType::VarInt)
                .handler(|env, _| {
                    let action: i32 = env.get(&FieldType::VarInt, 0)?;
                    if action == BOSSBAR_ADD || action == BOSSBAR_UPDATE_TITLE {
                        convert_component(env)?;
                    }
                    Ok(())
                }),
        )
        .register_clientbound(ConnectionState::Play, DISCONNECT, DISCONNECT, component_chain())
        .register_clientbound(ConnectionState::Play, DISGUISED_CHAT, DISGUISED_CHAT, component_chain())
        .register_clientbound(
            ConnectionState::Play,
            SYSTEM_CHAT,
            SYSTEM_CHAT + 2,
            component_chain(),
        )
        .register_clientbound(
            ConnectionState::Play,
            TAB_LIST,
            TAB_LIST + 2,
            FieldChain::new().handler(|env, _| {
                convert_component(env)?;
                convert_component(env)
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            OPEN_SCREEN,
            OPEN_SCREEN,
            FieldChain::new()
                .map(FieldType::VarInt)
                .handler(|env, ctx| {
                    let menu: i32 = env.read(&FieldType::VarInt)?;
                    env.write(FieldType::VarInt, remap(ctx, MappingCategory::Menus, menu));
                    Ok(())
                })
                .handler(|env, _| convert_component(env)),
        )
        .register_clientbound(
            ConnectionState::Play,
            RESOURCE_PACK,
            RESOURCE_PACK_PUSH,
            resource_pack_chain(RESOURCE_PACK_POP),
        )
        .register_clientbound(
            ConnectionState::Play,
            BLOCK_UPDATE,
            BLOCK_UPDATE,
            FieldChain::new().map(FieldType::Position).handler(|env, ctx| {
                let state: i32 = env.read(&FieldType::VarInt)?;
                env.write(FieldType::VarInt, remap(ctx, MappingCategory::BlockStates, state));
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            CHUNK_DATA,
            CHUNK_DATA,
            FieldChain::new()
                .map(FieldType::Int)
                .map(FieldType::Int)
                .map(FieldType::Nbt)
                .handler(|env, ctx| {
                    let data: Vec<u8> = env.read(&FieldType::ByteArray)?;
                    let data = match ctx.mappings() {
                        Some(mappings) if mappings.has(MappingCategory::BlockStates) => {
                            remap_sections(data, |id| mappings.new_id(MappingCategory::BlockStates, id))?
                        }
                        _ => data,
                    };
                    env.write(FieldType::ByteArray, data);
                    Ok(())
                }),
        )
        .register_clientbound(ConnectionState::Configuration, CONFIG_DISCONNECT, CONFIG_DISCONNECT, component_chain())
        .register_clientbound(
            ConnectionState::Configuration,
            CONFIG_RESOURCE_PACK.0,
            CONFIG_RESOURCE_PACK.1,
            resource_pack_chain(CONFIG_RESOURCE_PACK_POP),
        )
        .register_clientbound(
            ConnectionState::Configuration,
            CONFIG_FEATURE_FLAGS.0,
            CONFIG_FEATURE_FLAGS.1,
            FieldChain::new(),
        )
        .register_clientbound(
            ConnectionState::Configuration,
            CONFIG_UPDATE_TAGS.0,
            CONFIG_UPDATE_TAGS.1,
            FieldChain::new(),
        )
        .cancel_serverbound(ConnectionState::Play, CONTAINER_SLOT_STATE_CHANGED)
        .register_serverbound(
            ConnectionState::Play,
            RESOURCE_PACK_STATUS.0,
            RESOURCE_PACK_STATUS.1,
            resource_pack_status_chain(),
        )
        .register_serverbound(
            ConnectionState::Configuration,
            CONFIG_RESOURCE_PACK_STATUS,
            CONFIG_RESOURCE_PACK_STATUS,
            resource_pack_status_chain(),
        );

    // Reset score and the pack pop/push pair were added at 0x42, and the two
    // tick-rate packets near the end.
    for id in 0x43..=0x6B {
        if !builder.is_registered(Direction::Clientbound, ConnectionState::Play, id) {
            builder = builder.register_clientbound(ConnectionState::Play, id, id + 2, FieldChain::new());
        }
    }
    for id in 0x6C..=0x70 {
        builder = builder.register_clientbound(ConnectionState::Play, id, id + 4, FieldChain::new());
    }
    for id in CONTAINER_SLOT_STATE_CHANGED + 1..=0x36 {
        if !builder.is_registered(Direction::Serverbound, ConnectionState::Play, id) {
            builder = builder.register_serverbound(ConnectionState::Play, id, id - 1, FieldChain::new());
        }
    }

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn remap(ctx: &PacketContext<'_>, category: MappingCategory, id: i32) -> i32 {
    ctx.mappings().map_or(id, |mappings| mappings.new_id(category, id))
}

fn component_chain() -> FieldChain {
    FieldChain::new().handler(|env, _| convert_component(env))
}

/// JSON text component to its NBT form.
fn convert_component(env: &mut PacketEnvelope) -> ProtocolResult<()> {
    let json: String = env.read(&FieldType::Component)?;
    env.write(FieldType::TagComponent, Some(json_str_to_tag(&json)));
    Ok(())
}

fn convert_optional_component(env: &mut PacketEnvelope) -> ProtocolResult<()> {
    if env.passthrough::<bool>(&FieldType::Boolean)? {
        convert_component(env)?;
    }
    Ok(())
}

/// The old single-pack message becomes a push with a fresh UUID, preceded by
/// a pop of every pack so the client never stacks them.
fn resource_pack_chain(pop_id: i32) -> FieldChain {
    FieldChain::new().handler(move |env, _| {
        env.write(FieldType::Uuid, Uuid::new_v4());
        env.passthrough::<String>(&FieldType::String)?;
        env.passthrough::<String>(&FieldType::String)?;
        env.passthrough::<bool>(&FieldType::Boolean)?;
        convert_optional_component(env)?;

        let mut pop = PacketEnvelope::create(pop_id);
        pop.write(FieldType::OptionalUuid, None::<Uuid>);
        env.send(pop);
        Ok(())
    })
}

fn resource_pack_status_chain() -> FieldChain {
    FieldChain::new().read(FieldType::Uuid).handler(|env, _| {
        let action: i32 = env.read(&FieldType::VarInt)?;
        match action {
            STATUS_DOWNLOADED => env.cancel(),
            // invalid url, failed reload and discarded
            a if a > STATUS_DOWNLOADED => env.write(FieldType::VarInt, STATUS_FAILED_DOWNLOAD),
            a => env.write(FieldType::VarInt, a),
        }
        Ok(())
    })
}

/// Re-encode every section of a chunk with block states passed through `f`.
fn remap_sections(data: Vec<u8>, f: impl Fn(i32) -> i32) -> ProtocolResult<Vec<u8>> {
    let mut input = BytesMut::from(&data[..]);
    let mut output = BytesMut::with_capacity(data.len());
    while !input.is_empty() {
        let mut section = ChunkSection::read(&mut input).map_err(|source| ProtocolError::Decode {
            ty: "ChunkSection",
            offset: data.len() - input.len(),
            source,
        })?;
        section.block_states.remap(&f);
        section.write(&mut output);
    }
    Ok(output.to_vec())
}
