//! 1.13.1 clients on 1.13 servers.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::Result;
use crossgrade_mappings::{IdMapping, MappingCategory, MappingData};
use crossgrade_pipeline::{
    EntityTracker, EntityType, FieldChain, FlatItemRewriter, ProtocolTransformer, WorldTracker,
};
use crossgrade_protocol_core::{ConnectionState, FieldType, FlatItem, ProtocolResult};
use crossgrade_types::{Environment, V1_13, V1_13_1};
use std::sync::Arc;

// Clientbound play
const SPAWN_PLAYER: i32 = 0x05;
const BLOCK_CHANGE: i32 = 0x0B;
const BOSSBAR: i32 = 0x0C;
const MULTI_BLOCK_CHANGE: i32 = 0x0F;
const TAB_COMPLETE: i32 = 0x10;
const WINDOW_ITEMS: i32 = 0x15;
const SET_SLOT: i32 = 0x17;
const COOLDOWN: i32 = 0x18;
const EFFECT: i32 = 0x23;
const JOIN_GAME: i32 = 0x25;
const DESTROY_ENTITIES: i32 = 0x35;
const RESPAWN: i32 = 0x38;
const ENTITY_EQUIPMENT: i32 = 0x42;
const TAGS: i32 = 0x55;

// Serverbound play
const SERVERBOUND_TAB_COMPLETE: i32 = 0x05;
const CLICK_WINDOW: i32 = 0x08;
const EDIT_BOOK: i32 = 0x0B;
const CREATIVE_INVENTORY_ACTION: i32 = 0x24;

// World events carrying registry ids
const EFFECT_PLAY_RECORD: i32 = 1010;
const EFFECT_BLOCK_BREAK: i32 = 2001;

const BOSSBAR_ADD: i32 = 0;
const BOSSBAR_FLAG_DARKEN_SKY: i8 = 0x02;
const BOSSBAR_FLAG_FOG: u8 = 0x04;

const OFF_HAND: i32 = 1;

const BLOCK_STATES: i32 = 8598;
const BLOCKS: i32 = 598;
const ITEMS: i32 = 790;

/// 1.13.1 inserted the dead coral fans and a few items into the middle of the registries.
pub fn block_state_id(old: i32) -> i32 {
    if old > 8573 {
        old + 17
    } else if old > 8463 {
        old + 16
    } else if old > 8458 {
        8470 + (old - 8459) * 2
    } else if old > 1126 {
        old + 1
    } else {
        old
    }
}

pub fn block_id(old: i32) -> i32 {
    if old >= 561 {
        old + 5
    } else {
        old
    }
}

pub fn item_id(old: i32) -> i32 {
    if old >= 443 {
        old + 5
    } else {
        old
    }
}

pub fn builtin_mappings() -> Result<MappingData> {
    let table = |label, count, f: fn(i32) -> i32| IdMapping::from_pairs(label, (0..count).map(|id| (id, f(id))));
    Ok(MappingData::new()
        .with(MappingCategory::BlockStates, table("block_states", BLOCK_STATES, block_state_id)?)
        .with(MappingCategory::Blocks, table("blocks", BLOCKS, block_id)?)
        .with(MappingCategory::Items, table("items", ITEMS, item_id)?))
}

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, data) = pair_mappings(builtin_mappings()?, data, options)?;
    let mappings = Arc::new(mappings);
    let items = Arc::new(FlatItemRewriter::new(Some(mappings.clone())));

    let builder = ProtocolTransformer::builder("1.13.1->1.13", V1_13_1, V1_13)
        .mappings(mappings.clone())
        .on_connection_init(|storage, _| {
            storage.put(EntityTracker::default());
            storage.get_or_insert_with(WorldTracker::default);
        })
        .register_serverbound(
            ConnectionState::Play,
            SERVERBOUND_TAB_COMPLETE,
            SERVERBOUND_TAB_COMPLETE,
            FieldChain::new()
                .map(FieldType::VarInt)
                .transform(FieldType::String, FieldType::String, |text: String| {
                    Ok(text.strip_prefix('/').map(str::to_string).unwrap_or(text))
                }),
        )
        .register_serverbound(
            ConnectionState::Play,
            EDIT_BOOK,
            EDIT_BOOK,
            FieldChain::new()
                .transform(FieldType::FlatItem, FieldType::FlatItem, item_to_server(&items))
                .map(FieldType::Boolean)
                .handler(|env, _| {
                    let hand: i32 = env.read(&FieldType::VarInt)?;
                    if hand == OFF_HAND {
                        env.cancel();
                    }
                    Ok(())
                }),
        )
        .register_serverbound(
            ConnectionState::Play,
            CLICK_WINDOW,
            CLICK_WINDOW,
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .map(FieldType::Short)
                .map(FieldType::Byte)
                .map(FieldType::Short)
                .map(FieldType::VarInt)
                .transform(FieldType::FlatItem, FieldType::FlatItem, item_to_server(&items)),
        )
        .register_serverbound(
            ConnectionState::Play,
            CREATIVE_INVENTORY_ACTION,
            CREATIVE_INVENTORY_ACTION,
            FieldChain::new()
                .map(FieldType::Short)
                .transform(FieldType::FlatItem, FieldType::FlatItem, item_to_server(&items)),
        )
        .register_clientbound(
            ConnectionState::Play,
            TAB_COMPLETE,
            TAB_COMPLETE,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .handler(|env, _| {
                    // The client now counts the leading slash.
                    let start: i32 = env.get(&FieldType::VarInt, 1)?;
                    env.set(&FieldType::VarInt, 1, start + 1)?;
                    let count: i32 = env.get(&FieldType::VarInt, 3)?;
                    for _ in 0..count {
                        env.passthrough::<String>(&FieldType::String)?;
                        if env.passthrough::<bool>(&FieldType::Boolean)? {
                            env.passthrough::<String>(&FieldType::Component)?;
                        }
                    }
                    Ok(())
                }),
        )
        .register_clientbound(
            ConnectionState::Play,
            BOSSBAR,
            BOSSBAR,
            FieldChain::new()
                .map(FieldType::Uuid)
                .map(FieldType::VarInt)
                .handler(|env, _| {
                    let action: i32 = env.get(&FieldType::VarInt, 0)?;
                    if action != BOSSBAR_ADD {
                        return Ok(());
                    }
                    env.passthrough::<String>(&FieldType::Component)?;
                    env.passthrough::<f32>(&FieldType::Float)?;
                    env.passthrough::<i32>(&FieldType::VarInt)?;
                    env.passthrough::<i32>(&FieldType::VarInt)?;
                    let flags: i8 = env.read(&FieldType::Byte)?;
                    let mut flags = flags as u8;
                    if flags & BOSSBAR_FLAG_DARKEN_SKY as u8 != 0 {
                        flags |= BOSSBAR_FLAG_FOG;
                    }
                    env.write(FieldType::UnsignedByte, flags);
                    Ok(())
                }),
        )
        .register_clientbound(ConnectionState::Play, TAGS, TAGS, {
            let mappings = mappings.clone();
            FieldChain::new().handler(move |env, _| {
                for category in [MappingCategory::Blocks, MappingCategory::Items] {
                    let count: i32 = env.passthrough(&FieldType::VarInt)?;
                    for _ in 0..count {
                        env.passthrough::<String>(&FieldType::String)?;
                        let ids: Vec<i32> = env.read(&FieldType::VarIntArray)?;
                        let ids: Vec<i32> = ids.into_iter().map(|id| mappings.new_id(category, id)).collect();
                        env.write(FieldType::VarIntArray, ids);
                    }
                }
                Ok(())
            })
        })
        .register_clientbound(
            ConnectionState::Play,
            JOIN_GAME,
            JOIN_GAME,
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
                }),
        )
        .register_clientbound(
            ConnectionState::Play,
            RESPAWN,
            RESPAWN,
            FieldChain::new().map(FieldType::Int).handler(|env, ctx| {
                let dimension: i32 = env.get(&FieldType::Int, 0)?;
                ctx.storage
                    .require_mut::<WorldTracker>()?
                    .set_world(Environment::from_id(dimension), None);
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            SPAWN_PLAYER,
            SPAWN_PLAYER,
            FieldChain::new().map(FieldType::VarInt).handler(|env, ctx| {
                let entity_id: i32 = env.get(&FieldType::VarInt, 0)?;
                ctx.storage
                    .require_mut::<EntityTracker>()?
                    .add_entity(entity_id, EntityType::player());
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            DESTROY_ENTITIES,
            DESTROY_ENTITIES,
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
            SET_SLOT,
            SET_SLOT,
            FieldChain::new()
                .map(FieldType::Byte)
                .map(FieldType::Short)
                .transform(FieldType::FlatItem, FieldType::FlatItem, item_to_client(&items)),
        )
        .register_clientbound(
            ConnectionState::Play,
            WINDOW_ITEMS,
            WINDOW_ITEMS,
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .transform(FieldType::FlatItemArray, FieldType::FlatItemArray, items_to_client(&items)),
        )
        .register_clientbound(
            ConnectionState::Play,
            ENTITY_EQUIPMENT,
            ENTITY_EQUIPMENT,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .transform(FieldType::FlatItem, FieldType::FlatItem, item_to_client(&items)),
        )
        .register_clientbound(ConnectionState::Play, COOLDOWN, COOLDOWN, {
            let mappings = mappings.clone();
            FieldChain::new().transform(FieldType::VarInt, FieldType::VarInt, move |id: i32| {
                Ok(mappings.new_id(MappingCategory::Items, id))
            })
        })
        .register_clientbound(ConnectionState::Play, BLOCK_CHANGE, BLOCK_CHANGE, {
            let mappings = mappings.clone();
            FieldChain::new()
                .map(FieldType::Position)
                .transform(FieldType::VarInt, FieldType::VarInt, move |state: i32| {
                    Ok(mappings.new_id(MappingCategory::BlockStates, state))
                })
        })
        .register_clientbound(ConnectionState::Play, MULTI_BLOCK_CHANGE, MULTI_BLOCK_CHANGE, {
            let mappings = mappings.clone();
            FieldChain::new()
                .map(FieldType::Int)
                .map(FieldType::Int)
                .handler(move |env, _| {
                    let count: i32 = env.passthrough(&FieldType::VarInt)?;
                    for _ in 0..count {
                        env.passthrough::<u8>(&FieldType::UnsignedByte)?;
                        env.passthrough::<u8>(&FieldType::UnsignedByte)?;
                        let state: i32 = env.read(&FieldType::VarInt)?;
                        env.write(FieldType::VarInt, mappings.new_id(MappingCategory::BlockStates, state));
                    }
                    Ok(())
                })
        })
        .register_clientbound(ConnectionState::Play, EFFECT, EFFECT, {
            let mappings = mappings.clone();
            FieldChain::new()
                .map(FieldType::Int)
                .map(FieldType::Position)
                .map(FieldType::Int)
                .handler(move |env, _| {
                    let effect: i32 = env.get(&FieldType::Int, 0)?;
                    let data: i32 = env.get(&FieldType::Int, 1)?;
                    let category = match effect {
                        EFFECT_BLOCK_BREAK => MappingCategory::BlockStates,
                        EFFECT_PLAY_RECORD => MappingCategory::Items,
                        _ => return Ok(()),
                    };
                    env.set(&FieldType::Int, 1, mappings.new_id(category, data))
                })
        });

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

pub(crate) fn item_to_client(
    items: &Arc<FlatItemRewriter>,
) -> impl Fn(Option<FlatItem>) -> ProtocolResult<Option<FlatItem>> + Send + Sync + 'static {
    let items = items.clone();
    move |mut slot| {
        items.slot_to_client(&mut slot);
        Ok(slot)
    }
}

pub(crate) fn item_to_server(
    items: &Arc<FlatItemRewriter>,
) -> impl Fn(Option<FlatItem>) -> ProtocolResult<Option<FlatItem>> + Send + Sync + 'static {
    let items = items.clone();
    move |mut slot| {
        items.slot_to_server(&mut slot);
        Ok(slot)
    }
}

pub(crate) fn items_to_client(
    items: &Arc<FlatItemRewriter>,
) -> impl Fn(Vec<Option<FlatItem>>) -> ProtocolResult<Vec<Option<FlatItem>>> + Send + Sync + 'static {
    let items = items.clone();
    move |mut slots| {
        for slot in &mut slots {
            items.slot_to_client(slot);
        }
        Ok(slots)
    }
}
