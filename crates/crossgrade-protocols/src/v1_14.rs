//! 1.14 clients on 1.13.2 servers.
//!
//! Containers are opened by menu type id instead of a type string, the trader
//! list got its own packet, lore became JSON text and the difficulty moved out
//! of join game and respawn.

use crate::data::PairData;
use crate::pair_mappings;
use crate::v1_13_1::{item_to_client, item_to_server, items_to_client};
use crate::v1_13_2::{recipe_items, TRADER_LIST};
use crate::ProtocolOptions;
use anyhow::Result;
use crossgrade_mappings::{MappingCategory, MappingData};
use crossgrade_nbt::{nbt_compound, NbtValue};
use crossgrade_pipeline::{FieldChain, FlatItemRewriter, InventoryTracker, ProtocolTransformer};
use crossgrade_protocol_core::{ConnectionState, FieldType, FlatItem, PacketEnvelope, ProtocolResult};
use crossgrade_types::{V1_13_2, V1_14};
use std::sync::Arc;
use tracing::warn;

// Clientbound play, 1.13.2 ids
const SERVER_DIFFICULTY: i32 = 0x0D;
const OPEN_WINDOW: i32 = 0x14;
const WINDOW_ITEMS: i32 = 0x15;
const SET_SLOT: i32 = 0x17;
const PLUGIN_MESSAGE: i32 = 0x19;
const JOIN_GAME: i32 = 0x25;
const DESTROY_ENTITIES: i32 = 0x35;
const RESPAWN: i32 = 0x38;
const ENTITY_EQUIPMENT: i32 = 0x42;
const DECLARE_RECIPES: i32 = 0x54;

// Clientbound play, 1.14 ids
const WINDOW_ITEMS_1_14: i32 = 0x14;
const SET_SLOT_1_14: i32 = 0x16;
const PLUGIN_MESSAGE_1_14: i32 = 0x18;
const OPEN_HORSE_WINDOW_1_14: i32 = 0x1F;
const TRADE_LIST_1_14: i32 = 0x27;
const OPEN_BOOK_1_14: i32 = 0x2D;
const OPEN_WINDOW_1_14: i32 = 0x2E;
const DESTROY_ENTITIES_1_14: i32 = 0x37;
const RESPAWN_1_14: i32 = 0x3A;
const ENTITY_EQUIPMENT_1_14: i32 = 0x46;
const DECLARE_RECIPES_1_14: i32 = 0x5A;

// Serverbound play: (1.14 id, 1.13.2 id)
const CLICK_WINDOW: (i32, i32) = (0x09, 0x08);
const SELECT_TRADE: (i32, i32) = (0x21, 0x1F);
const CREATIVE_INVENTORY_ACTION: (i32, i32) = (0x26, 0x24);

const DEFAULT_VIEW_DISTANCE: i32 = 64;
const MENU_MERCHANT: i32 = 18;
const BOOK_OPEN: &str = "minecraft:book_open";
const REMOVED_RECIPE_TYPES: [&str; 2] = ["crafting_special_banneraddpattern", "crafting_special_repairitem"];

/// Item substituted when an id has no counterpart (stone).
const FALLBACK_ITEM: i32 = 1;

/// Menu type id for a 1.13 window type string; `None` for types 1.14 cannot open.
pub fn menu_type(kind: &str, slots: u8) -> Option<i32> {
    Some(match kind {
        "minecraft:container" | "minecraft:chest" => i32::from(slots) / 9 - 1,
        "minecraft:crafting_table" => 11,
        "minecraft:furnace" => 13,
        "minecraft:dropper" | "minecraft:dispenser" => 6,
        "minecraft:enchanting_table" => 12,
        "minecraft:brewing_stand" => 10,
        "minecraft:villager" => MENU_MERCHANT,
        "minecraft:beacon" => 8,
        "minecraft:anvil" => 7,
        "minecraft:hopper" => 15,
        "minecraft:shulker_box" => 19,
        _ => return None,
    })
}

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mut mappings, data) = pair_mappings(MappingData::new(), data, options)?;
    mappings.set_placeholder(MappingCategory::Items, FALLBACK_ITEM);
    let mappings = Arc::new(mappings);
    let items = Arc::new(FlatItemRewriter::new(Some(mappings.clone())).with_lore_conversion());

    let builder = ProtocolTransformer::builder("1.14->1.13.2", V1_14, V1_13_2)
        .mappings(mappings)
        .on_connection_init(|storage, _| {
            storage.get_or_insert_with(InventoryTracker::default);
        })
        .register_clientbound(
            ConnectionState::Play,
            OPEN_WINDOW,
            OPEN_WINDOW_1_14,
            FieldChain::new().handler(|env, ctx| {
                let window: u8 = env.read(&FieldType::UnsignedByte)?;
                let kind: String = env.read(&FieldType::String)?;
                let title: String = env.read(&FieldType::Component)?;
                let slots: u8 = env.read(&FieldType::UnsignedByte)?;

                if kind == "EntityHorse" {
                    let entity_id: i32 = env.read(&FieldType::Int)?;
                    env.set_id(OPEN_HORSE_WINDOW_1_14);
                    env.write(FieldType::UnsignedByte, window);
                    env.write(FieldType::VarInt, i32::from(slots));
                    env.write(FieldType::Int, entity_id);
                    return Ok(());
                }

                let Some(menu) = menu_type(&kind, slots) else {
                    warn!("Cannot open {} window with {} slots for a 1.14 client", kind, slots);
                    env.cancel();
                    return Ok(());
                };
                ctx.storage
                    .require_mut::<InventoryTracker>()?
                    .open(i32::from(window), menu);
                env.write(FieldType::VarInt, i32::from(window));
                env.write(FieldType::VarInt, menu);
                env.write(FieldType::Component, title);
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            WINDOW_ITEMS,
            WINDOW_ITEMS_1_14,
            FieldChain::new().map(FieldType::UnsignedByte).transform(
                FieldType::FlatVarIntItemArray,
                FieldType::FlatVarIntItemArray,
                items_to_client(&items),
            ),
        )
        .register_clientbound(
            ConnectionState::Play,
            SET_SLOT,
            SET_SLOT_1_14,
            FieldChain::new()
                .map(FieldType::Byte)
                .map(FieldType::Short)
                .transform(FieldType::FlatVarIntItem, FieldType::FlatVarIntItem, item_to_client(&items)),
        )
        .register_clientbound(
            ConnectionState::Play,
            ENTITY_EQUIPMENT,
            ENTITY_EQUIPMENT_1_14,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .transform(FieldType::FlatVarIntItem, FieldType::FlatVarIntItem, item_to_client(&items)),
        )
        .register_clientbound(ConnectionState::Play, PLUGIN_MESSAGE, PLUGIN_MESSAGE_1_14, {
            let items = items.clone();
            FieldChain::new().handler(move |env, ctx| {
                let channel: String = env.read(&FieldType::String)?;
                if channel == TRADER_LIST || channel == "trader_list" {
                    env.set_id(TRADE_LIST_1_14);
                    let window: i32 = env.read(&FieldType::Int)?;
                    ctx.storage.require_mut::<InventoryTracker>()?.open(window, MENU_MERCHANT);
                    env.write(FieldType::VarInt, window);
                    trade_list(env, &items)
                } else if channel == BOOK_OPEN || channel == "book_open" {
                    let hand: i32 = env.read(&FieldType::VarInt)?;
                    env.clear_input();
                    env.set_id(OPEN_BOOK_1_14);
                    env.write(FieldType::VarInt, hand);
                    Ok(())
                } else {
                    env.write(FieldType::String, channel);
                    Ok(())
                }
            })
        })
        .register_clientbound(ConnectionState::Play, DECLARE_RECIPES, DECLARE_RECIPES_1_14, {
            let items = items.clone();
            FieldChain::new().map(FieldType::VarInt).handler(move |env, _| {
                let size: i32 = env.get(&FieldType::VarInt, 0)?;
                let mut deleted = 0;
                let item = |env: &mut PacketEnvelope| -> ProtocolResult<()> {
                    let mut slot: Option<FlatItem> = env.read(&FieldType::FlatVarIntItem)?;
                    items.slot_to_client(&mut slot);
                    env.write(FieldType::FlatVarIntItem, slot);
                    Ok(())
                };
                for _ in 0..size {
                    let id: String = env.read(&FieldType::String)?;
                    let kind: String = env.read(&FieldType::String)?;
                    if REMOVED_RECIPE_TYPES.contains(&kind.as_str()) {
                        deleted += 1;
                        continue;
                    }
                    // 1.14 sends the type before the id.
                    env.write(FieldType::String, kind.clone());
                    env.write(FieldType::String, id);
                    recipe_items(env, &kind, &item)?;
                }
                env.set(&FieldType::VarInt, 0, size - deleted)
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
                .handler(|env, _| {
                    let difficulty: u8 = env.read(&FieldType::UnsignedByte)?;
                    env.schedule_send(difficulty_packet(difficulty));
                    Ok(())
                })
                .map(FieldType::UnsignedByte)
                .map(FieldType::String)
                .create(FieldType::VarInt, DEFAULT_VIEW_DISTANCE)
                .map(FieldType::Boolean),
        )
        .register_clientbound(
            ConnectionState::Play,
            RESPAWN,
            RESPAWN_1_14,
            FieldChain::new().map(FieldType::Int).handler(|env, _| {
                let difficulty: u8 = env.read(&FieldType::UnsignedByte)?;
                env.schedule_send(difficulty_packet(difficulty));
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            SERVER_DIFFICULTY,
            SERVER_DIFFICULTY,
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .create(FieldType::Boolean, false),
        )
        .register_clientbound(ConnectionState::Play, DESTROY_ENTITIES, DESTROY_ENTITIES_1_14, FieldChain::new())
        .register_serverbound(ConnectionState::Play, CLICK_WINDOW.0, CLICK_WINDOW.1, {
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .handler(|env, ctx| {
                    let window: u8 = env.get(&FieldType::UnsignedByte, 0)?;
                    ctx.storage.require_mut::<InventoryTracker>()?.clicked(i32::from(window));
                    Ok(())
                })
                .map(FieldType::Short)
                .map(FieldType::Byte)
                .map(FieldType::Short)
                .map(FieldType::VarInt)
                .transform(FieldType::FlatVarIntItem, FieldType::FlatVarIntItem, item_to_server(&items))
        })
        .register_serverbound(
            ConnectionState::Play,
            SELECT_TRADE.0,
            SELECT_TRADE.1,
            FieldChain::new().map(FieldType::VarInt).handler(|env, ctx| {
                // Selecting a trade now moves items client side; make the server resend the window.
                let Some(window) = ctx.storage.require::<InventoryTracker>()?.open_window() else {
                    return Ok(());
                };
                env.schedule_send(resync_click(window));
                Ok(())
            }),
        )
        .register_serverbound(
            ConnectionState::Play,
            CREATIVE_INVENTORY_ACTION.0,
            CREATIVE_INVENTORY_ACTION.1,
            FieldChain::new()
                .map(FieldType::Short)
                .transform(FieldType::FlatVarIntItem, FieldType::FlatVarIntItem, item_to_server(&items)),
        );

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn difficulty_packet(difficulty: u8) -> PacketEnvelope {
    let mut packet = PacketEnvelope::create(SERVER_DIFFICULTY);
    packet.write(FieldType::UnsignedByte, difficulty);
    packet.write(FieldType::Boolean, false);
    packet
}

/// A drag-end click on slot -999 with an item that can never match, so the
/// server answers with the full window contents.
fn resync_click(window: i32) -> PacketEnvelope {
    let mut item = FlatItem::new(FALLBACK_ITEM, 1);
    item.tag = Some(nbt_compound! { "force_resync" => NbtValue::Double(f64::NAN) });

    let mut packet = PacketEnvelope::create(CLICK_WINDOW.1);
    packet.write(FieldType::UnsignedByte, window as u8);
    packet.write(FieldType::Short, -999i16);
    packet.write(FieldType::Byte, 2i8);
    packet.write(FieldType::Short, rand::random::<i16>());
    packet.write(FieldType::VarInt, 5i32);
    packet.write(FieldType::FlatVarIntItem, Some(item));
    packet
}

/// Rewrite the trades after the window id and add the fields 1.14 introduced.
fn trade_list(env: &mut PacketEnvelope, items: &FlatItemRewriter) -> ProtocolResult<()> {
    let item = |env: &mut PacketEnvelope| -> ProtocolResult<()> {
        let mut slot: Option<FlatItem> = env.read(&FieldType::FlatVarIntItem)?;
        items.slot_to_client(&mut slot);
        env.write(FieldType::FlatVarIntItem, slot);
        Ok(())
    };
    let size: u8 = env.passthrough(&FieldType::UnsignedByte)?;
    for _ in 0..size {
        item(env)?;
        item(env)?;
        if env.passthrough::<bool>(&FieldType::Boolean)? {
            item(env)?;
        }
        env.passthrough::<bool>(&FieldType::Boolean)?;
        env.passthrough::<i32>(&FieldType::Int)?;
        env.passthrough::<i32>(&FieldType::Int)?;
        env.write(FieldType::Int, 0i32);
        env.write(FieldType::Int, 0i32);
        env.write(FieldType::Float, 0f32);
    }
    env.write(FieldType::VarInt, 0i32);
    env.write(FieldType::VarInt, 0i32);
    env.write(FieldType::Boolean, false);
    Ok(())
}
