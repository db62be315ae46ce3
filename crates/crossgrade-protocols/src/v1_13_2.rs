//! 1.13.2 clients on 1.13.1 servers. Item ids became VarInts; nothing else moved.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::Result;
use crossgrade_mappings::MappingData;
use crossgrade_pipeline::{FieldChain, ProtocolTransformer};
use crossgrade_protocol_core::{ConnectionState, FieldType, FlatItem, PacketEnvelope, ProtocolResult};
use crossgrade_types::{V1_13_1, V1_13_2};
use std::sync::Arc;

// Clientbound play
const WINDOW_ITEMS: i32 = 0x15;
const SET_SLOT: i32 = 0x17;
const PLUGIN_MESSAGE: i32 = 0x19;
const ENTITY_EQUIPMENT: i32 = 0x42;
const DECLARE_RECIPES: i32 = 0x54;

// Serverbound play
const CLICK_WINDOW: i32 = 0x08;
const EDIT_BOOK: i32 = 0x0B;
const CREATIVE_INVENTORY_ACTION: i32 = 0x24;

pub const TRADER_LIST: &str = "minecraft:trader_list";

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, data) = pair_mappings(MappingData::new(), data, options)?;

    let builder = ProtocolTransformer::builder("1.13.2->1.13.1", V1_13_2, V1_13_1)
        .mappings(Arc::new(mappings))
        .register_clientbound(
            ConnectionState::Play,
            SET_SLOT,
            SET_SLOT,
            FieldChain::new()
                .map(FieldType::Byte)
                .map(FieldType::Short)
                .map_to(FieldType::FlatItem, FieldType::FlatVarIntItem),
        )
        .register_clientbound(
            ConnectionState::Play,
            WINDOW_ITEMS,
            WINDOW_ITEMS,
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .map_to(FieldType::FlatItemArray, FieldType::FlatVarIntItemArray),
        )
        .register_clientbound(
            ConnectionState::Play,
            ENTITY_EQUIPMENT,
            ENTITY_EQUIPMENT,
            FieldChain::new()
                .map(FieldType::VarInt)
                .map(FieldType::VarInt)
                .map_to(FieldType::FlatItem, FieldType::FlatVarIntItem),
        )
        .register_clientbound(
            ConnectionState::Play,
            PLUGIN_MESSAGE,
            PLUGIN_MESSAGE,
            FieldChain::new().map(FieldType::String).handler(|env, _| {
                let channel: String = env.get(&FieldType::String, 0)?;
                if channel != TRADER_LIST && channel != "trader_list" {
                    return Ok(());
                }
                env.passthrough::<i32>(&FieldType::Int)?;
                let size: u8 = env.passthrough(&FieldType::UnsignedByte)?;
                for _ in 0..size {
                    widen_item(env)?;
                    widen_item(env)?;
                    if env.passthrough::<bool>(&FieldType::Boolean)? {
                        widen_item(env)?;
                    }
                    env.passthrough::<bool>(&FieldType::Boolean)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                }
                Ok(())
            }),
        )
        .register_clientbound(
            ConnectionState::Play,
            DECLARE_RECIPES,
            DECLARE_RECIPES,
            FieldChain::new().handler(|env, _| {
                let count: i32 = env.passthrough(&FieldType::VarInt)?;
                for _ in 0..count {
                    env.passthrough::<String>(&FieldType::String)?;
                    let kind: String = env.passthrough(&FieldType::String)?;
                    recipe_items(env, &kind, widen_item)?;
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
                .map_to(FieldType::FlatVarIntItem, FieldType::FlatItem),
        )
        .register_serverbound(
            ConnectionState::Play,
            CREATIVE_INVENTORY_ACTION,
            CREATIVE_INVENTORY_ACTION,
            FieldChain::new()
                .map(FieldType::Short)
                .map_to(FieldType::FlatVarIntItem, FieldType::FlatItem),
        )
        .register_serverbound(
            ConnectionState::Play,
            EDIT_BOOK,
            EDIT_BOOK,
            FieldChain::new().map_to(FieldType::FlatVarIntItem, FieldType::FlatItem),
        );

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn widen_item(env: &mut PacketEnvelope) -> ProtocolResult<()> {
    let item: Option<FlatItem> = env.read(&FieldType::FlatItem)?;
    env.write(FieldType::FlatVarIntItem, item);
    Ok(())
}

/// Walk the item fields of one recipe body, calling `item` for each slot.
/// Unknown recipe kinds carry no items.
pub(crate) fn recipe_items(
    env: &mut PacketEnvelope,
    kind: &str,
    item: impl Fn(&mut PacketEnvelope) -> ProtocolResult<()>,
) -> ProtocolResult<()> {
    let ingredient = |env: &mut PacketEnvelope| -> ProtocolResult<()> {
        let options: i32 = env.passthrough(&FieldType::VarInt)?;
        for _ in 0..options {
            item(env)?;
        }
        Ok(())
    };
    match kind.strip_prefix("minecraft:").unwrap_or(kind) {
        "crafting_shapeless" => {
            env.passthrough::<String>(&FieldType::String)?;
            let ingredients: i32 = env.passthrough(&FieldType::VarInt)?;
            for _ in 0..ingredients {
                ingredient(env)?;
            }
            item(env)?;
        }
        "crafting_shaped" => {
            let width: i32 = env.passthrough(&FieldType::VarInt)?;
            let height: i32 = env.passthrough(&FieldType::VarInt)?;
            env.passthrough::<String>(&FieldType::String)?;
            for _ in 0..width * height {
                ingredient(env)?;
            }
            item(env)?;
        }
        "smelting" | "blasting" | "smoking" | "campfire_cooking" => {
            env.passthrough::<String>(&FieldType::String)?;
            ingredient(env)?;
            item(env)?;
            env.passthrough::<f32>(&FieldType::Float)?;
            env.passthrough::<i32>(&FieldType::VarInt)?;
        }
        "stonecutting" => {
            env.passthrough::<String>(&FieldType::String)?;
            ingredient(env)?;
            item(env)?;
        }
        _ => {}
    }
    Ok(())
}
