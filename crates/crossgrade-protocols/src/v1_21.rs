//! 1.21 clients on 1.20.5 servers.
//!
//! Items carry data components whose registry differs between the two
//! versions, so item handling needs both component layouts from the pair
//! file. Without them only the login packet is tracked.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::Result;
use crossgrade_mappings::MappingData;
use crossgrade_pipeline::{
    EntityTracker, FieldChain, JsonToTagComponents, ProtocolTransformer, StructuredItemRewriter, TransformerBuilder,
};
use crossgrade_protocol_core::{ConnectionState, FieldType, Item, PacketEnvelope, ProtocolResult};
use crossgrade_types::{V1_20_5, V1_21};
use std::sync::Arc;
use tracing::warn;

// Clientbound play
const SET_CONTAINER_CONTENT: i32 = 0x13;
const SET_SLOT: i32 = 0x15;
const LOGIN: i32 = 0x2B;

// Serverbound play
const CLICK_CONTAINER: i32 = 0x0E;
const SET_CREATIVE_SLOT: i32 = 0x32;

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, mut data) = pair_mappings(MappingData::new(), data, options)?;
    let mappings = Arc::new(mappings);

    let builder = ProtocolTransformer::builder("1.21->1.20.5", V1_21, V1_20_5)
        .mappings(mappings.clone())
        .on_connection_init(|storage, _| {
            storage.get_or_insert_with(EntityTracker::default);
        })
        .register_clientbound(
            ConnectionState::Play,
            LOGIN,
            LOGIN,
            FieldChain::new().map(FieldType::Int).handler(|env, ctx| {
                let entity_id: i32 = env.get(&FieldType::Int, 0)?;
                ctx.storage.require_mut::<EntityTracker>()?.on_join(entity_id);
                Ok(())
            }),
        );

    let builder = match data.as_mut().and_then(PairData::layouts) {
        Some((client, server)) => {
            let items = StructuredItemRewriter::new(Some(mappings), client, server)
                .with_component_rewriter(Arc::new(JsonToTagComponents));
            register_items(builder, Arc::new(items))
        }
        None => {
            warn!("No component layouts for 1.20.5 -> 1.21; items pass through unchanged");
            builder
        }
    };

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn register_items(builder: TransformerBuilder, items: Arc<StructuredItemRewriter>) -> TransformerBuilder {
    builder
        .register_clientbound(
            ConnectionState::Play,
            SET_CONTAINER_CONTENT,
            SET_CONTAINER_CONTENT,
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .map(FieldType::VarInt)
                .transform(items.server_items(), items.client_items(), {
                    let items = items.clone();
                    move |mut list: Vec<Item>| {
                        list.iter_mut().for_each(|item| items.to_client(item));
                        Ok(list)
                    }
                })
                .transform(items.server_item(), items.client_item(), item_to_client(&items)),
        )
        .register_clientbound(
            ConnectionState::Play,
            SET_SLOT,
            SET_SLOT,
            FieldChain::new()
                .map(FieldType::Byte)
                .map(FieldType::VarInt)
                .map(FieldType::Short)
                .transform(items.server_item(), items.client_item(), item_to_client(&items)),
        )
        .register_serverbound(ConnectionState::Play, CLICK_CONTAINER, CLICK_CONTAINER, {
            let items = items.clone();
            FieldChain::new()
                .map(FieldType::UnsignedByte)
                .map(FieldType::VarInt)
                .map(FieldType::Short)
                .map(FieldType::Byte)
                .map(FieldType::VarInt)
                .handler(move |env, _| {
                    let changed: i32 = env.passthrough(&FieldType::VarInt)?;
                    for _ in 0..changed {
                        env.passthrough::<i16>(&FieldType::Short)?;
                        item_to_server_field(env, &items)?;
                    }
                    item_to_server_field(env, &items)
                })
        })
        .register_serverbound(
            ConnectionState::Play,
            SET_CREATIVE_SLOT,
            SET_CREATIVE_SLOT,
            FieldChain::new().map(FieldType::Short).transform(
                items.client_item(),
                items.server_item(),
                {
                    let items = items.clone();
                    move |mut item: Item| {
                        items.to_server(&mut item);
                        Ok(item)
                    }
                },
            ),
        )
}

fn item_to_client(items: &Arc<StructuredItemRewriter>) -> impl Fn(Item) -> ProtocolResult<Item> + Send + Sync + 'static {
    let items = items.clone();
    move |mut item| {
        items.to_client(&mut item);
        Ok(item)
    }
}

fn item_to_server_field(env: &mut PacketEnvelope, items: &StructuredItemRewriter) -> ProtocolResult<()> {
    let mut item: Item = env.read(&items.client_item())?;
    items.to_server(&mut item);
    env.write(items.server_item(), item);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use bytes::BytesMut;
    use crossgrade_nbt::NbtValue;
    use crossgrade_pipeline::rewriter::CUSTOM_DATA_MARKER;
    use crossgrade_protocol_core::{
        read_i16, read_i32, read_item, read_u8, read_varint, write_i16, write_i32, write_i8, write_item,
        write_item_array, write_u8, write_varint, ComponentKind, ComponentLayout, DataValue, Direction,
    };

    fn server_layout() -> ComponentLayout {
        ComponentLayout::from_pairs([
            ("custom_data", ComponentKind::Nbt),
            ("max_stack_size", ComponentKind::VarInt),
            ("custom_name", ComponentKind::TextComponent),
        ])
    }

    // 1.21 inserted a component ahead of custom_name.
    fn client_layout() -> ComponentLayout {
        ComponentLayout::from_pairs([
            ("custom_data", ComponentKind::Nbt),
            ("max_stack_size", ComponentKind::VarInt),
            ("jukebox_playable", ComponentKind::Unit),
            ("custom_name", ComponentKind::TextComponent),
        ])
    }

    fn harness() -> Harness {
        let data = PairData {
            client_components: Some(client_layout()),
            server_components: Some(server_layout()),
            ids: crossgrade_mappings::MappingFile {
                items: Some(vec![(10, 11)]),
                data_components: Some(vec![(0, 0), (1, 1), (2, 3)]),
                ..Default::default()
            },
            ..Default::default()
        };
        Harness::new(transformer(Some(data), &ProtocolOptions::default()).unwrap())
    }

    fn named_item(id: i32, component: i32, name: &str) -> Item {
        let mut item = Item::new(id, 1);
        item.data.set(component, DataValue::Text(NbtValue::String(name.into())));
        item
    }

    #[test]
    fn test_login_tracks_player() {
        let mut h = Harness::new(transformer(None, &ProtocolOptions::default()).unwrap());
        let mut buf = BytesMut::new();
        write_i32(&mut buf, 77);
        buf.extend_from_slice(&[0, 1, 2]);
        let mut out = h.single(Direction::Clientbound, LOGIN, buf);
        assert_eq!(read_i32(&mut out).unwrap(), 77);
        assert_eq!(out.to_vec(), vec![0, 1, 2]);
        assert_eq!(h.storage.get::<EntityTracker>().unwrap().client_entity_id(), Some(77));
    }

    #[test]
    fn test_items_pass_through_without_layouts() {
        let mut h = Harness::new(transformer(None, &ProtocolOptions::default()).unwrap());
        let mut buf = BytesMut::new();
        write_i8(&mut buf, 0);
        write_varint(&mut buf, 1);
        write_i16(&mut buf, 0);
        write_varint(&mut buf, 0);
        let expected = buf.clone();
        assert_eq!(h.single(Direction::Clientbound, SET_SLOT, buf), expected);
    }

    #[test]
    fn test_set_slot_remaps_ids_and_components() {
        let mut h = harness();
        let mut buf = BytesMut::new();
        write_i8(&mut buf, 0);
        write_varint(&mut buf, 4);
        write_i16(&mut buf, 36);
        write_item(&mut buf, &named_item(10, 2, r#"{"text":"Relic"}"#));

        let mut out = h.single(Direction::Clientbound, SET_SLOT, buf);
        out.split_to(1);
        assert_eq!(read_varint(&mut out).unwrap(), 4);
        assert_eq!(read_i16(&mut out).unwrap(), 36);
        let item = read_item(&mut out, &client_layout()).unwrap();
        assert_eq!(item.id, 11);
        let Some(DataValue::Text(name)) = item.data.get(3) else {
            panic!("custom name not at its 1.21 id");
        };
        assert_eq!(name.get("text"), Some(&NbtValue::String("Relic".into())));
        assert!(out.is_empty());
    }

    #[test]
    fn test_container_content_and_carried() {
        let mut h = harness();
        let mut buf = BytesMut::new();
        write_u8(&mut buf, 1);
        write_varint(&mut buf, 9);
        write_item_array(&mut buf, &[Item::new(10, 2), Item::empty()]);
        write_item(&mut buf, &Item::new(10, 1));

        let mut out = h.single(Direction::Clientbound, SET_CONTAINER_CONTENT, buf);
        assert_eq!(read_u8(&mut out).unwrap(), 1);
        assert_eq!(read_varint(&mut out).unwrap(), 9);
        assert_eq!(read_varint(&mut out).unwrap(), 2);
        assert_eq!(read_item(&mut out, &client_layout()).unwrap().id, 11);
        assert!(read_item(&mut out, &client_layout()).unwrap().is_empty());
        assert_eq!(read_item(&mut out, &client_layout()).unwrap().id, 11);
        assert!(out.is_empty());
    }

    #[test]
    fn test_creative_slot_returns_server_item() {
        let mut h = harness();
        let mut buf = BytesMut::new();
        write_i8(&mut buf, 0);
        write_varint(&mut buf, 0);
        write_i16(&mut buf, 5);
        write_item(&mut buf, &named_item(10, 2, r#"{"text":"Relic"}"#));
        let mut out = h.single(Direction::Clientbound, SET_SLOT, buf);
        out.split_to(1 + 1 + 2);
        let client_item = read_item(&mut out, &client_layout()).unwrap();

        let mut buf = BytesMut::new();
        write_i16(&mut buf, 5);
        write_item(&mut buf, &client_item);
        let mut out = h.single(Direction::Serverbound, SET_CREATIVE_SLOT, buf);
        assert_eq!(read_i16(&mut out).unwrap(), 5);
        let item = read_item(&mut out, &server_layout()).unwrap();
        assert_eq!(item, named_item(10, 2, r#"{"text":"Relic"}"#));
        assert!(!item.data.contains(0), "{CUSTOM_DATA_MARKER} left behind");
    }

    #[test]
    fn test_click_container_rewrites_every_item() {
        let mut h = harness();
        let mut buf = BytesMut::new();
        write_u8(&mut buf, 1);
        write_varint(&mut buf, 3);
        write_i16(&mut buf, 4);
        write_i8(&mut buf, 0);
        write_varint(&mut buf, 0);
        write_varint(&mut buf, 2);
        for slot in [4i16, 5] {
            write_i16(&mut buf, slot);
            write_item(&mut buf, &Item::new(11, 1));
        }
        write_item(&mut buf, &Item::empty());

        let mut out = h.single(Direction::Serverbound, CLICK_CONTAINER, buf);
        out.split_to(1 + 1 + 2 + 1 + 1);
        assert_eq!(read_varint(&mut out).unwrap(), 2);
        for slot in [4, 5] {
            assert_eq!(read_i16(&mut out).unwrap(), slot);
            assert_eq!(read_item(&mut out, &server_layout()).unwrap().id, 10);
        }
        assert!(read_item(&mut out, &server_layout()).unwrap().is_empty());
        assert!(out.is_empty());
    }
}
