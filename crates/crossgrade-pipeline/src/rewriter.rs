//! Item rewriting shared by the version pairs.
//!
//! Clientbound rewrites that lose information keep the original value in the
//! item's custom data so the serverbound pass can put it back. The server
//! therefore never sees a value it did not send.

use crossgrade_mappings::{MappingCategory, MappingData};
use crossgrade_nbt::{nbt_compound, NbtValue};
use crossgrade_protocol_core::component::{json_str_to_tag, legacy_to_json};
use crossgrade_protocol_core::{ComponentLayout, DataContainer, DataValue, FieldType, FlatItem, Holder, Item};
use std::sync::Arc;

/// Marks custom data that only exists to hold backups.
pub const CUSTOM_DATA_MARKER: &str = "crossgrade|custom_data";
/// Set when the proxy gave an item a custom name the server never sent.
pub const ADDED_CUSTOM_NAME: &str = "crossgrade|added_custom_name";
/// Backup of legacy lore inside a flat item's display compound.
pub const LEGACY_LORE_BACKUP: &str = "crossgrade|Lore";

fn backup_key(name: &str) -> String {
    format!("crossgrade|{name}")
}

/// Rewrites text components found in items.
pub trait ComponentRewriter: Send + Sync {
    fn process_tag(&self, tag: &mut NbtValue);
}

/// Turns text components that are still JSON strings into their NBT form.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonToTagComponents;

impl ComponentRewriter for JsonToTagComponents {
    fn process_tag(&self, tag: &mut NbtValue) {
        let NbtValue::String(text) = tag else {
            return;
        };
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let converted = json_str_to_tag(text);
            *tag = converted;
        }
    }
}

/// Ids of the components the rewriter touches in one layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentKeys {
    pub custom_data: Option<i32>,
    pub custom_name: Option<i32>,
    pub item_name: Option<i32>,
    pub lore: Option<i32>,
    pub written_book_content: Option<i32>,
}

impl ComponentKeys {
    pub fn from_layout(layout: &ComponentLayout) -> Self {
        Self {
            custom_data: layout.id_of("custom_data"),
            custom_name: layout.id_of("custom_name"),
            item_name: layout.id_of("item_name"),
            lore: layout.id_of("lore"),
            written_book_content: layout.id_of("written_book_content"),
        }
    }
}

/// Rewriter for component-based (1.20.5+) items.
pub struct StructuredItemRewriter {
    mappings: Option<Arc<MappingData>>,
    client_layout: Arc<ComponentLayout>,
    server_layout: Arc<ComponentLayout>,
    client_keys: ComponentKeys,
    server_keys: ComponentKeys,
    component_rewriter: Option<Arc<dyn ComponentRewriter>>,
}

impl StructuredItemRewriter {
    pub fn new(
        mappings: Option<Arc<MappingData>>,
        client_layout: Arc<ComponentLayout>,
        server_layout: Arc<ComponentLayout>,
    ) -> Self {
        Self {
            mappings,
            client_keys: ComponentKeys::from_layout(&client_layout),
            server_keys: ComponentKeys::from_layout(&server_layout),
            client_layout,
            server_layout,
            component_rewriter: None,
        }
    }

    pub fn with_component_rewriter(mut self, rewriter: Arc<dyn ComponentRewriter>) -> Self {
        self.component_rewriter = Some(rewriter);
        self
    }

    pub fn client_item(&self) -> FieldType {
        FieldType::Item(self.client_layout.clone())
    }

    pub fn server_item(&self) -> FieldType {
        FieldType::Item(self.server_layout.clone())
    }

    pub fn client_items(&self) -> FieldType {
        FieldType::ItemArray(self.client_layout.clone())
    }

    pub fn server_items(&self) -> FieldType {
        FieldType::ItemArray(self.server_layout.clone())
    }

    pub fn to_client(&self, item: &mut Item) {
        if item.is_empty() {
            return;
        }
        if let Some(mappings) = &self.mappings {
            item.id = mappings.new_id(MappingCategory::Items, item.id);
            item.data
                .remap_ids(|id| mappings.new_id(MappingCategory::DataComponents, id));
        }

        if let Some(rewriter) = &self.component_rewriter {
            let keys = self.client_keys;
            self.rewrite_text(&mut item.data, rewriter.as_ref(), keys.item_name, "item_name");
            self.rewrite_text(&mut item.data, rewriter.as_ref(), keys.custom_name, "custom_name");
            self.rewrite_lore(&mut item.data, rewriter.as_ref());
            self.rewrite_book(&mut item.data, rewriter.as_ref());
        }

        for (_, value) in item.data.iter_mut() {
            for_each_nested(value, &mut |nested| self.to_client(nested));
        }
    }

    pub fn to_server(&self, item: &mut Item) {
        if item.is_empty() {
            return;
        }
        if let Some(mappings) = &self.mappings {
            item.id = mappings.old_id(MappingCategory::Items, item.id);
            item.data
                .remap_ids(|id| mappings.old_id(MappingCategory::DataComponents, id));
        }

        for (_, value) in item.data.iter_mut() {
            for_each_nested(value, &mut |nested| self.to_server(nested));
        }

        self.restore_text(&mut item.data);
    }

    /// Give a client-side item a name the server does not know about. It is
    /// removed again on the way back.
    pub fn add_custom_name(&self, item: &mut Item, name: NbtValue) {
        let (Some(name_id), Some(_)) = (self.client_keys.custom_name, self.client_keys.custom_data) else {
            return;
        };
        if item.data.contains(name_id) {
            return;
        }
        item.data.set(name_id, DataValue::Text(name));
        if let Some(custom) = self.backup_store(&mut item.data) {
            custom.insert(ADDED_CUSTOM_NAME, NbtValue::Byte(1));
        }
    }

    fn rewrite_text(
        &self,
        data: &mut DataContainer,
        rewriter: &dyn ComponentRewriter,
        id: Option<i32>,
        name: &str,
    ) {
        let Some(DataValue::Text(tag)) = id.and_then(|id| data.get_mut(id)) else {
            return;
        };
        let original = tag.clone();
        rewriter.process_tag(tag);
        if *tag != original {
            self.save_backup(data, name, original);
        }
    }

    fn rewrite_lore(&self, data: &mut DataContainer, rewriter: &dyn ComponentRewriter) {
        let Some(DataValue::TextList(lines)) = self.client_keys.lore.and_then(|id| data.get_mut(id)) else {
            return;
        };
        let original = lines.clone();
        lines.iter_mut().for_each(|line| rewriter.process_tag(line));
        if *lines != original {
            self.save_backup(data, "lore", NbtValue::list(original));
        }
    }

    fn rewrite_book(&self, data: &mut DataContainer, rewriter: &dyn ComponentRewriter) {
        let Some(DataValue::WrittenBook(book)) =
            self.client_keys.written_book_content.and_then(|id| data.get_mut(id))
        else {
            return;
        };
        for page in &mut book.pages {
            rewriter.process_tag(&mut page.raw);
            if let Some(filtered) = &mut page.filtered {
                rewriter.process_tag(filtered);
            }
        }
    }

    /// The custom data compound, created with the marker if the item had none.
    fn backup_store<'a>(&self, data: &'a mut DataContainer) -> Option<&'a mut NbtValue> {
        let id = self.client_keys.custom_data?;
        if !data.contains(id) {
            data.set(
                id,
                DataValue::Nbt(nbt_compound! { CUSTOM_DATA_MARKER => NbtValue::Byte(1) }),
            );
        }
        match data.get_mut(id) {
            Some(DataValue::Nbt(custom @ NbtValue::Compound(_))) => Some(custom),
            _ => None,
        }
    }

    /// Keep the first original seen; later rewrites never overwrite it.
    fn save_backup(&self, data: &mut DataContainer, name: &str, original: NbtValue) {
        let key = backup_key(name);
        if let Some(custom) = self.backup_store(data) {
            if !custom.contains_key(&key) {
                custom.insert(key, original);
            }
        }
    }

    fn restore_text(&self, data: &mut DataContainer) {
        let keys = self.server_keys;
        let Some(custom_id) = keys.custom_data else {
            return;
        };
        let Some(DataValue::Nbt(custom)) = data.get_mut(custom_id) else {
            return;
        };

        let mut restored = Vec::new();
        let added_name = custom.remove(ADDED_CUSTOM_NAME).is_some();
        for (name, id) in [
            ("custom_name", keys.custom_name),
            ("item_name", keys.item_name),
            ("lore", keys.lore),
        ] {
            if let Some(original) = custom.remove(&backup_key(name)) {
                // A name the proxy added has no original to put back.
                if !(added_name && name == "custom_name") {
                    restored.push((id, name, original));
                }
            }
        }
        if !added_name && restored.is_empty() {
            return;
        }
        let marker_only = custom.len() == 1 && custom.contains_key(CUSTOM_DATA_MARKER);

        if added_name {
            if let Some(id) = keys.custom_name {
                data.remove(id);
            }
        }
        for (id, name, original) in restored {
            let Some(id) = id else {
                continue;
            };
            let value = match (name, original) {
                ("lore", NbtValue::List(list)) => DataValue::TextList(list.items),
                ("lore", _) => continue,
                (_, tag) => DataValue::Text(tag),
            };
            data.set(id, value);
        }
        if marker_only {
            data.remove(custom_id);
        }
    }
}

fn for_each_nested(value: &mut DataValue, f: &mut dyn FnMut(&mut Item)) {
    match value {
        DataValue::Item(item) => f(&mut **item),
        DataValue::Items(items) => items.iter_mut().for_each(|item| f(item)),
        DataValue::Holder(Holder::Direct(inner)) => for_each_nested(inner, f),
        _ => {}
    }
}

/// Rewriter for pre-component items with an optional NBT tag.
#[derive(Debug, Clone, Default)]
pub struct FlatItemRewriter {
    mappings: Option<Arc<MappingData>>,
    convert_lore: bool,
}

impl FlatItemRewriter {
    pub fn new(mappings: Option<Arc<MappingData>>) -> Self {
        Self {
            mappings,
            convert_lore: false,
        }
    }

    /// Convert legacy `§`-formatted lore lines to JSON text clientbound.
    pub fn with_lore_conversion(mut self) -> Self {
        self.convert_lore = true;
        self
    }

    pub fn to_client(&self, item: &mut FlatItem) {
        if let Some(mappings) = &self.mappings {
            item.id = mappings.new_id(MappingCategory::Items, item.id);
        }
        if !self.convert_lore {
            return;
        }
        let Some(display) = item.tag.as_mut().and_then(|tag| tag.get_mut("display")) else {
            return;
        };
        let Some(NbtValue::List(lore)) = display.get_mut("Lore") else {
            return;
        };
        let original = lore.clone();
        for line in &mut lore.items {
            if let NbtValue::String(text) = line {
                *text = legacy_to_json(text);
            }
        }
        if !display.contains_key(LEGACY_LORE_BACKUP) {
            display.insert(LEGACY_LORE_BACKUP, NbtValue::List(original));
        }
    }

    pub fn to_server(&self, item: &mut FlatItem) {
        if let Some(mappings) = &self.mappings {
            item.id = mappings.old_id(MappingCategory::Items, item.id);
        }
        let Some(display) = item.tag.as_mut().and_then(|tag| tag.get_mut("display")) else {
            return;
        };
        if let Some(original) = display.remove(LEGACY_LORE_BACKUP) {
            display.insert("Lore", original);
        }
    }

    pub fn slot_to_client(&self, slot: &mut Option<FlatItem>) {
        if let Some(item) = slot {
            self.to_client(item);
        }
    }

    pub fn slot_to_server(&self, slot: &mut Option<FlatItem>) {
        if let Some(item) = slot {
            self.to_server(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use crossgrade_mappings::IdMapping;
    use crossgrade_nbt::nbt_list;
    use crossgrade_protocol_core::{read_item, write_item, ComponentKind, Filterable, WrittenBook};

    fn layout() -> Arc<ComponentLayout> {
        Arc::new(ComponentLayout::from_pairs([
            ("custom_data", ComponentKind::Nbt),
            ("max_stack_size", ComponentKind::VarInt),
            ("custom_name", ComponentKind::TextComponent),
            ("item_name", ComponentKind::TextComponent),
            ("lore", ComponentKind::TextComponents),
            ("container", ComponentKind::Items),
            ("written_book_content", ComponentKind::WrittenBook),
        ]))
    }

    fn rewriter() -> StructuredItemRewriter {
        let items = IdMapping::from_pairs("items", [(113, 118), (1, 2)]).unwrap();
        let mappings = Arc::new(MappingData::new().with(MappingCategory::Items, items));
        StructuredItemRewriter::new(Some(mappings), layout(), layout())
            .with_component_rewriter(Arc::new(JsonToTagComponents))
    }

    fn encode(item: &Item) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_item(&mut buf, item);
        buf.to_vec()
    }

    fn json_name() -> NbtValue {
        NbtValue::String(r#"{"text":"Sword"}"#.into())
    }

    #[test]
    fn test_rewrite_is_reversible_without_residue() {
        let rw = rewriter();
        let mut item = Item::new(113, 1);
        item.data.set(1, DataValue::VarInt(16));
        item.data.set(2, DataValue::Text(json_name()));
        let original = encode(&item);

        rw.to_client(&mut item);
        assert_eq!(item.id, 118);
        assert_eq!(
            item.data.get(2),
            Some(&DataValue::Text(nbt_compound! { "text" => NbtValue::String("Sword".into()) }))
        );
        let Some(DataValue::Nbt(custom)) = item.data.get(0) else {
            panic!("custom data missing");
        };
        assert_eq!(custom.get(CUSTOM_DATA_MARKER), Some(&NbtValue::Byte(1)));
        assert_eq!(custom.get("crossgrade|custom_name"), Some(&json_name()));

        // The client echoes the item back, e.g. from the creative inventory.
        let mut buf = BytesMut::from(&encode(&item)[..]);
        let mut echoed = read_item(&mut buf, &layout()).unwrap();
        rw.to_server(&mut echoed);
        assert_eq!(encode(&echoed), original);
        assert!(!echoed.data.contains(0));
    }

    #[test]
    fn test_existing_custom_data_keeps_its_entries() {
        let rw = rewriter();
        let mut item = Item::new(1, 3);
        item.data.set(0, DataValue::Nbt(nbt_compound! { "plugin" => NbtValue::Int(7) }));
        item.data.set(4, DataValue::TextList(vec![NbtValue::String(r#"["a"]"#.into())]));
        let original = item.clone();

        rw.to_client(&mut item);
        let Some(DataValue::Nbt(custom)) = item.data.get(0) else {
            panic!("custom data missing");
        };
        assert!(!custom.contains_key(CUSTOM_DATA_MARKER));
        assert!(custom.contains_key("crossgrade|lore"));

        rw.to_server(&mut item);
        assert_eq!(item, original);
    }

    #[test]
    fn test_backup_not_overwritten() {
        let rw = StructuredItemRewriter::new(None, layout(), layout())
            .with_component_rewriter(Arc::new(JsonToTagComponents));
        let mut item = Item::new(1, 1);
        item.data.set(2, DataValue::Text(json_name()));
        rw.to_client(&mut item);
        // A second pass sees the converted name and must keep the first backup.
        item.data.set(2, DataValue::Text(NbtValue::String(r#"{"text":"Other"}"#.into())));
        rw.to_client(&mut item);
        let Some(DataValue::Nbt(custom)) = item.data.get(0) else {
            panic!("custom data missing");
        };
        assert_eq!(custom.get("crossgrade|custom_name"), Some(&json_name()));
    }

    #[test]
    fn test_added_custom_name_removed_serverbound() {
        let rw = StructuredItemRewriter::new(None, layout(), layout());
        let mut item = Item::new(5, 1);
        item.data.set(1, DataValue::VarInt(1));
        let original = item.clone();

        rw.add_custom_name(&mut item, NbtValue::String("Preview".into()));
        assert!(item.data.contains(2));
        rw.to_server(&mut item);
        assert_eq!(item, original);
    }

    #[test]
    fn test_lore_restored_alongside_added_custom_name() {
        let rw = rewriter();
        let mut item = Item::new(1, 1);
        item.data.set(4, DataValue::TextList(vec![NbtValue::String(r#"{"text":"Old"}"#.into())]));
        let original = item.clone();

        rw.to_client(&mut item);
        rw.add_custom_name(&mut item, NbtValue::String("Preview".into()));
        let Some(DataValue::Nbt(custom)) = item.data.get(0) else {
            panic!("custom data missing");
        };
        assert!(custom.contains_key("crossgrade|lore"));
        assert!(custom.contains_key(ADDED_CUSTOM_NAME));

        rw.to_server(&mut item);
        assert_eq!(item, original);
        assert!(!item.data.contains(0));
    }

    #[test]
    fn test_nested_items_and_book_pages() {
        let rw = rewriter();
        let mut inner = Item::new(113, 1);
        inner.data.set(2, DataValue::Text(json_name()));
        let mut outer = Item::new(1, 1);
        outer.data.set(5, DataValue::Items(vec![inner.clone(), Item::empty()]));
        outer.data.set(
            6,
            DataValue::WrittenBook(Box::new(WrittenBook {
                title: Filterable { raw: "t".into(), filtered: None },
                author: "a".into(),
                generation: 0,
                pages: vec![Filterable {
                    raw: NbtValue::String(r#"{"text":"p1"}"#.into()),
                    filtered: Some(NbtValue::String("plain".into())),
                }],
                resolved: true,
            })),
        );

        rw.to_client(&mut outer);
        let Some(DataValue::Items(items)) = outer.data.get(5) else {
            panic!("container missing");
        };
        assert_eq!(items[0].id, 118);
        assert!(items[0].data.contains(0));
        assert!(items[1].is_empty());
        let Some(DataValue::WrittenBook(book)) = outer.data.get(6) else {
            panic!("book missing");
        };
        assert_eq!(book.pages[0].raw.get("text"), Some(&NbtValue::String("p1".into())));
        assert_eq!(book.pages[0].filtered, Some(NbtValue::String("plain".into())));

        rw.to_server(&mut outer);
        let Some(DataValue::Items(items)) = outer.data.get(5) else {
            panic!("container missing");
        };
        assert_eq!(items[0], inner);
    }

    #[test]
    fn test_flat_lore_conversion_roundtrip() {
        let items = IdMapping::from_pairs("items", [(10, 20)]).unwrap();
        let mappings = Arc::new(MappingData::new().with(MappingCategory::Items, items));
        let rw = FlatItemRewriter::new(Some(mappings)).with_lore_conversion();

        let mut item = FlatItem::new(10, 1);
        item.tag = Some(nbt_compound! {
            "display" => nbt_compound! {
                "Lore" => nbt_list![NbtValue::String("\u{a7}cHot".into())],
            },
        });
        let original = item.clone();

        rw.to_client(&mut item);
        assert_eq!(item.id, 20);
        let display = item.tag.as_ref().unwrap().get("display").unwrap();
        let NbtValue::List(lore) = display.get("Lore").unwrap() else {
            panic!("lore missing");
        };
        assert_eq!(
            lore.items[0],
            NbtValue::String(r#"{"text":"","extra":[{"text":"Hot","color":"red"}]}"#.into())
        );

        rw.to_server(&mut item);
        assert_eq!(item, original);
    }

    #[test]
    fn test_flat_without_tag() {
        let rw = FlatItemRewriter::new(None).with_lore_conversion();
        let mut slot = Some(FlatItem::new(3, 2));
        rw.slot_to_client(&mut slot);
        rw.slot_to_server(&mut slot);
        assert_eq!(slot, Some(FlatItem::new(3, 2)));
        let mut empty = None;
        rw.slot_to_client(&mut empty);
        assert!(empty.is_none());
    }
}
