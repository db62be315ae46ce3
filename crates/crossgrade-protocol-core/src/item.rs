use crate::codec::*;
use bytes::BytesMut;
use crossgrade_nbt::NbtValue;
use serde::Deserialize;
use std::collections::HashMap;

/// Maximum nesting of items inside item components (bundles, containers).
pub const MAX_ITEM_DEPTH: usize = 64;

/// A pre-1.20.5 item stack: numeric id, count and an optional NBT tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatItem {
    pub id: i32,
    pub count: i8,
    pub tag: Option<NbtValue>,
}

impl FlatItem {
    pub fn new(id: i32, count: i8) -> Self {
        Self {
            id,
            count,
            tag: None,
        }
    }
}

/// 1.13 - 1.13.1 slot: short id (-1 = empty), byte count, named NBT.
pub fn read_flat_item(buf: &mut BytesMut) -> CodecResult<Option<FlatItem>> {
    let id = read_i16(buf)?;
    if id < 0 {
        return Ok(None);
    }
    let count = read_i8(buf)?;
    let tag = read_named_nbt(buf)?;
    Ok(Some(FlatItem {
        id: id as i32,
        count,
        tag,
    }))
}

/// Fails for ids a short cannot carry instead of wrapping them.
pub fn write_flat_item(buf: &mut BytesMut, item: Option<&FlatItem>) -> CodecResult<()> {
    match item {
        None => write_i16(buf, -1),
        Some(item) => {
            let id = i16::try_from(item.id)
                .ok()
                .filter(|id| *id >= 0)
                .ok_or(CodecError::ItemIdOutOfRange(item.id))?;
            write_i16(buf, id);
            write_i8(buf, item.count);
            write_named_nbt(buf, item.tag.as_ref());
        }
    }
    Ok(())
}

/// 1.13.2 - 1.20.4 slot: present flag, VarInt id, byte count, named NBT.
pub fn read_flat_varint_item(buf: &mut BytesMut) -> CodecResult<Option<FlatItem>> {
    if !read_bool(buf)? {
        return Ok(None);
    }
    let id = read_varint(buf)?;
    let count = read_i8(buf)?;
    let tag = read_named_nbt(buf)?;
    Ok(Some(FlatItem { id, count, tag }))
}

pub fn write_flat_varint_item(buf: &mut BytesMut, item: Option<&FlatItem>) {
    match item {
        None => write_bool(buf, false),
        Some(item) => {
            write_bool(buf, true);
            write_varint(buf, item.id);
            write_i8(buf, item.count);
            write_named_nbt(buf, item.tag.as_ref());
        }
    }
}

/// A 1.20.5+ item stack with data components.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i32,
    pub count: i32,
    pub data: DataContainer,
}

impl Item {
    pub fn new(id: i32, count: i32) -> Self {
        Self {
            id,
            count,
            data: DataContainer::default(),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.count <= 0
    }
}

/// Component patch of an item, keyed by numeric component id.
/// Added components keep their wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContainer {
    added: Vec<(i32, DataValue)>,
    removed: Vec<i32>,
}

impl DataContainer {
    pub fn get(&self, id: i32) -> Option<&DataValue> {
        self.added.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut DataValue> {
        self.added
            .iter_mut()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.get(id).is_some()
    }

    /// Set a component, replacing an existing value in place.
    pub fn set(&mut self, id: i32, value: DataValue) {
        match self.get_mut(id) {
            Some(slot) => *slot = value,
            None => self.added.push((id, value)),
        }
    }

    pub fn remove(&mut self, id: i32) -> Option<DataValue> {
        let index = self.added.iter().position(|(k, _)| *k == id)?;
        Some(self.added.remove(index).1)
    }

    /// Mark a prototype component as removed by this patch.
    pub fn mark_removed(&mut self, id: i32) {
        if !self.removed.contains(&id) {
            self.removed.push(id);
        }
    }

    pub fn removed(&self) -> &[i32] {
        &self.removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &(i32, DataValue)> {
        self.added.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (i32, DataValue)> {
        self.added.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Rewrite every component id, both added and removed.
    pub fn remap_ids(&mut self, mut f: impl FnMut(i32) -> i32) {
        for (id, _) in &mut self.added {
            *id = f(*id);
        }
        for id in &mut self.removed {
            *id = f(*id);
        }
    }
}

/// A value that may carry a filtered alternative (chat filtering).
#[derive(Debug, Clone, PartialEq)]
pub struct Filterable<T> {
    pub raw: T,
    pub filtered: Option<T>,
}

/// A registry reference or an inline value.
#[derive(Debug, Clone, PartialEq)]
pub enum Holder<T> {
    Reference(i32),
    Direct(T),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenBook {
    pub title: Filterable<String>,
    pub author: String,
    pub generation: i32,
    pub pages: Vec<Filterable<NbtValue>>,
    pub resolved: bool,
}

/// A decoded component value. Each variant carries enough to re-encode
/// itself without the layout it was read with.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Unit,
    Bool(bool),
    VarInt(i32),
    Nbt(NbtValue),
    Text(NbtValue),
    TextList(Vec<NbtValue>),
    Item(Box<Item>),
    Items(Vec<Item>),
    WrittenBook(Box<WrittenBook>),
    Holder(Holder<Box<DataValue>>),
}

/// How a component's payload is laid out on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Unit,
    Bool,
    VarInt,
    Nbt,
    TextComponent,
    TextComponents,
    Item,
    Items,
    WrittenBook,
    Holder(Box<ComponentKind>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub kind: ComponentKind,
}

/// The data component registry of one protocol version. Ids are positions
/// in the list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Vec<ComponentSpec>")]
pub struct ComponentLayout {
    specs: Vec<ComponentSpec>,
    by_name: HashMap<String, i32>,
}

impl From<Vec<ComponentSpec>> for ComponentLayout {
    fn from(specs: Vec<ComponentSpec>) -> Self {
        let by_name = specs
            .iter()
            .enumerate()
            .map(|(id, spec)| (namespaced(&spec.name), id as i32))
            .collect();
        Self { specs, by_name }
    }
}

fn namespaced(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("minecraft:{name}")
    }
}

impl ComponentLayout {
    pub fn new(specs: Vec<ComponentSpec>) -> Self {
        specs.into()
    }

    /// Build a layout from `(name, kind)` pairs in registry order.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, ComponentKind)>) -> Self {
        pairs
            .into_iter()
            .map(|(name, kind)| ComponentSpec {
                name: name.to_string(),
                kind,
            })
            .collect::<Vec<_>>()
            .into()
    }

    pub fn get(&self, id: i32) -> Option<&ComponentSpec> {
        usize::try_from(id).ok().and_then(|i| self.specs.get(i))
    }

    pub fn kind(&self, id: i32) -> Option<&ComponentKind> {
        self.get(id).map(|spec| &spec.kind)
    }

    /// Numeric id of a component; `custom_name` and `minecraft:custom_name` are equivalent.
    pub fn id_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(&namespaced(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

pub fn read_item(buf: &mut BytesMut, layout: &ComponentLayout) -> CodecResult<Item> {
    read_item_at(buf, layout, 0)
}

fn read_item_at(buf: &mut BytesMut, layout: &ComponentLayout, depth: usize) -> CodecResult<Item> {
    if depth > MAX_ITEM_DEPTH {
        return Err(CodecError::NestingTooDeep(MAX_ITEM_DEPTH));
    }
    let count = read_varint(buf)?;
    if count <= 0 {
        return Ok(Item::empty());
    }
    let id = read_varint(buf)?;
    let added = read_length(buf, 1)?;
    let removed = read_length(buf, 0)?;

    let mut data = DataContainer::default();
    for _ in 0..added {
        let component = read_varint(buf)?;
        let kind = layout
            .kind(component)
            .ok_or(CodecError::UnknownComponent(component))?;
        let value = read_data_value(buf, kind, layout, depth)?;
        data.added.push((component, value));
    }
    for _ in 0..removed {
        data.removed.push(read_varint(buf)?);
    }
    Ok(Item { id, count, data })
}

pub fn write_item(buf: &mut BytesMut, item: &Item) {
    if item.is_empty() {
        write_varint(buf, 0);
        return;
    }
    write_varint(buf, item.count);
    write_varint(buf, item.id);
    write_varint(buf, item.data.added.len() as i32);
    write_varint(buf, item.data.removed.len() as i32);
    for (component, value) in &item.data.added {
        write_varint(buf, *component);
        value.write(buf);
    }
    for component in &item.data.removed {
        write_varint(buf, *component);
    }
}

pub fn read_item_array(buf: &mut BytesMut, layout: &ComponentLayout) -> CodecResult<Vec<Item>> {
    let len = read_length(buf, 1)?;
    (0..len).map(|_| read_item(buf, layout)).collect()
}

pub fn write_item_array(buf: &mut BytesMut, items: &[Item]) {
    write_varint(buf, items.len() as i32);
    for item in items {
        write_item(buf, item);
    }
}

fn read_data_value(
    buf: &mut BytesMut,
    kind: &ComponentKind,
    layout: &ComponentLayout,
    depth: usize,
) -> CodecResult<DataValue> {
    Ok(match kind {
        ComponentKind::Unit => DataValue::Unit,
        ComponentKind::Bool => DataValue::Bool(read_bool(buf)?),
        ComponentKind::VarInt => DataValue::VarInt(read_varint(buf)?),
        ComponentKind::Nbt => DataValue::Nbt(read_required_nbt(buf)?),
        ComponentKind::TextComponent => DataValue::Text(read_required_nbt(buf)?),
        ComponentKind::TextComponents => {
            let len = read_length(buf, 1)?;
            DataValue::TextList(
                (0..len)
                    .map(|_| read_required_nbt(buf))
                    .collect::<CodecResult<_>>()?,
            )
        }
        ComponentKind::Item => DataValue::Item(Box::new(read_item_at(buf, layout, depth + 1)?)),
        ComponentKind::Items => {
            let len = read_length(buf, 1)?;
            DataValue::Items(
                (0..len)
                    .map(|_| read_item_at(buf, layout, depth + 1))
                    .collect::<CodecResult<_>>()?,
            )
        }
        ComponentKind::WrittenBook => DataValue::WrittenBook(Box::new(read_written_book(buf)?)),
        ComponentKind::Holder(inner) => {
            let id = read_varint(buf)?;
            if id == 0 {
                DataValue::Holder(Holder::Direct(Box::new(read_data_value(
                    buf, inner, layout, depth,
                )?)))
            } else {
                DataValue::Holder(Holder::Reference(id - 1))
            }
        }
    })
}

fn read_filterable<T>(
    buf: &mut BytesMut,
    mut read: impl FnMut(&mut BytesMut) -> CodecResult<T>,
) -> CodecResult<Filterable<T>> {
    let raw = read(buf)?;
    let filtered = if read_bool(buf)? {
        Some(read(buf)?)
    } else {
        None
    };
    Ok(Filterable { raw, filtered })
}

fn write_filterable<T>(
    buf: &mut BytesMut,
    value: &Filterable<T>,
    mut write: impl FnMut(&mut BytesMut, &T),
) {
    write(buf, &value.raw);
    write_bool(buf, value.filtered.is_some());
    if let Some(filtered) = &value.filtered {
        write(buf, filtered);
    }
}

fn read_written_book(buf: &mut BytesMut) -> CodecResult<WrittenBook> {
    let title = read_filterable(buf, |b| read_string(b, 32))?;
    let author = read_string(buf, MAX_STRING_LEN)?;
    let generation = read_varint(buf)?;
    let len = read_length(buf, 2)?;
    let pages = (0..len)
        .map(|_| read_filterable(buf, read_required_nbt))
        .collect::<CodecResult<_>>()?;
    let resolved = read_bool(buf)?;
    Ok(WrittenBook {
        title,
        author,
        generation,
        pages,
        resolved,
    })
}

impl DataValue {
    pub fn write(&self, buf: &mut BytesMut) {
        match self {
            DataValue::Unit => {}
            DataValue::Bool(v) => write_bool(buf, *v),
            DataValue::VarInt(v) => write_varint(buf, *v),
            DataValue::Nbt(tag) | DataValue::Text(tag) => write_nbt(buf, Some(tag)),
            DataValue::TextList(tags) => {
                write_varint(buf, tags.len() as i32);
                for tag in tags {
                    write_nbt(buf, Some(tag));
                }
            }
            DataValue::Item(item) => write_item(buf, item),
            DataValue::Items(items) => write_item_array(buf, items),
            DataValue::WrittenBook(book) => {
                write_filterable(buf, &book.title, |b, s| write_string(b, s));
                write_string(buf, &book.author);
                write_varint(buf, book.generation);
                write_varint(buf, book.pages.len() as i32);
                for page in &book.pages {
                    write_filterable(buf, page, |b, tag| write_nbt(b, Some(tag)));
                }
                write_bool(buf, book.resolved);
            }
            DataValue::Holder(Holder::Reference(id)) => write_varint(buf, id + 1),
            DataValue::Holder(Holder::Direct(value)) => {
                write_varint(buf, 0);
                value.write(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrade_nbt::{nbt_compound, nbt_list};

    fn layout() -> ComponentLayout {
        ComponentLayout::from_pairs([
            ("custom_data", ComponentKind::Nbt),
            ("max_stack_size", ComponentKind::VarInt),
            ("custom_name", ComponentKind::TextComponent),
            ("lore", ComponentKind::TextComponents),
            ("container", ComponentKind::Items),
            ("instrument", ComponentKind::Holder(Box::new(ComponentKind::Nbt))),
            ("written_book_content", ComponentKind::WrittenBook),
            ("glider", ComponentKind::Unit),
            ("charged_projectile", ComponentKind::Item),
        ])
    }

    fn text(s: &str) -> NbtValue {
        nbt_compound! { "text" => NbtValue::String(s.into()) }
    }

    #[test]
    fn test_layout_lookup() {
        let layout = layout();
        assert_eq!(layout.id_of("minecraft:custom_name"), Some(2));
        assert_eq!(layout.id_of("lore"), Some(3));
        assert_eq!(layout.kind(7), Some(&ComponentKind::Unit));
        assert_eq!(layout.kind(-1), None);
    }

    #[test]
    fn test_layout_from_json() {
        let layout: ComponentLayout = serde_json::from_str(
            r#"[{"name":"minecraft:custom_data","kind":"nbt"},
                {"name":"minecraft:instrument","kind":{"holder":"nbt"}}]"#,
        )
        .unwrap();
        assert_eq!(
            layout.kind(1),
            Some(&ComponentKind::Holder(Box::new(ComponentKind::Nbt)))
        );
    }

    #[test]
    fn test_structured_item_roundtrip() {
        let layout = layout();
        let mut inner = Item::new(5, 1);
        inner.data.set(1, DataValue::VarInt(16));

        let mut item = Item::new(113, 3);
        item.data.set(2, DataValue::Text(text("Sword")));
        item.data.set(3, DataValue::TextList(vec![text("a"), text("b")]));
        item.data.set(4, DataValue::Items(vec![inner, Item::empty()]));
        item.data
            .set(5, DataValue::Holder(Holder::Direct(Box::new(DataValue::Nbt(text("horn"))))));
        item.data.set(7, DataValue::Unit);
        item.data.set(
            6,
            DataValue::WrittenBook(Box::new(WrittenBook {
                title: Filterable {
                    raw: "Diary".into(),
                    filtered: None,
                },
                author: "Steve".into(),
                generation: 0,
                pages: vec![Filterable {
                    raw: text("p1"),
                    filtered: Some(text("p*")),
                }],
                resolved: true,
            })),
        );
        item.data.mark_removed(1);

        let mut buf = BytesMut::new();
        write_item(&mut buf, &item);
        let bytes = buf.clone();
        let decoded = read_item(&mut buf, &layout).unwrap();
        assert_eq!(decoded, item);
        assert!(buf.is_empty());

        let mut again = BytesMut::new();
        write_item(&mut again, &decoded);
        assert_eq!(again, bytes);
    }

    #[test]
    fn test_holder_reference() {
        let layout = layout();
        let mut item = Item::new(1, 1);
        item.data.set(5, DataValue::Holder(Holder::Reference(0)));
        let mut buf = BytesMut::new();
        write_item(&mut buf, &item);
        // count, id, added, removed, component id, holder id (reference 0 -> 1)
        assert_eq!(buf.to_vec(), vec![1, 1, 1, 0, 5, 1]);
        assert_eq!(read_item(&mut buf, &layout).unwrap(), item);
    }

    #[test]
    fn test_unknown_component_is_an_error() {
        let mut buf = BytesMut::new();
        for v in [1, 1, 1, 0, 42] {
            write_varint(&mut buf, v);
        }
        assert!(matches!(
            read_item(&mut buf, &layout()),
            Err(CodecError::UnknownComponent(42))
        ));
    }

    #[test]
    fn test_empty_item_is_single_zero() {
        let mut buf = BytesMut::new();
        write_item(&mut buf, &Item::empty());
        assert_eq!(buf.to_vec(), vec![0]);
        assert!(read_item(&mut buf, &layout()).unwrap().is_empty());
    }

    #[test]
    fn test_flat_items() {
        let item = FlatItem {
            id: 113,
            count: 2,
            tag: Some(nbt_compound! {
                "display" => nbt_compound! { "Lore" => nbt_list![NbtValue::String("old".into())] },
            }),
        };
        let mut buf = BytesMut::new();
        write_flat_item(&mut buf, Some(&item)).unwrap();
        write_flat_item(&mut buf, None).unwrap();
        write_flat_varint_item(&mut buf, Some(&item));
        write_flat_varint_item(&mut buf, None);

        assert_eq!(read_flat_item(&mut buf).unwrap(), Some(item.clone()));
        assert_eq!(read_flat_item(&mut buf).unwrap(), None);
        assert_eq!(read_flat_varint_item(&mut buf).unwrap(), Some(item));
        assert_eq!(read_flat_varint_item(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_flat_item_id_must_fit_short() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            write_flat_item(&mut buf, Some(&FlatItem::new(40_000, 1))),
            Err(CodecError::ItemIdOutOfRange(40_000))
        ));
        assert!(write_flat_item(&mut buf, Some(&FlatItem::new(-3, 1))).is_err());
        assert!(buf.is_empty());

        write_flat_item(&mut buf, Some(&FlatItem::new(i16::MAX as i32, 1))).unwrap();
        assert_eq!(read_flat_item(&mut buf).unwrap(), Some(FlatItem::new(i16::MAX as i32, 1)));
    }

    #[test]
    fn test_container_helpers() {
        let mut data = DataContainer::default();
        data.set(1, DataValue::VarInt(1));
        data.set(2, DataValue::Unit);
        data.set(1, DataValue::VarInt(64));
        assert_eq!(data.get(1), Some(&DataValue::VarInt(64)));
        assert_eq!(data.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
        data.mark_removed(9);
        data.remap_ids(|id| id + 10);
        assert!(data.contains(11));
        assert_eq!(data.removed(), &[19]);
        assert_eq!(data.remove(12), Some(DataValue::Unit));
        assert!(!data.contains(12));
    }
}
