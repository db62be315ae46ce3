use crate::chunk::ChunkSection;
use crate::codec::*;
use crate::item::*;
use bytes::{BufMut, BytesMut};
use crossgrade_nbt::NbtValue;
use crossgrade_types::BlockPos;
use std::sync::Arc;
use uuid::Uuid;

/// A wire type a packet field can be declared as.
///
/// Two field types are the same *kind* when their variants match; the
/// component layout carried by item types does not take part in that check.
#[derive(Debug, Clone)]
pub enum FieldType {
    Boolean,
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    Long,
    Float,
    Double,
    VarInt,
    VarLong,
    String,
    /// JSON text component carried as a string.
    Component,
    Uuid,
    OptionalUuid,
    Position,
    ByteArray,
    /// Everything left in the packet.
    RemainingBytes,
    VarIntArray,
    LongArray,
    /// Unnamed network NBT (1.20.2+); TAG_END reads as absent.
    Nbt,
    /// Named NBT root (pre-1.20.2 network format).
    NamedNbt,
    /// NBT text component (1.20.3+); must be present.
    TagComponent,
    OptionalVarInt,
    /// Short-id item (1.13 - 1.13.1).
    FlatItem,
    /// Presence-flagged VarInt-id item (1.13.2 - 1.20.4).
    FlatVarIntItem,
    FlatItemArray,
    FlatVarIntItemArray,
    /// Structured item (1.20.5+), decoded with the version's component layout.
    Item(Arc<ComponentLayout>),
    ItemArray(Arc<ComponentLayout>),
    ChunkSection,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "Boolean",
            FieldType::Byte => "Byte",
            FieldType::UnsignedByte => "UnsignedByte",
            FieldType::Short => "Short",
            FieldType::UnsignedShort => "UnsignedShort",
            FieldType::Int => "Int",
            FieldType::Long => "Long",
            FieldType::Float => "Float",
            FieldType::Double => "Double",
            FieldType::VarInt => "VarInt",
            FieldType::VarLong => "VarLong",
            FieldType::String => "String",
            FieldType::Component => "Component",
            FieldType::Uuid => "Uuid",
            FieldType::OptionalUuid => "OptionalUuid",
            FieldType::Position => "Position",
            FieldType::ByteArray => "ByteArray",
            FieldType::RemainingBytes => "RemainingBytes",
            FieldType::VarIntArray => "VarIntArray",
            FieldType::LongArray => "LongArray",
            FieldType::Nbt => "Nbt",
            FieldType::NamedNbt => "NamedNbt",
            FieldType::TagComponent => "TagComponent",
            FieldType::OptionalVarInt => "OptionalVarInt",
            FieldType::FlatItem => "FlatItem",
            FieldType::FlatVarIntItem => "FlatVarIntItem",
            FieldType::FlatItemArray => "FlatItemArray",
            FieldType::FlatVarIntItemArray => "FlatVarIntItemArray",
            FieldType::Item(_) => "Item",
            FieldType::ItemArray(_) => "ItemArray",
            FieldType::ChunkSection => "ChunkSection",
        }
    }

    pub fn same_kind(&self, other: &FieldType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn read(&self, buf: &mut BytesMut) -> CodecResult<Value> {
        Ok(match self {
            FieldType::Boolean => Value::Bool(read_bool(buf)?),
            FieldType::Byte => Value::I8(read_i8(buf)?),
            FieldType::UnsignedByte => Value::U8(read_u8(buf)?),
            FieldType::Short => Value::I16(read_i16(buf)?),
            FieldType::UnsignedShort => Value::U16(read_u16(buf)?),
            FieldType::Int => Value::I32(read_i32(buf)?),
            FieldType::Long => Value::I64(read_i64(buf)?),
            FieldType::Float => Value::F32(read_f32(buf)?),
            FieldType::Double => Value::F64(read_f64(buf)?),
            FieldType::VarInt => Value::I32(read_varint(buf)?),
            FieldType::VarLong => Value::I64(read_varlong(buf)?),
            FieldType::String => Value::Str(read_string(buf, MAX_STRING_LEN)?),
            FieldType::Component => Value::Str(read_string(buf, 262_144)?),
            FieldType::Uuid => Value::Uuid(read_uuid(buf)?),
            FieldType::OptionalUuid => Value::OptUuid(if read_bool(buf)? {
                Some(read_uuid(buf)?)
            } else {
                None
            }),
            FieldType::Position => Value::Position(read_position(buf)?),
            FieldType::ByteArray => Value::Bytes(read_byte_array(buf)?),
            FieldType::RemainingBytes => Value::Bytes(buf.split().to_vec()),
            FieldType::VarIntArray => Value::I32Array(read_varint_array(buf)?),
            FieldType::LongArray => Value::I64Array(read_long_array(buf)?),
            FieldType::Nbt => Value::Nbt(read_nbt(buf)?),
            FieldType::NamedNbt => Value::Nbt(read_named_nbt(buf)?),
            FieldType::TagComponent => Value::Nbt(Some(read_required_nbt(buf)?)),
            FieldType::OptionalVarInt => Value::OptI32(if read_bool(buf)? {
                Some(read_varint(buf)?)
            } else {
                None
            }),
            FieldType::FlatItem => Value::FlatItem(read_flat_item(buf)?),
            FieldType::FlatVarIntItem => Value::FlatItem(read_flat_varint_item(buf)?),
            FieldType::FlatItemArray => Value::FlatItems(read_flat_array(buf, read_flat_item)?),
            FieldType::FlatVarIntItemArray => {
                Value::FlatItems(read_flat_array(buf, read_flat_varint_item)?)
            }
            FieldType::Item(layout) => Value::Item(read_item(buf, layout)?),
            FieldType::ItemArray(layout) => Value::Items(read_item_array(buf, layout)?),
            FieldType::ChunkSection => Value::ChunkSection(Box::new(ChunkSection::read(buf)?)),
        })
    }

    pub fn write(&self, buf: &mut BytesMut, value: &Value) -> CodecResult<()> {
        match (self, value) {
            (FieldType::Boolean, Value::Bool(v)) => write_bool(buf, *v),
            (FieldType::Byte, Value::I8(v)) => write_i8(buf, *v),
            (FieldType::UnsignedByte, Value::U8(v)) => write_u8(buf, *v),
            (FieldType::Short, Value::I16(v)) => write_i16(buf, *v),
            (FieldType::UnsignedShort, Value::U16(v)) => write_u16(buf, *v),
            (FieldType::Int, Value::I32(v)) => write_i32(buf, *v),
            (FieldType::Long, Value::I64(v)) => write_i64(buf, *v),
            (FieldType::Float, Value::F32(v)) => write_f32(buf, *v),
            (FieldType::Double, Value::F64(v)) => write_f64(buf, *v),
            (FieldType::VarInt, Value::I32(v)) => write_varint(buf, *v),
            (FieldType::VarLong, Value::I64(v)) => write_varlong(buf, *v),
            (FieldType::String | FieldType::Component, Value::Str(s)) => write_string(buf, s),
            (FieldType::Uuid, Value::Uuid(u)) => write_uuid(buf, u),
            (FieldType::OptionalUuid, Value::OptUuid(u)) => {
                write_bool(buf, u.is_some());
                if let Some(u) = u {
                    write_uuid(buf, u);
                }
            }
            (FieldType::Position, Value::Position(p)) => write_position(buf, p),
            (FieldType::ByteArray, Value::Bytes(b)) => write_byte_array(buf, b),
            (FieldType::RemainingBytes, Value::Bytes(b)) => buf.put_slice(b),
            (FieldType::VarIntArray, Value::I32Array(v)) => write_varint_array(buf, v),
            (FieldType::LongArray, Value::I64Array(v)) => write_long_array(buf, v),
            (FieldType::Nbt, Value::Nbt(tag)) => write_nbt(buf, tag.as_ref()),
            (FieldType::NamedNbt, Value::Nbt(tag)) => write_named_nbt(buf, tag.as_ref()),
            (FieldType::TagComponent, Value::Nbt(tag)) => {
                let tag = tag.as_ref().ok_or(CodecError::MissingTag)?;
                write_nbt(buf, Some(tag));
            }
            (FieldType::OptionalVarInt, Value::OptI32(v)) => {
                write_bool(buf, v.is_some());
                if let Some(v) = v {
                    write_varint(buf, *v);
                }
            }
            (FieldType::FlatItem, Value::FlatItem(item)) => write_flat_item(buf, item.as_ref())?,
            (FieldType::FlatVarIntItem, Value::FlatItem(item)) => {
                write_flat_varint_item(buf, item.as_ref())
            }
            (FieldType::FlatItemArray, Value::FlatItems(items)) => {
                write_i16(buf, items.len() as i16);
                for item in items {
                    write_flat_item(buf, item.as_ref())?;
                }
            }
            (FieldType::FlatVarIntItemArray, Value::FlatItems(items)) => {
                write_i16(buf, items.len() as i16);
                for item in items {
                    write_flat_varint_item(buf, item.as_ref());
                }
            }
            (FieldType::Item(_), Value::Item(item)) => write_item(buf, item),
            (FieldType::ItemArray(_), Value::Items(items)) => write_item_array(buf, items),
            (FieldType::ChunkSection, Value::ChunkSection(section)) => section.write(buf),
            (ty, value) => {
                return Err(CodecError::ValueMismatch {
                    expected: ty.name(),
                    found: value.kind_name(),
                })
            }
        }
        Ok(())
    }
}

fn read_flat_array(
    buf: &mut BytesMut,
    read: fn(&mut BytesMut) -> CodecResult<Option<FlatItem>>,
) -> CodecResult<Vec<Option<FlatItem>>> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Err(CodecError::InvalidLength(len as i32));
    }
    (0..len).map(|_| read(buf)).collect()
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Uuid(Uuid),
    OptUuid(Option<Uuid>),
    Position(BlockPos),
    Bytes(Vec<u8>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    Nbt(Option<NbtValue>),
    OptI32(Option<i32>),
    FlatItem(Option<FlatItem>),
    FlatItems(Vec<Option<FlatItem>>),
    Item(Item),
    Items(Vec<Item>),
    ChunkSection(Box<ChunkSection>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::OptUuid(_) => "optional uuid",
            Value::Position(_) => "position",
            Value::Bytes(_) => "bytes",
            Value::I32Array(_) => "i32 array",
            Value::I64Array(_) => "i64 array",
            Value::Nbt(_) => "nbt",
            Value::OptI32(_) => "optional i32",
            Value::FlatItem(_) => "flat item",
            Value::FlatItems(_) => "flat items",
            Value::Item(_) => "item",
            Value::Items(_) => "items",
            Value::ChunkSection(_) => "chunk section",
        }
    }

    /// Whether two values share a variant, i.e. can be written by the same field types.
    pub fn same_variant(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Conversion between a Rust value and the [`Value`] a field carries.
pub trait FieldValue: Sized {
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

impl FieldValue for Value {
    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

macro_rules! field_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

field_value! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Uuid => Uuid,
    Option<Uuid> => OptUuid,
    BlockPos => Position,
    Vec<u8> => Bytes,
    Vec<i32> => I32Array,
    Vec<i64> => I64Array,
    Option<NbtValue> => Nbt,
    Option<i32> => OptI32,
    Option<FlatItem> => FlatItem,
    Vec<Option<FlatItem>> => FlatItems,
    Item => Item,
    Vec<Item> => Items,
    Box<ChunkSection> => ChunkSection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgrade_nbt::nbt_compound;

    fn roundtrip(ty: FieldType, value: Value) {
        let mut buf = BytesMut::new();
        ty.write(&mut buf, &value).unwrap();
        let read = ty.read(&mut buf).unwrap();
        assert_eq!(read, value, "{} did not round trip", ty.name());
        assert!(buf.is_empty(), "{} left bytes behind", ty.name());
    }

    #[test]
    fn test_field_roundtrips() {
        roundtrip(FieldType::UnsignedShort, Value::U16(65535));
        roundtrip(FieldType::VarLong, Value::I64(-7));
        roundtrip(FieldType::OptionalUuid, Value::OptUuid(None));
        roundtrip(FieldType::OptionalVarInt, Value::OptI32(Some(42)));
        roundtrip(FieldType::Position, Value::Position(BlockPos::new(1, -2, 3)));
        roundtrip(
            FieldType::NamedNbt,
            Value::Nbt(Some(nbt_compound! { "a" => NbtValue::Int(1) })),
        );
        roundtrip(
            FieldType::FlatVarIntItemArray,
            Value::FlatItems(vec![Some(FlatItem::new(1, 1)), None]),
        );
        let layout = Arc::new(ComponentLayout::default());
        roundtrip(
            FieldType::ItemArray(layout),
            Value::Items(vec![Item::new(118, 1), Item::empty()]),
        );
    }

    #[test]
    fn test_remaining_bytes_takes_everything() {
        let mut buf = BytesMut::from(&[1u8, 2, 3][..]);
        assert_eq!(
            FieldType::RemainingBytes.read(&mut buf).unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_value_mismatch_on_write() {
        let mut buf = BytesMut::new();
        let err = FieldType::VarInt.write(&mut buf, &Value::Str("x".into()));
        assert!(matches!(
            err,
            Err(CodecError::ValueMismatch { expected: "VarInt", found: "string" })
        ));
    }

    #[test]
    fn test_tag_component_must_be_present() {
        let mut buf = BytesMut::from(&[0u8][..]);
        assert!(FieldType::TagComponent.read(&mut buf).is_err());
    }

    #[test]
    fn test_same_kind_ignores_layout() {
        let a = FieldType::Item(Arc::new(ComponentLayout::default()));
        let b = FieldType::Item(Arc::new(ComponentLayout::from_pairs([(
            "custom_data",
            ComponentKind::Nbt,
        )])));
        assert!(a.same_kind(&b));
        assert!(!FieldType::VarInt.same_kind(&FieldType::Int));
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(i32::from_value(Value::I32(5)), Some(5));
        assert_eq!(i32::from_value(Value::I64(5)), None);
        assert_eq!(Some(7i32).into_value(), Value::OptI32(Some(7)));
    }
}
