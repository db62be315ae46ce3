use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// NBT tag type IDs.
pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

/// Maximum nesting of compounds and lists accepted by the reader.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Error)]
pub enum NbtError {
    #[error("Not enough data")]
    NotEnoughData,
    #[error("NBT nested deeper than {0}")]
    TooDeep(usize),
    #[error("Invalid tag type {0}")]
    InvalidTagType(u8),
    #[error("Negative length {0}")]
    NegativeLength(i32),
    #[error("Invalid modified UTF-8 string")]
    InvalidString,
}

pub type NbtResult<T> = Result<T, NbtError>;

/// A list tag. The element type is kept so empty lists survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct NbtList {
    pub element_type: u8,
    pub items: Vec<NbtValue>,
}

impl NbtList {
    pub fn new(items: Vec<NbtValue>) -> Self {
        let element_type = items.first().map(NbtValue::tag_id).unwrap_or(TAG_END);
        Self {
            element_type,
            items,
        }
    }
}

/// An NBT value.
#[derive(Debug, Clone, PartialEq)]
pub enum NbtValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(NbtList),
    Compound(Vec<(String, NbtValue)>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl NbtValue {
    pub fn tag_id(&self) -> u8 {
        match self {
            NbtValue::Byte(_) => TAG_BYTE,
            NbtValue::Short(_) => TAG_SHORT,
            NbtValue::Int(_) => TAG_INT,
            NbtValue::Long(_) => TAG_LONG,
            NbtValue::Float(_) => TAG_FLOAT,
            NbtValue::Double(_) => TAG_DOUBLE,
            NbtValue::ByteArray(_) => TAG_BYTE_ARRAY,
            NbtValue::String(_) => TAG_STRING,
            NbtValue::List(_) => TAG_LIST,
            NbtValue::Compound(_) => TAG_COMPOUND,
            NbtValue::IntArray(_) => TAG_INT_ARRAY,
            NbtValue::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    pub fn empty_compound() -> Self {
        NbtValue::Compound(Vec::new())
    }

    pub fn list(items: Vec<NbtValue>) -> Self {
        NbtValue::List(NbtList::new(items))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NbtValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&[(String, NbtValue)]> {
        match self {
            NbtValue::Compound(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a compound entry. `None` for missing keys and non-compounds.
    pub fn get(&self, key: &str) -> Option<&NbtValue> {
        self.as_compound()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut NbtValue> {
        match self {
            NbtValue::Compound(entries) => entries
                .iter_mut()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a compound entry in place, returning the previous value.
    /// No-op on non-compound values.
    pub fn insert(&mut self, key: impl Into<String>, value: NbtValue) -> Option<NbtValue> {
        let NbtValue::Compound(entries) = self else {
            return None;
        };
        let key = key.into();
        match entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    /// Remove a compound entry, keeping the order of the others.
    pub fn remove(&mut self, key: &str) -> Option<NbtValue> {
        let NbtValue::Compound(entries) = self else {
            return None;
        };
        let index = entries.iter().position(|(name, _)| name == key)?;
        Some(entries.remove(index).1)
    }

    /// Number of entries of a compound (0 for anything else).
    pub fn len(&self) -> usize {
        self.as_compound().map_or(0, <[_]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write this value as a root tag (with empty name) for network protocol.
    pub fn write_root_network(&self, buf: &mut BytesMut) {
        // Network NBT in 1.20.2+: root tag with type byte, but NO name
        buf.put_u8(self.tag_id());
        self.write_payload(buf);
    }

    /// Write this value as a full named root tag (files and pre-1.20.2 network).
    pub fn write_root_named(&self, name: &str, buf: &mut BytesMut) {
        buf.put_u8(self.tag_id());
        write_nbt_string(name, buf);
        self.write_payload(buf);
    }

    /// Write just the payload (no tag type or name).
    pub fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            NbtValue::Byte(v) => buf.put_i8(*v),
            NbtValue::Short(v) => buf.put_i16(*v),
            NbtValue::Int(v) => buf.put_i32(*v),
            NbtValue::Long(v) => buf.put_i64(*v),
            NbtValue::Float(v) => buf.put_f32(*v),
            NbtValue::Double(v) => buf.put_f64(*v),
            NbtValue::ByteArray(v) => {
                buf.put_i32(v.len() as i32);
                for b in v {
                    buf.put_i8(*b);
                }
            }
            NbtValue::String(v) => {
                write_nbt_string(v, buf);
            }
            NbtValue::List(list) => {
                buf.put_u8(list.element_type);
                buf.put_i32(list.items.len() as i32);
                for item in &list.items {
                    item.write_payload(buf);
                }
            }
            NbtValue::Compound(entries) => {
                for (name, value) in entries {
                    buf.put_u8(value.tag_id());
                    write_nbt_string(name, buf);
                    value.write_payload(buf);
                }
                buf.put_u8(TAG_END);
            }
            NbtValue::IntArray(v) => {
                buf.put_i32(v.len() as i32);
                for i in v {
                    buf.put_i32(*i);
                }
            }
            NbtValue::LongArray(v) => {
                buf.put_i32(v.len() as i32);
                for l in v {
                    buf.put_i64(*l);
                }
            }
        }
    }

    /// Read an unnamed root tag. `TAG_END` means "no value".
    pub fn read_root_network(buf: &mut BytesMut) -> NbtResult<Option<NbtValue>> {
        let tag = read_u8(buf)?;
        if tag == TAG_END {
            return Ok(None);
        }
        Self::read_payload(tag, buf, 0).map(Some)
    }

    /// Read a named root tag, returning the root name with the value.
    pub fn read_root_named(buf: &mut BytesMut) -> NbtResult<Option<(String, NbtValue)>> {
        let tag = read_u8(buf)?;
        if tag == TAG_END {
            return Ok(None);
        }
        let name = read_nbt_string(buf)?;
        let value = Self::read_payload(tag, buf, 0)?;
        Ok(Some((name, value)))
    }

    /// Read the payload of a tag whose type is already known.
    pub fn read_payload(tag: u8, buf: &mut BytesMut, depth: usize) -> NbtResult<NbtValue> {
        match tag {
            TAG_BYTE => {
                need(buf, 1)?;
                Ok(NbtValue::Byte(buf.get_i8()))
            }
            TAG_SHORT => {
                need(buf, 2)?;
                Ok(NbtValue::Short(buf.get_i16()))
            }
            TAG_INT => {
                need(buf, 4)?;
                Ok(NbtValue::Int(buf.get_i32()))
            }
            TAG_LONG => {
                need(buf, 8)?;
                Ok(NbtValue::Long(buf.get_i64()))
            }
            TAG_FLOAT => {
                need(buf, 4)?;
                Ok(NbtValue::Float(buf.get_f32()))
            }
            TAG_DOUBLE => {
                need(buf, 8)?;
                Ok(NbtValue::Double(buf.get_f64()))
            }
            TAG_BYTE_ARRAY => {
                let len = read_len(buf, 1)?;
                Ok(NbtValue::ByteArray(
                    buf.split_to(len).iter().map(|b| *b as i8).collect(),
                ))
            }
            TAG_STRING => Ok(NbtValue::String(read_nbt_string(buf)?)),
            TAG_LIST => {
                if depth >= MAX_DEPTH {
                    return Err(NbtError::TooDeep(MAX_DEPTH));
                }
                let element_type = read_u8(buf)?;
                let len = read_len(buf, min_payload_size(element_type)?)?;
                if len > 0 && element_type == TAG_END {
                    return Err(NbtError::InvalidTagType(element_type));
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Self::read_payload(element_type, buf, depth + 1)?);
                }
                Ok(NbtValue::List(NbtList {
                    element_type,
                    items,
                }))
            }
            TAG_COMPOUND => {
                if depth >= MAX_DEPTH {
                    return Err(NbtError::TooDeep(MAX_DEPTH));
                }
                let mut entries = Vec::new();
                loop {
                    let child = read_u8(buf)?;
                    if child == TAG_END {
                        break;
                    }
                    let name = read_nbt_string(buf)?;
                    let value = Self::read_payload(child, buf, depth + 1)?;
                    entries.push((name, value));
                }
                Ok(NbtValue::Compound(entries))
            }
            TAG_INT_ARRAY => {
                let len = read_len(buf, 4)?;
                Ok(NbtValue::IntArray((0..len).map(|_| buf.get_i32()).collect()))
            }
            TAG_LONG_ARRAY => {
                let len = read_len(buf, 8)?;
                Ok(NbtValue::LongArray((0..len).map(|_| buf.get_i64()).collect()))
            }
            other => Err(NbtError::InvalidTagType(other)),
        }
    }
}

fn need(buf: &BytesMut, n: usize) -> NbtResult<()> {
    if buf.remaining() < n {
        return Err(NbtError::NotEnoughData);
    }
    Ok(())
}

fn read_u8(buf: &mut BytesMut) -> NbtResult<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

/// Read an i32 length and make sure `len * elem_size` bytes are available
/// before anything gets allocated.
fn read_len(buf: &mut BytesMut, elem_size: usize) -> NbtResult<usize> {
    need(buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Err(NbtError::NegativeLength(len));
    }
    let len = len as usize;
    if len.saturating_mul(elem_size) > buf.remaining() {
        return Err(NbtError::NotEnoughData);
    }
    Ok(len)
}

fn min_payload_size(tag: u8) -> NbtResult<usize> {
    Ok(match tag {
        TAG_END => 0,
        TAG_BYTE => 1,
        TAG_SHORT | TAG_STRING => 2,
        TAG_INT | TAG_FLOAT | TAG_BYTE_ARRAY | TAG_INT_ARRAY | TAG_LONG_ARRAY => 4,
        TAG_LONG | TAG_DOUBLE => 8,
        TAG_LIST => 5,
        TAG_COMPOUND => 1,
        other => return Err(NbtError::InvalidTagType(other)),
    })
}

fn write_nbt_string(s: &str, buf: &mut BytesMut) {
    let bytes = encode_modified_utf8(s);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(&bytes);
}

fn read_nbt_string(buf: &mut BytesMut) -> NbtResult<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let bytes = buf.split_to(len);
    decode_modified_utf8(&bytes).ok_or(NbtError::InvalidString)
}

/// Java's modified UTF-8: NUL as two bytes, supplementary characters as
/// surrogate pairs of three bytes each.
fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1)?;
            if b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return None;
            }
            units.push(
                (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
            );
            i += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}

/// Helper macro for building compound tags.
#[macro_export]
macro_rules! nbt_compound {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::NbtValue::Compound(vec![
            $(($key.into(), $val)),*
        ])
    };
}

/// Helper macro for building list tags.
#[macro_export]
macro_rules! nbt_list {
    ($($val:expr),* $(,)?) => {
        $crate::NbtValue::list(vec![$($val),*])
    };
}
