use bytes::{Buf, BufMut, BytesMut};
use crossgrade_nbt::{NbtError, NbtValue};
use crossgrade_types::BlockPos;
use thiserror::Error;
use uuid::Uuid;

/// Default maximum string length (in characters) for protocol strings.
pub const MAX_STRING_LEN: usize = 32767;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("VarInt too big")]
    VarIntTooBig,
    #[error("VarLong too big")]
    VarLongTooBig,
    #[error("Not enough data")]
    NotEnoughData,
    #[error("String too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("Invalid length {0}")]
    InvalidLength(i32),
    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("Unknown data component id {0}")]
    UnknownComponent(i32),
    #[error("Invalid palette bits {0}")]
    InvalidPalette(u8),
    #[error("Missing required tag")]
    MissingTag,
    #[error("Item id {0} does not fit a short")]
    ItemIdOutOfRange(i32),
    #[error("Items nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error("Cannot write {found} value as {expected}")]
    ValueMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("NBT: {0}")]
    Nbt(#[from] NbtError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

fn need(buf: &BytesMut, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        return Err(CodecError::NotEnoughData);
    }
    Ok(())
}

macro_rules! fixed_width {
    ($($read:ident, $write:ident, $ty:ty, $get:ident, $put:ident, $size:expr;)*) => {
        $(
            pub fn $read(buf: &mut BytesMut) -> CodecResult<$ty> {
                need(buf, $size)?;
                Ok(buf.$get())
            }

            pub fn $write(buf: &mut BytesMut, value: $ty) {
                buf.$put(value);
            }
        )*
    };
}

fixed_width! {
    read_i8, write_i8, i8, get_i8, put_i8, 1;
    read_u8, write_u8, u8, get_u8, put_u8, 1;
    read_i16, write_i16, i16, get_i16, put_i16, 2;
    read_u16, write_u16, u16, get_u16, put_u16, 2;
    read_i32, write_i32, i32, get_i32, put_i32, 4;
    read_i64, write_i64, i64, get_i64, put_i64, 8;
    read_f32, write_f32, f32, get_f32, put_f32, 4;
    read_f64, write_f64, f64, get_f64, put_f64, 8;
}

pub fn read_bool(buf: &mut BytesMut) -> CodecResult<bool> {
    Ok(read_u8(buf)? != 0)
}

pub fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(value as u8);
}

/// Read a VarInt from the buffer.
pub fn read_varint(buf: &mut BytesMut) -> CodecResult<i32> {
    let mut result: i32 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 35 {
            return Err(CodecError::VarIntTooBig);
        }
    }
}

/// Write a VarInt to the buffer.
pub fn write_varint(buf: &mut BytesMut, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Calculate the byte length of a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut val = value as u32;
    let mut len = 0;
    loop {
        len += 1;
        val >>= 7;
        if val == 0 {
            break;
        }
    }
    len
}

/// Read a VarLong from the buffer.
pub fn read_varlong(buf: &mut BytesMut) -> CodecResult<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 70 {
            return Err(CodecError::VarLongTooBig);
        }
    }
}

/// Write a VarLong to the buffer.
pub fn write_varlong(buf: &mut BytesMut, mut value: i64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u64) >> 7) as i64;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Read a VarInt length prefix and check that at least `len * elem_size`
/// bytes follow, so a hostile length never triggers a huge allocation.
pub fn read_length(buf: &mut BytesMut, elem_size: usize) -> CodecResult<usize> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::InvalidLength(len));
    }
    let len = len as usize;
    if len.saturating_mul(elem_size) > buf.remaining() {
        return Err(CodecError::NotEnoughData);
    }
    Ok(len)
}

/// Read a protocol string (varint-prefixed UTF-8).
pub fn read_string(buf: &mut BytesMut, max_len: usize) -> CodecResult<String> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::InvalidLength(len));
    }
    let len = len as usize;
    if len > max_len * 4 {
        return Err(CodecError::StringTooLong(len, max_len));
    }
    need(buf, len)?;
    let bytes = buf.split_to(len);
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
    if s.chars().count() > max_len {
        return Err(CodecError::StringTooLong(s.chars().count(), max_len));
    }
    Ok(s)
}

/// Write a protocol string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a UUID (128 bits, big endian).
pub fn read_uuid(buf: &mut BytesMut) -> CodecResult<Uuid> {
    need(buf, 16)?;
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

/// Write a UUID.
pub fn write_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

pub fn read_position(buf: &mut BytesMut) -> CodecResult<BlockPos> {
    need(buf, 8)?;
    Ok(BlockPos::decode(buf.get_u64()))
}

pub fn write_position(buf: &mut BytesMut, pos: &BlockPos) {
    buf.put_u64(pos.encode());
}

/// Read a byte array with varint length prefix.
pub fn read_byte_array(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    let len = read_length(buf, 1)?;
    let bytes = buf.split_to(len);
    Ok(bytes.to_vec())
}

/// Write a byte array with varint length prefix.
pub fn write_byte_array(buf: &mut BytesMut, data: &[u8]) {
    write_varint(buf, data.len() as i32);
    buf.put_slice(data);
}

/// Read a varint-prefixed array of VarInts.
pub fn read_varint_array(buf: &mut BytesMut) -> CodecResult<Vec<i32>> {
    let len = read_length(buf, 1)?;
    (0..len).map(|_| read_varint(buf)).collect()
}

pub fn write_varint_array(buf: &mut BytesMut, values: &[i32]) {
    write_varint(buf, values.len() as i32);
    for v in values {
        write_varint(buf, *v);
    }
}

/// Read a varint-prefixed array of big-endian longs.
pub fn read_long_array(buf: &mut BytesMut) -> CodecResult<Vec<i64>> {
    let len = read_length(buf, 8)?;
    Ok((0..len).map(|_| buf.get_i64()).collect())
}

pub fn write_long_array(buf: &mut BytesMut, values: &[i64]) {
    write_varint(buf, values.len() as i32);
    for v in values {
        buf.put_i64(*v);
    }
}

/// Read an unnamed network NBT root (1.20.2+). `None` for TAG_END.
pub fn read_nbt(buf: &mut BytesMut) -> CodecResult<Option<NbtValue>> {
    Ok(NbtValue::read_root_network(buf)?)
}

/// Write an unnamed network NBT root; `None` writes a single TAG_END.
pub fn write_nbt(buf: &mut BytesMut, nbt: Option<&NbtValue>) {
    match nbt {
        Some(nbt) => nbt.write_root_network(buf),
        None => buf.put_u8(crossgrade_nbt::TAG_END),
    }
}

/// Read a named NBT root (pre-1.20.2 network format). The root name is dropped.
pub fn read_named_nbt(buf: &mut BytesMut) -> CodecResult<Option<NbtValue>> {
    Ok(NbtValue::read_root_named(buf)?.map(|(_, value)| value))
}

pub fn write_named_nbt(buf: &mut BytesMut, nbt: Option<&NbtValue>) {
    match nbt {
        Some(nbt) => nbt.write_root_named("", buf),
        None => buf.put_u8(crossgrade_nbt::TAG_END),
    }
}

/// Read a network NBT root that must be present (text components, item data).
pub fn read_required_nbt(buf: &mut BytesMut) -> CodecResult<NbtValue> {
    read_nbt(buf)?.ok_or(CodecError::MissingTag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let test_cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (255, vec![0xFF, 0x01]),
            (25565, vec![0xDD, 0xC7, 0x01]),
            (2097151, vec![0xFF, 0xFF, 0x7F]),
            (i32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected_bytes) in test_cases {
            let mut buf = BytesMut::new();
            write_varint(&mut buf, value);
            assert_eq!(
                buf.to_vec(),
                expected_bytes,
                "write_varint({}) failed",
                value
            );

            let mut buf = BytesMut::from(&expected_bytes[..]);
            let result = read_varint(&mut buf).unwrap();
            assert_eq!(result, value, "read_varint for {} failed", value);
        }
    }

    #[test]
    fn test_varint_too_long() {
        let mut buf = BytesMut::from(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01][..]);
        assert!(matches!(read_varint(&mut buf), Err(CodecError::VarIntTooBig)));
    }

    #[test]
    fn test_varlong_roundtrip() {
        for value in [0i64, 1, 300, i64::MAX, i64::MIN, -1] {
            let mut buf = BytesMut::new();
            write_varlong(&mut buf, value);
            assert!(buf.len() <= 10);
            assert_eq!(read_varlong(&mut buf).unwrap(), value);
            assert!(buf.is_empty());
        }
        let mut buf = BytesMut::from(&[0xFFu8; 11][..]);
        assert!(matches!(read_varlong(&mut buf), Err(CodecError::VarLongTooBig)));
    }

    #[test]
    fn test_varint_len() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(25565), 3);
        assert_eq!(varint_len(-1), 5);
    }

    #[test]
    fn test_string_roundtrip() {
        let test_str = "Hello, Minecraft!";
        let mut buf = BytesMut::new();
        write_string(&mut buf, test_str);
        let result = read_string(&mut buf, MAX_STRING_LEN).unwrap();
        assert_eq!(result, test_str);
    }

    #[test]
    fn test_string_limits() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "abcdef");
        assert!(matches!(
            read_string(&mut buf, 3),
            Err(CodecError::StringTooLong(6, 3))
        ));

        let mut buf = BytesMut::new();
        write_byte_array(&mut buf, &[0xC3, 0x28]);
        assert!(matches!(
            read_string(&mut buf, MAX_STRING_LEN),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        let mut buf = BytesMut::new();
        write_uuid(&mut buf, &uuid);
        let result = read_uuid(&mut buf).unwrap();
        assert_eq!(result, uuid);
    }

    #[test]
    fn test_array_length_checked_before_allocation() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 1_000_000);
        buf.put_i64(1);
        assert!(matches!(
            read_long_array(&mut buf),
            Err(CodecError::NotEnoughData)
        ));

        let mut buf = BytesMut::new();
        write_varint(&mut buf, -5);
        assert!(matches!(
            read_byte_array(&mut buf),
            Err(CodecError::InvalidLength(-5))
        ));
    }

    #[test]
    fn test_truncated_primitive() {
        let mut buf = BytesMut::from(&[0x00, 0x01][..]);
        assert!(matches!(read_i32(&mut buf), Err(CodecError::NotEnoughData)));
    }

    #[test]
    fn test_nbt_absent_root() {
        let mut buf = BytesMut::new();
        write_nbt(&mut buf, None);
        assert_eq!(buf.to_vec(), vec![0]);
        assert_eq!(read_nbt(&mut buf).unwrap(), None);
    }
}
