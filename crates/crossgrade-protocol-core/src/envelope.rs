use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{FieldType, FieldValue, Value};
use bytes::BytesMut;
use std::collections::VecDeque;

/// One packet in flight through the translation pipeline.
///
/// Fields are consumed from the values a previous hop left behind first,
/// then decoded lazily from the raw input. Written fields are collected in
/// order and only encoded again by [`PacketEnvelope::serialize`].
#[derive(Debug)]
pub struct PacketEnvelope {
    id: i32,
    input: BytesMut,
    input_len: usize,
    readable: VecDeque<(FieldType, Value)>,
    output: Vec<(FieldType, Value)>,
    cancelled: bool,
    send_before: Vec<PacketEnvelope>,
    send_after: Vec<PacketEnvelope>,
}

impl PacketEnvelope {
    /// Wrap an inbound packet's id and payload (the bytes after the id).
    pub fn new(id: i32, payload: BytesMut) -> Self {
        let input_len = payload.len();
        Self {
            id,
            input: payload,
            input_len,
            readable: VecDeque::new(),
            output: Vec::new(),
            cancelled: false,
            send_before: Vec::new(),
            send_after: Vec::new(),
        }
    }

    /// Start an empty packet to inject next to the current one.
    pub fn create(id: i32) -> Self {
        Self::new(id, BytesMut::new())
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    /// Take the next field as a raw [`Value`].
    pub fn read_value(&mut self, ty: &FieldType) -> ProtocolResult<Value> {
        match self.readable.pop_front() {
            Some((queued, value)) if queued.same_kind(ty) => return Ok(value),
            Some((queued, value)) => {
                let found = queued.name();
                self.readable.push_front((queued, value));
                return Err(ProtocolError::TypeMismatch {
                    expected: ty.name(),
                    found,
                });
            }
            None => {}
        }
        let offset = self.input_len - self.input.len();
        ty.read(&mut self.input)
            .map_err(|source| ProtocolError::Decode {
                ty: ty.name(),
                offset,
                source,
            })
    }

    /// Take the next field, converted to `T`.
    pub fn read<T: FieldValue>(&mut self, ty: &FieldType) -> ProtocolResult<T> {
        let value = self.read_value(ty)?;
        convert(ty, value)
    }

    /// Append a field to the output.
    pub fn write<T: FieldValue>(&mut self, ty: FieldType, value: T) {
        self.output.push((ty, value.into_value()));
    }

    pub fn write_value(&mut self, ty: FieldType, value: Value) {
        self.output.push((ty, value));
    }

    /// Read a field and write it back unchanged, returning its value.
    pub fn passthrough<T: FieldValue>(&mut self, ty: &FieldType) -> ProtocolResult<T> {
        let value = self.read_value(ty)?;
        let typed = convert(ty, value.clone())?;
        self.output.push((ty.clone(), value));
        Ok(typed)
    }

    /// Pass every remaining field through untouched.
    pub fn passthrough_all(&mut self) {
        self.output.extend(self.readable.drain(..));
        if !self.input.is_empty() {
            let rest = self.input.split().to_vec();
            self.output
                .push((FieldType::RemainingBytes, Value::Bytes(rest)));
        }
    }

    /// Take the rest of the raw input without writing it.
    pub fn read_remaining(&mut self) -> ProtocolResult<Vec<u8>> {
        self.read(&FieldType::RemainingBytes)
    }

    /// Drop everything not yet read.
    pub fn clear_input(&mut self) {
        self.readable.clear();
        self.input.clear();
    }

    fn written_index(&self, ty: &FieldType, index: usize) -> ProtocolResult<usize> {
        self.output
            .iter()
            .enumerate()
            .filter(|(_, (written, _))| written.same_kind(ty))
            .nth(index)
            .map(|(i, _)| i)
            .ok_or(ProtocolError::MissingField {
                ty: ty.name(),
                index,
            })
    }

    /// The `index`-th already written field of this kind.
    pub fn get<T: FieldValue>(&self, ty: &FieldType, index: usize) -> ProtocolResult<T> {
        let i = self.written_index(ty, index)?;
        convert(ty, self.output[i].1.clone())
    }

    /// Replace the `index`-th already written field of this kind.
    pub fn set<T: FieldValue>(&mut self, ty: &FieldType, index: usize, value: T) -> ProtocolResult<()> {
        let i = self.written_index(ty, index)?;
        self.output[i].1 = value.into_value();
        Ok(())
    }

    /// Emit `packet` before this one.
    pub fn send(&mut self, packet: PacketEnvelope) {
        self.send_before.push(packet);
    }

    /// Emit `packet` after this one.
    pub fn schedule_send(&mut self, packet: PacketEnvelope) {
        self.send_after.push(packet);
    }

    /// Take the packets injected since the last call, as (before, after).
    pub fn take_injected(&mut self) -> (Vec<PacketEnvelope>, Vec<PacketEnvelope>) {
        (
            std::mem::take(&mut self.send_before),
            std::mem::take(&mut self.send_after),
        )
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Hand the written fields to the next hop as its readable input.
    pub fn reset_reader(&mut self) {
        let mut readable: VecDeque<_> = self.output.drain(..).collect();
        readable.extend(self.readable.drain(..));
        self.readable = readable;
    }

    /// Encode written fields, then unread values, then the untouched raw input.
    pub fn serialize(&self) -> ProtocolResult<BytesMut> {
        let mut buf = BytesMut::new();
        for (ty, value) in self.output.iter().chain(self.readable.iter()) {
            ty.write(&mut buf, value)
                .map_err(|source| ProtocolError::Encode {
                    ty: ty.name(),
                    source,
                })?;
        }
        buf.extend_from_slice(&self.input);
        Ok(buf)
    }
}

fn convert<T: FieldValue>(ty: &FieldType, value: Value) -> ProtocolResult<T> {
    let found = value.kind_name();
    T::from_value(value).ok_or(ProtocolError::TypeMismatch {
        expected: ty.name(),
        found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{write_string, write_varint};

    fn payload() -> BytesMut {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 42);
        write_string(&mut buf, "hello");
        buf.extend_from_slice(&[7, 8, 9]);
        buf
    }

    #[test]
    fn test_untouched_packet_serializes_identically() {
        let env = PacketEnvelope::new(1, payload());
        assert_eq!(env.serialize().unwrap(), payload());
    }

    #[test]
    fn test_passthrough_keeps_value_and_position() {
        let mut env = PacketEnvelope::new(1, payload());
        let id: i32 = env.passthrough(&FieldType::VarInt).unwrap();
        assert_eq!(id, 42);
        let s: String = env.read(&FieldType::String).unwrap();
        assert_eq!(s, "hello");
        env.write(FieldType::String, "bye".to_string());
        let out = env.serialize().unwrap();

        let mut expected = BytesMut::new();
        write_varint(&mut expected, 42);
        write_string(&mut expected, "bye");
        expected.extend_from_slice(&[7, 8, 9]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_read_past_end_is_fatal() {
        let mut env = PacketEnvelope::new(1, BytesMut::from(&[1u8][..]));
        let _: i8 = env.read(&FieldType::Byte).unwrap();
        let err = env.read::<i32>(&FieldType::Int).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ProtocolError::Decode { ty: "Int", offset: 1, .. }));
    }

    #[test]
    fn test_reset_reader_feeds_next_hop() {
        let mut env = PacketEnvelope::new(1, payload());
        env.passthrough::<i32>(&FieldType::VarInt).unwrap();
        env.reset_reader();

        // The next hop sees the queued VarInt first, with its declared kind.
        let err = env.read::<String>(&FieldType::String).unwrap_err();
        assert!(matches!(err, ProtocolError::TypeMismatch { expected: "String", found: "VarInt" }));
        assert!(!err.is_fatal());

        let id: i32 = env.read(&FieldType::VarInt).unwrap();
        assert_eq!(id, 42);
        let s: String = env.read(&FieldType::String).unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn test_get_and_set_written_fields() {
        let mut env = PacketEnvelope::create(5);
        env.write(FieldType::VarInt, 1i32);
        env.write(FieldType::String, "x".to_string());
        env.write(FieldType::VarInt, 2i32);
        assert_eq!(env.get::<i32>(&FieldType::VarInt, 1).unwrap(), 2);
        env.set(&FieldType::VarInt, 0, 10i32).unwrap();
        assert_eq!(env.get::<i32>(&FieldType::VarInt, 0).unwrap(), 10);
        assert!(matches!(
            env.get::<i32>(&FieldType::VarInt, 2),
            Err(ProtocolError::MissingField { index: 2, .. })
        ));
    }

    #[test]
    fn test_passthrough_all_and_clear() {
        let mut env = PacketEnvelope::new(1, payload());
        env.passthrough_all();
        assert_eq!(env.serialize().unwrap(), payload());

        let mut env = PacketEnvelope::new(1, payload());
        env.clear_input();
        assert!(env.serialize().unwrap().is_empty());
    }

    #[test]
    fn test_injection_and_cancel() {
        let mut env = PacketEnvelope::new(1, payload());
        env.send(PacketEnvelope::create(2));
        env.schedule_send(PacketEnvelope::create(3));
        env.cancel();
        env.cancel();
        assert!(env.is_cancelled());
        let (before, after) = env.take_injected();
        assert_eq!(before[0].id(), 2);
        assert_eq!(after[0].id(), 3);
        assert!(env.take_injected().0.is_empty());
    }

    #[test]
    fn test_read_remaining() {
        let mut env = PacketEnvelope::new(1, payload());
        env.read::<i32>(&FieldType::VarInt).unwrap();
        env.read::<String>(&FieldType::String).unwrap();
        assert_eq!(env.read_remaining().unwrap(), vec![7, 8, 9]);
        assert!(env.serialize().unwrap().is_empty());
    }
}
