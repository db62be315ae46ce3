use crossgrade_protocol_core::{ProtocolError, ProtocolResult};
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// State a transformer keeps for one connection.
pub trait StorableObject: Any + Send {
    /// Whether the value is dropped when the player moves to another backend.
    fn clear_on_server_switch(&self) -> bool {
        true
    }
}

struct Entry {
    value: Box<dyn Any + Send>,
    clear_on_switch: bool,
}

/// Per-connection, type-keyed storage. At most one value per type.
#[derive(Default)]
pub struct ConnectionStorage {
    entries: HashMap<TypeId, Entry>,
}

impl ConnectionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: StorableObject>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<T>())
    }

    pub fn get_mut<T: StorableObject>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_mut::<T>())
    }

    /// Like [`get`](Self::get), failing with [`ProtocolError::MissingStorage`].
    pub fn require<T: StorableObject>(&self) -> ProtocolResult<&T> {
        self.get::<T>()
            .ok_or(ProtocolError::MissingStorage(std::any::type_name::<T>()))
    }

    pub fn require_mut<T: StorableObject>(&mut self) -> ProtocolResult<&mut T> {
        self.get_mut::<T>()
            .ok_or(ProtocolError::MissingStorage(std::any::type_name::<T>()))
    }

    /// Store `value`, returning the one it replaced.
    pub fn put<T: StorableObject>(&mut self, value: T) -> Option<T> {
        let clear_on_switch = value.clear_on_server_switch();
        let previous = self.entries.insert(
            TypeId::of::<T>(),
            Entry {
                value: Box::new(value),
                clear_on_switch,
            },
        )?;
        previous.value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn has<T: StorableObject>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: StorableObject>(&mut self) -> Option<T> {
        let entry = self.entries.remove(&TypeId::of::<T>())?;
        entry.value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn get_or_insert_with<T: StorableObject>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.has::<T>() {
            self.put(init());
        }
        match self.get_mut::<T>() {
            Some(value) => value,
            None => unreachable!("value of this type was just stored"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every value flagged to be cleared when switching backends.
    pub fn clear_on_server_switch(&mut self) {
        self.entries.retain(|_, entry| !entry.clear_on_switch);
    }
}

impl std::fmt::Debug for ConnectionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStorage")
            .field("entries", &self.entries.len())
            .finish()
    }
}
