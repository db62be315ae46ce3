//! Per-connection trackers shared by several version pairs.

use crate::storage::StorableObject;
use crossgrade_types::{Environment, Identifier, Vec3d};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityType(pub Identifier);

impl EntityType {
    pub fn player() -> Self {
        Self(Identifier::minecraft("player"))
    }

    pub fn is_player(&self) -> bool {
        *self == Self::player()
    }
}

/// Entity ids the client currently knows about.
#[derive(Debug, Default)]
pub struct EntityTracker {
    entities: HashMap<i32, EntityType>,
    client_entity_id: Option<i32>,
}

impl EntityTracker {
    pub fn add_entity(&mut self, id: i32, ty: EntityType) {
        self.entities.insert(id, ty);
    }

    pub fn entity_type(&self, id: i32) -> Option<&EntityType> {
        self.entities.get(&id)
    }

    pub fn has_entity(&self, id: i32) -> bool {
        self.entities.contains_key(&id)
    }

    /// Unknown ids are ignored.
    pub fn remove(&mut self, id: i32) {
        self.entities.remove(&id);
    }

    /// The server told the client its own entity id.
    pub fn on_join(&mut self, id: i32) {
        if let Some(previous) = self.client_entity_id.replace(id) {
            self.entities.remove(&previous);
        }
        self.entities.insert(id, EntityType::player());
    }

    pub fn client_entity_id(&self) -> Option<i32> {
        self.client_entity_id
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.client_entity_id = None;
    }
}

impl StorableObject for EntityTracker {}

/// The world the client is in.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldTracker {
    environment: Environment,
    dimension: Option<String>,
}

impl Default for WorldTracker {
    fn default() -> Self {
        Self {
            environment: Environment::Normal,
            dimension: None,
        }
    }
}

impl WorldTracker {
    /// Join game and respawn replace the whole world state.
    pub fn set_world(&mut self, environment: Environment, dimension: Option<String>) {
        self.environment = environment;
        self.dimension = dimension;
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn dimension(&self) -> Option<&str> {
        self.dimension.as_deref()
    }
}

impl StorableObject for WorldTracker {}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct InventoryTracker {
    open_window: Option<i32>,
    menu_type: Option<i32>,
    last_clicked_window: Option<i32>,
}

impl InventoryTracker {
    pub fn open(&mut self, window: i32, menu_type: i32) {
        self.open_window = Some(window);
        self.menu_type = Some(menu_type);
    }

    pub fn close(&mut self) {
        self.open_window = None;
        self.menu_type = None;
    }

    pub fn clicked(&mut self, window: i32) {
        self.last_clicked_window = Some(window);
    }

    pub fn open_window(&self) -> Option<i32> {
        self.open_window
    }

    pub fn menu_type(&self) -> Option<i32> {
        self.menu_type
    }

    pub fn last_clicked_window(&self) -> Option<i32> {
        self.last_clicked_window
    }
}

impl StorableObject for InventoryTracker {}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MovementTracker {
    position: Option<Vec3d>,
    on_ground: bool,
    sneaking: bool,
}

impl MovementTracker {
    pub fn update(&mut self, position: Vec3d, on_ground: bool) {
        self.position = Some(position);
        self.on_ground = on_ground;
    }

    pub fn set_on_ground(&mut self, on_ground: bool) {
        self.on_ground = on_ground;
    }

    pub fn set_sneaking(&mut self, sneaking: bool) {
        self.sneaking = sneaking;
    }

    pub fn position(&self) -> Option<Vec3d> {
        self.position
    }

    pub fn on_ground(&self) -> bool {
        self.on_ground
    }

    pub fn sneaking(&self) -> bool {
        self.sneaking
    }
}

impl StorableObject for MovementTracker {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_registers_player() {
        let mut tracker = EntityTracker::default();
        tracker.on_join(42);
        assert_eq!(tracker.client_entity_id(), Some(42));
        assert!(tracker.entity_type(42).unwrap().is_player());

        // Rejoining moves the player to the new id.
        tracker.on_join(7);
        assert!(!tracker.has_entity(42));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut tracker = EntityTracker::default();
        tracker.add_entity(3, EntityType(Identifier::minecraft("zombie")));
        tracker.remove(99);
        assert_eq!(tracker.len(), 1);
        tracker.remove(3);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_world_replaced_wholesale() {
        let mut world = WorldTracker::default();
        world.set_world(Environment::End, Some("minecraft:the_end".into()));
        world.set_world(Environment::Nether, None);
        assert_eq!(world.environment(), Environment::Nether);
        assert_eq!(world.dimension(), None);
    }

    #[test]
    fn test_inventory_close_keeps_last_click() {
        let mut inventory = InventoryTracker::default();
        inventory.open(3, 12);
        inventory.clicked(3);
        inventory.close();
        assert_eq!(inventory.open_window(), None);
        assert_eq!(inventory.last_clicked_window(), Some(3));
    }
}
