use crossgrade_protocol_core::{ConnectionState, Direction};
use std::collections::HashMap;

/// Packets that move a connection to another state, keyed in the server's id
/// space.
#[derive(Debug, Clone, Default)]
pub struct StateTransitions {
    map: HashMap<(Direction, ConnectionState, i32), ConnectionState>,
}

impl StateTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(
        mut self,
        direction: Direction,
        from: ConnectionState,
        packet_id: i32,
        to: ConnectionState,
    ) -> Self {
        self.add(direction, from, packet_id, to);
        self
    }

    /// Register a trigger. A second trigger for the same key is ignored.
    pub fn add(
        &mut self,
        direction: Direction,
        from: ConnectionState,
        packet_id: i32,
        to: ConnectionState,
    ) {
        self.map.entry((direction, from, packet_id)).or_insert(to);
    }

    pub fn next(
        &self,
        direction: Direction,
        state: ConnectionState,
        packet_id: i32,
    ) -> Option<ConnectionState> {
        self.map.get(&(direction, state, packet_id)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_depends_on_current_state() {
        let transitions = StateTransitions::new()
            .with(Direction::Serverbound, ConnectionState::Login, 0x03, ConnectionState::Configuration)
            .with(Direction::Serverbound, ConnectionState::Configuration, 0x03, ConnectionState::Play);

        assert_eq!(
            transitions.next(Direction::Serverbound, ConnectionState::Login, 0x03),
            Some(ConnectionState::Configuration)
        );
        assert_eq!(
            transitions.next(Direction::Serverbound, ConnectionState::Configuration, 0x03),
            Some(ConnectionState::Play)
        );
        assert_eq!(transitions.next(Direction::Clientbound, ConnectionState::Login, 0x03), None);
        assert_eq!(transitions.next(Direction::Serverbound, ConnectionState::Play, 0x03), None);
    }

    #[test]
    fn test_duplicate_trigger_ignored() {
        let transitions = StateTransitions::new()
            .with(Direction::Clientbound, ConnectionState::Login, 0x02, ConnectionState::Play)
            .with(Direction::Clientbound, ConnectionState::Login, 0x02, ConnectionState::Status);
        assert_eq!(
            transitions.next(Direction::Clientbound, ConnectionState::Login, 0x02),
            Some(ConnectionState::Play)
        );
    }
}
