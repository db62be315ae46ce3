//! Protocol state changes every backend version goes through, keyed by the
//! backend's own packet ids.

use crossgrade_pipeline::{ProtocolRegistryBuilder, StateTransitions};
use crossgrade_protocol_core::{ConnectionState, Direction};
use crossgrade_types::{ProtocolVersion, KNOWN_VERSIONS, V1_20_5};

// Login
const LOGIN_SUCCESS: i32 = 0x02;
const LOGIN_ACKNOWLEDGED: i32 = 0x03;

/// Serverbound "finish configuration"; 1.20.5 inserted the cookie response before it.
fn finish_configuration(version: ProtocolVersion) -> i32 {
    if version >= V1_20_5 {
        0x03
    } else {
        0x02
    }
}

/// Serverbound "configuration acknowledged" in play.
fn configuration_acknowledged(version: ProtocolVersion) -> i32 {
    if version >= V1_20_5 {
        0x0C
    } else {
        0x0B
    }
}

pub fn transitions_for(version: ProtocolVersion) -> StateTransitions {
    if !version.has_configuration_state() {
        return StateTransitions::new().with(
            Direction::Clientbound,
            ConnectionState::Login,
            LOGIN_SUCCESS,
            ConnectionState::Play,
        );
    }
    StateTransitions::new()
        .with(
            Direction::Serverbound,
            ConnectionState::Login,
            LOGIN_ACKNOWLEDGED,
            ConnectionState::Configuration,
        )
        .with(
            Direction::Serverbound,
            ConnectionState::Configuration,
            finish_configuration(version),
            ConnectionState::Play,
        )
        .with(
            Direction::Serverbound,
            ConnectionState::Play,
            configuration_acknowledged(version),
            ConnectionState::Configuration,
        )
}

pub fn register_transitions(builder: &mut ProtocolRegistryBuilder) {
    for &version in KNOWN_VERSIONS {
        builder.register_transitions(version, transitions_for(version));
    }
}
