use crate::pipeline::{ProtocolPipeline, Transformed};
use crate::registry::{PipelineError, ProtocolRegistry};
use crate::storage::ConnectionStorage;
use crate::transitions::StateTransitions;
use bytes::BytesMut;
use crossgrade_protocol_core::{ConnectionState, Direction, PacketEnvelope, ProtocolResult};
use crossgrade_types::ProtocolVersion;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Versions and state of one proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub client_version: ProtocolVersion,
    pub server_version: ProtocolVersion,
    pub state: ConnectionState,
}

pub type SharedConnection = Arc<Mutex<UserConnection>>;

/// Translation state for one client: its pipeline, storage and protocol state.
#[derive(Debug)]
pub struct UserConnection {
    info: ProtocolInfo,
    storage: ConnectionStorage,
    pipeline: ProtocolPipeline,
    transitions: Arc<StateTransitions>,
    debug: bool,
}

impl UserConnection {
    /// Resolve the pipeline and run its init hooks.
    pub fn new(
        registry: &ProtocolRegistry,
        client_version: ProtocolVersion,
        server_version: ProtocolVersion,
        state: ConnectionState,
        debug: bool,
    ) -> Result<Self, PipelineError> {
        let pipeline = registry.pipeline(client_version, server_version, debug)?;
        let info = ProtocolInfo {
            client_version,
            server_version,
            state,
        };
        let mut storage = ConnectionStorage::new();
        pipeline.init(&mut storage, &info);
        debug!("Connection pipeline {:?}", pipeline);
        Ok(Self {
            info,
            storage,
            pipeline,
            transitions: registry.transitions(server_version),
            debug,
        })
    }

    pub fn shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self))
    }

    pub fn info(&self) -> &ProtocolInfo {
        &self.info
    }

    pub fn state(&self) -> ConnectionState {
        self.info.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.info.state != state {
            debug!("Connection state {:?} -> {:?}", self.info.state, state);
            self.info.state = state;
        }
    }

    pub fn storage(&self) -> &ConnectionStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut ConnectionStorage {
        &mut self.storage
    }

    pub fn pipeline(&self) -> &ProtocolPipeline {
        &self.pipeline
    }

    /// Translate one packet and advance the protocol state.
    ///
    /// State triggers are matched in the server's id space: the incoming id for
    /// clientbound packets, the outgoing id for serverbound ones.
    pub fn transform(
        &mut self,
        direction: Direction,
        id: i32,
        payload: BytesMut,
    ) -> ProtocolResult<Transformed> {
        let state = self.info.state;
        let result = self.pipeline.transform(
            direction,
            state,
            PacketEnvelope::new(id, payload),
            &mut self.storage,
        )?;

        let next = match direction {
            Direction::Clientbound => self.transitions.next(direction, state, id),
            Direction::Serverbound if result.is_forwarded() => {
                self.transitions.next(direction, state, result.final_id)
            }
            Direction::Serverbound => None,
        };
        if let Some(next) = next {
            self.set_state(next);
        }
        Ok(result)
    }

    /// Point the connection at a backend speaking `server_version`.
    ///
    /// Resolution happens first; if it fails the current pipeline stays in place.
    pub fn rebuild(
        &mut self,
        registry: &ProtocolRegistry,
        server_version: ProtocolVersion,
    ) -> Result<(), PipelineError> {
        let pipeline = registry.pipeline(self.info.client_version, server_version, self.debug)?;
        self.storage.clear_on_server_switch();
        self.info.server_version = server_version;
        self.pipeline = pipeline;
        self.transitions = registry.transitions(server_version);
        self.pipeline.init(&mut self.storage, &self.info);
        Ok(())
    }
}
