use bytes::BytesMut;
use crossgrade_pipeline::{ConnectionStorage, ProtocolInfo, ProtocolPipeline, ProtocolTransformer, Transformed};
use crossgrade_protocol_core::{ConnectionState, Direction, PacketEnvelope};
use std::sync::Arc;

/// One transformer wrapped in a pipeline, with its own storage.
pub struct Harness {
    pub pipeline: ProtocolPipeline,
    pub storage: ConnectionStorage,
}

impl Harness {
    pub fn new(transformer: ProtocolTransformer) -> Self {
        Self::chain(vec![transformer])
    }

    /// Transformers ordered from the client side to the server side.
    pub fn chain(transformers: Vec<ProtocolTransformer>) -> Self {
        let client = transformers[0].client_version();
        let server = transformers[transformers.len() - 1].server_version();
        let path: Vec<Arc<ProtocolTransformer>> = transformers.into_iter().map(Arc::new).collect();
        let pipeline = ProtocolPipeline::new(Arc::from(path), client, server).with_debug(true);
        let mut storage = ConnectionStorage::new();
        pipeline.init(
            &mut storage,
            &ProtocolInfo {
                client_version: client,
                server_version: server,
                state: ConnectionState::Play,
            },
        );
        Self { pipeline, storage }
    }

    pub fn transform_in(
        &mut self,
        state: ConnectionState,
        direction: Direction,
        id: i32,
        payload: BytesMut,
    ) -> Transformed {
        self.pipeline
            .transform(direction, state, PacketEnvelope::new(id, payload), &mut self.storage)
            .unwrap()
    }

    pub fn transform(&mut self, direction: Direction, id: i32, payload: BytesMut) -> Transformed {
        self.transform_in(ConnectionState::Play, direction, id, payload)
    }

    /// Run a play packet that must come out as exactly one packet; returns its payload.
    pub fn single(&mut self, direction: Direction, id: i32, payload: BytesMut) -> BytesMut {
        let mut result = self.transform(direction, id, payload);
        assert!(result.is_forwarded(), "packet 0x{id:02X} dropped: {:?}", result.outcome);
        assert_eq!(result.packets.len(), 1);
        result.packets.remove(0).payload
    }
}
