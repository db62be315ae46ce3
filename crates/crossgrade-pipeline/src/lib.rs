pub mod connection;
pub mod pipeline;
pub mod registry;
pub mod rewriter;
pub mod storage;
pub mod trackers;
pub mod transformer;
pub mod transitions;

pub use connection::{ProtocolInfo, SharedConnection, UserConnection};
pub use pipeline::{Diagnostic, DropReason, Outcome, ProtocolPipeline, RawPacket, Transformed};
pub use registry::{PipelineError, ProtocolRegistry, ProtocolRegistryBuilder, RegistryError, TransformerPath};
pub use rewriter::{
    ComponentKeys, ComponentRewriter, FlatItemRewriter, JsonToTagComponents,
    StructuredItemRewriter,
};
pub use storage::{ConnectionStorage, StorableObject};
pub use trackers::{EntityTracker, EntityType, InventoryTracker, MovementTracker, WorldTracker};
pub use transformer::{FieldChain, Handler, PacketContext, ProtocolTransformer, Remap, TransformerBuilder};
pub use transitions::StateTransitions;
