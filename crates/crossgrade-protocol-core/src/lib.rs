pub mod chunk;
pub mod codec;
pub mod component;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod item;
pub mod state;
pub mod types;

pub use chunk::{ChunkSection, PalettedContainer};
pub use codec::*;
pub use connection::{Connection, ConnectionReader, ConnectionWriter, FrameCodec};
pub use envelope::PacketEnvelope;
pub use error::{ProtocolError, ProtocolResult};
pub use item::*;
pub use state::*;
pub use types::{FieldType, FieldValue, Value};
