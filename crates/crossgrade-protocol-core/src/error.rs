use crate::codec::CodecError;
use thiserror::Error;

/// Errors raised while rewriting a single packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte stream could not be decoded; the connection can no longer be trusted.
    #[error("failed to decode {ty} at byte {offset}: {source}")]
    Decode {
        ty: &'static str,
        offset: usize,
        #[source]
        source: CodecError,
    },
    /// A value could not be written with the requested field type.
    #[error("failed to encode {ty}: {source}")]
    Encode {
        ty: &'static str,
        #[source]
        source: CodecError,
    },
    /// A handler read a queued value as the wrong type.
    #[error("expected {expected} but the next field is {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// `get`/`set` referenced a written field that does not exist.
    #[error("no written {ty} field at index {index}")]
    MissingField { ty: &'static str, index: usize },
    /// A handler needed connection state that was never stored.
    #[error("connection storage has no {0}")]
    MissingStorage(&'static str),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl ProtocolError {
    /// Malformed-stream errors end the connection; everything else only drops the packet.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Decode { .. })
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
