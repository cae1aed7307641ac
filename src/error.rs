use crate::component::ComponentKind;
use crate::world::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Entity capacity exhausted: all {max} slots are live")]
    CapacityExhausted { max: usize },

    #[error("Entity {0} does not exist")]
    NoSuchEntity(EntityId),

    #[error("Entity {entity} has no {kind:?} component")]
    ComponentMissing { entity: EntityId, kind: ComponentKind },

    #[error("Entity {entity} already has a {kind:?} component")]
    ComponentExists { entity: EntityId, kind: ComponentKind },

    #[error("Entity id {id} is outside [1, {max})")]
    InvalidEntityId { id: u64, max: usize },

    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Varint does not fit in 64 bits")]
    VarintOverflow,

    #[error("Value {value} does not fit in {wire}")]
    ValueOutOfRange { wire: &'static str, value: u64 },

    #[error("Unknown bits {bits:#x} in {context} mask")]
    UnknownBits { context: &'static str, bits: u64 },

    #[error("Encode buffer full: needed {needed} bytes, limit {limit}")]
    BufferFull { needed: usize, limit: usize },

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ReplicaError {
    /// True for errors caused by malformed or truncated wire input.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ReplicaError::UnexpectedEof { .. }
                | ReplicaError::VarintOverflow
                | ReplicaError::ValueOutOfRange { .. }
                | ReplicaError::UnknownBits { .. }
                | ReplicaError::InvalidEntityId { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
