pub mod bitset;
pub mod codec;
pub mod field;
pub mod component;
pub mod storage;
pub mod world;
pub mod view;
pub mod protocol;
pub mod deletion;
pub mod ring;
pub mod transport;
pub mod rate_limit;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod error;
pub mod debug;

pub use codec::{
    Decoder, Encoder,
};

pub use field::{
    BoundedString, WireField, WireType,
};

pub use component::{
    Arena, Component, ComponentKind, ComponentSet, ComponentTables, ComponentValue,
    DropItem, Flower, Health, Mob, Nickname, Petal, Physical, PlayerInfo, Relations,
    Replicate,
};

pub use world::{
    EntityId, World,
};

pub use view::{
    ClientView, Scope,
};

pub use protocol::{
    apply_update, rollback_update, write_update, ApplyReport, DeletionCause, WriteReport,
};

pub use deletion::{
    DeletionSimulation, Fade,
};

pub use ring::{
    RingConsumer, RingProducer, RingStats, SharedMemory,
};

pub use transport::{
    Delivery, FrameDecoder, MemoryTransport, RingTransport, StreamTransport, Transport,
};

#[cfg(feature = "async")]
pub use transport::AsyncTransport;

pub use rate_limit::{
    TickLimiter, TickStats,
};

pub use schema::{
    ComponentSchema, FieldSchema, SchemaRegistry, SchemaVersion, SCHEMA_VERSION,
};

pub use session::{
    Authority, ClientId, GameLogic, Presentation, ReplicaConfig, TickReport,
};

pub use snapshot::{
    EntitySnapshot, SnapshotFormat, SnapshotSerializer, WorldSnapshot,
};

pub use error::{
    ReplicaError, Result,
};

pub use debug::{
    format_bytes, init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_snapshot, log_world, trace_apply, trace_ring_drop, trace_write,
};
