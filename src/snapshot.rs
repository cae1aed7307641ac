use crate::component::ComponentValue;
use crate::error::Result;
use crate::world::{EntityId, World};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Replicated state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub components: Vec<ComponentValue>,
}

/// Replicated state of a whole world, for inspection and tooling. Local
/// fields and dirty bits are not captured, so an authority world and a
/// fully caught-up mirror produce equal snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn capture(world: &World) -> Self {
        let entities = world
            .entities()
            .map(|id| EntitySnapshot {
                id,
                components: world
                    .membership(id)
                    .iter()
                    .filter_map(|kind| world.value(id, kind))
                    .collect(),
            })
            .collect();
        Self { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities
            .binary_search_by_key(&id, |entity| entity.id)
            .ok()
            .map(|index| &self.entities[index])
    }

    /// Ids present in only one snapshot or with differing components.
    pub fn differing_entities(&self, other: &WorldSnapshot) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .iter()
            .chain(&other.entities)
            .map(|entity| entity.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.retain(|id| self.entity(*id) != other.entity(*id));
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    MessagePack,
    Bincode,
}

pub struct SnapshotSerializer {
    format: SnapshotFormat,
}

impl SnapshotSerializer {
    pub fn new(format: SnapshotFormat) -> Self {
        Self { format }
    }

    pub fn json() -> Self {
        Self::new(SnapshotFormat::Json)
    }

    pub fn messagepack() -> Self {
        Self::new(SnapshotFormat::MessagePack)
    }

    pub fn bincode() -> Self {
        Self::new(SnapshotFormat::Bincode)
    }

    pub fn format(&self) -> SnapshotFormat {
        self.format
    }

    pub fn serialize(&self, snapshot: &WorldSnapshot) -> Result<Bytes> {
        match self.format {
            SnapshotFormat::Json => {
                let json = serde_json::to_vec(snapshot)?;
                Ok(Bytes::from(json))
            }
            SnapshotFormat::MessagePack => {
                let msgpack = rmp_serde::to_vec(snapshot)?;
                Ok(Bytes::from(msgpack))
            }
            SnapshotFormat::Bincode => {
                let bincode_data = bincode::serialize(snapshot)?;
                Ok(Bytes::from(bincode_data))
            }
        }
    }

    pub fn deserialize(&self, data: &[u8]) -> Result<WorldSnapshot> {
        match self.format {
            SnapshotFormat::Json => Ok(serde_json::from_slice(data)?),
            SnapshotFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
            SnapshotFormat::Bincode => Ok(bincode::deserialize(data)?),
        }
    }
}
