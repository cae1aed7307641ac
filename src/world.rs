use crate::bitset::Bitset;
use crate::component::{Component, ComponentKind, ComponentSet, ComponentTables, ComponentValue};
use crate::error::{ReplicaError, Result};
use crate::protocol::DeletionCause;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of one entity. `0` is reserved as "no entity".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    pub const NULL: EntityId = EntityId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct World {
    label: String,
    capacity: usize,
    alive: Bitset,
    membership: Box<[ComponentSet]>,
    pending: Bitset,
    causes: Box<[DeletionCause]>,
    tables: ComponentTables,
    live_count: usize,
}

impl World {
    pub fn new(capacity: usize) -> Self {
        Self::with_label("world", capacity)
    }

    pub fn with_label(label: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.clamp(2, u32::MAX as usize);
        Self {
            label: label.into(),
            capacity,
            alive: Bitset::new(capacity),
            membership: vec![ComponentSet::EMPTY; capacity].into_boxed_slice(),
            pending: Bitset::new(capacity),
            causes: vec![DeletionCause::SILENT; capacity].into_boxed_slice(),
            tables: ComponentTables::new(capacity),
            live_count: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of slots, including the reserved null slot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    fn check_id(&self, id: EntityId) -> Result<()> {
        if id.is_null() || id.index() >= self.capacity {
            return Err(ReplicaError::InvalidEntityId {
                id: u64::from(id.get()),
                max: self.capacity,
            });
        }
        Ok(())
    }

    /// Claims the lowest free slot.
    pub fn create(&mut self) -> Result<EntityId> {
        let index = (1..self.capacity)
            .find(|index| !self.alive.get(*index))
            .ok_or(ReplicaError::CapacityExhausted { max: self.capacity })?;

        let id = EntityId::new(index as u32);
        self.claim(id);
        Ok(id)
    }

    /// Brings `id` to life with no components. Returns `false` if it already
    /// existed.
    pub fn spawn_at(&mut self, id: EntityId) -> Result<bool> {
        self.check_id(id)?;
        if self.alive.get(id.index()) {
            return Ok(false);
        }
        self.claim(id);
        Ok(true)
    }

    fn claim(&mut self, id: EntityId) {
        self.alive.set(id.index());
        self.membership[id.index()] = ComponentSet::EMPTY;
        self.causes[id.index()] = DeletionCause::SILENT;
        self.live_count += 1;
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.alive.get(id.index())
    }

    /// Calling this for a dead entity is a contract violation.
    pub fn has<C: Component>(&self, id: EntityId) -> bool {
        self.has_kind(id, C::KIND)
    }

    pub fn has_kind(&self, id: EntityId, kind: ComponentKind) -> bool {
        debug_assert!(
            self.has_entity(id),
            "component query on dead entity {} in {}",
            id,
            self.label
        );
        self.membership(id).contains(kind)
    }

    /// Kinds attached to `id`; empty for dead or out-of-range ids.
    pub fn membership(&self, id: EntityId) -> ComponentSet {
        self.membership
            .get(id.index())
            .copied()
            .unwrap_or(ComponentSet::EMPTY)
    }

    /// Attaches a default-valued component. A second add of the same kind is
    /// an error, never an overwrite.
    pub fn add<C: Component>(&mut self, id: EntityId) -> Result<&mut C> {
        self.insert_kind(id, C::KIND)?;
        Ok(C::storage_mut(&mut self.tables).get_mut(id))
    }

    pub fn get<C: Component>(&self, id: EntityId) -> Result<&C> {
        self.require(id, C::KIND)?;
        Ok(C::storage(&self.tables).get(id))
    }

    pub fn get_mut<C: Component>(&mut self, id: EntityId) -> Result<&mut C> {
        self.require(id, C::KIND)?;
        Ok(C::storage_mut(&mut self.tables).get_mut(id))
    }

    pub fn remove<C: Component>(&mut self, id: EntityId) -> Result<()> {
        self.remove_kind(id, C::KIND)
    }

    fn require(&self, id: EntityId, kind: ComponentKind) -> Result<()> {
        if !self.has_entity(id) {
            return Err(ReplicaError::NoSuchEntity(id));
        }
        if !self.membership(id).contains(kind) {
            return Err(ReplicaError::ComponentMissing { entity: id, kind });
        }
        Ok(())
    }

    pub(crate) fn insert_kind(&mut self, id: EntityId, kind: ComponentKind) -> Result<()> {
        if !self.has_entity(id) {
            return Err(ReplicaError::NoSuchEntity(id));
        }
        let membership = &mut self.membership[id.index()];
        if membership.contains(kind) {
            return Err(ReplicaError::ComponentExists { entity: id, kind });
        }
        membership.insert(kind);
        self.tables.insert_default(kind, id);
        self.tables.append_dense(kind, id);
        Ok(())
    }

    pub(crate) fn remove_kind(&mut self, id: EntityId, kind: ComponentKind) -> Result<()> {
        self.require(id, kind)?;
        self.membership[id.index()].remove(kind);
        self.tables.reset(kind, id);
        Ok(())
    }

    pub fn value(&self, id: EntityId, kind: ComponentKind) -> Option<ComponentValue> {
        if !self.has_entity(id) || !self.membership(id).contains(kind) {
            return None;
        }
        Some(self.tables.value(kind, id))
    }

    pub(crate) fn tables(&self) -> &ComponentTables {
        &self.tables
    }

    pub(crate) fn tables_mut(&mut self) -> &mut ComponentTables {
        &mut self.tables
    }

    /// Marks `id` for teardown at the end of the tick with no exit effect.
    pub fn request_deletion(&mut self, id: EntityId) {
        self.request_deletion_with_cause(id, DeletionCause::SILENT);
    }

    /// Marks `id` for teardown at the end of the tick. The entity stays fully
    /// readable until [`World::process_deletions`] runs.
    pub fn request_deletion_with_cause(&mut self, id: EntityId, cause: DeletionCause) {
        if !self.has_entity(id) {
            log::warn!("{}: deletion requested for dead entity {}", self.label, id);
            return;
        }
        self.pending.set(id.index());
        self.causes[id.index()] = cause;
    }

    pub fn is_pending_deletion(&self, id: EntityId) -> bool {
        self.pending.get(id.index())
    }

    pub fn deletion_cause(&self, id: EntityId) -> Option<DeletionCause> {
        if !self.is_pending_deletion(id) {
            return None;
        }
        Some(self.causes[id.index()])
    }

    pub fn process_deletions(&mut self) -> usize {
        let doomed: Vec<EntityId> = self
            .pending
            .iter_ones()
            .take(self.capacity)
            .map(|index| EntityId::new(index as u32))
            .collect();
        self.pending.clear();

        doomed.into_iter().filter(|id| self.destroy(*id)).count()
    }

    pub fn destroy(&mut self, id: EntityId) -> bool {
        if !self.has_entity(id) {
            return false;
        }
        let index = id.index();
        for kind in self.membership[index].iter() {
            self.tables.reset(kind, id);
        }
        self.membership[index] = ComponentSet::EMPTY;
        self.causes[index] = DeletionCause::SILENT;
        self.pending.unset(index);
        self.alive.unset(index);
        self.live_count = self.live_count.saturating_sub(1);
        true
    }

    pub fn rebuild_dense_indices(&mut self) {
        self.tables.clear_dense();

        let mut counted = 0;
        let mut overflowed = ComponentSet::EMPTY;
        for index in self.alive.iter_ones().take(self.capacity) {
            counted += 1;
            let id = EntityId::new(index as u32);
            for kind in self.membership[index].iter() {
                if !self.tables.push_dense(kind, id) && !overflowed.contains(kind) {
                    overflowed.insert(kind);
                    log::warn!(
                        "{}: dense index for {:?} overflowed {} entries, clamping",
                        self.label,
                        kind,
                        self.capacity
                    );
                }
            }
        }

        if counted != self.live_count {
            log::warn!(
                "{}: live count {} disagrees with tracker ({}), resetting",
                self.label,
                self.live_count,
                counted
            );
            self.live_count = counted;
        }
    }

    /// Live entity ids in ascending order, bounded by the capacity.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive
            .iter_ones()
            .take(self.capacity)
            .map(|index| EntityId::new(index as u32))
    }

    pub fn for_each_entity(&self, mut f: impl FnMut(EntityId)) {
        for id in self.entities() {
            f(id);
        }
    }

    pub fn for_each<C: Component>(&mut self, f: impl FnMut(EntityId, &mut C)) {
        let membership = &self.membership;
        let alive = &self.alive;
        C::storage_mut(&mut self.tables).for_each_mut(
            self.capacity,
            |id| alive.get(id.index()) && membership[id.index()].contains(C::KIND),
            f,
        );
    }

    pub fn ids<C: Component>(&self) -> &[EntityId] {
        C::storage(&self.tables).dense()
    }

    /// Kinds on `id` with at least one dirty field.
    pub fn dirty_kinds(&self, id: EntityId) -> ComponentSet {
        self.membership(id)
            .iter()
            .filter(|kind| self.tables.dirty_state(*kind, id) != 0)
            .collect()
    }

    pub fn clear_dirty(&mut self) {
        let Self {
            alive,
            membership,
            tables,
            capacity,
            ..
        } = self;
        for index in alive.iter_ones().take(*capacity) {
            let id = EntityId::new(index as u32);
            for kind in membership[index].iter() {
                tables.clear_dirty(kind, id);
            }
        }
    }

    /// Copies `id` with all its components into `dst` at `dst_id`, replacing
    /// whatever `dst` held there.
    pub fn copy_entity_into(&self, id: EntityId, dst: &mut World, dst_id: EntityId) -> Result<()> {
        if !self.has_entity(id) {
            return Err(ReplicaError::NoSuchEntity(id));
        }
        dst.check_id(dst_id)?;
        dst.destroy(dst_id);
        dst.spawn_at(dst_id)?;

        let membership = self.membership(id);
        for kind in membership.iter() {
            self.tables.copy_to(kind, id, &mut dst.tables, dst_id);
            dst.tables.append_dense(kind, dst_id);
        }
        dst.membership[dst_id.index()] = membership;
        Ok(())
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("live_count", &self.live_count)
            .field("pending", &self.pending.count_ones())
            .finish()
    }
}
