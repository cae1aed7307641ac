use crate::component::Replicate;
use crate::world::EntityId;

/// Direct-indexed storage for one component type plus a dense list of the
/// entities carrying it.
pub struct ComponentStorage<C> {
    slots: Box<[C]>,
    dense: Vec<EntityId>,
    limit: usize,
}

impl<C: Replicate + Default + Clone> ComponentStorage<C> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![C::default(); capacity].into_boxed_slice(),
            dense: Vec::new(),
            limit: capacity,
        }
    }

    /// Resets the slot of `id` to its default value and returns it.
    pub(crate) fn insert(&mut self, id: EntityId) -> &mut C {
        let slot = &mut self.slots[id.index()];
        *slot = C::default();
        slot
    }

    pub(crate) fn reset(&mut self, id: EntityId) {
        self.slots[id.index()] = C::default();
    }

    pub(crate) fn get(&self, id: EntityId) -> &C {
        &self.slots[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> &mut C {
        &mut self.slots[id.index()]
    }

    pub(crate) fn clear_dense(&mut self) {
        self.dense.clear();
    }

    /// Appends `id` to the dense list. Returns `false` once the list is full.
    pub(crate) fn push_dense(&mut self, id: EntityId) -> bool {
        if self.dense.len() >= self.limit {
            return false;
        }
        self.dense.push(id);
        true
    }

    /// Appends `id` unless it is already listed. Used for additions between
    /// rebuilds.
    pub(crate) fn append_dense(&mut self, id: EntityId) {
        if self.dense.len() < self.limit && !self.dense.contains(&id) {
            self.dense.push(id);
        }
    }

    /// Visits at most `cap` dense entries, skipping ids `keep` rejects.
    pub(crate) fn for_each_mut(
        &mut self,
        cap: usize,
        mut keep: impl FnMut(EntityId) -> bool,
        mut f: impl FnMut(EntityId, &mut C),
    ) {
        let Self { slots, dense, .. } = self;
        for &id in dense.iter().take(cap) {
            if !keep(id) {
                continue;
            }
            if let Some(slot) = slots.get_mut(id.index()) {
                f(id, slot);
            }
        }
    }

    pub fn dense(&self) -> &[EntityId] {
        &self.dense
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Mob;

    #[test]
    fn test_insert_resets_slot() {
        let mut storage: ComponentStorage<Mob> = ComponentStorage::new(8);
        let id = EntityId::new(3);

        storage.get_mut(id).set_id(9);
        assert_eq!(storage.get(id).id(), 9);

        storage.insert(id);
        assert_eq!(storage.get(id).id(), 0);
        assert_eq!(storage.get(id).dirty_state(), 0);
    }

    #[test]
    fn test_dense_list_is_bounded() {
        let mut storage: ComponentStorage<Mob> = ComponentStorage::new(2);
        assert!(storage.push_dense(EntityId::new(1)));
        assert!(storage.push_dense(EntityId::new(0)));
        assert!(!storage.push_dense(EntityId::new(1)));
        assert_eq!(storage.len(), 2);

        storage.clear_dense();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_append_dense_skips_duplicates() {
        let mut storage: ComponentStorage<Mob> = ComponentStorage::new(4);
        storage.append_dense(EntityId::new(2));
        storage.append_dense(EntityId::new(2));
        assert_eq!(storage.dense(), &[EntityId::new(2)]);

        let mut visited = Vec::new();
        storage.for_each_mut(4, |_| true, |id, mob| {
            mob.set_rarity(1);
            visited.push(id);
        });
        assert_eq!(visited, vec![EntityId::new(2)]);
        assert_eq!(storage.get(EntityId::new(2)).rarity(), 1);
    }
}
