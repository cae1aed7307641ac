use crate::bitset::Bitset;
use crate::component::{ComponentSet, Physical};
use crate::protocol::DeletionCause;
use crate::world::{EntityId, World};

/// Which entities an observer receives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Scope {
    #[default]
    Everything,
    /// Entities whose `Physical` body lies within this distance of the focus
    /// entity's body. Entities without a body are always in scope.
    Radius(f32),
}

/// Authority-side record of what one observer currently holds.
#[derive(Debug, Clone)]
pub struct ClientView {
    in_view: Bitset,
    sent: Box<[ComponentSet]>,
    // deletions from writes that never reached the observer
    owed: Vec<(EntityId, DeletionCause)>,
    focus: EntityId,
    scope: Scope,
}

impl ClientView {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_view: Bitset::new(capacity),
            sent: vec![ComponentSet::EMPTY; capacity].into_boxed_slice(),
            owed: Vec::new(),
            focus: EntityId::NULL,
            scope: Scope::Everything,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn focus(&self) -> EntityId {
        self.focus
    }

    pub fn set_focus(&mut self, focus: EntityId) {
        self.focus = focus;
    }

    pub fn is_in_view(&self, id: EntityId) -> bool {
        self.in_view.get(id.index())
    }

    pub fn in_view_count(&self) -> usize {
        self.in_view.count_ones()
    }

    pub fn sent_membership(&self, id: EntityId) -> ComponentSet {
        self.sent
            .get(id.index())
            .copied()
            .unwrap_or(ComponentSet::EMPTY)
    }

    pub fn owed_deletions(&self) -> &[(EntityId, DeletionCause)] {
        &self.owed
    }

    pub(crate) fn in_view_ids(&self) -> Vec<EntityId> {
        self.in_view
            .iter_ones()
            .map(|index| EntityId::new(index as u32))
            .collect()
    }

    pub(crate) fn mark_sent(&mut self, id: EntityId, membership: ComponentSet) {
        if let Some(sent) = self.sent.get_mut(id.index()) {
            *sent = membership;
            self.in_view.set(id.index());
        }
    }

    pub(crate) fn forget(&mut self, id: EntityId) {
        if let Some(sent) = self.sent.get_mut(id.index()) {
            *sent = ComponentSet::EMPTY;
            self.in_view.unset(id.index());
        }
    }

    /// Takes `id` out of view and queues its deletion for the next update.
    pub(crate) fn owe_deletion(&mut self, id: EntityId, cause: DeletionCause) {
        self.forget(id);
        if !self.owed.iter().any(|(owed, _)| *owed == id) {
            self.owed.push((id, cause));
        }
    }

    pub(crate) fn take_owed(&mut self) -> Vec<(EntityId, DeletionCause)> {
        std::mem::take(&mut self.owed)
    }

    /// Rewrites every component of `id` in full on the next update, if it
    /// is in view.
    pub fn resend(&mut self, id: EntityId) {
        if self.is_in_view(id) {
            self.sent[id.index()] = ComponentSet::EMPTY;
        }
    }

    /// Keeps the set of entities in view but forgets what was sent for
    /// them, so the next update rewrites every component in full.
    pub fn require_full_resync(&mut self) {
        self.sent.iter_mut().for_each(|sent| *sent = ComponentSet::EMPTY);
    }

    /// Forgets everything, so the next update re-creates every entity.
    pub fn reset(&mut self) {
        self.in_view.clear();
        self.sent.iter_mut().for_each(|sent| *sent = ComponentSet::EMPTY);
        self.owed.clear();
    }

    pub fn wants(&self, world: &World, id: EntityId) -> bool {
        let radius = match self.scope {
            Scope::Everything => return true,
            Scope::Radius(radius) => radius,
        };
        if id == self.focus {
            return true;
        }
        let body = match world.get::<Physical>(id) {
            Ok(body) => body,
            Err(_) => return true,
        };
        let center = match world.get::<Physical>(self.focus) {
            Ok(center) => center,
            Err(_) => return false,
        };
        let reach = radius + body.radius();
        body.distance_squared(center.x(), center.y()) <= reach * reach
    }
}
