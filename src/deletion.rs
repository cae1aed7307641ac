use crate::error::{ReplicaError, Result};
use crate::protocol::DeletionCause;
use crate::world::{EntityId, World};

/// Exit-effect progress of one dying entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    /// Id the entity had in the live world.
    pub source: EntityId,
    pub cause: DeletionCause,
    /// `0.0` when the entity died, `1.0` when the effect is done.
    pub progress: f32,
}

/// A second world holding copies of entities that died with a visible
/// cause, kept alive only until their exit effect finishes.
pub struct DeletionSimulation {
    world: World,
    fades: Vec<Option<Fade>>,
}

impl DeletionSimulation {
    pub fn new(capacity: usize) -> Self {
        let world = World::with_label("deletion", capacity);
        let fades = vec![None; world.capacity()];
        Self { world, fades }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn len(&self) -> usize {
        self.world.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fade(&self, id: EntityId) -> Option<Fade> {
        self.fades.get(id.index()).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, Fade)> + '_ {
        self.world
            .entities()
            .filter_map(|id| self.fade(id).map(|fade| (id, fade)))
    }

    /// Copies `id` out of `live` into a fresh slot before it is torn down
    /// there. Returns the slot.
    pub fn spawn_from(&mut self, live: &World, id: EntityId, cause: DeletionCause) -> Result<EntityId> {
        if !live.has_entity(id) {
            return Err(ReplicaError::NoSuchEntity(id));
        }
        let slot = self.world.create()?;
        live.copy_entity_into(id, &mut self.world, slot)?;
        self.fades[slot.index()] = Some(Fade {
            source: id,
            cause,
            progress: 0.0,
        });
        log::trace!("fading {} as {} with cause {}", id, slot, cause.0);
        Ok(slot)
    }

    /// Advances every fade by `delta * rate` and disposes of finished ones.
    /// Returns how many were disposed.
    pub fn tick(&mut self, delta: f32, rate: f32) -> usize {
        let step = (delta * rate).max(0.0);
        let mut finished = Vec::new();

        for id in self.world.entities() {
            match self.fades.get_mut(id.index()) {
                Some(Some(fade)) => {
                    fade.progress = (fade.progress + step).min(1.0);
                    if fade.progress >= 1.0 {
                        finished.push(id);
                    }
                }
                _ => finished.push(id),
            }
        }

        for id in &finished {
            self.world.destroy(*id);
            self.fades[id.index()] = None;
        }
        self.world.rebuild_dense_indices();
        finished.len()
    }
}
