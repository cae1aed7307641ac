use crate::bitset::Bitset;
use crate::codec::{Decoder, Encoder};
use crate::component::{ComponentSet, ComponentTables};
use crate::deletion::DeletionSimulation;
use crate::error::{ReplicaError, Result};
use crate::view::ClientView;
use crate::world::{EntityId, World};
use serde::{Deserialize, Serialize};

/// Why an entity left the world. Zero is silent; other values select an
/// exit effect on the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionCause(pub u8);

impl DeletionCause {
    pub const SILENT: DeletionCause = DeletionCause(0);
    pub const DEATH: DeletionCause = DeletionCause(1);
    pub const COLLECTED: DeletionCause = DeletionCause(2);

    pub fn is_silent(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub deleted: usize,
    pub created: usize,
    pub updated: usize,
}

impl WriteReport {
    pub fn is_empty(&self) -> bool {
        self.deleted == 0 && self.created == 0 && self.updated == 0
    }
}

// Why an in-view entity has to leave the observer's view, if it does.
fn departure(world: &World, view: &ClientView, id: EntityId) -> Option<DeletionCause> {
    if !world.has_entity(id) {
        Some(DeletionCause::SILENT)
    } else if let Some(cause) = world.deletion_cause(id) {
        Some(cause)
    } else if !view.wants(world, id) {
        Some(DeletionCause::SILENT)
    } else {
        None
    }
}

/// Writes one update for the observer behind `view` and records what it
/// now holds.
///
/// Layout, integers varint unless noted: `(entity, cause: u8)* 0`, then
/// `(entity, creation: u8, membership, payload per kind)* 0`, then the
/// focus entity and a `u8` status.
///
/// If the bytes never reach the observer, hand the view from before the
/// call to [`rollback_update`].
pub fn write_update(
    world: &World,
    view: &mut ClientView,
    status: u8,
    enc: &mut Encoder,
) -> Result<WriteReport> {
    let mut report = WriteReport::default();

    for (id, cause) in view.take_owed() {
        enc.write_varuint(u64::from(id.get()))?;
        enc.write_u8(cause.0)?;
        report.deleted += 1;
    }

    for id in view.in_view_ids() {
        let Some(cause) = departure(world, view, id) else {
            continue;
        };

        enc.write_varuint(u64::from(id.get()))?;
        enc.write_u8(cause.0)?;
        view.forget(id);
        report.deleted += 1;
    }
    enc.write_varuint(0)?;

    for id in world.entities() {
        if world.is_pending_deletion(id) || !view.wants(world, id) {
            continue;
        }

        let creation = !view.is_in_view(id);
        let membership = world.membership(id);
        let sent = view.sent_membership(id);
        if !creation && membership == sent && world.dirty_kinds(id).is_empty() {
            continue;
        }

        enc.write_varuint(u64::from(id.get()))?;
        enc.write_u8(creation as u8)?;
        enc.write_varuint(u64::from(membership.bits()))?;
        for kind in membership.iter() {
            let full_resync = creation || !sent.contains(kind);
            world.tables().write(kind, id, enc, full_resync)?;
        }

        view.mark_sent(id, membership);
        if creation {
            report.created += 1;
        } else {
            report.updated += 1;
        }
    }
    enc.write_varuint(0)?;

    let focus = view.focus();
    let focus = if world.has_entity(focus) && !world.is_pending_deletion(focus) {
        focus
    } else {
        EntityId::NULL
    };
    enc.write_varuint(u64::from(focus.get()))?;
    enc.write_u8(status)?;

    Ok(report)
}

/// Restores `view` to `before` after the update written from it was lost.
/// Deletions it carried stay owed with their causes.
pub fn rollback_update(world: &World, view: &mut ClientView, before: ClientView) {
    let departed: Vec<(EntityId, DeletionCause)> = before
        .in_view_ids()
        .into_iter()
        .filter(|id| !view.is_in_view(*id))
        .map(|id| {
            let cause = departure(world, &before, id).unwrap_or(DeletionCause::SILENT);
            (id, cause)
        })
        .collect();

    *view = before;
    view.require_full_resync();
    for (id, cause) in departed {
        view.owe_deletion(id, cause);
    }
}

/// What one [`apply_update`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub deleted: usize,
    pub unknown_deletions: usize,
    pub created: usize,
    pub updated: usize,
    pub implicit_creations: usize,
    pub skew_repairs: usize,
    pub skipped: usize,
    pub focus: Option<EntityId>,
    pub status: u8,
    /// Ids that were implicitly created or repaired and may hold fields the
    /// sender never rewrote.
    pub repaired: Vec<EntityId>,
}

fn read_entity(dec: &mut Decoder<'_>) -> Result<EntityId> {
    let raw = dec.read_varuint()?;
    u32::try_from(raw)
        .map(EntityId::new)
        .map_err(|_| ReplicaError::InvalidEntityId {
            id: raw,
            max: u32::MAX as usize,
        })
}

/// Applies one update to a receiver world. Only malformed bytes fail the
/// call; any other disagreement with the sender is repaired and reported.
pub fn apply_update(
    world: &mut World,
    mut fading: Option<&mut DeletionSimulation>,
    data: &[u8],
) -> Result<ApplyReport> {
    let mut dec = Decoder::new(data);
    let mut report = ApplyReport::default();
    let mut deleted_here = Bitset::new(world.capacity());

    loop {
        let id = read_entity(&mut dec)?;
        if id.is_null() {
            break;
        }
        let cause = DeletionCause(dec.read_u8()?);

        if !world.has_entity(id) {
            log::debug!("{}: deletion for unknown entity {}, skipping", world.label(), id);
            report.unknown_deletions += 1;
            continue;
        }
        if !cause.is_silent() {
            if let Some(sim) = fading.as_deref_mut() {
                if let Err(e) = sim.spawn_from(world, id, cause) {
                    log::warn!("{}: no exit effect for {}: {}", world.label(), id, e);
                }
            }
        }
        world.destroy(id);
        deleted_here.set(id.index());
        report.deleted += 1;
    }

    loop {
        let id = read_entity(&mut dec)?;
        if id.is_null() {
            break;
        }
        let creation = dec.read_u8()? != 0;
        let membership = ComponentSet::from_bits(dec.read_varuint()?)?;

        if id.index() >= world.capacity() {
            log::warn!(
                "{}: record for entity {} beyond capacity {}, discarding",
                world.label(),
                id,
                world.capacity()
            );
            for kind in membership.iter() {
                ComponentTables::skip(kind, &mut dec)?;
            }
            report.skipped += 1;
            continue;
        }

        let known = world.has_entity(id);
        if !known && !creation {
            if deleted_here.get(id.index()) {
                log::debug!("{}: entity {} restored after deletion", world.label(), id);
            } else {
                log::warn!(
                    "{}: update for missing entity {}, treating as creation",
                    world.label(),
                    id
                );
            }
            report.implicit_creations += 1;
            report.repaired.push(id);
        }
        if world.spawn_at(id)? {
            report.created += 1;
        } else {
            report.updated += 1;
        }

        let local = world.membership(id);
        if local != membership {
            if known && !creation {
                log::warn!(
                    "{}: membership skew on {}: local {:#x}, remote {:#x}",
                    world.label(),
                    id,
                    local.bits(),
                    membership.bits()
                );
                report.skew_repairs += 1;
                report.repaired.push(id);
            }
            for kind in membership.difference(local).iter() {
                world.insert_kind(id, kind)?;
            }
            for kind in local.difference(membership).iter() {
                world.remove_kind(id, kind)?;
            }
        }

        for kind in membership.iter() {
            world.tables_mut().read(kind, id, &mut dec)?;
        }
    }

    let focus = read_entity(&mut dec)?;
    report.focus = (!focus.is_null() && world.has_entity(focus)).then_some(focus);
    report.status = dec.read_u8()?;

    if !dec.is_exhausted() {
        log::debug!(
            "{}: {} trailing bytes after update",
            world.label(),
            dec.remaining()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentKind, Health, Mob, Physical, Replicate};

    fn encode(world: &World, view: &mut ClientView, status: u8) -> Vec<u8> {
        let mut enc = Encoder::new(64 * 1024);
        write_update(world, view, status, &mut enc).unwrap();
        enc.as_slice().to_vec()
    }

    #[test]
    fn test_empty_update_layout() {
        let world = World::new(8);
        let mut view = ClientView::new(8);
        assert_eq!(encode(&world, &mut view, 1), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_creation_record_layout() {
        let mut world = World::new(8);
        let id = world.create().unwrap();
        world.add::<Mob>(id).unwrap().set_id(3);

        let mut view = ClientView::new(8);
        let bytes = encode(&world, &mut view, 0);

        let mob_bit = ComponentKind::Mob.bit() as u8;
        let all = Mob::ALL_FIELDS as u8;
        // no deletions, id 1, creation, membership, state, id, rarity
        assert_eq!(bytes, vec![0, 1, 1, mob_bit, all, 3, 0, 0, 0, 0]);
        assert!(view.is_in_view(id));
    }

    #[test]
    fn test_field_delta_on_existing_receiver() {
        let mut server = World::new(16);
        let mut client = World::new(16);
        let mut view = ClientView::new(16);

        for _ in 0..4 {
            server.create().unwrap();
        }
        let id = server.create().unwrap();
        assert_eq!(id, EntityId::new(5));
        server.add::<Physical>(id).unwrap();

        apply_update(&mut client, None, &encode(&server, &mut view, 0)).unwrap();
        server.clear_dirty();
        assert_eq!(client.get::<Physical>(id).unwrap().x(), 0.0);

        server.get_mut::<Physical>(id).unwrap().set_x(12.0);
        let bytes = encode(&server, &mut view, 0);
        let report = apply_update(&mut client, None, &bytes).unwrap();

        assert_eq!(report.updated, 1);
        let physical = client.get::<Physical>(id).unwrap();
        assert_eq!(physical.x(), 12.0);
        assert_eq!(physical.y(), 0.0);

        // three null ids and the status around one record: id, flag,
        // membership, state, x
        assert_eq!(bytes.len(), 1 + (1 + 1 + 1 + 1 + 4) + 1 + 1 + 1);
    }

    #[test]
    fn test_delete_then_recreate_in_one_message() {
        let mob_bit = ComponentKind::Mob.bit() as u8;
        let bytes = vec![
            7, 1, 0, // delete 7 with cause 1
            7, 1, mob_bit, 0b11, 3, 0, 0, // create 7 with Mob { id: 3 }
            0, 0,
        ];

        let mut client = World::new(16);
        let mut fading = DeletionSimulation::new(16);
        let report = apply_update(&mut client, Some(&mut fading), &bytes).unwrap();

        let id = EntityId::new(7);
        assert!(client.has_entity(id));
        assert_eq!(client.get::<Mob>(id).unwrap().id(), 3);
        assert_eq!(report.unknown_deletions, 1);
        assert_eq!(report.created, 1);
        assert!(fading.is_empty());

        // again, now with 7 alive on the receiver
        let report = apply_update(&mut client, Some(&mut fading), &bytes).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 1);
        assert_eq!(client.get::<Mob>(id).unwrap().id(), 3);
        assert_eq!(fading.len(), 1);
    }

    #[test]
    fn test_restore_after_deletion_is_not_missing() {
        let mob_bit = ComponentKind::Mob.bit() as u8;
        let bytes = vec![
            2, 0, 0, // silent delete
            2, 0, mob_bit, 0b01, 9, 0, // non-creation update for 2
            0, 0,
        ];

        let mut client = World::new(8);
        client.spawn_at(EntityId::new(2)).unwrap();
        let report = apply_update(&mut client, None, &bytes).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.implicit_creations, 1);
        assert_eq!(report.repaired, vec![EntityId::new(2)]);
        assert_eq!(client.get::<Mob>(EntityId::new(2)).unwrap().id(), 9);
    }

    #[test]
    fn test_skew_repair_adds_missing_components() {
        let mut server = World::new(16);
        let id = server.create().unwrap();
        server.add::<Physical>(id).unwrap().set_x(3.0);
        server.add::<Health>(id).unwrap().set_health(50.0);
        server.get_mut::<Health>(id).unwrap().set_max_health(100.0);

        // the receiver only ever saw the Physical half
        let mut client = World::new(16);
        client.spawn_at(id).unwrap();
        client.add::<Physical>(id).unwrap();

        let mut view = ClientView::new(16);
        view.mark_sent(id, [ComponentKind::Physical].into_iter().collect());
        let bytes = encode(&server, &mut view, 0);

        for _ in 0..2 {
            let report = apply_update(&mut client, None, &bytes).unwrap();
            assert_eq!(client.membership(id), server.membership(id));
            assert_eq!(client.get::<Health>(id).unwrap().health(), 50.0);
            assert_eq!(client.get::<Health>(id).unwrap().max_health(), 100.0);
            assert_eq!(client.get::<Physical>(id).unwrap().x(), 3.0);
            assert_eq!(report.created, 0);
        }
    }

    #[test]
    fn test_extra_local_components_are_removed() {
        let mob_bit = ComponentKind::Mob.bit() as u8;
        let bytes = vec![0, 4, 0, mob_bit, 0, 0, 0, 0];

        let mut client = World::new(8);
        let id = EntityId::new(4);
        client.spawn_at(id).unwrap();
        client.add::<Mob>(id).unwrap();
        client.add::<Physical>(id).unwrap();

        let report = apply_update(&mut client, None, &bytes).unwrap();
        assert_eq!(report.skew_repairs, 1);
        assert_eq!(report.repaired, vec![id]);
        assert!(!client.has::<Physical>(id));
        assert!(client.has::<Mob>(id));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut server = World::new(16);
        let a = server.create().unwrap();
        let b = server.create().unwrap();
        server.add::<Physical>(a).unwrap().set_angle(1.5);
        server.add::<Mob>(b).unwrap().set_rarity(4);

        let mut view = ClientView::new(16);
        view.set_focus(a);
        let bytes = encode(&server, &mut view, 2);

        let mut client = World::new(16);
        let first = apply_update(&mut client, None, &bytes).unwrap();
        let second = apply_update(&mut client, None, &bytes).unwrap();

        assert_eq!(first.focus, Some(a));
        assert_eq!(second.status, 2);
        assert_eq!(client.live_count(), 2);
        assert_eq!(client.get::<Physical>(a).unwrap(), server.get::<Physical>(a).unwrap());
        assert_eq!(client.get::<Mob>(b).unwrap().rarity(), 4);

        client.rebuild_dense_indices();
        assert_eq!(client.ids::<Physical>(), &[a]);
        assert_eq!(client.ids::<Mob>(), &[b]);
    }

    #[test]
    fn test_deletions_reach_the_receiver() {
        let mut server = World::new(16);
        let mut client = World::new(16);
        let mut fading = DeletionSimulation::new(16);
        let mut view = ClientView::new(16);

        let doomed = server.create().unwrap();
        let quiet = server.create().unwrap();
        server.add::<Mob>(doomed).unwrap();
        apply_update(&mut client, None, &encode(&server, &mut view, 0)).unwrap();

        server.request_deletion_with_cause(doomed, DeletionCause::DEATH);
        server.request_deletion(quiet);
        let bytes = encode(&server, &mut view, 0);
        server.process_deletions();

        let report = apply_update(&mut client, Some(&mut fading), &bytes).unwrap();
        assert_eq!(report.deleted, 2);
        assert!(!client.has_entity(doomed));
        assert!(!client.has_entity(quiet));
        assert_eq!(fading.len(), 1);
        let (_, fade) = fading.iter().next().unwrap();
        assert_eq!(fade.source, doomed);
        assert_eq!(fade.cause, DeletionCause::DEATH);
        assert_eq!(view.in_view_count(), 0);
    }

    #[test]
    fn test_lost_deletion_is_owed_across_slot_reuse() {
        let mut server = World::new(16);
        let mut client = World::new(16);
        let mut fading = DeletionSimulation::new(16);
        let mut view = ClientView::new(16);

        let old = server.create().unwrap();
        server.add::<Mob>(old).unwrap().set_id(5);
        apply_update(&mut client, None, &encode(&server, &mut view, 0)).unwrap();
        client.get_mut::<Mob>(old).unwrap().ticks_to_despawn = 30;

        // the update carrying the deletion never arrives
        server.request_deletion_with_cause(old, DeletionCause::DEATH);
        let before = view.clone();
        encode(&server, &mut view, 0);
        rollback_update(&server, &mut view, before);
        server.process_deletions();
        assert_eq!(view.owed_deletions(), &[(old, DeletionCause::DEATH)]);

        let new = server.create().unwrap();
        assert_eq!(new, old);
        server.add::<Mob>(new).unwrap().set_id(9);

        let bytes = encode(&server, &mut view, 0);
        let report = apply_update(&mut client, Some(&mut fading), &bytes).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 0);
        assert!(report.repaired.is_empty());

        let (_, fade) = fading.iter().next().unwrap();
        assert_eq!(fade.cause, DeletionCause::DEATH);
        let mob = client.get::<Mob>(new).unwrap();
        assert_eq!(mob.id(), 9);
        assert_eq!(mob.ticks_to_despawn, 0);
        assert!(view.owed_deletions().is_empty());
    }

    #[test]
    fn test_rollback_rewrites_every_field() {
        let mut server = World::new(8);
        let mut client = World::new(8);
        let mut view = ClientView::new(8);

        let id = server.create().unwrap();
        server.add::<Physical>(id).unwrap();
        apply_update(&mut client, None, &encode(&server, &mut view, 0)).unwrap();
        server.clear_dirty();

        server.get_mut::<Physical>(id).unwrap().set_radius(25.0);
        let before = view.clone();
        encode(&server, &mut view, 0);
        rollback_update(&server, &mut view, before);
        server.clear_dirty();

        server.get_mut::<Physical>(id).unwrap().set_x(1.0);
        apply_update(&mut client, None, &encode(&server, &mut view, 0)).unwrap();
        assert_eq!(client.get::<Physical>(id).unwrap(), server.get::<Physical>(id).unwrap());
    }

    #[test]
    fn test_unknown_kind_bits_are_rejected() {
        let bytes = vec![0, 1, 1, 0xff, 0xff, 0x03];
        let mut client = World::new(8);
        let err = apply_update(&mut client, None, &bytes).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_out_of_range_record_keeps_stream_aligned() {
        let mut server = World::new(64);
        for _ in 0..40 {
            server.create().unwrap();
        }
        let far = EntityId::new(40);
        server.add::<Mob>(far).unwrap().set_id(8);
        let near = EntityId::new(1);
        server.add::<Mob>(near).unwrap().set_id(6);

        let mut view = ClientView::new(64);
        let bytes = encode(&server, &mut view, 5);

        let mut client = World::new(16);
        let report = apply_update(&mut client, None, &bytes).unwrap();
        // ids 16..=40 do not fit
        assert_eq!(report.skipped, 25);
        assert_eq!(report.status, 5);
        assert_eq!(client.get::<Mob>(near).unwrap().id(), 6);
    }

    #[test]
    fn test_truncated_message_is_an_error() {
        let mut server = World::new(8);
        let id = server.create().unwrap();
        server.add::<Physical>(id).unwrap();
        let mut view = ClientView::new(8);
        let bytes = encode(&server, &mut view, 0);

        let mut client = World::new(8);
        let err = apply_update(&mut client, None, &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.is_protocol_error());
    }
}
