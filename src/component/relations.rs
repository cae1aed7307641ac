use crate::world::EntityId;

replicated_component! {
    pub struct Relations : RelationsField {
        team: u8 => set_team,
        owner: EntityId => set_owner,
    }
}
