use crate::world::EntityId;

replicated_component! {
    /// A petal orbiting, or launched by, its owning flower.
    pub struct Petal : PetalField {
        id: u8 => set_id,
        rarity: u8 => set_rarity,
        detached: bool => set_detached,
        shootable: bool => set_shootable,
    }
    local {
        pub owner: EntityId,
        pub ticks_until_respawn: u32,
    }
}
