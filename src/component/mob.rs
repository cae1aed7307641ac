replicated_component! {
    pub struct Mob : MobField {
        id: u8 => set_id,
        rarity: u8 => set_rarity,
    }
    local {
        pub ticks_to_despawn: u32,
    }
}
