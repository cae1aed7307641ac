replicated_component! {
    /// Arena-wide state carried by the arena entity itself.
    pub struct Arena : ArenaField {
        biome: u8 => set_biome,
        wave: u32 => set_wave,
    }
}
