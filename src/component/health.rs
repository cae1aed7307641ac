replicated_component! {
    pub struct Health : HealthField {
        health: f32 => set_health,
        max_health: f32 => set_max_health,
        /// Bit 0 hides the bar, bit 1 marks a recent hit.
        flags: u8 => set_flags,
    }
    local {
        /// Damage accumulated this tick, applied by game logic.
        pub damage: f32,
        pub lerp_health: f32,
    }
}

impl Health {
    pub fn ratio(&self) -> f32 {
        if self.max_health <= 0.0 {
            return 0.0;
        }
        (self.health / self.max_health).clamp(0.0, 1.0)
    }
}
