use crate::world::EntityId;

replicated_component! {
    /// Position, facing and size of anything that occupies the arena.
    pub struct Physical : PhysicalField {
        angle: f32 => set_angle,
        radius: f32 => set_radius,
        x: f32 => set_x,
        y: f32 => set_y,
    }
    local {
        pub arena: EntityId,
        pub velocity_x: f32,
        pub velocity_y: f32,
        pub mass: f32,
        /// Interpolated render position on the presentation side.
        pub lerp_x: f32,
        pub lerp_y: f32,
        pub lerp_angle: f32,
    }
}

impl Physical {
    pub fn distance_squared(&self, x: f32, y: f32) -> f32 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy
    }

    /// Moves the render state straight onto the replicated state.
    pub fn snap_interpolation(&mut self) {
        self.lerp_x = self.x;
        self.lerp_y = self.y;
        self.lerp_angle = self.angle;
    }

    /// Eases the render state toward the replicated state by `amount` in `[0, 1]`.
    pub fn interpolate(&mut self, amount: f32) {
        let amount = amount.clamp(0.0, 1.0);
        self.lerp_x += (self.x - self.lerp_x) * amount;
        self.lerp_y += (self.y - self.lerp_y) * amount;
        self.lerp_angle += (self.angle - self.lerp_angle) * amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation() {
        let mut physical = Physical::default();
        physical.set_x(10.0);
        physical.interpolate(0.5);
        assert_eq!(physical.lerp_x, 5.0);

        physical.snap_interpolation();
        assert_eq!(physical.lerp_x, 10.0);
        assert_eq!(physical.distance_squared(10.0, 3.0), 9.0);
    }
}
