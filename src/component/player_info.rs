use crate::world::EntityId;

replicated_component! {
    /// Camera and squad state of one connected player.
    pub struct PlayerInfo : PlayerInfoField {
        camera_x: f32 => set_camera_x,
        camera_y: f32 => set_camera_y,
        camera_fov: f32 => set_camera_fov,
        flower_id: EntityId => set_flower_id,
        squad_pos: u8 => set_squad_pos,
    }
}
