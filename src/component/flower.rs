use crate::field::BoundedString;

/// Player display name, capped at 16 bytes on the wire.
pub type Nickname = BoundedString<16>;

replicated_component! {
    /// A player's avatar.
    pub struct Flower : FlowerField {
        eye_angle: f32 => set_eye_angle,
        face_flags: u8 => set_face_flags,
        level: u32 => set_level,
        nickname: Nickname => set_nickname,
    }
    local {
        pub eye_x: f32,
        pub eye_y: f32,
    }
}
