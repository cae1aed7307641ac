replicated_component! {
    /// An item lying on the ground waiting to be collected.
    pub struct DropItem : DropItemField {
        id: u8 => set_id,
        rarity: u8 => set_rarity,
    }
}
