#[macro_use]
mod macros;

mod arena;
mod drop;
mod flower;
mod health;
mod mob;
mod petal;
mod physical;
mod player_info;
mod relations;

pub use arena::{Arena, ArenaField};
pub use drop::{DropItem, DropItemField};
pub use flower::{Flower, FlowerField, Nickname};
pub use health::{Health, HealthField};
pub use mob::{Mob, MobField};
pub use petal::{Petal, PetalField};
pub use physical::{Physical, PhysicalField};
pub use player_info::{PlayerInfo, PlayerInfoField};
pub use relations::{Relations, RelationsField};

use crate::codec::{Decoder, Encoder};
use crate::error::{ReplicaError, Result};
use crate::schema::ComponentSchema;
use crate::storage::ComponentStorage;
use crate::world::EntityId;
use serde::{Deserialize, Serialize};

/// Per-field dirty tracking and the paired wire routines of one component.
pub trait Replicate: Sized {
    const FIELD_COUNT: u32;
    const ALL_FIELDS: u32;

    fn dirty_state(&self) -> u32;

    fn clear_dirty(&mut self);

    fn mark_all_dirty(&mut self);

    /// Writes `dirty | (ALL_FIELDS if full_resync)` as a varint followed by
    /// the flagged fields in declaration order.
    fn write(&self, enc: &mut Encoder, full_resync: bool) -> Result<()>;

    /// Mirror of [`Replicate::write`]. Returns the state mask that was read.
    fn read(&mut self, dec: &mut Decoder<'_>) -> Result<u32>;

    fn schema() -> ComponentSchema;

    /// Equality over replicated fields only.
    fn wire_eq(&self, other: &Self) -> bool;
}

/// A component type stored in a [`World`](crate::World).
pub trait Component: Replicate + Default + Clone + 'static {
    const KIND: ComponentKind;

    fn storage(tables: &ComponentTables) -> &ComponentStorage<Self>;

    fn storage_mut(tables: &mut ComponentTables) -> &mut ComponentStorage<Self>;
}

macro_rules! component_registry {
    ($( $kind:ident => $ty:ident in $slot:ident ),* $(,)?) => {
        /// Closed set of component kinds. The discriminant is the kind's bit
        /// in a membership mask.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum ComponentKind {
            $( $kind, )*
        }

        impl ComponentKind {
            pub const ALL: &'static [ComponentKind] = &[$( ComponentKind::$kind, )*];
            pub const COUNT: usize = Self::ALL.len();

            pub const fn bit(self) -> u32 {
                1 << self as u32
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $( ComponentKind::$kind => stringify!($kind), )*
                }
            }

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }

            pub fn schema(self) -> ComponentSchema {
                match self {
                    $( ComponentKind::$kind => <$ty as Replicate>::schema(), )*
                }
            }
        }

        $(
            impl Component for $ty {
                const KIND: ComponentKind = ComponentKind::$kind;

                fn storage(tables: &ComponentTables) -> &ComponentStorage<Self> {
                    &tables.$slot
                }

                fn storage_mut(tables: &mut ComponentTables) -> &mut ComponentStorage<Self> {
                    &mut tables.$slot
                }
            }
        )*

        /// One direct-indexed storage per component kind.
        pub struct ComponentTables {
            $( $slot: ComponentStorage<$ty>, )*
        }

        impl ComponentTables {
            pub(crate) fn new(capacity: usize) -> Self {
                Self {
                    $( $slot: ComponentStorage::new(capacity), )*
                }
            }

            pub(crate) fn insert_default(&mut self, kind: ComponentKind, id: EntityId) {
                match kind {
                    $( ComponentKind::$kind => { self.$slot.insert(id); } )*
                }
            }

            pub(crate) fn reset(&mut self, kind: ComponentKind, id: EntityId) {
                match kind {
                    $( ComponentKind::$kind => self.$slot.reset(id), )*
                }
            }

            pub(crate) fn dirty_state(&self, kind: ComponentKind, id: EntityId) -> u32 {
                match kind {
                    $( ComponentKind::$kind => self.$slot.get(id).dirty_state(), )*
                }
            }

            pub(crate) fn clear_dirty(&mut self, kind: ComponentKind, id: EntityId) {
                match kind {
                    $( ComponentKind::$kind => self.$slot.get_mut(id).clear_dirty(), )*
                }
            }

            pub(crate) fn write(
                &self,
                kind: ComponentKind,
                id: EntityId,
                enc: &mut Encoder,
                full_resync: bool,
            ) -> Result<()> {
                match kind {
                    $( ComponentKind::$kind => self.$slot.get(id).write(enc, full_resync), )*
                }
            }

            pub(crate) fn read(
                &mut self,
                kind: ComponentKind,
                id: EntityId,
                dec: &mut Decoder<'_>,
            ) -> Result<u32> {
                match kind {
                    $( ComponentKind::$kind => self.$slot.get_mut(id).read(dec), )*
                }
            }

            /// Consumes one payload of `kind` without storing it.
            pub(crate) fn skip(kind: ComponentKind, dec: &mut Decoder<'_>) -> Result<u32> {
                match kind {
                    $( ComponentKind::$kind => <$ty>::default().read(dec), )*
                }
            }

            pub(crate) fn copy_to(
                &self,
                kind: ComponentKind,
                id: EntityId,
                dst: &mut ComponentTables,
                dst_id: EntityId,
            ) {
                match kind {
                    $( ComponentKind::$kind => {
                        let value = self.$slot.get(id).clone();
                        *dst.$slot.insert(dst_id) = value;
                    } )*
                }
            }

            pub(crate) fn clear_dense(&mut self) {
                $( self.$slot.clear_dense(); )*
            }

            pub(crate) fn push_dense(&mut self, kind: ComponentKind, id: EntityId) -> bool {
                match kind {
                    $( ComponentKind::$kind => self.$slot.push_dense(id), )*
                }
            }

            pub(crate) fn append_dense(&mut self, kind: ComponentKind, id: EntityId) {
                match kind {
                    $( ComponentKind::$kind => self.$slot.append_dense(id), )*
                }
            }

            pub(crate) fn value(&self, kind: ComponentKind, id: EntityId) -> ComponentValue {
                match kind {
                    $( ComponentKind::$kind => ComponentValue::$kind(self.$slot.get(id).clone()), )*
                }
            }
        }

        /// An owned copy of one component, tagged by kind.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ComponentValue {
            $( $kind($ty), )*
        }

        impl ComponentValue {
            pub fn kind(&self) -> ComponentKind {
                match self {
                    $( ComponentValue::$kind(_) => ComponentKind::$kind, )*
                }
            }
        }
    };
}

component_registry! {
    Physical => Physical in physical,
    Arena => Arena in arena,
    Flower => Flower in flower,
    Health => Health in health,
    Mob => Mob in mob,
    Petal => Petal in petal,
    PlayerInfo => PlayerInfo in player_info,
    Relations => Relations in relations,
    Drop => DropItem in drop,
}

const _: () = assert!(ComponentKind::COUNT <= 32, "membership masks hold at most 32 kinds");

/// Membership mask: which component kinds an entity carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentSet(u32);

impl ComponentSet {
    pub const EMPTY: ComponentSet = ComponentSet(0);

    pub fn all() -> Self {
        ComponentKind::ALL.iter().copied().collect()
    }

    /// Rejects bits that name no known kind.
    pub fn from_bits(bits: u64) -> Result<Self> {
        let known = u64::from(Self::all().0);
        if bits & !known != 0 {
            return Err(ReplicaError::UnknownBits {
                context: "membership",
                bits,
            });
        }
        Ok(ComponentSet(bits as u32))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, kind: ComponentKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: ComponentKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: ComponentKind) {
        self.0 &= !kind.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Kinds in `self` that are not in `other`.
    pub const fn difference(self, other: ComponentSet) -> ComponentSet {
        ComponentSet(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = ComponentKind> {
        ComponentKind::ALL
            .iter()
            .copied()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<ComponentKind> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = ComponentKind>>(iter: I) -> Self {
        let mut set = ComponentSet::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bits_follow_declaration_order() {
        for (index, kind) in ComponentKind::ALL.iter().enumerate() {
            assert_eq!(kind.bit(), 1 << index);
            assert_eq!(ComponentKind::from_index(index), Some(*kind));
        }
        assert_eq!(ComponentKind::Physical.name(), "Physical");
    }

    #[test]
    fn test_component_set() {
        let mut set = ComponentSet::EMPTY;
        set.insert(ComponentKind::Physical);
        set.insert(ComponentKind::Mob);

        assert!(set.contains(ComponentKind::Mob));
        assert!(!set.contains(ComponentKind::Petal));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![ComponentKind::Physical, ComponentKind::Mob]
        );

        let other: ComponentSet = [ComponentKind::Mob].into_iter().collect();
        assert_eq!(set.difference(other).iter().collect::<Vec<_>>(), vec![ComponentKind::Physical]);

        set.remove(ComponentKind::Physical);
        assert_eq!(set, other);
    }

    #[test]
    fn test_membership_rejects_unknown_bits() {
        assert!(ComponentSet::from_bits(u64::from(ComponentSet::all().bits())).is_ok());
        let unknown = 1u64 << ComponentKind::COUNT;
        assert!(matches!(
            ComponentSet::from_bits(unknown),
            Err(ReplicaError::UnknownBits { context: "membership", .. })
        ));
    }

    #[test]
    fn test_dirty_bits_follow_setters() {
        let mut physical = Physical::default();
        assert_eq!(physical.dirty_state(), 0);

        physical.set_x(12.0);
        assert_eq!(physical.dirty_state(), PhysicalField::x.bit());

        physical.set_x(12.0);
        physical.set_y(0.0);
        assert_eq!(physical.dirty_state(), PhysicalField::x.bit());

        physical.clear_dirty();
        assert_eq!(physical.dirty_state(), 0);

        physical.mark_all_dirty();
        assert_eq!(physical.dirty_state(), Physical::ALL_FIELDS);
    }

    #[test]
    fn test_full_resync_round_trip() {
        let mut flower = Flower::default();
        flower.set_eye_angle(1.25);
        flower.set_face_flags(3);
        flower.set_level(42);
        flower.set_nickname(Nickname::new("rose"));

        let mut enc = Encoder::new(256);
        flower.write(&mut enc, true).unwrap();
        let bytes = enc.finish();

        let mut received = Flower::default();
        let state = received.read(&mut Decoder::new(&bytes)).unwrap();

        assert_eq!(state, Flower::ALL_FIELDS);
        assert_eq!(received.eye_angle().to_bits(), 1.25f32.to_bits());
        assert_eq!(received.level(), 42);
        assert_eq!(received.nickname().as_str(), "rose");
        assert_eq!(received, flower);
    }

    #[test]
    fn test_delta_writes_only_dirty_fields() {
        let mut physical = Physical::default();
        physical.set_x(12.0);

        let mut enc = Encoder::new(64);
        physical.write(&mut enc, false).unwrap();

        // state varint + one float
        assert_eq!(enc.len(), 1 + 4);
        assert_eq!(enc.as_slice()[0] as u32, PhysicalField::x.bit());
    }

    #[test]
    fn test_read_rejects_unknown_field_bits() {
        let mut enc = Encoder::new(16);
        enc.write_varuint(1 << Mob::FIELD_COUNT).unwrap();
        let bytes = enc.finish();

        let mut mob = Mob::default();
        assert!(matches!(
            mob.read(&mut Decoder::new(&bytes)),
            Err(ReplicaError::UnknownBits { .. })
        ));
    }

    #[test]
    fn test_malformed_float_is_kept() {
        let mut source = Physical::default();
        source.set_x(f32::NAN);

        let mut enc = Encoder::new(64);
        source.write(&mut enc, false).unwrap();
        let bytes = enc.finish();

        let mut target = Physical::default();
        target.read(&mut Decoder::new(&bytes)).unwrap();
        assert!(target.x().is_nan());
    }

    #[test]
    fn test_schema_matches_field_order() {
        let schema = Physical::schema();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["angle", "radius", "x", "y"]);
        assert_eq!(ComponentKind::Physical.schema(), schema);
    }
}
