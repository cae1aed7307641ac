// Field `i` owns dirty bit `i`, and write/read walk the fields in
// declaration order. Fields in the `local` block never reach the wire.
macro_rules! replicated_component {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $fields:ident {
            $( $(#[$fmeta:meta])* $field:ident : $fty:ty => $setter:ident ),* $(,)?
        }
    ) => {
        replicated_component! {
            $(#[$meta])*
            pub struct $name : $fields {
                $( $(#[$fmeta])* $field : $fty => $setter ),*
            }
            local {}
        }
    };
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $fields:ident {
            $( $(#[$fmeta:meta])* $field:ident : $fty:ty => $setter:ident ),* $(,)?
        }
        local {
            $( $(#[$lmeta:meta])* pub $lfield:ident : $lty:ty ),* $(,)?
        }
    ) => {
        /// Replicated field identifiers; the discriminant is the dirty bit.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $fields {
            $( $field, )*
        }

        impl $fields {
            pub const ALL: &'static [$fields] = &[$( $fields::$field, )*];

            pub const fn bit(self) -> u32 {
                1 << self as u32
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $( $fields::$field => stringify!($field), )*
                }
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $( $(#[$fmeta])* $field: $fty, )*
            $( $(#[$lmeta])* #[serde(skip)] pub $lfield: $lty, )*
            #[serde(skip)]
            state: u32,
        }

        impl $name {
            $(
                #[allow(clippy::clone_on_copy)]
                pub fn $field(&self) -> $fty {
                    self.$field.clone()
                }

                pub fn $setter(&mut self, value: $fty) {
                    if self.$field != value {
                        self.$field = value;
                        self.state |= $fields::$field.bit();
                    }
                }
            )*
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                <Self as $crate::component::Replicate>::wire_eq(self, other)
            }
        }

        impl $crate::component::Replicate for $name {
            const FIELD_COUNT: u32 = {
                let count = $fields::ALL.len();
                assert!(count <= 32, "a component carries at most 32 replicated fields");
                count as u32
            };

            const ALL_FIELDS: u32 = ((1u64 << Self::FIELD_COUNT) - 1) as u32;

            fn dirty_state(&self) -> u32 {
                self.state
            }

            fn clear_dirty(&mut self) {
                self.state = 0;
            }

            fn mark_all_dirty(&mut self) {
                self.state = Self::ALL_FIELDS;
            }

            fn write(
                &self,
                enc: &mut $crate::codec::Encoder,
                full_resync: bool,
            ) -> $crate::error::Result<()> {
                let state = if full_resync {
                    self.state | Self::ALL_FIELDS
                } else {
                    self.state
                };
                enc.write_varuint(u64::from(state))?;
                $(
                    if state & $fields::$field.bit() != 0 {
                        $crate::field::WireField::encode(&self.$field, enc)?;
                    }
                )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn read(&mut self, dec: &mut $crate::codec::Decoder<'_>) -> $crate::error::Result<u32> {
                let raw = dec.read_varuint()?;
                if raw & !u64::from(Self::ALL_FIELDS) != 0 {
                    return Err($crate::error::ReplicaError::UnknownBits {
                        context: stringify!($name),
                        bits: raw,
                    });
                }
                let state = raw as u32;
                $(
                    if state & $fields::$field.bit() != 0 {
                        self.$field = <$fty as $crate::field::WireField>::decode(dec)?;
                        if !$crate::field::WireField::is_well_formed(&self.$field) {
                            log::warn!(
                                "{}.{} decoded a malformed value {:?}, keeping it for this tick",
                                stringify!($name),
                                stringify!($field),
                                self.$field
                            );
                        }
                    }
                )*
                Ok(state)
            }

            fn schema() -> $crate::schema::ComponentSchema {
                $crate::schema::ComponentSchema::new(stringify!($name))
                    $( .with_field($crate::schema::FieldSchema::new(
                        stringify!($field),
                        <$fty as $crate::field::WireField>::WIRE_TYPE,
                    )) )*
            }

            #[allow(unused_variables)]
            fn wire_eq(&self, other: &Self) -> bool {
                true $( && self.$field == other.$field )*
            }
        }
    };
}
