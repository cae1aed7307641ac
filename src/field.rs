use crate::codec::{Decoder, Encoder};
use crate::error::{ReplicaError, Result};
use crate::world::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire representation of a replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WireType {
    Bool = 0,
    Uint8 = 1,
    VarUint = 2,
    Uint64 = 3,
    Float32 = 4,
    Entity = 5,
    String = 6,
}

impl WireType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => WireType::Bool,
            1 => WireType::Uint8,
            2 => WireType::VarUint,
            3 => WireType::Uint64,
            4 => WireType::Float32,
            5 => WireType::Entity,
            6 => WireType::String,
            _ => return None,
        })
    }
}

/// A value that can sit in a replicated component field.
pub trait WireField: Sized + Clone + PartialEq + Default {
    const WIRE_TYPE: WireType;

    fn encode(&self, enc: &mut Encoder) -> Result<()>;

    fn decode(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Whether a decoded value is usable. Malformed values are kept and
    /// reported, never rejected.
    fn is_well_formed(&self) -> bool {
        true
    }
}

impl WireField for bool {
    const WIRE_TYPE: WireType = WireType::Bool;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_u8(*self as u8)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(dec.read_u8()? != 0)
    }
}

impl WireField for u8 {
    const WIRE_TYPE: WireType = WireType::Uint8;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_u8(*self)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.read_u8()
    }
}

impl WireField for u16 {
    const WIRE_TYPE: WireType = WireType::VarUint;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_varuint(u64::from(*self))
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let raw = dec.read_varuint()?;
        u16::try_from(raw).map_err(|_| ReplicaError::ValueOutOfRange { wire: "u16", value: raw })
    }
}

impl WireField for u32 {
    const WIRE_TYPE: WireType = WireType::VarUint;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_varuint(u64::from(*self))
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let raw = dec.read_varuint()?;
        u32::try_from(raw).map_err(|_| ReplicaError::ValueOutOfRange { wire: "u32", value: raw })
    }
}

impl WireField for u64 {
    const WIRE_TYPE: WireType = WireType::Uint64;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_u64(*self)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.read_u64()
    }
}

impl WireField for f32 {
    const WIRE_TYPE: WireType = WireType::Float32;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_f32(*self)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.read_f32()
    }

    fn is_well_formed(&self) -> bool {
        self.is_finite()
    }
}

impl WireField for EntityId {
    const WIRE_TYPE: WireType = WireType::Entity;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_varuint(u64::from(self.get()))
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let raw = dec.read_varuint()?;
        u32::try_from(raw)
            .map(EntityId::new)
            .map_err(|_| ReplicaError::InvalidEntityId {
                id: raw,
                max: u32::MAX as usize,
            })
    }
}

/// UTF-8 string capped at `N` bytes on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundedString<const N: usize>(String);

impl<const N: usize> BoundedString<N> {
    pub const MAX_LEN: usize = N;

    /// Cuts `value` back to at most `N` bytes on a char boundary.
    pub fn new(value: &str) -> Self {
        let mut end = value.len().min(N);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self(value[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Display for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> From<&str> for BoundedString<N> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<const N: usize> WireField for BoundedString<N> {
    const WIRE_TYPE: WireType = WireType::String;

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_string(&self.0, N)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self::new(&dec.read_string(N)?))
    }
}
