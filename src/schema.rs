use crate::codec::{Decoder, Encoder};
use crate::component::ComponentKind;
use crate::error::{ReplicaError, Result};
use crate::field::WireType;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

pub type SchemaVersion = u32;

/// Version of the built-in component layout.
pub const SCHEMA_VERSION: SchemaVersion = 1;

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub wire: WireType,
}

impl FieldSchema {
    pub fn new(name: &str, wire: WireType) -> Self {
        Self {
            name: name.to_string(),
            wire,
        }
    }
}

/// Ordered field layout of one component kind. Field `i` owns dirty bit `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl ComponentSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the fields flagged in `mask`, in wire order.
    pub fn field_names(&self, mask: u32) -> Vec<&str> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(bit, _)| *bit < 32 && mask & (1 << bit) != 0)
            .map(|(_, field)| field.name.as_str())
            .collect()
    }
}

/// Every component layout in membership-bit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    version: SchemaVersion,
    components: Vec<ComponentSchema>,
    by_name: AHashMap<String, usize>,
}

impl SchemaRegistry {
    fn from_components(version: SchemaVersion, components: Vec<ComponentSchema>) -> Self {
        let by_name = components
            .iter()
            .enumerate()
            .map(|(index, schema)| (schema.name.clone(), index))
            .collect();
        Self {
            version,
            components,
            by_name,
        }
    }

    /// The layout compiled into this crate.
    pub fn builtin() -> Self {
        Self::from_components(
            SCHEMA_VERSION,
            ComponentKind::ALL.iter().map(|kind| kind.schema()).collect(),
        )
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[ComponentSchema] {
        &self.components
    }

    pub fn get(&self, kind: ComponentKind) -> Option<&ComponentSchema> {
        self.components.get(kind as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<(ComponentKind, &ComponentSchema)> {
        let index = *self.by_name.get(name)?;
        Some((ComponentKind::from_index(index)?, &self.components[index]))
    }

    /// Field names flagged in a dirty mask, for trace output.
    pub fn dirty_field_names(&self, kind: ComponentKind, mask: u32) -> Vec<&str> {
        self.get(kind)
            .map(|schema| schema.field_names(mask))
            .unwrap_or_default()
    }

    /// Writes the registry so a peer can check it against its own.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.write_varuint(u64::from(self.version))?;
        enc.write_varuint(self.components.len() as u64)?;
        for schema in &self.components {
            enc.write_string(&schema.name, MAX_NAME_LEN)?;
            enc.write_varuint(schema.fields.len() as u64)?;
            for field in &schema.fields {
                enc.write_string(&field.name, MAX_NAME_LEN)?;
                enc.write_u8(field.wire as u8)?;
            }
        }
        Ok(())
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let version = dec.read_varuint()? as SchemaVersion;
        let count = dec.read_varuint()?;
        if count > 32 {
            return Err(ReplicaError::SchemaMismatch(format!(
                "{} component kinds exceed the 32 kind limit",
                count
            )));
        }

        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut schema = ComponentSchema::new(&dec.read_string(MAX_NAME_LEN)?);
            let fields = dec.read_varuint()?;
            if fields > 32 {
                return Err(ReplicaError::SchemaMismatch(format!(
                    "{} declares {} fields, more than 32",
                    schema.name, fields
                )));
            }
            for _ in 0..fields {
                let name = dec.read_string(MAX_NAME_LEN)?;
                let tag = dec.read_u8()?;
                let wire = WireType::from_u8(tag).ok_or_else(|| {
                    ReplicaError::SchemaMismatch(format!(
                        "{}.{} has unknown wire type {}",
                        schema.name, name, tag
                    ))
                })?;
                schema.fields.push(FieldSchema { name, wire });
            }
            components.push(schema);
        }
        Ok(Self::from_components(version, components))
    }

    /// Checks that `peer` lays out every component exactly as this registry
    /// does.
    pub fn ensure_compatible(&self, peer: &SchemaRegistry) -> Result<()> {
        if self.version != peer.version {
            return Err(ReplicaError::SchemaMismatch(format!(
                "schema version {} vs {}",
                self.version, peer.version
            )));
        }
        if self.components.len() != peer.components.len() {
            return Err(ReplicaError::SchemaMismatch(format!(
                "{} component kinds vs {}",
                self.components.len(),
                peer.components.len()
            )));
        }

        for (ours, theirs) in self.components.iter().zip(&peer.components) {
            if ours.name != theirs.name {
                return Err(ReplicaError::SchemaMismatch(format!(
                    "component {} where {} was expected",
                    theirs.name, ours.name
                )));
            }
            if ours.fields.len() != theirs.fields.len() {
                return Err(ReplicaError::SchemaMismatch(format!(
                    "{} has {} fields vs {}",
                    ours.name,
                    ours.fields.len(),
                    theirs.fields.len()
                )));
            }
            for (index, (a, b)) in ours.fields.iter().zip(&theirs.fields).enumerate() {
                if a != b {
                    return Err(ReplicaError::SchemaMismatch(format!(
                        "{} field {}: {}:{:?} vs {}:{:?}",
                        ours.name, index, a.name, a.wire, b.name, b.wire
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.len(), ComponentKind::COUNT);

        let physical = registry.get(ComponentKind::Physical).unwrap();
        assert_eq!(physical.name, "Physical");
        assert_eq!(physical.get_field("x").unwrap().wire, WireType::Float32);

        let (kind, schema) = registry.lookup("Petal").unwrap();
        assert_eq!(kind, ComponentKind::Petal);
        assert_eq!(schema.fields.len(), 4);
        assert!(registry.lookup("Tile").is_none());
    }

    #[test]
    fn test_dirty_field_names() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(
            registry.dirty_field_names(ComponentKind::Physical, 0b1100),
            vec!["x", "y"]
        );
        assert!(registry.dirty_field_names(ComponentKind::Mob, 0).is_empty());
    }

    #[test]
    fn test_encode_decode_compatible() {
        let registry = SchemaRegistry::builtin();
        let mut enc = Encoder::new(8192);
        registry.encode(&mut enc).unwrap();
        let bytes = enc.finish();

        let peer = SchemaRegistry::decode(&mut Decoder::new(&bytes)).unwrap();
        assert_eq!(peer, registry);
        registry.ensure_compatible(&peer).unwrap();
    }

    #[test]
    fn test_incompatible_field_order() {
        let registry = SchemaRegistry::builtin();

        let mut components = registry.components().to_vec();
        components[0].fields.swap(2, 3);
        let peer = SchemaRegistry::from_components(SCHEMA_VERSION, components);

        let err = registry.ensure_compatible(&peer).unwrap_err();
        assert!(matches!(err, ReplicaError::SchemaMismatch(_)));
    }

    #[test]
    fn test_unknown_wire_type() {
        let mut enc = Encoder::new(64);
        enc.write_varuint(1).unwrap();
        enc.write_varuint(1).unwrap();
        enc.write_string("Mob", 64).unwrap();
        enc.write_varuint(1).unwrap();
        enc.write_string("id", 64).unwrap();
        enc.write_u8(42).unwrap();
        let bytes = enc.finish();

        assert!(matches!(
            SchemaRegistry::decode(&mut Decoder::new(&bytes)),
            Err(ReplicaError::SchemaMismatch(_))
        ));
    }
}
