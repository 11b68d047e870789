use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::element::ObjectType;
use super::property::PropertyValue;
use crate::types::{Attribute, Capability, Cardinality, Validity};

#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub capability: Capability,
    pub monitoring: String,
}

impl CapabilityEntry {
    #[must_use]
    pub fn canonical_name(&self) -> String {
        Capability::canonical_name(
            &self.monitoring,
            &self.capability.view,
            &self.capability.metric,
        )
    }
}

/// Global catalogue data a tree consults while applying mutations. Loaded
/// from the store by the owning keeper.
#[derive(Debug, Clone, Default)]
pub struct TreeCatalog {
    validity: HashMap<(String, ObjectType), (bool, bool)>,
    attributes: HashMap<String, Cardinality>,
    capabilities: HashMap<Uuid, CapabilityEntry>,
    levels: HashSet<String>,
}

impl TreeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validity(mut self, rows: impl IntoIterator<Item = Validity>) -> Self {
        for row in rows {
            if let Ok(entity) = row.entity.parse::<ObjectType>() {
                self.validity
                    .insert((row.system_property, entity), (row.direct, row.inherited));
            }
        }
        self
    }

    pub fn with_attributes(mut self, rows: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes
            .extend(rows.into_iter().map(|a| (a.name, a.cardinality)));
        self
    }

    pub fn with_capabilities(mut self, rows: impl IntoIterator<Item = CapabilityEntry>) -> Self {
        self.capabilities
            .extend(rows.into_iter().map(|c| (c.capability.id, c)));
        self
    }

    pub fn with_levels(mut self, rows: impl IntoIterator<Item = String>) -> Self {
        self.levels.extend(rows);
        self
    }

    fn validity_of(&self, value: &PropertyValue, object_type: ObjectType) -> (bool, bool) {
        match value {
            PropertyValue::System { name, .. } => self
                .validity
                .get(&(name.clone(), object_type))
                .copied()
                .unwrap_or((true, true)),
            _ => (true, true),
        }
    }

    /// May `value` be set directly on an object of `object_type`.
    #[must_use]
    pub fn valid_direct(&self, value: &PropertyValue, object_type: ObjectType) -> bool {
        self.validity_of(value, object_type).0
    }

    /// May an object of `object_type` hold an inherited copy of `value`.
    #[must_use]
    pub fn valid_inherited(&self, value: &PropertyValue, object_type: ObjectType) -> bool {
        self.validity_of(value, object_type).1
    }

    #[must_use]
    pub fn cardinality(&self, attribute: &str) -> Option<Cardinality> {
        self.attributes.get(attribute).copied()
    }

    #[must_use]
    pub fn capability(&self, id: Uuid) -> Option<&CapabilityEntry> {
        self.capabilities.get(&id)
    }

    /// An empty level catalogue accepts any level.
    #[must_use]
    pub fn knows_level(&self, level: &str) -> bool {
        self.levels.is_empty() || self.levels.contains(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_defaults_to_allowed() {
        let catalog = TreeCatalog::new().with_validity([Validity {
            system_property: "fqdn".into(),
            entity: "bucket".into(),
            direct: false,
            inherited: false,
        }]);

        let fqdn = PropertyValue::System {
            name: "fqdn".into(),
            value: "a".into(),
        };
        assert!(!catalog.valid_direct(&fqdn, ObjectType::Bucket));
        assert!(!catalog.valid_inherited(&fqdn, ObjectType::Bucket));
        assert!(catalog.valid_direct(&fqdn, ObjectType::Node));

        let tag = PropertyValue::System {
            name: "tag".into(),
            value: "gold".into(),
        };
        assert!(catalog.valid_inherited(&tag, ObjectType::Bucket));
    }

    #[test]
    fn test_levels() {
        assert!(TreeCatalog::new().knows_level("anything"));
        let catalog = TreeCatalog::new().with_levels(["warning".to_string()]);
        assert!(catalog.knows_level("warning"));
        assert!(!catalog.knows_level("fatal"));
    }
}
