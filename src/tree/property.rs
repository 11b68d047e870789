use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::check::uuid_from_digest;
use super::element::ObjectType;
use crate::error::Error;

/// System property whose value is part of its identity, so one object may
/// carry several of them.
pub const TAG_PROPERTY: &str = "tag";

/// View matching every other view during constraint evaluation.
pub const ANY_VIEW: &str = "any";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    System,
    Custom,
    Service,
    Oncall,
}

impl PropertyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::System => "system",
            PropertyType::Custom => "custom",
            PropertyType::Service => "service",
            PropertyType::Oncall => "oncall",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(PropertyType::System),
            "custom" => Ok(PropertyType::Custom),
            "service" => Ok(PropertyType::Service),
            "oncall" => Ok(PropertyType::Oncall),
            other => Err(Error::validation(format!("unknown property type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyValue {
    System {
        name: String,
        value: String,
    },
    Custom {
        custom_id: Uuid,
        name: String,
        value: String,
    },
    Service {
        name: String,
        team_id: Uuid,
        #[serde(default)]
        attributes: Vec<ServiceAttribute>,
    },
    Oncall {
        oncall_id: Uuid,
        name: String,
        number: String,
    },
}

impl PropertyValue {
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::System { .. } => PropertyType::System,
            PropertyValue::Custom { .. } => PropertyType::Custom,
            PropertyValue::Service { .. } => PropertyType::Service,
            PropertyValue::Oncall { .. } => PropertyType::Oncall,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            PropertyValue::System { name, .. }
            | PropertyValue::Custom { name, .. }
            | PropertyValue::Service { name, .. }
            | PropertyValue::Oncall { name, .. } => name,
        }
    }

    /// Identifying key: the name, plus the value for tag system
    /// properties.
    #[must_use]
    pub fn identifying_key(&self) -> String {
        match self {
            PropertyValue::System { name, value } if name == TAG_PROPERTY => {
                format!("{name}={value}")
            }
            other => other.name().to_string(),
        }
    }
}

/// Key of a property on one object. The identity key tells sources on the
/// same object apart; the mask key decides which sources hide inherited
/// copies coming from further up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub property_type: PropertyType,
    pub view: String,
    pub key: String,
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.property_type, self.view, self.key)
    }
}

/// A property held by one tree object, either as source or as an
/// inherited copy of a source further up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub instance_id: Uuid,
    pub source_instance_id: Uuid,
    pub object_id: Uuid,
    pub object_type: ObjectType,
    pub source_object_id: Uuid,
    pub source_type: ObjectType,
    pub view: String,
    pub inherited: bool,
    pub inheritance: bool,
    pub children_only: bool,
    pub value: PropertyValue,
}

impl PropertyKey {
    fn identity(view: &str, value: &PropertyValue) -> Self {
        Self {
            property_type: value.property_type(),
            view: view.to_string(),
            key: value.identifying_key(),
        }
    }

    fn mask(view: &str, value: &PropertyValue) -> Self {
        Self {
            property_type: value.property_type(),
            view: view.to_string(),
            key: value.name().to_string(),
        }
    }
}

impl Property {
    #[must_use]
    pub fn identity(&self) -> PropertyKey {
        PropertyKey::identity(&self.view, &self.value)
    }

    #[must_use]
    pub fn mask_key(&self) -> PropertyKey {
        PropertyKey::mask(&self.view, &self.value)
    }

    /// A children-only source does not count on its owning object.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.inherited || !self.children_only
    }

    /// Returns true if this property passes itself down to children.
    #[must_use]
    pub fn is_inheritable(&self) -> bool {
        self.inheritance
    }

    /// Template for the copy a child receives. The instance id is assigned
    /// by the receiving object.
    #[must_use]
    pub fn inherited_template(&self) -> Property {
        Property {
            instance_id: Uuid::nil(),
            inherited: true,
            children_only: false,
            ..self.clone()
        }
    }
}

/// Caller-supplied description of a new or updated source property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Set when replaying persisted sources so ids stay stable.
    #[serde(default)]
    pub instance_id: Option<Uuid>,
    pub view: String,
    #[serde(default = "default_inheritance")]
    pub inheritance: bool,
    #[serde(default)]
    pub children_only: bool,
    pub value: PropertyValue,
}

fn default_inheritance() -> bool {
    true
}

impl PropertySpec {
    #[must_use]
    pub fn identity(&self) -> PropertyKey {
        PropertyKey::identity(&self.view, &self.value)
    }

    #[must_use]
    pub fn mask_key(&self) -> PropertyKey {
        PropertyKey::mask(&self.view, &self.value)
    }
}

/// Instance id of the copy of `source_instance_id` held by `object_id`.
/// Copies keep their ids when a tree is replayed from the store.
#[must_use]
pub fn inherited_instance_id(source_instance_id: Uuid, object_id: Uuid) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(b"property");
    hasher.update(source_instance_id.as_bytes());
    hasher.update(object_id.as_bytes());
    uuid_from_digest(&hasher.finalize())
}

/// Returns true if a property scoped to `property_view` is visible when
/// evaluating `view`.
#[must_use]
pub fn view_matches(property_view: &str, view: &str) -> bool {
    property_view == view || property_view == ANY_VIEW
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(name: &str, value: &str) -> PropertyValue {
        PropertyValue::System {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_tag_value_is_part_of_key() {
        assert_eq!(system("tag", "gold").identifying_key(), "tag=gold");
        assert_eq!(system("fqdn", "a.example").identifying_key(), "fqdn");
    }

    #[test]
    fn test_distinct_tags_share_mask_key() {
        let a = PropertySpec {
            instance_id: None,
            view: "any".into(),
            inheritance: true,
            children_only: false,
            value: system("tag", "gold"),
        };
        let b = PropertySpec {
            value: system("tag", "silver"),
            ..a.clone()
        };
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.mask_key(), b.mask_key());

        let c = PropertySpec {
            view: "internal".into(),
            ..a.clone()
        };
        assert_ne!(a.mask_key(), c.mask_key());
    }

    #[test]
    fn test_children_only_source_is_not_effective() {
        let id = Uuid::new_v4();
        let property = Property {
            instance_id: id,
            source_instance_id: id,
            object_id: Uuid::new_v4(),
            object_type: ObjectType::Bucket,
            source_object_id: Uuid::new_v4(),
            source_type: ObjectType::Bucket,
            view: "any".into(),
            inherited: false,
            inheritance: true,
            children_only: true,
            value: system("dns_zone", "example.org"),
        };
        assert!(!property.is_effective());

        let template = property.inherited_template();
        assert!(template.is_effective());
        assert!(!template.children_only);
        assert_eq!(template.source_instance_id, id);
    }

    #[test]
    fn test_inherited_instance_id_is_per_object() {
        let source = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(inherited_instance_id(source, a), inherited_instance_id(source, a));
        assert_ne!(inherited_instance_id(source, a), inherited_instance_id(source, b));
        assert_ne!(inherited_instance_id(source, a), source);
    }

    #[test]
    fn test_view_matching() {
        assert!(view_matches("internal", "internal"));
        assert!(view_matches("any", "external"));
        assert!(!view_matches("internal", "external"));
    }
}
