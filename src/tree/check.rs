use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::element::{ObjectState, ObjectType};
use super::property::{Property, PropertyValue, view_matches};
use crate::error::Error;

/// Constraint value matching any value, as long as the property exists.
pub const DEFINED: &str = "@defined";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Predicate {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
}

impl Predicate {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Predicate::Lt => "<",
            Predicate::Le => "<=",
            Predicate::Eq => "==",
            Predicate::Ge => ">=",
            Predicate::Gt => ">",
            Predicate::Ne => "!=",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Predicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Predicate::Lt),
            "<=" => Ok(Predicate::Le),
            "=" | "==" => Ok(Predicate::Eq),
            ">=" => Ok(Predicate::Ge),
            ">" => Ok(Predicate::Gt),
            "!=" => Ok(Predicate::Ne),
            other => Err(Error::validation(format!("unknown predicate: {other}"))),
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Threshold {
    pub predicate: Predicate,
    pub value: i64,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Constraint {
    /// Matches a property of the object itself: `environment`,
    /// `object_type` or `object_state`.
    Native { property: String, value: String },
    System { name: String, value: String },
    Custom { custom_id: Uuid, value: String },
    Service {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<Uuid>,
    },
    Attribute { name: String, value: String },
    Oncall { oncall_id: Uuid },
}

impl Constraint {
    /// Service and attribute constraints select service properties instead
    /// of filtering the object.
    #[must_use]
    pub fn selects_service(&self) -> bool {
        matches!(self, Constraint::Service { .. } | Constraint::Attribute { .. })
    }
}

fn value_matches(wanted: &str, actual: &str) -> bool {
    wanted == DEFINED || wanted == actual
}

/// What a constraint is evaluated against on one object.
pub struct ConstraintContext<'a> {
    pub object_type: ObjectType,
    pub state: ObjectState,
    pub environment: Option<&'a str>,
    pub view: &'a str,
    pub properties: Vec<&'a Property>,
}

impl ConstraintContext<'_> {
    fn visible(&self) -> impl Iterator<Item = &Property> {
        self.properties
            .iter()
            .copied()
            .filter(|p| view_matches(&p.view, self.view))
    }

    fn holds(&self, constraint: &Constraint) -> bool {
        match constraint {
            Constraint::Native { property, value } => {
                let actual = match property.as_str() {
                    "environment" => self.environment,
                    "object_type" => Some(self.object_type.as_str()),
                    "object_state" => Some(self.state.as_str()),
                    _ => None,
                };
                actual.is_some_and(|actual| value_matches(value, actual))
            }
            Constraint::System { name, value } => self.visible().any(|p| {
                matches!(&p.value, PropertyValue::System { name: n, value: v }
                    if n == name && value_matches(value, v))
            }),
            Constraint::Custom { custom_id, value } => self.visible().any(|p| {
                matches!(&p.value, PropertyValue::Custom { custom_id: id, value: v, .. }
                    if id == custom_id && value_matches(value, v))
            }),
            Constraint::Oncall { oncall_id } => self.visible().any(|p| {
                matches!(&p.value, PropertyValue::Oncall { oncall_id: id, .. } if id == oncall_id)
            }),
            Constraint::Service { .. } | Constraint::Attribute { .. } => true,
        }
    }

    fn service_selected(property: &Property, constraints: &[&Constraint]) -> bool {
        let PropertyValue::Service {
            name,
            team_id,
            attributes,
        } = &property.value
        else {
            return false;
        };

        constraints.iter().all(|constraint| match constraint {
            Constraint::Service {
                name: wanted,
                team_id: wanted_team,
            } => value_matches(wanted, name) && wanted_team.is_none_or(|t| t == *team_id),
            Constraint::Attribute {
                name: attribute,
                value,
            } => attributes
                .iter()
                .any(|a| &a.name == attribute && value_matches(value, &a.value)),
            _ => true,
        })
    }

    /// Evaluates the constraint set. Returns `None` if the object does not
    /// qualify, `Some(vec![None])` for a single instance without service, or
    /// one entry per selected service property.
    #[must_use]
    pub fn evaluate(&self, constraints: &[Constraint]) -> Option<Vec<Option<&Property>>> {
        if !constraints.iter().all(|c| self.holds(c)) {
            return None;
        }

        let selectors: Vec<&Constraint> =
            constraints.iter().filter(|c| c.selects_service()).collect();
        if selectors.is_empty() {
            return Some(vec![None]);
        }

        let services: Vec<Option<&Property>> = self
            .visible()
            .filter(|p| Self::service_selected(p, &selectors))
            .map(Some)
            .collect();
        if services.is_empty() {
            None
        } else {
            Some(services)
        }
    }
}

/// A check configuration as held by one tree object, either as the source
/// or as an inherited copy. Copies share the configuration id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub id: Uuid,
    pub name: String,
    pub repository_id: Uuid,
    pub object_id: Uuid,
    pub object_type: ObjectType,
    pub source_object_id: Uuid,
    pub source_type: ObjectType,
    pub capability_id: Uuid,
    pub interval: u64,
    pub constraints: Vec<Constraint>,
    pub thresholds: Vec<Threshold>,
    pub inheritance: bool,
    pub children_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub inherited: bool,
}

impl CheckConfig {
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.inherited || !self.children_only
    }

    #[must_use]
    pub fn inherited_template(&self) -> CheckConfig {
        CheckConfig {
            inherited: true,
            children_only: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Set when replaying persisted configurations.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub capability_id: Uuid,
    pub interval: u64,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    pub thresholds: Vec<Threshold>,
    #[serde(default = "default_inheritance")]
    pub inheritance: bool,
    #[serde(default)]
    pub children_only: bool,
    #[serde(default)]
    pub external_id: Option<String>,
}

fn default_inheritance() -> bool {
    true
}

/// Identity of a check instance inside one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub config_id: Uuid,
    pub object_id: Uuid,
    pub view: String,
    pub service_source_id: Option<Uuid>,
}

impl InstanceKey {
    /// Stable instance id derived from the key, so re-evaluation yields the
    /// same id for the same materialization.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(b"instance");
        hasher.update(self.config_id.as_bytes());
        hasher.update(self.object_id.as_bytes());
        hasher.update(self.view.as_bytes());
        if let Some(service) = self.service_source_id {
            hasher.update(service.as_bytes());
        }
        uuid_from_digest(&hasher.finalize())
    }
}

pub(crate) fn uuid_from_digest(digest: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Deterministic configuration hash of one check instance.
#[must_use]
pub fn configuration_hash(key: &InstanceKey, config: &CheckConfig) -> String {
    let mut thresholds: Vec<String> = config
        .thresholds
        .iter()
        .map(|t| format!("{}|{}|{}", t.predicate, t.value, t.level))
        .collect();
    thresholds.sort();

    let mut constraints: Vec<String> = config
        .constraints
        .iter()
        .map(|c| serde_json::to_string(c).unwrap_or_default())
        .collect();
    constraints.sort();

    let mut hasher = Sha256::new();
    hasher.update(key.config_id.as_bytes());
    hasher.update(key.object_id.as_bytes());
    hasher.update(key.view.as_bytes());
    hasher.update(
        key.service_source_id
            .map(|id| id.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(config.interval.to_be_bytes());
    for threshold in &thresholds {
        hasher.update(threshold.as_bytes());
        hasher.update(b";");
    }
    for constraint in &constraints {
        hasher.update(constraint.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

/// A materialized check configuration on one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInstance {
    pub id: Uuid,
    /// Changes with every version.
    pub instance_config_id: Uuid,
    pub config_id: Uuid,
    pub repository_id: Uuid,
    pub object_id: Uuid,
    pub object_type: ObjectType,
    pub capability_id: Uuid,
    pub view: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_source_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub hash: String,
    pub version: u32,
    pub deployment: serde_json::Value,
}

impl CheckInstance {
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            config_id: self.config_id,
            object_id: self.object_id,
            view: self.view.clone(),
            service_source_id: self.service_source_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::property::ServiceAttribute;

    fn property(view: &str, value: PropertyValue) -> Property {
        let id = Uuid::new_v4();
        Property {
            instance_id: id,
            source_instance_id: id,
            object_id: Uuid::nil(),
            object_type: ObjectType::Node,
            source_object_id: Uuid::nil(),
            source_type: ObjectType::Node,
            view: view.into(),
            inherited: false,
            inheritance: true,
            children_only: false,
            value,
        }
    }

    fn service(name: &str, attributes: &[(&str, &str)]) -> PropertyValue {
        PropertyValue::Service {
            name: name.into(),
            team_id: Uuid::nil(),
            attributes: attributes
                .iter()
                .map(|(n, v)| ServiceAttribute {
                    name: (*n).into(),
                    value: (*v).into(),
                })
                .collect(),
        }
    }

    fn config(thresholds: Vec<Threshold>, constraints: Vec<Constraint>) -> CheckConfig {
        CheckConfig {
            id: Uuid::nil(),
            name: "cpu".into(),
            repository_id: Uuid::nil(),
            object_id: Uuid::nil(),
            object_type: ObjectType::Bucket,
            source_object_id: Uuid::nil(),
            source_type: ObjectType::Bucket,
            capability_id: Uuid::nil(),
            interval: 60,
            constraints,
            thresholds,
            inheritance: true,
            children_only: false,
            external_id: None,
            inherited: false,
        }
    }

    #[test]
    fn test_predicate_parse() {
        assert_eq!("=".parse::<Predicate>().unwrap(), Predicate::Eq);
        assert_eq!("<=".parse::<Predicate>().unwrap(), Predicate::Le);
        assert!("=~".parse::<Predicate>().is_err());

        let threshold: Threshold =
            serde_json::from_str(r#"{"predicate":"<","value":10,"level":"warning"}"#).unwrap();
        assert_eq!(threshold.predicate, Predicate::Lt);
    }

    #[test]
    fn test_no_service_constraint_yields_single_instance() {
        let props = [property("any", service("webserver", &[]))];
        let ctx = ConstraintContext {
            object_type: ObjectType::Node,
            state: ObjectState::Standalone,
            environment: Some("production"),
            view: "internal",
            properties: props.iter().collect(),
        };

        let result = ctx.evaluate(&[]).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].is_none());
    }

    #[test]
    fn test_service_constraint_selects_matching_services() {
        let props = [
            property("internal", service("webserver", &[("port", "80")])),
            property("external", service("webserver", &[("port", "443")])),
            property("any", service("database", &[("port", "5432")])),
        ];
        let ctx = ConstraintContext {
            object_type: ObjectType::Node,
            state: ObjectState::Standalone,
            environment: None,
            view: "internal",
            properties: props.iter().collect(),
        };

        let by_name = ctx
            .evaluate(&[Constraint::Service {
                name: "webserver".into(),
                team_id: None,
            }])
            .unwrap();
        assert_eq!(by_name.len(), 1);

        let any_service = ctx
            .evaluate(&[Constraint::Service {
                name: DEFINED.into(),
                team_id: None,
            }])
            .unwrap();
        assert_eq!(any_service.len(), 2);

        let by_attribute = ctx
            .evaluate(&[Constraint::Attribute {
                name: "port".into(),
                value: "5432".into(),
            }])
            .unwrap();
        assert_eq!(by_attribute.len(), 1);

        assert!(
            ctx.evaluate(&[Constraint::Service {
                name: "mailserver".into(),
                team_id: None,
            }])
            .is_none()
        );
    }

    #[test]
    fn test_native_and_system_constraints_filter_object() {
        let props = [property(
            "any",
            PropertyValue::System {
                name: "fqdn".into(),
                value: "web01.example".into(),
            },
        )];
        let ctx = ConstraintContext {
            object_type: ObjectType::Node,
            state: ObjectState::Clustered,
            environment: Some("production"),
            view: "external",
            properties: props.iter().collect(),
        };

        assert!(
            ctx.evaluate(&[Constraint::Native {
                property: "environment".into(),
                value: "production".into(),
            }])
            .is_some()
        );
        assert!(
            ctx.evaluate(&[Constraint::Native {
                property: "object_state".into(),
                value: "standalone".into(),
            }])
            .is_none()
        );
        assert!(
            ctx.evaluate(&[Constraint::System {
                name: "fqdn".into(),
                value: DEFINED.into(),
            }])
            .is_some()
        );
    }

    #[test]
    fn test_hash_ignores_threshold_order() {
        let key = InstanceKey {
            config_id: Uuid::new_v4(),
            object_id: Uuid::new_v4(),
            view: "internal".into(),
            service_source_id: None,
        };
        let warn = Threshold {
            predicate: Predicate::Lt,
            value: 10,
            level: "warning".into(),
        };
        let crit = Threshold {
            predicate: Predicate::Lt,
            value: 5,
            level: "critical".into(),
        };

        let a = configuration_hash(&key, &config(vec![warn.clone(), crit.clone()], vec![]));
        let b = configuration_hash(&key, &config(vec![crit, warn.clone()], vec![]));
        assert_eq!(a, b);

        let c = configuration_hash(
            &key,
            &config(
                vec![Threshold {
                    value: 20,
                    ..warn
                }],
                vec![],
            ),
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_instance_id_is_stable() {
        let key = InstanceKey {
            config_id: Uuid::new_v4(),
            object_id: Uuid::new_v4(),
            view: "internal".into(),
            service_source_id: Some(Uuid::new_v4()),
        };
        assert_eq!(key.instance_id(), key.clone().instance_id());

        let other = InstanceKey {
            service_source_id: None,
            ..key.clone()
        };
        assert_ne!(key.instance_id(), other.instance_id());
    }
}
