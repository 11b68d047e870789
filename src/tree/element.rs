use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::check::CheckConfig;
use super::property::Property;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Repository,
    Bucket,
    Group,
    Cluster,
    Node,
    Fault,
}

impl ObjectType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Repository => "repository",
            ObjectType::Bucket => "bucket",
            ObjectType::Group => "group",
            ObjectType::Cluster => "cluster",
            ObjectType::Node => "node",
            ObjectType::Fault => "fault",
        }
    }

    /// State a child of type `child` takes when attached below `self`, or
    /// `None` if the attachment is illegal.
    #[must_use]
    pub fn receive_state(self, child: ObjectType) -> Option<ObjectState> {
        ATTACH_RULES
            .iter()
            .find(|(parent, kind, _)| *parent == self && *kind == child)
            .map(|(_, _, state)| *state)
    }

    #[must_use]
    pub fn can_receive(self, child: ObjectType) -> bool {
        self.receive_state(child).is_some()
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(ObjectType::Repository),
            "bucket" => Ok(ObjectType::Bucket),
            "group" => Ok(ObjectType::Group),
            "cluster" => Ok(ObjectType::Cluster),
            "node" => Ok(ObjectType::Node),
            other => Err(Error::validation(format!("unknown entity type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Unassigned,
    Standalone,
    Grouped,
    Clustered,
}

impl ObjectState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectState::Unassigned => "unassigned",
            ObjectState::Standalone => "standalone",
            ObjectState::Grouped => "grouped",
            ObjectState::Clustered => "clustered",
        }
    }
}

impl FromStr for ObjectState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(ObjectState::Unassigned),
            "standalone" => Ok(ObjectState::Standalone),
            "grouped" => Ok(ObjectState::Grouped),
            "clustered" => Ok(ObjectState::Clustered),
            other => Err(Error::internal(format!("unknown object state: {other}"))),
        }
    }
}

/// Legal (parent, child) pairs and the state the child takes.
pub const ATTACH_RULES: &[(ObjectType, ObjectType, ObjectState)] = &[
    (ObjectType::Repository, ObjectType::Bucket, ObjectState::Standalone),
    (ObjectType::Repository, ObjectType::Fault, ObjectState::Standalone),
    (ObjectType::Bucket, ObjectType::Group, ObjectState::Standalone),
    (ObjectType::Bucket, ObjectType::Cluster, ObjectState::Standalone),
    (ObjectType::Bucket, ObjectType::Node, ObjectState::Standalone),
    (ObjectType::Group, ObjectType::Group, ObjectState::Grouped),
    (ObjectType::Group, ObjectType::Cluster, ObjectState::Grouped),
    (ObjectType::Group, ObjectType::Node, ObjectState::Grouped),
    (ObjectType::Cluster, ObjectType::Node, ObjectState::Clustered),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementDetail {
    Repository {
        is_active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        rollback_level: Option<String>,
    },
    Bucket {
        environment: String,
    },
    Group,
    Cluster,
    Node {
        asset_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_id: Option<Uuid>,
        is_online: bool,
    },
    Fault {
        errors: Vec<String>,
    },
}

impl ElementDetail {
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        match self {
            ElementDetail::Repository { .. } => ObjectType::Repository,
            ElementDetail::Bucket { .. } => ObjectType::Bucket,
            ElementDetail::Group => ObjectType::Group,
            ElementDetail::Cluster => ObjectType::Cluster,
            ElementDetail::Node { .. } => ObjectType::Node,
            ElementDetail::Fault { .. } => ObjectType::Fault,
        }
    }
}

/// One object of the arena. Parent and children are ids into the owning
/// tree.
#[derive(Debug, Clone, Serialize)]
pub struct Element {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    pub state: ObjectState,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub properties: Vec<Property>,
    pub checks: Vec<CheckConfig>,
    pub detail: ElementDetail,
}

impl Element {
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>, team_id: Uuid, detail: ElementDetail) -> Self {
        Self {
            id,
            name: name.into(),
            team_id,
            state: ObjectState::Unassigned,
            parent: None,
            children: Vec::new(),
            properties: Vec::new(),
            checks: Vec::new(),
            detail,
        }
    }

    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.detail.object_type()
    }

    /// Properties that count on this object, excluding children-only sources.
    pub fn effective_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_effective())
    }

    /// Checks that instantiate on this object, excluding children-only sources.
    pub fn effective_checks(&self) -> impl Iterator<Item = &CheckConfig> {
        self.checks.iter().filter(|c| c.is_effective())
    }

    #[must_use]
    pub fn has_sources(&self) -> bool {
        self.properties.iter().any(|p| !p.inherited) || self.checks.iter().any(|c| !c.inherited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_rules() {
        assert!(ObjectType::Repository.can_receive(ObjectType::Bucket));
        assert!(ObjectType::Bucket.can_receive(ObjectType::Node));
        assert!(ObjectType::Group.can_receive(ObjectType::Group));
        assert!(ObjectType::Cluster.can_receive(ObjectType::Node));

        assert!(!ObjectType::Cluster.can_receive(ObjectType::Group));
        assert!(!ObjectType::Cluster.can_receive(ObjectType::Cluster));
        assert!(!ObjectType::Repository.can_receive(ObjectType::Node));
        assert!(!ObjectType::Node.can_receive(ObjectType::Node));
        assert!(!ObjectType::Bucket.can_receive(ObjectType::Bucket));
    }

    #[test]
    fn test_receive_state() {
        assert_eq!(
            ObjectType::Group.receive_state(ObjectType::Node),
            Some(ObjectState::Grouped)
        );
        assert_eq!(
            ObjectType::Cluster.receive_state(ObjectType::Node),
            Some(ObjectState::Clustered)
        );
        assert_eq!(
            ObjectType::Bucket.receive_state(ObjectType::Cluster),
            Some(ObjectState::Standalone)
        );
    }

    #[test]
    fn test_object_type_parse_rejects_fault() {
        assert_eq!("group".parse::<ObjectType>().unwrap(), ObjectType::Group);
        assert!("fault".parse::<ObjectType>().is_err());
        assert!("host".parse::<ObjectType>().is_err());
    }
}
