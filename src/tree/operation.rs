use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::check::CheckSpec;
use super::property::PropertySpec;
use crate::error::Error;

/// Inventory data of a node entering a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    pub asset_id: i64,
    #[serde(default)]
    pub server_id: Option<Uuid>,
    #[serde(default)]
    pub is_online: bool,
}

/// Every mutation a tree accepts. Applied through `Tree::apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TreeOperation {
    CreateBucket {
        id: Uuid,
        name: String,
        environment: String,
        team_id: Uuid,
    },
    DestroyBucket {
        id: Uuid,
    },
    CreateGroup {
        id: Uuid,
        bucket_id: Uuid,
        name: String,
        team_id: Uuid,
    },
    DestroyGroup {
        id: Uuid,
    },
    CreateCluster {
        id: Uuid,
        bucket_id: Uuid,
        name: String,
        team_id: Uuid,
    },
    DestroyCluster {
        id: Uuid,
    },
    AssignNode {
        bucket_id: Uuid,
        node: NodeSpec,
    },
    UnassignNode {
        id: Uuid,
    },
    AddMember {
        parent: Uuid,
        child: Uuid,
    },
    AddProperty {
        object: Uuid,
        spec: PropertySpec,
    },
    UpdateProperty {
        object: Uuid,
        source_instance_id: Uuid,
        spec: PropertySpec,
    },
    DeleteProperty {
        object: Uuid,
        source_instance_id: Uuid,
    },
    AddCheck {
        object: Uuid,
        spec: CheckSpec,
    },
    UpdateCheck {
        config_id: Uuid,
        spec: CheckSpec,
    },
    DeleteCheck {
        config_id: Uuid,
    },
}

impl TreeOperation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TreeOperation::CreateBucket { .. } => "create_bucket",
            TreeOperation::DestroyBucket { .. } => "destroy_bucket",
            TreeOperation::CreateGroup { .. } => "create_group",
            TreeOperation::DestroyGroup { .. } => "destroy_group",
            TreeOperation::CreateCluster { .. } => "create_cluster",
            TreeOperation::DestroyCluster { .. } => "destroy_cluster",
            TreeOperation::AssignNode { .. } => "assign_node",
            TreeOperation::UnassignNode { .. } => "unassign_node",
            TreeOperation::AddMember { .. } => "add_member",
            TreeOperation::AddProperty { .. } => "add_property",
            TreeOperation::UpdateProperty { .. } => "update_property",
            TreeOperation::DeleteProperty { .. } => "delete_property",
            TreeOperation::AddCheck { .. } => "add_check",
            TreeOperation::UpdateCheck { .. } => "update_check",
            TreeOperation::DeleteCheck { .. } => "delete_check",
        }
    }
}

/// Non-fatal failures a tree reports on its error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("attribute cardinality violated: {0}")]
    AttributeCardinality(String),

    #[error("missing capability: {0}")]
    MissingCapability(Uuid),

    #[error("{0} not found in tree")]
    NotFound(String),

    #[error("object is not empty: {0}")]
    NotEmpty(String),

    #[error("{0}")]
    Invalid(String),
}

impl From<TreeError> for Error {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Duplicate(_) | TreeError::NotEmpty(_) => Error::Conflict(err.to_string()),
            TreeError::NotFound(_) => Error::NotFound(err.to_string()),
            TreeError::InvalidAttachment(_)
            | TreeError::AttributeCardinality(_)
            | TreeError::MissingCapability(_)
            | TreeError::Invalid(_) => Error::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            Error::from(TreeError::Duplicate("property foo".into())),
            Error::Conflict(msg) if msg == "duplicate property foo"
        ));
        assert!(matches!(
            Error::from(TreeError::MissingCapability(Uuid::nil())),
            Error::Validation(_)
        ));
        assert!(matches!(
            Error::from(TreeError::NotFound("bucket".into())),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_operation_wire_format() {
        let op: TreeOperation = serde_json::from_value(serde_json::json!({
            "op": "destroy_group",
            "id": Uuid::nil(),
        }))
        .unwrap();
        assert_eq!(op.name(), "destroy_group");
    }
}
