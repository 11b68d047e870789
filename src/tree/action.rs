use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::check::{CheckConfig, CheckInstance};
use super::element::{Element, ElementDetail, ObjectState, ObjectType};
use super::property::Property;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ObjectCreated,
    ObjectUpdated,
    ObjectDeleted,
    PropertyNew,
    PropertyUpdate,
    PropertyDelete,
    CheckNew,
    CheckUpdate,
    CheckDelete,
    CheckInstanceNew,
    CheckInstanceUpdate,
    CheckInstanceDelete,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ObjectCreated => "object_created",
            ActionKind::ObjectUpdated => "object_updated",
            ActionKind::ObjectDeleted => "object_deleted",
            ActionKind::PropertyNew => "property_new",
            ActionKind::PropertyUpdate => "property_update",
            ActionKind::PropertyDelete => "property_delete",
            ActionKind::CheckNew => "check_new",
            ActionKind::CheckUpdate => "check_update",
            ActionKind::CheckDelete => "check_delete",
            ActionKind::CheckInstanceNew => "check_instance_new",
            ActionKind::CheckInstanceUpdate => "check_instance_update",
            ActionKind::CheckInstanceDelete => "check_instance_delete",
        }
    }
}

/// Flat view of a tree object without its children or attached items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: Uuid,
    pub name: String,
    pub object_type: ObjectType,
    pub team_id: Uuid,
    pub state: ObjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<Uuid>,
    pub detail: ElementDetail,
}

impl ObjectSnapshot {
    #[must_use]
    pub fn new(element: &Element, bucket_id: Option<Uuid>) -> Self {
        Self {
            id: element.id,
            name: element.name.clone(),
            object_type: element.object_type(),
            team_id: element.team_id,
            state: element.state,
            parent: element.parent,
            bucket_id,
            detail: element.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "payload", content = "data", rename_all = "lowercase")]
pub enum ActionPayload {
    Object(ObjectSnapshot),
    Property(Property),
    Check(CheckConfig),
    Instance(CheckInstance),
}

/// One externally observable event of a tree mutation, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub repository_id: Uuid,
    pub object_type: ObjectType,
    pub object_id: Uuid,
    pub inherited: bool,
    pub payload: ActionPayload,
}

impl Action {
    /// Event name, with an `inherited_` prefix for events about inherited
    /// copies.
    #[must_use]
    pub fn name(&self) -> String {
        if self.inherited {
            format!("inherited_{}", self.kind.as_str())
        } else {
            self.kind.as_str().to_string()
        }
    }

    #[must_use]
    pub fn is_instance_event(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::CheckInstanceNew
                | ActionKind::CheckInstanceUpdate
                | ActionKind::CheckInstanceDelete
        )
    }
}
