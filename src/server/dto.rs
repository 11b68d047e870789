use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::ObjectRow;
use crate::tree::{CheckSpec, Property, ServiceAttribute};
use crate::treekeeper::KeeperState;
use crate::types::{NodeAttachment, NodeRecord, RepositoryRecord, StoredToken};
use crate::workflow::WorkflowStatus;

// Authentication

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user_id: Uuid,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<StoredToken> for TokenResponse {
    fn from(token: StoredToken) -> Self {
        Self {
            token: token.tag,
            user_id: token.user_id,
            valid_from: token.valid_from,
            expires_at: token.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub user_id: Uuid,
    pub token: String,
}

// Catalogue

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct NameResponse {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MonitoringRequest {
    pub name: String,
    pub mode: String,
    pub contact_id: Uuid,
    pub team_id: Uuid,
    #[serde(default)]
    pub callback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapabilityRequest {
    pub monitoring_id: Uuid,
    pub metric: String,
    pub view: String,
    pub thresholds: u32,
}

// Identity

#[derive(Debug, Deserialize)]
pub struct TeamRequest {
    pub name: String,
    #[serde(default)]
    pub ldap_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub uid: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub employee_number: Option<i64>,
    pub mail_address: String,
    pub team_id: Uuid,
    #[serde(default)]
    pub is_admin: bool,
    /// Sets the initial password and activates the account right away.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub employee_number: Option<i64>,
    #[serde(default)]
    pub mail_address: Option<String>,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OncallRequest {
    pub name: String,
    pub number: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerRequest {
    pub asset_id: i64,
    pub datacenter: String,
    pub location: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
pub struct NodeRequest {
    pub asset_id: i64,
    pub name: String,
    pub team_id: Uuid,
    #[serde(default)]
    pub server_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_online: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub server_id: Option<Uuid>,
    #[serde(default)]
    pub is_online: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    #[serde(flatten)]
    pub node: NodeRecord,
    pub attachment: NodeAttachment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<Uuid>,
}

// Permissions

#[derive(Debug, Deserialize)]
pub struct SectionRequest {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    pub section_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PermissionRequest {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct MapRequest {
    pub section_id: Uuid,
    #[serde(default)]
    pub action_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SectionQuery {
    #[serde(default)]
    pub section_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub recipient_type: String,
    pub recipient_id: Uuid,
    pub permission_id: Uuid,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub object_id: Option<Uuid>,
}

// Tree

#[derive(Debug, Deserialize)]
pub struct RepositoryRequest {
    pub name: String,
    pub team_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RepositoryResponse {
    #[serde(flatten)]
    pub repository: RepositoryRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keeper: Option<KeeperState>,
}

/// A tree object with the properties it currently carries.
#[derive(Debug, Serialize)]
pub struct ObjectResponse {
    #[serde(flatten)]
    pub object: ObjectRow,
    pub properties: Vec<Property>,
}

#[derive(Debug, Deserialize)]
pub struct BucketRequest {
    pub name: String,
    pub environment: String,
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerRequest {
    pub name: String,
    #[serde(default)]
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub child_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AssignNodeRequest {
    pub node_id: Uuid,
}

/// Property body as sent by clients; catalogue references are resolved
/// by the handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyInput {
    System {
        name: String,
        value: String,
    },
    Custom {
        name: String,
        value: String,
    },
    Service {
        name: String,
        #[serde(default)]
        team_id: Option<Uuid>,
        #[serde(default)]
        attributes: Vec<ServiceAttribute>,
    },
    Oncall {
        oncall_id: Uuid,
    },
}

impl PropertyInput {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyInput::System { .. } => "system",
            PropertyInput::Custom { .. } => "custom",
            PropertyInput::Service { .. } => "service",
            PropertyInput::Oncall { .. } => "oncall",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PropertyRequest {
    #[serde(default = "default_view")]
    pub view: String,
    #[serde(default = "default_true")]
    pub inheritance: bool,
    #[serde(default)]
    pub children_only: bool,
    #[serde(flatten)]
    pub value: PropertyInput,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub object_id: Uuid,
    #[serde(flatten)]
    pub spec: CheckSpec,
}

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    #[serde(default)]
    pub repository: Option<Uuid>,
}

// Workflow and jobs

#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub instance_config_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ForceRequest {
    pub status: WorkflowStatus,
}

#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    pub status: WorkflowStatus,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    /// Lists every user's jobs; needs the job-admin permission.
    #[serde(default)]
    pub all: bool,
}

fn default_true() -> bool {
    true
}

fn default_view() -> String {
    "any".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_request_flattens_type() {
        let req: PropertyRequest = serde_json::from_value(serde_json::json!({
            "type": "custom",
            "name": "foo",
            "value": "1"
        }))
        .unwrap();
        assert_eq!(req.view, "any");
        assert!(req.inheritance);
        assert_eq!(req.value.type_name(), "custom");
    }

    #[test]
    fn test_check_request_defaults() {
        let req: CheckRequest = serde_json::from_value(serde_json::json!({
            "object_id": Uuid::nil(),
            "name": "cpu",
            "capability_id": Uuid::nil(),
            "interval": 60,
            "thresholds": [{"predicate": "<", "value": 10, "level": "warning"}]
        }))
        .unwrap();
        assert!(req.spec.inheritance);
        assert!(req.spec.constraints.is_empty());
        assert_eq!(req.spec.thresholds.len(), 1);
    }
}
