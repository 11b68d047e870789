mod bootstrap;
mod schema;
mod sqlite;

pub use bootstrap::{ROOT_UID, SYSTEM_TEAM, add_category, bootstrap, is_bootstrapped};
pub use sqlite::SqliteStore;

#[cfg(test)]
pub(crate) use sqlite::tests as test_support;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::tree::{
    Action, CheckConfig, CheckInstance, ObjectState, ObjectType, Property, TreeCatalog,
};
use crate::types::*;
use crate::workflow::{InstanceConfig, NextStep, WorkflowHistory, WorkflowStatus};

/// A persisted tree object. Node rows carry their inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRow {
    pub id: Uuid,
    pub repository_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub object_type: ObjectType,
    pub name: String,
    pub team_id: Uuid,
    pub state: ObjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeRecord>,
}

/// Authoritative state of one repository, in replay order.
#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub repository: RepositoryRecord,
    pub objects: Vec<ObjectRow>,
    pub properties: Vec<Property>,
    pub checks: Vec<CheckConfig>,
    pub instances: Vec<CheckInstance>,
}

/// One compare-and-set step of a workflow.
#[derive(Debug, Clone)]
pub struct Transition {
    pub instance_config_id: Uuid,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub forced: bool,
    pub actor: Option<Uuid>,
    pub bump_attempts: bool,
    pub at: DateTime<Utc>,
}

pub trait InventoryStore {
    fn create_team(&self, team: &Team) -> Result<()>;
    fn get_team(&self, id: Uuid) -> Result<Option<Team>>;
    fn get_team_by_name(&self, name: &str) -> Result<Option<Team>>;
    fn list_teams(&self) -> Result<Vec<Team>>;
    fn update_team(&self, team: &Team) -> Result<()>;
    fn delete_team(&self, id: Uuid) -> Result<bool>;

    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    fn get_user_by_uid(&self, uid: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: Uuid) -> Result<bool>;

    fn create_oncall(&self, oncall: &Oncall) -> Result<()>;
    fn get_oncall(&self, id: Uuid) -> Result<Option<Oncall>>;
    fn list_oncalls(&self) -> Result<Vec<Oncall>>;
    fn update_oncall(&self, oncall: &Oncall) -> Result<()>;
    fn delete_oncall(&self, id: Uuid) -> Result<bool>;

    fn create_server(&self, server: &Server) -> Result<()>;
    fn get_server(&self, id: Uuid) -> Result<Option<Server>>;
    fn list_servers(&self) -> Result<Vec<Server>>;
    fn update_server(&self, server: &Server) -> Result<()>;
    fn delete_server(&self, id: Uuid) -> Result<bool>;

    fn create_node(&self, node: &NodeRecord) -> Result<()>;
    fn get_node(&self, id: Uuid) -> Result<Option<NodeRecord>>;
    fn list_nodes(&self) -> Result<Vec<NodeRecord>>;
    fn update_node(&self, node: &NodeRecord) -> Result<()>;
    fn delete_node(&self, id: Uuid) -> Result<bool>;
}

pub trait CatalogStore {
    fn add_lookup(&self, kind: LookupKind, name: &str) -> Result<()>;
    fn list_lookup(&self, kind: LookupKind) -> Result<Vec<String>>;
    fn has_lookup(&self, kind: LookupKind, name: &str) -> Result<bool>;
    fn remove_lookup(&self, kind: LookupKind, name: &str) -> Result<bool>;

    fn create_unit(&self, unit: &Unit) -> Result<()>;
    fn get_unit(&self, unit: &str) -> Result<Option<Unit>>;
    fn list_units(&self) -> Result<Vec<Unit>>;
    fn delete_unit(&self, unit: &str) -> Result<bool>;

    fn create_provider(&self, provider: &Provider) -> Result<()>;
    fn get_provider(&self, name: &str) -> Result<Option<Provider>>;
    fn list_providers(&self) -> Result<Vec<Provider>>;
    fn delete_provider(&self, name: &str) -> Result<bool>;

    fn create_metric(&self, metric: &Metric) -> Result<()>;
    fn get_metric(&self, path: &str) -> Result<Option<Metric>>;
    fn list_metrics(&self) -> Result<Vec<Metric>>;
    fn delete_metric(&self, path: &str) -> Result<bool>;

    fn create_level(&self, level: &Level) -> Result<()>;
    fn get_level(&self, name: &str) -> Result<Option<Level>>;
    fn list_levels(&self) -> Result<Vec<Level>>;
    fn delete_level(&self, name: &str) -> Result<bool>;

    fn create_attribute(&self, attribute: &Attribute) -> Result<()>;
    fn get_attribute(&self, name: &str) -> Result<Option<Attribute>>;
    fn list_attributes(&self) -> Result<Vec<Attribute>>;
    fn delete_attribute(&self, name: &str) -> Result<bool>;

    fn create_validity(&self, validity: &Validity) -> Result<()>;
    fn list_validity(&self) -> Result<Vec<Validity>>;
    fn delete_validity(&self, system_property: &str) -> Result<bool>;

    fn create_monitoring(&self, monitoring: &MonitoringSystem) -> Result<()>;
    fn get_monitoring(&self, id: Uuid) -> Result<Option<MonitoringSystem>>;
    fn list_monitoring(&self) -> Result<Vec<MonitoringSystem>>;
    fn delete_monitoring(&self, id: Uuid) -> Result<bool>;

    fn create_capability(&self, capability: &Capability) -> Result<()>;
    fn get_capability(&self, id: Uuid) -> Result<Option<Capability>>;
    fn list_capabilities(&self) -> Result<Vec<Capability>>;
    fn delete_capability(&self, id: Uuid) -> Result<bool>;

    /// Returns the id of the repository's custom property `name`, creating
    /// it on first use.
    fn ensure_custom_property(&self, repository_id: Uuid, name: &str) -> Result<Uuid>;

    /// Everything a tree consults while it mutates.
    fn load_tree_catalog(&self) -> Result<TreeCatalog>;
}

pub trait TreeStore {
    fn create_repository(&self, repository: &RepositoryRecord) -> Result<()>;
    fn get_repository(&self, id: Uuid) -> Result<Option<RepositoryRecord>>;
    fn get_repository_by_name(&self, name: &str) -> Result<Option<RepositoryRecord>>;
    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>>;
    fn delete_repository(&self, id: Uuid) -> Result<bool>;

    fn locate_object(&self, id: Uuid) -> Result<Option<ObjectRow>>;
    fn list_objects(
        &self,
        repository_id: Uuid,
        object_type: Option<ObjectType>,
    ) -> Result<Vec<ObjectRow>>;

    fn load_repository(&self, id: Uuid) -> Result<Option<RepositorySnapshot>>;

    /// Applies one mutation's action stream atomically.
    fn persist_actions(&self, repository_id: Uuid, actions: &[Action]) -> Result<()>;

    /// Replaces every inherited property and check row of a repository
    /// and writes the instance actions of a rebuild, in one transaction.
    fn persist_rebuild(
        &self,
        repository_id: Uuid,
        properties: &[Property],
        checks: &[CheckConfig],
        actions: &[Action],
    ) -> Result<()>;

    fn list_properties(&self, object_id: Uuid) -> Result<Vec<Property>>;
    fn list_check_configs(&self, repository_id: Uuid) -> Result<Vec<CheckConfig>>;
    fn get_check_config(&self, id: Uuid) -> Result<Option<CheckConfig>>;
    fn list_instances(&self, repository_id: Option<Uuid>) -> Result<Vec<CheckInstance>>;
    fn get_instance(&self, id: Uuid) -> Result<Option<CheckInstance>>;
}

pub trait WorkflowStore {
    fn get_instance_config(&self, id: Uuid) -> Result<Option<InstanceConfig>>;
    fn list_instance_versions(&self, instance_id: Uuid) -> Result<Vec<InstanceConfig>>;
    fn list_instance_configs(&self, status: Option<WorkflowStatus>) -> Result<Vec<InstanceConfig>>;
    fn list_monitoring_configs(
        &self,
        monitoring_id: Uuid,
        statuses: &[WorkflowStatus],
    ) -> Result<Vec<InstanceConfig>>;

    /// Compare-and-set on the status; writes a history row. Returns false
    /// if the configuration was not in `from`.
    fn transition(&self, transition: &Transition) -> Result<bool>;
    fn set_next_step(&self, id: Uuid, next: Option<NextStep>) -> Result<()>;

    fn workflow_summary(&self) -> Result<Vec<(WorkflowStatus, i64)>>;
    fn list_history(&self, instance_config_id: Uuid) -> Result<Vec<WorkflowHistory>>;
}

pub trait JobStore {
    /// Inserts the job and returns its serial.
    fn create_job(&self, job: &Job) -> Result<i64>;
    fn update_job(&self, job: &Job) -> Result<()>;
    fn get_job(&self, id: Uuid) -> Result<Option<Job>>;
    fn list_jobs(&self, user_id: Option<Uuid>) -> Result<Vec<Job>>;
}

pub trait AuthStore {
    fn set_credential(&self, credential: &Credential) -> Result<()>;
    fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>>;

    fn create_token(&self, token: &StoredToken) -> Result<()>;
    fn get_token(&self, tag: &str) -> Result<Option<StoredToken>>;
    fn list_tokens(&self) -> Result<Vec<StoredToken>>;
    fn delete_token(&self, tag: &str) -> Result<bool>;
    fn delete_user_tokens(&self, user_id: Uuid) -> Result<usize>;
    fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize>;

    fn set_activation(&self, activation: &ActivationToken) -> Result<()>;
    fn get_activation(&self, user_id: Uuid) -> Result<Option<ActivationToken>>;
    fn delete_activation(&self, user_id: Uuid) -> Result<bool>;
}

pub trait PermissionStore {
    fn create_category(&self, category: &Category) -> Result<()>;
    fn get_category(&self, name: &str) -> Result<Option<Category>>;
    fn list_categories(&self) -> Result<Vec<Category>>;
    /// Cascades to sections, actions, permissions, maps and grants.
    fn delete_category(&self, name: &str) -> Result<bool>;

    fn create_section(&self, section: &Section) -> Result<()>;
    fn get_section(&self, id: Uuid) -> Result<Option<Section>>;
    fn get_section_by_name(&self, name: &str) -> Result<Option<Section>>;
    fn list_sections(&self, category: Option<&str>) -> Result<Vec<Section>>;
    fn delete_section(&self, id: Uuid) -> Result<bool>;

    fn create_action(&self, action: &SectionAction) -> Result<()>;
    fn get_action(&self, id: Uuid) -> Result<Option<SectionAction>>;
    fn list_actions(&self, section_id: Option<Uuid>) -> Result<Vec<SectionAction>>;
    fn delete_action(&self, id: Uuid) -> Result<bool>;

    fn create_permission(&self, permission: &Permission) -> Result<()>;
    fn get_permission(&self, id: Uuid) -> Result<Option<Permission>>;
    fn get_permission_by_name(&self, category: &str, name: &str) -> Result<Option<Permission>>;
    fn list_permissions(&self, category: Option<&str>) -> Result<Vec<Permission>>;
    fn delete_permission(&self, id: Uuid) -> Result<bool>;

    fn create_permission_map(&self, map: &PermissionMap) -> Result<()>;
    fn list_permission_maps(&self, permission_id: Uuid) -> Result<Vec<PermissionMap>>;
    fn delete_permission_map(&self, id: Uuid) -> Result<bool>;

    fn create_grant(&self, grant: &Grant) -> Result<()>;
    fn get_grant(&self, id: Uuid) -> Result<Option<Grant>>;
    fn list_grants(&self) -> Result<Vec<Grant>>;
    /// Grants held by a user directly, through its team, or as admin.
    fn list_grants_for(&self, user_id: Uuid, team_id: Uuid, is_admin: bool)
    -> Result<Vec<Grant>>;
    fn delete_grant(&self, id: Uuid) -> Result<bool>;
}

/// Store defines the database interface.
pub trait Store:
    InventoryStore
    + CatalogStore
    + TreeStore
    + WorkflowStore
    + JobStore
    + AuthStore
    + PermissionStore
    + Send
    + Sync
{
    fn initialize(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}
