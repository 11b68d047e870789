use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ldap_id: Option<String>,
    pub is_system: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub uid: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_number: Option<i64>,
    pub mail_address: String,
    pub team_id: Uuid,
    pub is_active: bool,
    pub is_system: bool,
    pub is_deleted: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Oncall {
    pub id: Uuid,
    pub name: String,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: Uuid,
    pub asset_id: i64,
    pub datacenter: String,
    pub location: String,
    pub name: String,
    pub is_online: bool,
    pub is_deleted: bool,
}

/// Inventory record of a managed host. Its tree membership lives in the
/// node assignment table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: Uuid,
    pub asset_id: i64,
    pub name: String,
    pub team_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Uuid>,
    pub is_online: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Where a node currently sits relative to the configuration trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeAttachment {
    Floating,
    AttachedUnconfigured,
    Attached,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAssignment {
    pub node_id: Uuid,
    pub repository_id: Uuid,
    pub bucket_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    pub is_active: bool,
    pub is_deleted: bool,
    /// Passed through verbatim; its ordering against rebuilds is not
    /// interpreted by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_level: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoringSystem {
    pub id: Uuid,
    pub name: String,
    pub mode: String,
    pub contact_id: Uuid,
    pub team_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    pub id: Uuid,
    pub name: String,
    pub monitoring_id: Uuid,
    pub metric: String,
    pub view: String,
    pub thresholds: u32,
}

impl Capability {
    /// Canonical capability name: `<monitoring>.<view>.<metric>`.
    #[must_use]
    pub fn canonical_name(monitoring: &str, view: &str, metric: &str) -> String {
        format!("{monitoring}.{view}.{metric}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metric {
    pub path: String,
    pub unit: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub unit: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Level {
    pub name: String,
    pub short_name: String,
    pub numeric: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Once,
    Multi,
}

impl Cardinality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::Once => "once",
            Cardinality::Multi => "multi",
        }
    }
}

impl FromStr for Cardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Cardinality::Once),
            "multi" => Ok(Cardinality::Multi),
            other => Err(Error::validation(format!("invalid cardinality: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub cardinality: Cardinality,
}

/// Whether a system property may be set directly on, or inherited by, an
/// entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validity {
    pub system_property: String,
    pub entity: String,
    pub direct: bool,
    pub inherited: bool,
}

/// Catalogues that are nothing more than a list of unique names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    Entity,
    Environment,
    State,
    Predicate,
    Status,
    Mode,
    Datacenter,
    View,
}

impl LookupKind {
    pub const ALL: [LookupKind; 8] = [
        LookupKind::Entity,
        LookupKind::Environment,
        LookupKind::State,
        LookupKind::Predicate,
        LookupKind::Status,
        LookupKind::Mode,
        LookupKind::Datacenter,
        LookupKind::View,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LookupKind::Entity => "entity",
            LookupKind::Environment => "environment",
            LookupKind::State => "state",
            LookupKind::Predicate => "predicate",
            LookupKind::Status => "status",
            LookupKind::Mode => "mode",
            LookupKind::Datacenter => "datacenter",
            LookupKind::View => "view",
        }
    }

    /// Values written at bootstrap.
    #[must_use]
    pub fn defaults(self) -> &'static [&'static str] {
        match self {
            LookupKind::Entity => &["repository", "bucket", "group", "cluster", "node"],
            LookupKind::Environment => &["development", "integration", "production"],
            LookupKind::State => &["unassigned", "standalone", "grouped", "clustered"],
            LookupKind::Predicate => &["<", "<=", "==", ">=", ">", "!="],
            LookupKind::Status => &[
                "awaiting_computation",
                "computed",
                "awaiting_rollout",
                "rollout_in_progress",
                "rollout_failed",
                "active",
                "blocked",
                "deprovision_in_progress",
                "deprovisioning_failed",
                "deprovisioned",
                "deleted",
            ],
            LookupKind::Mode => &["public", "private"],
            LookupKind::Datacenter => &[],
            LookupKind::View => &["any", "internal", "external"],
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Processed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Processed => "processed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in_progress" => Ok(JobStatus::InProgress),
            "processed" => Ok(JobStatus::Processed),
            other => Err(Error::internal(format!("unknown job status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Pending,
    Success,
    Failed,
}

impl JobResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobResult::Pending => "pending",
            JobResult::Success => "success",
            JobResult::Failed => "failed",
        }
    }
}

impl FromStr for JobResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobResult::Pending),
            "success" => Ok(JobResult::Success),
            "failed" => Ok(JobResult::Failed),
            other => Err(Error::internal(format!("unknown job result: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub serial: i64,
    pub job_type: String,
    pub status: JobStatus,
    pub result: JobResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<Uuid>,
    pub user_id: Uuid,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_parse() {
        assert_eq!("once".parse::<Cardinality>().unwrap(), Cardinality::Once);
        assert_eq!("multi".parse::<Cardinality>().unwrap(), Cardinality::Multi);
        assert!("twice".parse::<Cardinality>().is_err());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Queued, JobStatus::InProgress, JobStatus::Processed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_capability_canonical_name() {
        assert_eq!(
            Capability::canonical_name("mon-A", "internal", "cpu.idle"),
            "mon-A.internal.cpu.idle"
        );
    }
}
