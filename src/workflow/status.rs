use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    AwaitingComputation,
    Computed,
    AwaitingRollout,
    RolloutInProgress,
    RolloutFailed,
    Active,
    Blocked,
    DeprovisionInProgress,
    DeprovisioningFailed,
    Deprovisioned,
    Deleted,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 11] = [
        WorkflowStatus::AwaitingComputation,
        WorkflowStatus::Computed,
        WorkflowStatus::AwaitingRollout,
        WorkflowStatus::RolloutInProgress,
        WorkflowStatus::RolloutFailed,
        WorkflowStatus::Active,
        WorkflowStatus::Blocked,
        WorkflowStatus::DeprovisionInProgress,
        WorkflowStatus::DeprovisioningFailed,
        WorkflowStatus::Deprovisioned,
        WorkflowStatus::Deleted,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::AwaitingComputation => "awaiting_computation",
            WorkflowStatus::Computed => "computed",
            WorkflowStatus::AwaitingRollout => "awaiting_rollout",
            WorkflowStatus::RolloutInProgress => "rollout_in_progress",
            WorkflowStatus::RolloutFailed => "rollout_failed",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Blocked => "blocked",
            WorkflowStatus::DeprovisionInProgress => "deprovision_in_progress",
            WorkflowStatus::DeprovisioningFailed => "deprovisioning_failed",
            WorkflowStatus::Deprovisioned => "deprovisioned",
            WorkflowStatus::Deleted => "deleted",
        }
    }

    /// Legal single-step successors.
    #[must_use]
    pub fn successors(self) -> &'static [WorkflowStatus] {
        use WorkflowStatus::*;
        match self {
            AwaitingComputation => &[Computed, DeprovisionInProgress],
            Computed => &[AwaitingRollout, Blocked, DeprovisionInProgress],
            AwaitingRollout => &[RolloutInProgress, Blocked, DeprovisionInProgress],
            Blocked => &[AwaitingRollout, DeprovisionInProgress],
            RolloutInProgress => &[Active, RolloutFailed],
            RolloutFailed => &[AwaitingRollout, DeprovisionInProgress],
            Active => &[DeprovisionInProgress],
            DeprovisionInProgress => &[Deprovisioned, DeprovisioningFailed],
            DeprovisioningFailed => &[DeprovisionInProgress],
            Deprovisioned => &[Deleted],
            Deleted => &[],
        }
    }

    #[must_use]
    pub fn can_transition(self, to: WorkflowStatus) -> bool {
        self.successors().contains(&to)
    }

    /// True if `to` can be reached from `self` through any path of the
    /// graph. Forced transitions are limited to these targets.
    #[must_use]
    pub fn reaches(self, to: WorkflowStatus) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self]);
        while let Some(current) = queue.pop_front() {
            for next in current.successors() {
                if *next == to {
                    return true;
                }
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        false
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == WorkflowStatus::Deleted
    }

    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            WorkflowStatus::RolloutFailed | WorkflowStatus::DeprovisioningFailed
        )
    }

    /// State a retry moves a failed configuration to. Both failure states
    /// re-enter the rollout queue; retry edges are not part of the graph
    /// forced transitions walk.
    #[must_use]
    pub fn retry_target(self) -> Option<WorkflowStatus> {
        if self.is_failed() {
            Some(WorkflowStatus::AwaitingRollout)
        } else {
            None
        }
    }

    /// Has anything possibly been handed to a monitoring system.
    #[must_use]
    pub fn is_deployed(self) -> bool {
        matches!(
            self,
            WorkflowStatus::RolloutInProgress
                | WorkflowStatus::Active
                | WorkflowStatus::DeprovisioningFailed
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown workflow status: {s}")))
    }
}

/// Pending intent recorded on a configuration that cannot act on it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    /// Deprovision as soon as the running rollout reports back.
    Deprovision,
}

impl NextStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NextStep::Deprovision => "deprovision",
        }
    }
}

impl FromStr for NextStep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deprovision" => Ok(NextStep::Deprovision),
            other => Err(Error::internal(format!("unknown next step: {other}"))),
        }
    }
}

/// One version of a check instance as it walks the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub version: u32,
    pub config_id: Uuid,
    pub repository_id: Uuid,
    pub monitoring_id: Option<Uuid>,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,
    pub attempts: u32,
    pub forced: bool,
    pub deployment: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub instance_config_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<WorkflowStatus>,
    pub to: WorkflowStatus,
    pub forced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Uuid>,
    pub at: DateTime<Utc>,
}
