//! Lifecycle of check instance configurations, from computation through
//! rollout to deletion.

mod engine;
mod status;

pub use engine::{WorkflowEngine, WorkflowEvent, WorkflowHandle, spawn};
pub use status::{InstanceConfig, NextStep, WorkflowHistory, WorkflowStatus};
