use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::status::{InstanceConfig, NextStep, WorkflowStatus};
use crate::error::{Error, Result};
use crate::store::{Store, Transition};

/// Notification from a tree-keeper after its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// A new instance configuration was persisted.
    Computed(Uuid),
    /// The instance owning this configuration left its tree.
    Removed(Uuid),
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Events(Vec<WorkflowEvent>),
    Poll {
        monitoring_id: Uuid,
        reply: Reply<Vec<InstanceConfig>>,
    },
    Claim {
        id: Uuid,
        actor: Option<Uuid>,
        reply: Reply<InstanceConfig>,
    },
    Report {
        id: Uuid,
        success: bool,
        actor: Option<Uuid>,
        reply: Reply<InstanceConfig>,
    },
    Retry {
        id: Uuid,
        actor: Option<Uuid>,
        reply: Reply<InstanceConfig>,
    },
    Force {
        id: Uuid,
        target: WorkflowStatus,
        actor: Option<Uuid>,
        reply: Reply<InstanceConfig>,
    },
}

impl Command {
    fn reject(self) {
        match self {
            Command::Events(events) => {
                warn!(count = events.len(), "dropping workflow events at shutdown");
            }
            Command::Poll { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
            Command::Claim { reply, .. }
            | Command::Report { reply, .. }
            | Command::Retry { reply, .. }
            | Command::Force { reply, .. } => {
                let _ = reply.send(Err(Error::Shutdown));
            }
        }
    }
}

/// State machine over instance configurations. Every step is a
/// compare-and-set in the store, so a configuration never moves twice from
/// the same state.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn load(&self, id: Uuid) -> Result<InstanceConfig> {
        self.store
            .get_instance_config(id)?
            .ok_or_else(|| Error::not_found(format!("instance configuration {id}")))
    }

    fn commit(&self, config: &mut InstanceConfig, transition: Transition) -> Result<()> {
        if !self.store.transition(&transition)? {
            return Err(Error::conflict(format!(
                "instance configuration {} changed concurrently",
                config.id
            )));
        }
        debug!(
            config = %config.id,
            from = %transition.from,
            to = %transition.to,
            forced = transition.forced,
            "workflow transition"
        );
        config.status = transition.to;
        config.forced |= transition.forced;
        if transition.bump_attempts {
            config.attempts += 1;
        }
        Ok(())
    }

    fn step(
        &self,
        config: &mut InstanceConfig,
        to: WorkflowStatus,
        actor: Option<Uuid>,
    ) -> Result<()> {
        if !config.status.can_transition(to) {
            return Err(Error::conflict(format!(
                "instance configuration {} cannot move from {} to {to}",
                config.id, config.status
            )));
        }
        let transition = Transition {
            instance_config_id: config.id,
            from: config.status,
            to,
            forced: false,
            actor,
            bump_attempts: false,
            at: Utc::now(),
        };
        self.commit(config, transition)
    }

    /// Walks a configuration towards deletion. Deployed configurations wait
    /// in deprovisioning for the monitoring system; running rollouts finish
    /// first.
    fn retire(&self, config: &mut InstanceConfig) -> Result<()> {
        use WorkflowStatus::*;
        match config.status {
            Active => self.step(config, DeprovisionInProgress, None),
            RolloutInProgress => {
                self.store
                    .set_next_step(config.id, Some(NextStep::Deprovision))?;
                config.next = Some(NextStep::Deprovision);
                Ok(())
            }
            Deprovisioned => self.step(config, Deleted, None),
            DeprovisionInProgress | DeprovisioningFailed | Deleted => Ok(()),
            // A retried deprovision may still be deployed.
            AwaitingRollout if config.next == Some(NextStep::Deprovision) => {
                self.store.set_next_step(config.id, None)?;
                config.next = None;
                self.step(config, DeprovisionInProgress, None)
            }
            AwaitingComputation | Computed | AwaitingRollout | Blocked | RolloutFailed => {
                self.step(config, DeprovisionInProgress, None)?;
                self.step(config, Deprovisioned, None)?;
                self.step(config, Deleted, None)
            }
        }
    }

    /// Releases newer versions that waited for `config` to finish.
    fn unblock(&self, config: &InstanceConfig) -> Result<()> {
        for mut newer in self.store.list_instance_versions(config.instance_id)? {
            if newer.version > config.version && newer.status == WorkflowStatus::Blocked {
                self.step(&mut newer, WorkflowStatus::AwaitingRollout, None)?;
            }
        }
        Ok(())
    }

    pub fn apply(&self, event: WorkflowEvent) -> Result<()> {
        match event {
            WorkflowEvent::Computed(id) => self.computed(id),
            WorkflowEvent::Removed(id) => self.removed(id),
        }
    }

    /// Applies a batch of events. Events that hit a store failure are
    /// returned for the next sweep; any other failure is final.
    pub fn apply_events(&self, events: Vec<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut deferred = Vec::new();
        for event in events {
            match self.apply(event) {
                Ok(()) => {}
                Err(err) if err.is_store_failure() => {
                    warn!(?event, error = %err, "workflow event deferred");
                    deferred.push(event);
                }
                Err(err) => warn!(?event, error = %err, "workflow event failed"),
            }
        }
        deferred
    }

    /// Re-applies deferred events, then promotes every configuration still
    /// waiting for computation. Returns the events that failed again.
    pub fn sweep(&self, deferred: Vec<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let deferred = self.apply_events(deferred);
        match self.recover() {
            Ok(0) => {}
            Ok(count) => info!(count, "sweep promoted pending instance configurations"),
            Err(err) => warn!(error = %err, "workflow sweep failed"),
        }
        if !deferred.is_empty() {
            error!(count = deferred.len(), "workflow events still failing");
        }
        deferred
    }

    /// Promotes a committed configuration and supersedes older versions of
    /// the same instance.
    pub fn computed(&self, id: Uuid) -> Result<()> {
        let mut config = self.load(id)?;
        if config.status != WorkflowStatus::AwaitingComputation {
            return Ok(());
        }
        self.step(&mut config, WorkflowStatus::Computed, None)?;

        let mut replaces_active = false;
        let mut waits_for_rollout = false;
        for mut older in self.store.list_instance_versions(config.instance_id)? {
            if older.version >= config.version {
                continue;
            }
            match older.status {
                WorkflowStatus::Active => replaces_active = true,
                WorkflowStatus::RolloutInProgress => waits_for_rollout = true,
                _ => {}
            }
            self.retire(&mut older)?;
        }

        if waits_for_rollout {
            self.step(&mut config, WorkflowStatus::Blocked, None)?;
        } else if replaces_active {
            self.step(&mut config, WorkflowStatus::AwaitingRollout, None)?;
        }
        Ok(())
    }

    /// Retires every live version of the instance owning `id`.
    pub fn removed(&self, id: Uuid) -> Result<()> {
        let config = self.load(id)?;
        for mut version in self.store.list_instance_versions(config.instance_id)? {
            self.retire(&mut version)?;
        }
        Ok(())
    }

    /// Promotes configurations committed before an unclean stop.
    pub fn recover(&self) -> Result<usize> {
        let pending = self
            .store
            .list_instance_configs(Some(WorkflowStatus::AwaitingComputation))?;
        let count = pending.len();
        for config in pending {
            self.computed(config.id)?;
        }
        Ok(count)
    }

    /// Pending work of one monitoring system: rollouts to pick up and
    /// deployed configurations to remove.
    pub fn poll(&self, monitoring_id: Uuid) -> Result<Vec<InstanceConfig>> {
        for mut config in self
            .store
            .list_monitoring_configs(monitoring_id, &[WorkflowStatus::Computed])?
        {
            self.step(&mut config, WorkflowStatus::AwaitingRollout, None)?;
        }
        self.store.list_monitoring_configs(
            monitoring_id,
            &[
                WorkflowStatus::AwaitingRollout,
                WorkflowStatus::DeprovisionInProgress,
            ],
        )
    }

    pub fn claim(&self, id: Uuid, actor: Option<Uuid>) -> Result<InstanceConfig> {
        let mut config = self.load(id)?;
        match config.status {
            WorkflowStatus::AwaitingRollout => {
                self.step(&mut config, WorkflowStatus::RolloutInProgress, actor)?;
                Ok(config)
            }
            WorkflowStatus::DeprovisionInProgress => Ok(config),
            other => Err(Error::conflict(format!(
                "instance configuration {id} is not pending deployment ({other})"
            ))),
        }
    }

    pub fn report(&self, id: Uuid, success: bool, actor: Option<Uuid>) -> Result<InstanceConfig> {
        let mut config = self.load(id)?;
        match config.status {
            WorkflowStatus::RolloutInProgress => {
                let to = if success {
                    WorkflowStatus::Active
                } else {
                    WorkflowStatus::RolloutFailed
                };
                self.step(&mut config, to, actor)?;
                if config.next == Some(NextStep::Deprovision) {
                    self.store.set_next_step(config.id, None)?;
                    config.next = None;
                    self.retire(&mut config)?;
                    self.unblock(&config)?;
                }
            }
            WorkflowStatus::DeprovisionInProgress => {
                if success {
                    self.step(&mut config, WorkflowStatus::Deprovisioned, actor)?;
                    self.step(&mut config, WorkflowStatus::Deleted, actor)?;
                } else {
                    self.step(&mut config, WorkflowStatus::DeprovisioningFailed, actor)?;
                }
            }
            other => {
                return Err(Error::conflict(format!(
                    "instance configuration {id} has no running deployment ({other})"
                )));
            }
        }
        Ok(config)
    }

    pub fn retry(&self, id: Uuid, actor: Option<Uuid>) -> Result<InstanceConfig> {
        let mut config = self.load(id)?;
        let Some(target) = config.status.retry_target() else {
            return Err(Error::conflict(format!(
                "instance configuration {id} is not in a failed state ({})",
                config.status
            )));
        };
        let transition = Transition {
            instance_config_id: id,
            from: config.status,
            to: target,
            forced: false,
            actor,
            bump_attempts: true,
            at: Utc::now(),
        };
        let was_retiring = config.status == WorkflowStatus::DeprovisioningFailed;
        self.commit(&mut config, transition)?;
        if was_retiring {
            // The next rollout result hands it back to deprovisioning.
            self.store
                .set_next_step(config.id, Some(NextStep::Deprovision))?;
            config.next = Some(NextStep::Deprovision);
        }
        Ok(config)
    }

    /// Moves a configuration to any state reachable from its current one,
    /// skipping the intermediate steps. The configuration keeps a force mark.
    pub fn force(
        &self,
        id: Uuid,
        target: WorkflowStatus,
        actor: Option<Uuid>,
    ) -> Result<InstanceConfig> {
        let mut config = self.load(id)?;
        if !config.status.reaches(target) {
            return Err(Error::validation(format!(
                "{target} is not reachable from {}",
                config.status
            )));
        }
        let transition = Transition {
            instance_config_id: id,
            from: config.status,
            to: target,
            forced: true,
            actor,
            bump_attempts: false,
            at: Utc::now(),
        };
        self.commit(&mut config, transition)?;
        info!(config = %id, to = %target, actor = ?actor, "forced workflow transition");
        Ok(config)
    }

    /// Runs one command. Returns the events deferred to the next sweep.
    fn dispatch(&self, command: Command) -> Vec<WorkflowEvent> {
        match command {
            Command::Events(events) => return self.apply_events(events),
            Command::Poll {
                monitoring_id,
                reply,
            } => {
                let _ = reply.send(self.poll(monitoring_id));
            }
            Command::Claim { id, actor, reply } => {
                let _ = reply.send(self.claim(id, actor));
            }
            Command::Report {
                id,
                success,
                actor,
                reply,
            } => {
                let _ = reply.send(self.report(id, success, actor));
            }
            Command::Retry { id, actor, reply } => {
                let _ = reply.send(self.retry(id, actor));
            }
            Command::Force {
                id,
                target,
                actor,
                reply,
            } => {
                let _ = reply.send(self.force(id, target, actor));
            }
        }
        Vec::new()
    }
}

/// Sending side of the workflow engine task.
#[derive(Clone)]
pub struct WorkflowHandle {
    tx: mpsc::Sender<Command>,
}

impl WorkflowHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    pub async fn notify(&self, events: Vec<WorkflowEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Command::Events(events))
            .await
            .map_err(|_| Error::Shutdown)
    }

    pub async fn poll(&self, monitoring_id: Uuid) -> Result<Vec<InstanceConfig>> {
        self.call(|reply| Command::Poll {
            monitoring_id,
            reply,
        })
        .await
    }

    pub async fn claim(&self, id: Uuid, actor: Option<Uuid>) -> Result<InstanceConfig> {
        self.call(|reply| Command::Claim { id, actor, reply }).await
    }

    pub async fn report(
        &self,
        id: Uuid,
        success: bool,
        actor: Option<Uuid>,
    ) -> Result<InstanceConfig> {
        self.call(|reply| Command::Report {
            id,
            success,
            actor,
            reply,
        })
        .await
    }

    pub async fn retry(&self, id: Uuid, actor: Option<Uuid>) -> Result<InstanceConfig> {
        self.call(|reply| Command::Retry { id, actor, reply }).await
    }

    pub async fn force(
        &self,
        id: Uuid,
        target: WorkflowStatus,
        actor: Option<Uuid>,
    ) -> Result<InstanceConfig> {
        self.call(|reply| Command::Force {
            id,
            target,
            actor,
            reply,
        })
        .await
    }
}

/// Starts the engine task. Every `sweep` period it retries deferred events
/// and promotes configurations left behind. Pending events are still
/// applied when shutdown is signalled; pending requests are answered with a
/// shutdown error.
pub fn spawn(
    engine: WorkflowEngine,
    queue_depth: usize,
    sweep: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (WorkflowHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(queue_depth);
    let task = tokio::spawn(async move {
        match engine.recover() {
            Ok(0) => {}
            Ok(count) => info!(count, "recovered pending instance configurations"),
            Err(err) => warn!(error = %err, "workflow recovery failed"),
        }
        info!("workflow engine started");

        let mut ticker = interval_at(Instant::now() + sweep, sweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deferred = Vec::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    deferred = engine.sweep(std::mem::take(&mut deferred));
                }
                command = rx.recv() => match command {
                    Some(command) => deferred.extend(engine.dispatch(command)),
                    None => break,
                },
            }
        }

        rx.close();
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Events(_) => deferred.extend(engine.dispatch(command)),
                other => other.reject(),
            }
        }
        if !deferred.is_empty() {
            warn!(count = deferred.len(), "dropping deferred workflow events at shutdown");
        }
        info!("workflow engine stopped");
    });
    (WorkflowHandle { tx }, task)
}
