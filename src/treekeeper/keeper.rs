use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Envelope, KeeperHandle, KeeperReply, KeeperRequest, KeeperStatus};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::jobs::JobRegistry;
use crate::store::{ObjectRow, RepositorySnapshot, Store};
use crate::tree::{
    Action, ActionKind, ActionPayload, CheckSpec, NodeSpec, ObjectType, PropertySpec, Tree,
    TreeError, TreeOperation,
};
use crate::types::RepositoryRecord;
use crate::workflow::{WorkflowEvent, WorkflowHandle};

#[derive(Debug, Clone, Copy)]
pub struct KeeperSettings {
    pub queue_depth: usize,
    pub commit_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&EngineConfig> for KeeperSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            queue_depth: config.queue_depth,
            commit_retries: config.commit_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

struct Keeper {
    repository: RepositoryRecord,
    store: Arc<dyn Store>,
    workflow: WorkflowHandle,
    jobs: JobRegistry,
    settings: KeeperSettings,
    status: Arc<KeeperStatus>,
    tree: Option<Tree>,
    action_tx: UnboundedSender<Action>,
    error_tx: UnboundedSender<TreeError>,
    actions: UnboundedReceiver<Action>,
    errors: UnboundedReceiver<TreeError>,
}

/// Everything the tree emitted since the last drain.
fn drain(
    actions: &mut UnboundedReceiver<Action>,
    errors: &mut UnboundedReceiver<TreeError>,
) -> (Vec<Action>, Vec<TreeError>) {
    let mut out = Vec::new();
    while let Ok(action) = actions.try_recv() {
        out.push(action);
    }
    let mut failures = Vec::new();
    while let Ok(err) = errors.try_recv() {
        failures.push(err);
    }
    (out, failures)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn workflow_events(actions: &[Action]) -> Vec<WorkflowEvent> {
    actions
        .iter()
        .filter_map(|action| match (&action.kind, &action.payload) {
            (
                ActionKind::CheckInstanceNew | ActionKind::CheckInstanceUpdate,
                ActionPayload::Instance(instance),
            ) => Some(WorkflowEvent::Computed(instance.instance_config_id)),
            (ActionKind::CheckInstanceDelete, ActionPayload::Instance(instance)) => {
                Some(WorkflowEvent::Removed(instance.instance_config_id))
            }
            _ => None,
        })
        .collect()
}

fn depth(rows: &HashMap<Uuid, &ObjectRow>, row: &ObjectRow) -> usize {
    let mut depth = 0;
    let mut current = row.parent_id;
    while let Some(id) = current {
        depth += 1;
        if depth > rows.len() {
            break;
        }
        current = rows.get(&id).and_then(|r| r.parent_id);
    }
    depth
}

/// Operations that rebuild the persisted tree: containers first, then
/// memberships top-down, then sources.
pub(crate) fn replay_operations(snapshot: &RepositorySnapshot) -> Result<Vec<TreeOperation>> {
    let mut ops = Vec::new();
    let rows: HashMap<Uuid, &ObjectRow> = snapshot.objects.iter().map(|r| (r.id, r)).collect();
    let bucket_of = |row: &ObjectRow| {
        row.bucket_id
            .ok_or_else(|| Error::TreeFault(format!("{} {} has no bucket", row.object_type, row.id)))
    };

    for row in &snapshot.objects {
        let op = match row.object_type {
            ObjectType::Bucket => TreeOperation::CreateBucket {
                id: row.id,
                name: row.name.clone(),
                environment: row.environment.clone().unwrap_or_default(),
                team_id: row.team_id,
            },
            ObjectType::Group => TreeOperation::CreateGroup {
                id: row.id,
                bucket_id: bucket_of(row)?,
                name: row.name.clone(),
                team_id: row.team_id,
            },
            ObjectType::Cluster => TreeOperation::CreateCluster {
                id: row.id,
                bucket_id: bucket_of(row)?,
                name: row.name.clone(),
                team_id: row.team_id,
            },
            ObjectType::Node => {
                let node = row.node.as_ref().ok_or_else(|| {
                    Error::TreeFault(format!("node {} has no inventory record", row.id))
                })?;
                TreeOperation::AssignNode {
                    bucket_id: bucket_of(row)?,
                    node: NodeSpec {
                        id: node.id,
                        name: node.name.clone(),
                        team_id: node.team_id,
                        asset_id: node.asset_id,
                        server_id: node.server_id,
                        is_online: node.is_online,
                    },
                }
            }
            ObjectType::Repository | ObjectType::Fault => continue,
        };
        ops.push(op);
    }

    let mut members: Vec<&ObjectRow> = snapshot
        .objects
        .iter()
        .filter(|r| {
            matches!(
                r.object_type,
                ObjectType::Group | ObjectType::Cluster | ObjectType::Node
            ) && r.parent_id.is_some()
                && r.parent_id != r.bucket_id
        })
        .collect();
    members.sort_by_key(|r| depth(&rows, r));
    for row in members {
        if let Some(parent) = row.parent_id {
            ops.push(TreeOperation::AddMember {
                parent,
                child: row.id,
            });
        }
    }

    for property in &snapshot.properties {
        ops.push(TreeOperation::AddProperty {
            object: property.object_id,
            spec: PropertySpec {
                instance_id: Some(property.instance_id),
                view: property.view.clone(),
                inheritance: property.inheritance,
                children_only: property.children_only,
                value: property.value.clone(),
            },
        });
    }

    for check in &snapshot.checks {
        ops.push(TreeOperation::AddCheck {
            object: check.object_id,
            spec: CheckSpec {
                id: Some(check.id),
                name: check.name.clone(),
                capability_id: check.capability_id,
                interval: check.interval,
                constraints: check.constraints.clone(),
                thresholds: check.thresholds.clone(),
                inheritance: check.inheritance,
                children_only: check.children_only,
                external_id: check.external_id.clone(),
            },
        });
    }

    Ok(ops)
}

impl Keeper {
    fn id(&self) -> Uuid {
        self.repository.id
    }

    fn mark_broken(&mut self, reason: &Error) {
        error!(repository = %self.id(), error = %reason, "tree-keeper is broken");
        self.status.set_broken(true);
    }

    /// Builds a fresh tree from the store. Returns the instance actions the
    /// recomputation produced against the persisted instance set.
    fn load(&mut self) -> Result<(Tree, Vec<Action>)> {
        let snapshot = self
            .store
            .load_repository(self.id())?
            .ok_or_else(|| Error::not_found(format!("repository {}", self.id())))?;
        self.repository = snapshot.repository.clone();
        let catalog = Arc::new(self.store.load_tree_catalog()?);
        let ops = replay_operations(&snapshot)?;

        let mut tree = Tree::new(
            &snapshot.repository,
            catalog,
            self.action_tx.clone(),
            self.error_tx.clone(),
        );
        drain(&mut self.actions, &mut self.errors);
        tree.begin_replay();
        for op in ops {
            let name = op.name();
            if !tree.apply(op) {
                let (_, errors) = drain(&mut self.actions, &mut self.errors);
                let reason = errors
                    .first()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string);
                return Err(Error::TreeFault(format!("replay of {name} failed: {reason}")));
            }
        }
        drain(&mut self.actions, &mut self.errors);

        tree.finish_replay(snapshot.instances);
        let (actions, errors) = drain(&mut self.actions, &mut self.errors);
        if let Some(err) = errors.first() {
            return Err(Error::TreeFault(err.to_string()));
        }
        if let Some(fault) = tree.fault() {
            return Err(Error::TreeFault(fault.join("; ")));
        }

        let actions = actions.into_iter().filter(Action::is_instance_event).collect();
        Ok((tree, actions))
    }

    /// Loads the tree, writes derived state back and hands instance
    /// changes to the workflow engine.
    async fn reload(&mut self, rebuild: bool) -> Result<()> {
        self.status.set_rebuilding(true);
        self.tree = None;

        let loaded = match catch_unwind(AssertUnwindSafe(|| self.load())) {
            Ok(loaded) => loaded,
            Err(panic) => Err(Error::internal(format!(
                "panic while loading: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let result = match loaded {
            Ok((tree, actions)) => {
                let outcome = self.commit_loaded(&tree, &actions, rebuild).await;
                if outcome.is_ok() {
                    self.tree = Some(tree);
                    self.notify(&actions).await;
                }
                outcome
            }
            Err(err) => Err(err),
        };

        self.status.set_rebuilding(false);
        match &result {
            Ok(()) => {
                self.status.set_broken(false);
                self.status.set_ready(true);
                let objects = self.tree.as_ref().map_or(0, |t| t.objects().count());
                info!(repository = %self.id(), name = %self.repository.name, objects, rebuild, "tree loaded");
            }
            Err(err) => self.mark_broken(err),
        }
        result
    }

    async fn commit_loaded(&self, tree: &Tree, actions: &[Action], rebuild: bool) -> Result<()> {
        if !rebuild {
            return self.persist(actions).await;
        }
        let properties: Vec<_> = tree
            .objects()
            .flat_map(|e| e.properties.iter().filter(|p| p.inherited).cloned())
            .collect();
        let checks: Vec<_> = tree
            .objects()
            .flat_map(|e| e.checks.iter().filter(|c| c.inherited).cloned())
            .collect();
        self.with_retries(|store, id| store.persist_rebuild(id, &properties, &checks, actions))
            .await
    }

    /// Runs one store write, retrying store failures with backoff.
    async fn with_retries<F>(&self, write: F) -> Result<()>
    where
        F: Fn(&dyn Store, Uuid) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            match write(self.store.as_ref(), self.id()) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_store_failure() && attempt < self.settings.commit_retries => {
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(repository = %self.id(), attempt, error = %err, "commit failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn persist(&self, actions: &[Action]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        self.with_retries(|store, id| store.persist_actions(id, actions))
            .await
    }

    async fn notify(&self, actions: &[Action]) {
        let events = workflow_events(actions);
        if events.is_empty() {
            return;
        }
        if let Err(err) = self.workflow.notify(events).await {
            warn!(repository = %self.id(), error = %err, "workflow engine did not take events");
        }
    }

    async fn mutate(&mut self, op: TreeOperation) -> Result<KeeperReply> {
        let catalog = Arc::new(self.store.load_tree_catalog()?);
        let Some(mut tree) = self.tree.take() else {
            return Err(Error::conflict("repository is broken and needs repair"));
        };
        tree.set_catalog(catalog);
        let backup = tree.clone();
        drain(&mut self.actions, &mut self.errors);

        let name = op.name();
        let applied = catch_unwind(AssertUnwindSafe(|| tree.apply(op)));
        let (actions, errors) = drain(&mut self.actions, &mut self.errors);

        match applied {
            Err(panic) => {
                self.tree = Some(backup);
                let err = Error::internal(format!(
                    "panic during {name}: {}",
                    panic_message(panic.as_ref())
                ));
                self.mark_broken(&err);
                return Err(err);
            }
            Ok(false) => {
                self.tree = Some(backup);
                return Err(errors
                    .into_iter()
                    .next()
                    .map_or_else(|| Error::internal(format!("{name} failed")), Error::from));
            }
            Ok(true) => {}
        }

        if let Some(fault) = tree.fault() {
            let err = Error::TreeFault(fault.join("; "));
            self.tree = Some(backup);
            warn!(repository = %self.id(), op = name, error = %err, "mutation rolled back");
            return Err(err);
        }

        if let Err(err) = self.persist(&actions).await {
            self.tree = Some(backup);
            if err.is_store_failure() {
                self.mark_broken(&err);
            }
            return Err(err);
        }

        self.tree = Some(tree);
        debug!(repository = %self.id(), op = name, actions = actions.len(), "mutation committed");
        self.notify(&actions).await;
        Ok(KeeperReply::Applied(actions))
    }

    async fn dispatch(&mut self, request: KeeperRequest) -> Result<KeeperReply> {
        match request {
            KeeperRequest::Mutate(op) => self.mutate(op).await,
            KeeperRequest::Show(id) => {
                let tree = self
                    .tree
                    .as_ref()
                    .ok_or_else(|| Error::conflict("repository is broken and needs repair"))?;
                let id = id.unwrap_or(self.repository.id);
                tree.snapshot(id)
                    .map(KeeperReply::Tree)
                    .ok_or_else(|| Error::not_found(format!("object {id} in tree")))
            }
            KeeperRequest::Rebuild | KeeperRequest::Repair => {
                self.reload(true).await?;
                Ok(KeeperReply::Done)
            }
            KeeperRequest::Freeze(frozen) => {
                self.status.set_frozen(frozen);
                info!(repository = %self.id(), frozen, "freeze state changed");
                Ok(KeeperReply::Done)
            }
            KeeperRequest::Stop => Ok(KeeperReply::Done),
        }
    }

    async fn handle(&mut self, envelope: Envelope) {
        let Envelope {
            job,
            request,
            reply,
        } = envelope;

        if let Some(job) = job {
            self.jobs.start(job).await;
        }
        let result = match self.status.state().refuse(&request) {
            Ok(()) => self.dispatch(request).await,
            Err(err) => Err(err),
        };
        if let Some(job) = job {
            let outcome = result.as_ref().map(|_| ()).map_err(ToString::to_string);
            self.jobs.finish(job, outcome).await;
        }
        let _ = reply.send(result);
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Envelope>) {
        if let Err(err) = self.reload(false).await {
            warn!(repository = %self.id(), error = %err, "tree-keeper started broken");
        }

        while let Some(envelope) = rx.recv().await {
            if matches!(envelope.request, KeeperRequest::Stop) {
                self.status.set_stopped(true);
                let _ = envelope.reply.send(Ok(KeeperReply::Done));
                break;
            }
            self.handle(envelope).await;
        }

        self.status.set_stopped(true);
        rx.close();
        while let Ok(envelope) = rx.try_recv() {
            if let Some(job) = envelope.job {
                self.jobs.finish(job, Err(Error::Shutdown.to_string())).await;
            }
            let _ = envelope.reply.send(Err(Error::Shutdown));
        }
        info!(repository = %self.id(), "tree-keeper stopped");
    }
}

/// Starts the keeper of one repository. It replays the tree before it
/// accepts mutations.
pub fn spawn(
    repository: RepositoryRecord,
    store: Arc<dyn Store>,
    workflow: WorkflowHandle,
    jobs: JobRegistry,
    settings: KeeperSettings,
) -> (KeeperHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.queue_depth);
    let (action_tx, actions) = unbounded_channel();
    let (error_tx, errors) = unbounded_channel();
    let status = Arc::new(KeeperStatus::default());

    let handle = KeeperHandle {
        repository_id: repository.id,
        name: repository.name.clone(),
        tx,
        status: status.clone(),
    };
    let keeper = Keeper {
        repository,
        store,
        workflow,
        jobs,
        settings,
        status,
        tree: None,
        action_tx,
        error_tx,
        actions,
        errors,
    };
    let task = tokio::spawn(keeper.run(rx));
    (handle, task)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::watch;

    use super::*;
    use crate::store::test_support::{
        create_test_store, seed_capability, seed_repository, seed_team, seed_user,
    };
    use crate::store::{CatalogStore, InventoryStore, TreeStore, WorkflowStore};
    use crate::tree::{Predicate, PropertyValue, Threshold};
    use crate::types::{JobResult, Level, NodeRecord};
    use crate::workflow::{self, WorkflowEngine, WorkflowStatus};

    struct Fixture {
        _temp: tempfile::TempDir,
        store: Arc<dyn Store>,
        repository: RepositoryRecord,
        workflow: WorkflowHandle,
        jobs: JobRegistry,
        capability: Uuid,
        monitoring: Uuid,
        _services: watch::Sender<bool>,
    }

    fn fixture() -> Fixture {
        let (temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let user = seed_user(&store, &team, "alice");
        let capability = seed_capability(&store, &user, "internal");
        store
            .create_level(&Level {
                name: "warning".into(),
                short_name: "warn".into(),
                numeric: 1,
            })
            .unwrap();
        let repository = seed_repository(&store, &team, "web");

        let store: Arc<dyn Store> = Arc::new(store);
        let (services, rx) = watch::channel(false);
        let (workflow, _) = workflow::spawn(
            WorkflowEngine::new(store.clone()),
            16,
            Duration::from_secs(60),
            rx.clone(),
        );
        let (jobs, _) = JobRegistry::spawn(store.clone(), 16, rx);
        Fixture {
            _temp: temp,
            store,
            repository,
            workflow,
            jobs,
            capability: capability.id,
            monitoring: capability.monitoring_id,
            _services: services,
        }
    }

    fn settings() -> KeeperSettings {
        KeeperSettings {
            queue_depth: 8,
            commit_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    impl Fixture {
        async fn keeper(&self) -> KeeperHandle {
            self.keeper_with(settings()).await
        }

        async fn keeper_with(&self, settings: KeeperSettings) -> KeeperHandle {
            let (handle, _) = spawn(
                self.repository.clone(),
                self.store.clone(),
                self.workflow.clone(),
                self.jobs.clone(),
                settings,
            );
            for _ in 0..100 {
                if handle.state().ready || handle.state().broken {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            handle
        }

        fn node(&self, name: &str) -> NodeSpec {
            let record = NodeRecord {
                id: Uuid::new_v4(),
                asset_id: 7,
                name: name.into(),
                team_id: self.repository.team_id,
                server_id: None,
                is_online: true,
                is_deleted: false,
                created_at: Utc::now(),
            };
            self.store.create_node(&record).unwrap();
            NodeSpec {
                id: record.id,
                name: record.name,
                team_id: record.team_id,
                asset_id: record.asset_id,
                server_id: None,
                is_online: true,
            }
        }
    }

    async fn mutate(keeper: &KeeperHandle, op: TreeOperation) -> Result<Vec<Action>> {
        match keeper.request(None, KeeperRequest::Mutate(op)).await? {
            KeeperReply::Applied(actions) => Ok(actions),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    fn bucket(f: &Fixture, id: Uuid) -> TreeOperation {
        TreeOperation::CreateBucket {
            id,
            name: "web_prod".into(),
            environment: "production".into(),
            team_id: f.repository.team_id,
        }
    }

    #[tokio::test]
    async fn test_mutations_persist_and_replay() {
        let f = fixture();
        let keeper = f.keeper().await;
        assert!(keeper.state().ready);

        let bucket_id = Uuid::new_v4();
        let group_id = Uuid::new_v4();
        mutate(&keeper, bucket(&f, bucket_id)).await.unwrap();
        mutate(
            &keeper,
            TreeOperation::CreateGroup {
                id: group_id,
                bucket_id,
                name: "frontends".into(),
                team_id: f.repository.team_id,
            },
        )
        .await
        .unwrap();
        let node = f.node("web01");
        let node_id = node.id;
        mutate(&keeper, TreeOperation::AssignNode { bucket_id, node })
            .await
            .unwrap();
        mutate(
            &keeper,
            TreeOperation::AddMember {
                parent: group_id,
                child: node_id,
            },
        )
        .await
        .unwrap();
        mutate(
            &keeper,
            TreeOperation::AddProperty {
                object: bucket_id,
                spec: PropertySpec {
                    instance_id: None,
                    view: "any".into(),
                    inheritance: true,
                    children_only: false,
                    value: PropertyValue::System {
                        name: "tag".into(),
                        value: "gold".into(),
                    },
                },
            },
        )
        .await
        .unwrap();
        keeper.stop().await.unwrap();

        let restarted = f.keeper().await;
        assert!(restarted.state().ready);
        let Ok(KeeperReply::Tree(view)) = restarted.request(None, KeeperRequest::Show(Some(group_id))).await
        else {
            panic!("show failed");
        };
        assert_eq!(view.children.len(), 1);
        assert_eq!(view.children[0].id, node_id);
        assert_eq!(view.children[0].properties.len(), 1);
        assert!(view.children[0].properties[0].inherited);
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_state() {
        let f = fixture();
        let keeper = f.keeper().await;
        let bucket_id = Uuid::new_v4();
        mutate(&keeper, bucket(&f, bucket_id)).await.unwrap();

        let err = mutate(&keeper, bucket(&f, Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let wrong = TreeOperation::CreateBucket {
            id: Uuid::new_v4(),
            name: "wrong_prod".into(),
            environment: "production".into(),
            team_id: f.repository.team_id,
        };
        assert!(matches!(
            mutate(&keeper, wrong).await,
            Err(Error::Validation(_))
        ));

        let buckets = f
            .store
            .list_objects(f.repository.id, Some(ObjectType::Bucket))
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert!(!keeper.state().broken);
    }

    #[tokio::test]
    async fn test_checks_reach_workflow() {
        let f = fixture();
        let keeper = f.keeper().await;
        let bucket_id = Uuid::new_v4();
        mutate(&keeper, bucket(&f, bucket_id)).await.unwrap();
        let node = f.node("web01");
        mutate(&keeper, TreeOperation::AssignNode { bucket_id, node })
            .await
            .unwrap();

        let actions = mutate(
            &keeper,
            TreeOperation::AddCheck {
                object: bucket_id,
                spec: CheckSpec {
                    id: None,
                    name: "cpu".into(),
                    capability_id: f.capability,
                    interval: 60,
                    constraints: Vec::new(),
                    thresholds: vec![Threshold {
                        predicate: Predicate::Lt,
                        value: 10,
                        level: "warning".into(),
                    }],
                    inheritance: true,
                    children_only: false,
                    external_id: None,
                },
            },
        )
        .await
        .unwrap();
        assert!(actions.iter().any(Action::is_instance_event));

        let pending = f.workflow.poll(f.monitoring).await.unwrap();
        assert!(!pending.is_empty());
        assert!(pending.iter().all(|c| c.status == WorkflowStatus::AwaitingRollout));

        let before: Vec<String> = f
            .store
            .list_instances(Some(f.repository.id))
            .unwrap()
            .into_iter()
            .map(|i| i.hash)
            .collect();
        keeper.request(None, KeeperRequest::Rebuild).await.unwrap();
        let after: Vec<String> = f
            .store
            .list_instances(Some(f.repository.id))
            .unwrap()
            .into_iter()
            .map(|i| i.hash)
            .collect();
        assert_eq!(before, after);
        assert_eq!(
            f.store
                .list_instance_configs(Some(WorkflowStatus::AwaitingComputation))
                .unwrap()
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn test_freeze_and_jobs() {
        let f = fixture();
        let keeper = f.keeper().await;

        keeper.request(None, KeeperRequest::Freeze(true)).await.unwrap();
        assert!(matches!(
            mutate(&keeper, bucket(&f, Uuid::new_v4())).await,
            Err(Error::Conflict(_))
        ));
        keeper.request(None, KeeperRequest::Freeze(false)).await.unwrap();

        let job = f
            .jobs
            .register("create_bucket", Some(f.repository.id), Uuid::new_v4())
            .await
            .unwrap();
        keeper
            .request(Some(job.id), KeeperRequest::Mutate(bucket(&f, Uuid::new_v4())))
            .await
            .unwrap();
        let done = f.jobs.wait(job.id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(done.result, JobResult::Success);
    }

    #[tokio::test]
    async fn test_full_queue_is_overload() {
        let f = fixture();
        let keeper = f
            .keeper_with(KeeperSettings {
                queue_depth: 1,
                ..settings()
            })
            .await;
        assert!(keeper.state().ready);

        // The keeper task cannot run between the two submissions.
        let first = keeper.try_submit(None, KeeperRequest::Show(None)).unwrap();
        let second = keeper.try_submit(None, KeeperRequest::Mutate(bucket(&f, Uuid::new_v4())));
        assert!(matches!(second, Err(Error::Overload(_))));

        assert!(matches!(first.await.unwrap(), Ok(KeeperReply::Tree(_))));
        let third = keeper
            .try_submit(None, KeeperRequest::Mutate(bucket(&f, Uuid::new_v4())))
            .unwrap();
        assert!(third.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stop_rejects_later_requests() {
        let f = fixture();
        let keeper = f.keeper().await;
        keeper.stop().await.unwrap();
        assert!(keeper.state().stopped);
        assert!(matches!(
            keeper.request(None, KeeperRequest::Show(None)).await,
            Err(Error::Shutdown)
        ));
    }
}
