//! Registry of running tree-keepers, one per repository.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::JobRegistry;
use crate::store::Store;
use crate::tree::ObjectType;
use crate::treekeeper::{self, KeeperHandle, KeeperSettings};
use crate::types::RepositoryRecord;
use crate::workflow::WorkflowHandle;

pub struct Forest {
    store: Arc<dyn Store>,
    workflow: WorkflowHandle,
    jobs: JobRegistry,
    settings: KeeperSettings,
    pin: Option<String>,
    keepers: RwLock<HashMap<Uuid, KeeperHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Forest {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        workflow: WorkflowHandle,
        jobs: JobRegistry,
        settings: KeeperSettings,
        pin: Option<String>,
    ) -> Self {
        Self {
            store,
            workflow,
            jobs,
            settings,
            pin,
            keepers: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn admits(&self, name: &str) -> bool {
        self.pin.as_deref().is_none_or(|pin| pin == name)
    }

    async fn plant(&self, repository: RepositoryRecord) -> KeeperHandle {
        let (handle, task) = treekeeper::spawn(
            repository,
            self.store.clone(),
            self.workflow.clone(),
            self.jobs.clone(),
            self.settings,
        );
        self.keepers
            .write()
            .await
            .insert(handle.repository_id, handle.clone());
        self.tasks.lock().await.push(task);
        handle
    }

    /// Spawns a keeper for every live repository. Returns how many started.
    pub async fn start(&self) -> Result<usize> {
        let mut started = 0;
        for repository in self.store.list_repositories()? {
            if !self.admits(&repository.name) {
                continue;
            }
            self.plant(repository).await;
            started += 1;
        }
        info!(repositories = started, pinned = ?self.pin, "forest started");
        Ok(started)
    }

    pub async fn keeper(&self, repository_id: Uuid) -> Result<KeeperHandle> {
        self.keepers
            .read()
            .await
            .get(&repository_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("repository {repository_id}")))
    }

    pub async fn keepers(&self) -> Vec<KeeperHandle> {
        let mut all: Vec<_> = self.keepers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Allocates the repository row and starts its (empty) keeper.
    pub async fn create_repository(&self, name: &str, team_id: Uuid) -> Result<RepositoryRecord> {
        if !self.admits(name) {
            return Err(Error::validation(format!(
                "server is pinned to repository {}",
                self.pin.as_deref().unwrap_or_default()
            )));
        }
        if self.store.get_repository_by_name(name)?.is_some() {
            return Err(Error::conflict(format!("repository {name} already exists")));
        }
        let repository = RepositoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            team_id,
            is_active: true,
            is_deleted: false,
            rollback_level: None,
            created_at: Utc::now(),
        };
        self.store.create_repository(&repository)?;
        self.plant(repository.clone()).await;
        info!(repository = %repository.id, name, "repository created");
        Ok(repository)
    }

    fn is_empty(&self, repository_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .list_objects(repository_id, Some(ObjectType::Bucket))?
            .is_empty()
            && self.store.list_properties(repository_id)?.is_empty())
    }

    /// Starts a fresh keeper for a repository whose keeper was stopped.
    async fn replant(&self, repository_id: Uuid) -> Result<()> {
        let repository = self
            .store
            .get_repository(repository_id)?
            .ok_or_else(|| Error::not_found(format!("repository {repository_id}")))?;
        self.plant(repository).await;
        Ok(())
    }

    /// Stops the keeper and deletes the repository. Only empty repositories
    /// can be destroyed. The check runs once the keeper has drained its
    /// queue; a repository that is not empty gets a new keeper.
    pub async fn destroy_repository(&self, repository_id: Uuid) -> Result<()> {
        let keeper = self.keeper(repository_id).await?;
        if let Err(err) = keeper.stop().await {
            warn!(repository = %repository_id, error = %err, "keeper did not acknowledge stop");
        }

        let empty = self.is_empty(repository_id);
        if !matches!(empty, Ok(true)) {
            self.replant(repository_id).await?;
            empty?;
            return Err(Error::conflict(format!(
                "repository {} is not empty",
                keeper.name
            )));
        }

        self.keepers.write().await.remove(&repository_id);
        self.store.delete_repository(repository_id)?;
        info!(repository = %repository_id, name = %keeper.name, "repository destroyed");
        Ok(())
    }

    /// Stops every keeper and waits for them to drain.
    pub async fn shutdown(&self) {
        let keepers: Vec<_> = self.keepers.write().await.drain().map(|(_, k)| k).collect();
        for keeper in &keepers {
            if let Err(err) = keeper.stop().await {
                warn!(repository = %keeper.repository_id, error = %err, "keeper did not acknowledge stop");
            }
        }
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "keeper task failed");
            }
        }
        info!(keepers = keepers.len(), "forest stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;
    use crate::store::test_support::{create_test_store, seed_repository, seed_team};
    use crate::tree::TreeOperation;
    use crate::treekeeper::{KeeperReply, KeeperRequest};
    use crate::workflow::{self, WorkflowEngine};

    struct Fixture {
        _temp: tempfile::TempDir,
        store: Arc<dyn Store>,
        team_id: Uuid,
        _services: watch::Sender<bool>,
        workflow: WorkflowHandle,
        jobs: JobRegistry,
    }

    fn fixture(existing: &[&str]) -> Fixture {
        let (temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        for name in existing {
            seed_repository(&store, &team, name);
        }
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
            team_id: team.id,
            _services: services,
            workflow,
            jobs,
        }
    }

    impl Fixture {
        fn forest(&self, pin: Option<&str>) -> Forest {
            Forest::new(
                self.store.clone(),
                self.workflow.clone(),
                self.jobs.clone(),
                KeeperSettings {
                    queue_depth: 8,
                    commit_retries: 0,
                    retry_backoff: Duration::from_millis(1),
                },
                pin.map(String::from),
            )
        }
    }

    async fn wait_ready(keeper: &KeeperHandle) {
        for _ in 0..100 {
            if keeper.state().ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("keeper {} never became ready", keeper.name);
    }

    #[tokio::test]
    async fn test_start_spawns_one_keeper_per_repository() {
        let f = fixture(&["alpha", "beta"]);
        let forest = f.forest(None);
        assert_eq!(forest.start().await.unwrap(), 2);
        let names: Vec<_> = forest.keepers().await.into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        forest.shutdown().await;
        assert!(forest.keepers().await.is_empty());
    }

    #[tokio::test]
    async fn test_pin_limits_repositories() {
        let f = fixture(&["alpha", "beta"]);
        let forest = f.forest(Some("beta"));
        assert_eq!(forest.start().await.unwrap(), 1);
        assert!(matches!(
            forest.create_repository("gamma", f.team_id).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_and_destroy_repository() {
        let f = fixture(&[]);
        let forest = f.forest(None);
        forest.start().await.unwrap();

        let repository = forest.create_repository("web", f.team_id).await.unwrap();
        assert!(matches!(
            forest.create_repository("web", f.team_id).await,
            Err(Error::Conflict(_))
        ));

        let keeper = forest.keeper(repository.id).await.unwrap();
        wait_ready(&keeper).await;
        keeper
            .request(
                None,
                KeeperRequest::Mutate(TreeOperation::CreateBucket {
                    id: Uuid::new_v4(),
                    name: "web_prod".into(),
                    environment: "production".into(),
                    team_id: f.team_id,
                }),
            )
            .await
            .unwrap();
        assert!(matches!(
            forest.destroy_repository(repository.id).await,
            Err(Error::Conflict(_))
        ));

        let empty = forest.create_repository("scratch", f.team_id).await.unwrap();
        wait_ready(&forest.keeper(empty.id).await.unwrap()).await;
        forest.destroy_repository(empty.id).await.unwrap();
        assert!(forest.keeper(empty.id).await.is_err());
        assert!(f.store.get_repository(empty.id).unwrap().is_none_or(|r| r.is_deleted));
    }

    #[tokio::test]
    async fn test_destroy_sees_queued_mutations() {
        let f = fixture(&[]);
        let forest = f.forest(None);
        forest.start().await.unwrap();
        let repository = forest.create_repository("web", f.team_id).await.unwrap();
        let keeper = forest.keeper(repository.id).await.unwrap();
        wait_ready(&keeper).await;

        let bucket_id = Uuid::new_v4();
        let queued = keeper
            .try_submit(
                None,
                KeeperRequest::Mutate(TreeOperation::CreateBucket {
                    id: bucket_id,
                    name: "web_prod".into(),
                    environment: "production".into(),
                    team_id: f.team_id,
                }),
            )
            .unwrap();
        assert!(matches!(
            forest.destroy_repository(repository.id).await,
            Err(Error::Conflict(_))
        ));
        assert!(queued.await.unwrap().is_ok());

        let replanted = forest.keeper(repository.id).await.unwrap();
        wait_ready(&replanted).await;
        let shown = replanted
            .request(None, KeeperRequest::Show(Some(bucket_id)))
            .await
            .unwrap();
        assert!(matches!(shown, KeeperReply::Tree(_)));
        assert!(f.store.get_repository(repository.id).unwrap().is_some());
    }
}
