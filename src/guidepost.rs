//! Routes tree requests to the keeper owning the target repository.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::forest::Forest;
use crate::jobs::JobRegistry;
use crate::store::{ObjectRow, Store};
use crate::tree::{ObjectType, TreeOperation};
use crate::treekeeper::{KeeperReply, KeeperRequest};
use crate::types::{Scope, Subject};

/// Outcome of a routed request. `job_id` is set for mutations so failures
/// can still point at the job record.
pub struct Routed {
    pub job_id: Option<Uuid>,
    pub result: Result<KeeperReply>,
}

pub struct GuidePost {
    store: Arc<dyn Store>,
    forest: Arc<Forest>,
    jobs: JobRegistry,
    observer: bool,
}

impl GuidePost {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, forest: Arc<Forest>, jobs: JobRegistry, observer: bool) -> Self {
        Self {
            store,
            forest,
            jobs,
            observer,
        }
    }

    fn locate(&self, id: Uuid) -> Result<ObjectRow> {
        self.store
            .locate_object(id)?
            .ok_or_else(|| Error::not_found(format!("object {id}")))
    }

    /// Object whose position decides which repository an operation targets.
    fn anchor(&self, op: &TreeOperation) -> Result<Option<Uuid>> {
        Ok(match op {
            TreeOperation::CreateBucket { .. } => None,
            TreeOperation::DestroyBucket { id }
            | TreeOperation::DestroyGroup { id }
            | TreeOperation::DestroyCluster { id }
            | TreeOperation::UnassignNode { id } => Some(*id),
            TreeOperation::CreateGroup { bucket_id, .. }
            | TreeOperation::CreateCluster { bucket_id, .. }
            | TreeOperation::AssignNode { bucket_id, .. } => Some(*bucket_id),
            TreeOperation::AddMember { parent, .. } => Some(*parent),
            TreeOperation::AddProperty { object, .. }
            | TreeOperation::UpdateProperty { object, .. }
            | TreeOperation::DeleteProperty { object, .. }
            | TreeOperation::AddCheck { object, .. } => Some(*object),
            TreeOperation::UpdateCheck { config_id, .. }
            | TreeOperation::DeleteCheck { config_id } => {
                let check = self
                    .store
                    .get_check_config(*config_id)?
                    .ok_or_else(|| Error::not_found(format!("check configuration {config_id}")))?;
                Some(check.object_id)
            }
        })
    }

    /// Resolves the scope of an object inside `repository_id`. Objects of
    /// another repository are reported as missing.
    pub fn scope_of(&self, repository_id: Uuid, object_id: Uuid) -> Result<Scope> {
        let row = match self.store.locate_object(object_id)? {
            Some(row) => row,
            None if self.store.get_node(object_id)?.is_some() => {
                return Err(Error::validation(format!(
                    "node {object_id} is not assigned to a repository"
                )));
            }
            None => return Err(Error::not_found(format!("object {object_id}"))),
        };
        if row.repository_id != repository_id {
            return Err(Error::not_found(format!(
                "object {object_id} in repository {repository_id}"
            )));
        }
        let bucket_id = match row.object_type {
            ObjectType::Bucket => Some(row.id),
            _ => row.bucket_id,
        };
        Ok(Scope::Repository {
            repository_id,
            bucket_id,
        })
    }

    /// Scope a tree operation acts on.
    pub fn resolve(&self, repository_id: Uuid, op: &TreeOperation) -> Result<Scope> {
        match self.anchor(op)? {
            Some(object_id) => self.scope_of(repository_id, object_id),
            None => Ok(Scope::Repository {
                repository_id,
                bucket_id: None,
            }),
        }
    }

    /// Repository an object belongs to, for routes that only name the object.
    pub fn repository_of(&self, object_id: Uuid) -> Result<Uuid> {
        let row = self.locate(object_id)?;
        Ok(row.repository_id)
    }

    /// Forwards a request. Mutations register a job first; a full keeper
    /// queue fails immediately.
    pub async fn route(
        &self,
        subject: &Subject,
        repository_id: Uuid,
        request: KeeperRequest,
    ) -> Result<Routed> {
        let mutation = request.is_mutation() || matches!(request, KeeperRequest::Freeze(_));
        if mutation && self.observer {
            return Err(Error::forbidden("server is in observer mode"));
        }
        let keeper = self.forest.keeper(repository_id).await?;
        keeper.state().refuse(&request)?;

        let job_id = if request.is_mutation() {
            let job = self
                .jobs
                .register(request.name(), Some(repository_id), subject.user_id)
                .await?;
            Some(job.id)
        } else {
            None
        };

        debug!(repository = %repository_id, request = request.name(), job = ?job_id, "routing");
        let result = match keeper.try_submit(job_id, request) {
            Ok(rx) => rx.await.unwrap_or(Err(Error::Shutdown)),
            Err(err) => {
                if let Some(job) = job_id {
                    self.jobs.finish(job, Err(err.to_string())).await;
                }
                Err(err)
            }
        };
        Ok(Routed { job_id, result })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::watch;

    use super::*;
    use crate::store::test_support::{create_test_store, execute_sql, seed_team, seed_user};
    use crate::store::{InventoryStore, SqliteStore};
    use crate::tree::NodeSpec;
    use crate::treekeeper::KeeperSettings;
    use crate::types::{JobResult, NodeRecord, User};
    use crate::workflow::{self, WorkflowEngine};

    struct Fixture {
        _temp: tempfile::TempDir,
        sqlite: Arc<SqliteStore>,
        store: Arc<dyn Store>,
        forest: Arc<Forest>,
        jobs: JobRegistry,
        user: User,
        _services: watch::Sender<bool>,
    }

    async fn fixture() -> Fixture {
        fixture_with(KeeperSettings {
            queue_depth: 8,
            commit_retries: 0,
            retry_backoff: Duration::from_millis(1),
        })
        .await
    }

    async fn fixture_with(settings: KeeperSettings) -> Fixture {
        let (temp, store) = create_test_store();
        let team = seed_team(&store, "ops");
        let user = seed_user(&store, &team, "alice");
        let sqlite = Arc::new(store);
        let store: Arc<dyn Store> = sqlite.clone();
        let (services, rx) = watch::channel(false);
        let (workflow, _) = workflow::spawn(
            WorkflowEngine::new(store.clone()),
            16,
            Duration::from_secs(60),
            rx.clone(),
        );
        let (jobs, _) = JobRegistry::spawn(store.clone(), 16, rx);
        let forest = Arc::new(Forest::new(
            store.clone(),
            workflow,
            jobs.clone(),
            settings,
            None,
        ));
        forest.start().await.unwrap();
        Fixture {
            _temp: temp,
            sqlite,
            store,
            forest,
            jobs,
            user,
            _services: services,
        }
    }

    fn subject(user: &User) -> Subject {
        Subject {
            user_id: user.id,
            uid: user.uid.clone(),
            team_id: user.team_id,
            is_admin: false,
        }
    }

    async fn ready(f: &Fixture, repository_id: Uuid) {
        let keeper = f.forest.keeper(repository_id).await.unwrap();
        for _ in 0..100 {
            if keeper.state().ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("keeper never became ready");
    }

    #[tokio::test]
    async fn test_routes_by_object_repository() {
        let f = fixture().await;
        let post = GuidePost::new(f.store.clone(), f.forest.clone(), f.jobs.clone(), false);
        let web = f.forest.create_repository("web", f.user.team_id).await.unwrap();
        let db = f.forest.create_repository("db", f.user.team_id).await.unwrap();
        ready(&f, web.id).await;
        ready(&f, db.id).await;

        let bucket_id = Uuid::new_v4();
        let routed = post
            .route(
                &subject(&f.user),
                web.id,
                KeeperRequest::Mutate(TreeOperation::CreateBucket {
                    id: bucket_id,
                    name: "web_prod".into(),
                    environment: "production".into(),
                    team_id: f.user.team_id,
                }),
            )
            .await
            .unwrap();
        assert!(routed.result.is_ok());
        let job = f
            .jobs
            .wait(routed.job_id.unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(job.result, JobResult::Success);

        let group = TreeOperation::CreateGroup {
            id: Uuid::new_v4(),
            bucket_id,
            name: "frontends".into(),
            team_id: f.user.team_id,
        };
        assert_eq!(
            post.resolve(web.id, &group).unwrap(),
            Scope::Repository {
                repository_id: web.id,
                bucket_id: Some(bucket_id),
            }
        );
        assert!(matches!(post.resolve(db.id, &group), Err(Error::NotFound(_))));
        assert_eq!(post.repository_of(bucket_id).unwrap(), web.id);
    }

    #[tokio::test]
    async fn test_unassigned_node_is_refused() {
        let f = fixture().await;
        let post = GuidePost::new(f.store.clone(), f.forest.clone(), f.jobs.clone(), false);
        let web = f.forest.create_repository("web", f.user.team_id).await.unwrap();
        let node = NodeRecord {
            id: Uuid::new_v4(),
            asset_id: 1,
            name: "web01".into(),
            team_id: f.user.team_id,
            server_id: None,
            is_online: true,
            is_deleted: false,
            created_at: Utc::now(),
        };
        f.store.create_node(&node).unwrap();

        let unassign = TreeOperation::UnassignNode { id: node.id };
        assert!(matches!(
            post.resolve(web.id, &unassign),
            Err(Error::Validation(_))
        ));

        let assign = TreeOperation::AssignNode {
            bucket_id: Uuid::new_v4(),
            node: NodeSpec {
                id: node.id,
                name: node.name,
                team_id: node.team_id,
                asset_id: node.asset_id,
                server_id: None,
                is_online: true,
            },
        };
        assert!(matches!(post.resolve(web.id, &assign), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_observer_mode_refuses_mutations() {
        let f = fixture().await;
        let post = GuidePost::new(f.store.clone(), f.forest.clone(), f.jobs.clone(), true);
        let web = f.forest.create_repository("web", f.user.team_id).await.unwrap();
        ready(&f, web.id).await;

        let err = post
            .route(&subject(&f.user), web.id, KeeperRequest::Rebuild)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Forbidden(_)));

        let shown = post
            .route(&subject(&f.user), web.id, KeeperRequest::Show(None))
            .await
            .unwrap();
        assert!(shown.job_id.is_none());
        assert!(matches!(shown.result, Ok(KeeperReply::Tree(_))));
    }

    #[tokio::test]
    async fn test_full_queue_fails_the_job() {
        // A commit that keeps failing holds the keeper in its retry backoff.
        let f = fixture_with(KeeperSettings {
            queue_depth: 1,
            commit_retries: 3,
            retry_backoff: Duration::from_secs(60),
        })
        .await;
        let post = GuidePost::new(f.store.clone(), f.forest.clone(), f.jobs.clone(), false);
        let web = f.forest.create_repository("web", f.user.team_id).await.unwrap();
        ready(&f, web.id).await;
        let keeper = f.forest.keeper(web.id).await.unwrap();

        let create = || {
            KeeperRequest::Mutate(TreeOperation::CreateBucket {
                id: Uuid::new_v4(),
                name: format!("web_{}", Uuid::new_v4().simple()),
                environment: "production".into(),
                team_id: f.user.team_id,
            })
        };
        execute_sql(
            &f.sqlite,
            "ALTER TABLE soma_tree_objects RENAME TO soma_tree_objects_hidden",
        );
        let _stuck = keeper.try_submit(None, create()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _queued = keeper.try_submit(None, KeeperRequest::Show(None)).unwrap();

        let routed = post.route(&subject(&f.user), web.id, create()).await.unwrap();
        assert!(matches!(routed.result, Err(Error::Overload(_))));
        let job = f
            .jobs
            .wait(routed.job_id.unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(job.result, JobResult::Failed);
        assert!(job.error.unwrap().contains("queue is full"));
    }
}
