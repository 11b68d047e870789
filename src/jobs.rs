//! Job registry: one job per asynchronous mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Job, JobResult, JobStatus};

enum Command {
    Register {
        job_type: String,
        repository_id: Option<Uuid>,
        user_id: Uuid,
        reply: oneshot::Sender<Result<Job>>,
    },
    Start {
        id: Uuid,
    },
    Finish {
        id: Uuid,
        outcome: std::result::Result<(), String>,
    },
    Wait {
        id: Uuid,
        reply: oneshot::Sender<Result<Job>>,
    },
}

struct Registry {
    store: Arc<dyn Store>,
    waiters: HashMap<Uuid, Vec<oneshot::Sender<Result<Job>>>>,
}

impl Registry {
    fn load(&self, id: Uuid) -> Result<Job> {
        self.store
            .get_job(id)?
            .ok_or_else(|| Error::not_found(format!("job {id}")))
    }

    fn register(
        &self,
        job_type: String,
        repository_id: Option<Uuid>,
        user_id: Uuid,
    ) -> Result<Job> {
        let mut job = Job {
            id: Uuid::new_v4(),
            serial: 0,
            job_type,
            status: JobStatus::Queued,
            result: JobResult::Pending,
            error: None,
            repository_id,
            user_id,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        job.serial = self.store.create_job(&job)?;
        debug!(job = %job.id, serial = job.serial, job_type = %job.job_type, "job registered");
        Ok(job)
    }

    fn start(&self, id: Uuid) -> Result<()> {
        let mut job = self.load(id)?;
        if job.status != JobStatus::Queued {
            return Ok(());
        }
        job.status = JobStatus::InProgress;
        job.started_at = Some(Utc::now());
        self.store.update_job(&job)
    }

    fn finish(&mut self, id: Uuid, outcome: std::result::Result<(), String>) -> Result<()> {
        let mut job = self.load(id)?;
        if job.status == JobStatus::Processed {
            return Ok(());
        }
        let now = Utc::now();
        job.status = JobStatus::Processed;
        job.started_at.get_or_insert(now);
        job.finished_at = Some(now);
        match outcome {
            Ok(()) => job.result = JobResult::Success,
            Err(message) => {
                job.result = JobResult::Failed;
                job.error = Some(message);
            }
        }
        self.store.update_job(&job)?;
        debug!(job = %id, result = job.result.as_str(), "job processed");

        for waiter in self.waiters.remove(&id).unwrap_or_default() {
            let _ = waiter.send(Ok(job.clone()));
        }
        Ok(())
    }

    /// Drops waiters whose caller stopped listening.
    fn prune(&mut self) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|waiter| !waiter.is_closed());
            !waiters.is_empty()
        });
    }

    fn wait(&mut self, id: Uuid, reply: oneshot::Sender<Result<Job>>) {
        self.prune();
        match self.load(id) {
            Ok(job) if job.status == JobStatus::Processed => {
                let _ = reply.send(Ok(job));
            }
            Ok(_) => self.waiters.entry(id).or_default().push(reply),
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Register {
                job_type,
                repository_id,
                user_id,
                reply,
            } => {
                let _ = reply.send(self.register(job_type, repository_id, user_id));
            }
            Command::Start { id } => {
                if let Err(err) = self.start(id) {
                    warn!(job = %id, error = %err, "failed to mark job started");
                }
            }
            Command::Finish { id, outcome } => {
                if let Err(err) = self.finish(id, outcome) {
                    warn!(job = %id, error = %err, "failed to record job result");
                }
            }
            Command::Wait { id, reply } => self.wait(id, reply),
        }
    }
}

/// Handle on the job registry task. Reads go to the store directly.
#[derive(Clone)]
pub struct JobRegistry {
    tx: mpsc::Sender<Command>,
    store: Arc<dyn Store>,
}

impl JobRegistry {
    /// Starts the registry task. It keeps recording results until
    /// `shutdown` fires; waiters still parked then get a shutdown error.
    pub fn spawn(
        store: Arc<dyn Store>,
        queue_depth: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(queue_depth);
        let mut registry = Registry {
            store: store.clone(),
            waiters: HashMap::new(),
        };
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    command = rx.recv() => match command {
                        Some(command) => registry.dispatch(command),
                        None => break,
                    },
                }
            }

            rx.close();
            while let Ok(command) = rx.try_recv() {
                match command {
                    Command::Register { reply, .. } | Command::Wait { reply, .. } => {
                        let _ = reply.send(Err(Error::Shutdown));
                    }
                    other => registry.dispatch(other),
                }
            }
            for (_, waiters) in registry.waiters.drain() {
                for waiter in waiters {
                    let _ = waiter.send(Err(Error::Shutdown));
                }
            }
            info!("job registry stopped");
        });
        (Self { tx, store }, task)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::Shutdown)
    }

    pub async fn register(
        &self,
        job_type: &str,
        repository_id: Option<Uuid>,
        user_id: Uuid,
    ) -> Result<Job> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            job_type: job_type.to_string(),
            repository_id,
            user_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    pub async fn start(&self, id: Uuid) {
        if self.send(Command::Start { id }).await.is_err() {
            warn!(job = %id, "job registry is gone; start not recorded");
        }
    }

    pub async fn finish(&self, id: Uuid, outcome: std::result::Result<(), String>) {
        if self.send(Command::Finish { id, outcome }).await.is_err() {
            warn!(job = %id, "job registry is gone; result not recorded");
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Job>> {
        self.store.get_job(id)
    }

    pub fn list(&self, user_id: Option<Uuid>) -> Result<Vec<Job>> {
        self.store.list_jobs(user_id)
    }

    /// Blocks until the job is processed or `timeout` elapses, then returns
    /// its current state.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Result<Job> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Wait { id, reply }).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(reply) => reply.map_err(|_| Error::Shutdown)?,
            Err(_) => self
                .get(id)?
                .ok_or_else(|| Error::not_found(format!("job {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::create_test_store;

    fn registry() -> (tempfile::TempDir, JobRegistry, watch::Sender<bool>) {
        let (temp, store) = create_test_store();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (registry, _task) = JobRegistry::spawn(Arc::new(store), 8, shutdown_rx);
        (temp, registry, shutdown_tx)
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (_temp, jobs, _shutdown) = registry();
        let user = Uuid::new_v4();

        let first = jobs.register("create_bucket", None, user).await.unwrap();
        let second = jobs.register("create_group", None, user).await.unwrap();
        assert!(second.serial > first.serial);
        assert_eq!(first.status, JobStatus::Queued);

        jobs.start(first.id).await;
        jobs.finish(first.id, Err("duplicate bucket".into())).await;

        let done = jobs.wait(first.id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(done.status, JobStatus::Processed);
        assert_eq!(done.result, JobResult::Failed);
        assert_eq!(done.error.as_deref(), Some("duplicate bucket"));
        assert!(done.started_at.is_some());

        assert_eq!(jobs.list(Some(user)).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_finish() {
        let (_temp, jobs, _shutdown) = registry();
        let job = jobs
            .register("add_property", None, Uuid::new_v4())
            .await
            .unwrap();

        let waiter = {
            let jobs = jobs.clone();
            tokio::spawn(async move { jobs.wait(job.id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        jobs.finish(job.id, Ok(())).await;

        let done = waiter.await.unwrap().unwrap();
        assert_eq!(done.result, JobResult::Success);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_current_state() {
        let (_temp, jobs, _shutdown) = registry();
        let job = jobs
            .register("add_check", None, Uuid::new_v4())
            .await
            .unwrap();

        let current = jobs.wait(job.id, Duration::from_millis(20)).await.unwrap();
        assert_eq!(current.status, JobStatus::Queued);

        assert!(matches!(
            jobs.wait(Uuid::new_v4(), Duration::from_millis(20)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_abandoned_waiters_are_pruned() {
        let (_temp, store) = create_test_store();
        let mut registry = Registry {
            store: Arc::new(store),
            waiters: HashMap::new(),
        };
        let job = registry
            .register("add_check".into(), None, Uuid::new_v4())
            .unwrap();

        let (gone, rx) = oneshot::channel();
        drop(rx);
        registry.wait(job.id, gone);
        assert_eq!(registry.waiters[&job.id].len(), 1);

        let (listening, mut rx) = oneshot::channel();
        registry.wait(job.id, listening);
        assert_eq!(registry.waiters[&job.id].len(), 1);

        registry.finish(job.id, Ok(())).unwrap();
        assert!(registry.waiters.is_empty());
        let done = rx.try_recv().unwrap().unwrap();
        assert_eq!(done.result, JobResult::Success);

        let other = registry
            .register("rebuild".into(), None, Uuid::new_v4())
            .unwrap();
        let (gone, rx) = oneshot::channel();
        registry.wait(other.id, gone);
        drop(rx);
        let (unknown, _rx) = oneshot::channel();
        registry.wait(Uuid::new_v4(), unknown);
        assert!(registry.waiters.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let (_temp, jobs, shutdown) = registry();
        let job = jobs
            .register("rebuild", None, Uuid::new_v4())
            .await
            .unwrap();

        let waiter = {
            let jobs = jobs.clone();
            tokio::spawn(async move { jobs.wait(job.id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        shutdown.send(true).unwrap();

        assert!(matches!(waiter.await.unwrap(), Err(Error::Shutdown)));
    }
}
