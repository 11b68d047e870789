use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};
use tokio::sync::watch;
use tracing::info;

use super::authenticate::authenticate_router;
use super::catalog::catalog_router;
use super::checks::checks_router;
use super::identity::identity_router;
use super::jobs::jobs_router;
use super::permissions::permissions_router;
use super::system::system_router;
use super::tree::tree_router;
use super::workflow::workflow_router;
use crate::auth::CredentialHasher;
use crate::config::SomaConfig;
use crate::error::{Error, Result};
use crate::forest::Forest;
use crate::guidepost::GuidePost;
use crate::jobs::JobRegistry;
use crate::reaper::GrimReaper;
use crate::store::{Store, is_bootstrapped};
use crate::supervisor::{self, Supervisor, SupervisorHandle};
use crate::treekeeper::KeeperSettings;
use crate::workflow::{self, WorkflowEngine, WorkflowHandle};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: SomaConfig,
    pub supervisor: SupervisorHandle,
    pub guidepost: GuidePost,
    pub forest: Arc<Forest>,
    pub jobs: JobRegistry,
    pub workflow: WorkflowHandle,
    pub reaper: GrimReaper,
    pub hasher: CredentialHasher,
    services: watch::Sender<bool>,
}

impl AppState {
    /// Starts every service over an initialized store and spawns one
    /// tree-keeper per repository.
    pub async fn start(config: SomaConfig, store: Arc<dyn Store>) -> Result<Arc<Self>> {
        if !is_bootstrapped(store.as_ref())? {
            return Err(Error::Config(
                "installation is not initialized; run `soma admin init` first".into(),
            ));
        }

        let depth = config.engine.queue_depth;
        let (services, services_rx) = watch::channel(false);

        let supervisor = Supervisor::new(store.clone(), &config.auth)?;
        let (supervisor, _) = supervisor::spawn(supervisor, depth, services_rx.clone());
        let (workflow, _) = workflow::spawn(
            WorkflowEngine::new(store.clone()),
            depth,
            Duration::from_millis(config.engine.sweep_interval_ms),
            services_rx.clone(),
        );
        let (jobs, _) = JobRegistry::spawn(store.clone(), depth, services_rx);

        let forest = Arc::new(Forest::new(
            store.clone(),
            workflow.clone(),
            jobs.clone(),
            KeeperSettings::from(&config.engine),
            config.repository_pin.clone(),
        ));
        forest.start().await?;
        let guidepost = GuidePost::new(store.clone(), forest.clone(), jobs.clone(), config.observer);

        if config.observer {
            info!("observer mode: tree mutations are refused");
        }

        Ok(Arc::new(Self {
            store,
            config,
            supervisor,
            guidepost,
            forest,
            jobs,
            workflow,
            reaper: GrimReaper::new(),
            hasher: CredentialHasher::new()?,
            services,
        }))
    }

    /// Drains the keepers, then stops the shared services.
    pub async fn shutdown(&self) {
        self.forest.shutdown().await;
        let _ = self.services.send(true);
        if let Err(err) = self.store.close() {
            tracing::warn!(error = %err, "failed to close store");
        }
        info!("services stopped");
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(authenticate_router())
        .merge(catalog_router())
        .merge(identity_router())
        .merge(permissions_router())
        .merge(tree_router())
        .merge(checks_router())
        .merge(workflow_router())
        .merge(jobs_router())
        .merge(system_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
