use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tempfile::TempDir;

use soma::auth::CredentialHasher;
use soma::config::SomaConfig;
use soma::server::{AppState, create_router};
use soma::store::{ROOT_UID, SqliteStore, Store, bootstrap};
use soma::supervisor::password_credential;

const ROOT_PASSWORD: &str = "root-test-password";

pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub root_token: String,
    pub root_id: String,
    pub state: Arc<AppState>,
    client: reqwest::Client,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts a server over a fresh database; `adjust` may tune the
    /// configuration first.
    pub async fn start_with(adjust: impl FnOnce(&mut SomaConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let db_path = temp_dir.path().join("soma.db");
        let mut config = SomaConfig::for_database(db_path.clone(), "test-token-key");
        config.engine.retry_backoff_ms = 1;
        adjust(&mut config);

        let store = SqliteStore::new(&db_path).expect("open store");
        store.initialize().expect("initialize schema");
        let hasher = CredentialHasher::new().expect("hasher");
        let ttl_days = config.auth.credential_ttl_days;
        bootstrap(&store, |root| {
            password_credential(&hasher, root, ROOT_PASSWORD, ttl_days)
        })
        .expect("bootstrap");

        let state = AppState::start(config, Arc::new(store))
            .await
            .expect("start services");
        let app = create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let reaper = state.reaper.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { reaper.reaped().await })
                .await
                .expect("serve");
        });

        let client = reqwest::Client::new();
        let (root_token, root_id) = login(&client, &base_url, ROOT_UID, ROOT_PASSWORD).await;

        Self {
            temp_dir,
            base_url,
            root_token,
            root_id,
            state,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Logs in with a password and returns `(token, user id)`.
    pub async fn login(&self, uid: &str, password: &str) -> (String, String) {
        login(&self.client, &self.base_url, uid, password).await
    }

    pub async fn call(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("send request");
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, &self.root_token, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, path, &self.root_token, Some(body))
            .await
    }

    /// Posts as root and returns the first result, failing on any error.
    pub async fn create(&self, path: &str, body: Value) -> Value {
        let (status, reply) = self.post(path, body).await;
        assert!(
            status.is_success(),
            "POST {path} failed with {status}: {reply}"
        );
        reply["result"][0].clone()
    }

    /// Creates a repository and waits until its keeper accepts mutations.
    pub async fn repository(&self, name: &str, team_id: &str) -> String {
        let repository = self
            .create(
                "/repository/",
                serde_json::json!({"name": name, "team_id": team_id}),
            )
            .await;
        let id = repository["id"].as_str().expect("repository id").to_string();
        for _ in 0..100 {
            let (_, reply) = self.get(&format!("/repository/{id}")).await;
            if reply["result"][0]["keeper"]["ready"] == Value::Bool(true) {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("keeper for {name} never became ready");
    }
}

async fn login(
    client: &reqwest::Client,
    base_url: &str,
    uid: &str,
    password: &str,
) -> (String, String) {
    let reply: Value = client
        .post(format!("{base_url}/authenticate/"))
        .basic_auth(uid, Some(password))
        .send()
        .await
        .expect("login")
        .json()
        .await
        .expect("parse login reply");
    let token = reply["result"][0]["token"]
        .as_str()
        .unwrap_or_else(|| panic!("login failed: {reply}"))
        .to_string();
    let user_id = reply["result"][0]["user_id"]
        .as_str()
        .expect("user id")
        .to_string();
    (token, user_id)
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.reaper.shutdown("test finished");
    }
}
