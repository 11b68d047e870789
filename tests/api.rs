mod common;

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use common::TestServer;

async fn team(server: &TestServer, name: &str) -> String {
    let team = server.create("/team/", json!({"name": name})).await;
    team["id"].as_str().expect("team id").to_string()
}

async fn user(server: &TestServer, uid: &str, team_id: &str, password: &str) -> String {
    let user = server
        .create(
            "/user/",
            json!({
                "uid": uid,
                "first_name": "Test",
                "last_name": "User",
                "mail_address": format!("{uid}@example.com"),
                "team_id": team_id,
                "password": password,
            }),
        )
        .await;
    user["id"].as_str().expect("user id").to_string()
}

async fn bucket(server: &TestServer, repository: &str, name: &str) -> String {
    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/"),
            json!({"name": name, "environment": "production"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "bucket {name}: {reply}");
    assert!(reply["job_id"].is_string());

    let (_, reply) = server.get(&format!("/repository/{repository}/bucket/")).await;
    reply["result"]
        .as_array()
        .expect("bucket list")
        .iter()
        .find(|b| b["name"] == name)
        .and_then(|b| b["id"].as_str())
        .expect("bucket id")
        .to_string()
}

/// Creates a node in the inventory and assigns it to a bucket.
async fn node(
    server: &TestServer,
    repository: &str,
    bucket: &str,
    team_id: &str,
    name: &str,
    asset_id: i64,
) -> String {
    let node = server
        .create(
            "/node/",
            json!({"asset_id": asset_id, "name": name, "team_id": team_id}),
        )
        .await;
    let id = node["id"].as_str().expect("node id").to_string();
    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/{bucket}/node/"),
            json!({"node_id": id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "assign {name}: {reply}");
    id
}

async fn node_properties(server: &TestServer, repository: &str, bucket: &str, node: &str) -> Vec<Value> {
    let (status, reply) = server
        .get(&format!("/repository/{repository}/bucket/{bucket}/node/{node}"))
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    reply["result"][0]["properties"]
        .as_array()
        .expect("properties")
        .clone()
}

fn system_values(properties: &[Value], name: &str) -> Vec<String> {
    properties
        .iter()
        .filter(|p| p["value"]["type"] == "system" && p["value"]["name"] == name)
        .map(|p| p["value"]["value"].as_str().unwrap_or_default().to_string())
        .collect()
}

struct CheckFixture {
    repository: String,
    nodes: Vec<String>,
}

/// Repository with two nodes in a bucket carrying a `webserver` service
/// and a cpu check bound to it.
async fn check_fixture(server: &TestServer) -> CheckFixture {
    let ops = team(server, "ops").await;
    let repository = server.repository("R", &ops).await;
    let b = bucket(server, &repository, "R_B").await;
    let nodes = vec![
        node(server, &repository, &b, &ops, "web01", 1001).await,
        node(server, &repository, &b, &ops, "web02", 1002).await,
    ];

    server.create("/unit/", json!({"unit": "%", "name": "percent"})).await;
    server
        .create(
            "/metric/",
            json!({"path": "cpu.idle", "unit": "%", "description": "idle cpu"}),
        )
        .await;
    let monitoring = server
        .create(
            "/monitoringsystem/",
            json!({
                "name": "mon-A",
                "mode": "public",
                "contact_id": server.root_id,
                "team_id": ops,
            }),
        )
        .await;
    let capability = server
        .create(
            "/capability/",
            json!({
                "monitoring_id": monitoring["id"],
                "metric": "cpu.idle",
                "view": "internal",
                "thresholds": 1,
            }),
        )
        .await;
    assert_eq!(capability["name"], "mon-A.internal.cpu.idle");

    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/{b}/property/service/"),
            json!({"type": "service", "name": "webserver"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");

    let (status, reply) = server
        .post(
            &format!("/checkconfig/{repository}/"),
            json!({
                "object_id": b,
                "name": "cpu",
                "capability_id": capability["id"],
                "interval": 60,
                "constraints": [{"type": "service", "name": "webserver"}],
                "thresholds": [{"predicate": "<", "value": 10, "level": "warning"}],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");

    CheckFixture { repository, nodes }
}

async fn instances(server: &TestServer, repository: &str) -> Vec<Value> {
    let (status, reply) = server.get(&format!("/instance/?repository={repository}")).await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    let mut instances = reply["result"].as_array().expect("instances").clone();
    instances.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    instances
}

async fn instance_configs(server: &TestServer) -> Vec<Value> {
    for _ in 0..100 {
        let (_, reply) = server.get("/workflow/").await;
        let configs = reply["result"].as_array().cloned().unwrap_or_default();
        if !configs.is_empty() {
            return configs;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workflow engine never recorded an instance configuration");
}

#[tokio::test]
async fn test_repository_and_bucket_creation() {
    let server = TestServer::start().await;
    let ops = team(&server, "ops").await;
    let repository = server.repository("staging-ops", &ops).await;

    let (status, reply) = server.get(&format!("/repository/{repository}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["result"][0]["id"], repository.as_str());
    assert_eq!(reply["code"], 200);

    bucket(&server, &repository, "staging-ops_prod").await;
    let (_, reply) = server.get(&format!("/repository/{repository}/bucket/")).await;
    let buckets = reply["result"].as_array().expect("buckets");
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0]["name"], "staging-ops_prod");

    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/"),
            json!({"name": "wrong_prod", "environment": "production"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        reply["errors"][0]
            .as_str()
            .unwrap_or_default()
            .contains("repository name must be a prefix")
    );
    assert!(reply["job_id"].is_string(), "failed mutations name their job");
}

#[tokio::test]
async fn test_property_inheritance_masking() {
    let server = TestServer::start().await;
    let ops = team(&server, "ops").await;
    let repository = server.repository("R", &ops).await;
    let prod = bucket(&server, &repository, "R_prod").await;
    let dev = bucket(&server, &repository, "R_dev").await;
    let prod_node = node(&server, &repository, &prod, &ops, "web01", 1).await;
    let dev_node = node(&server, &repository, &dev, &ops, "web02", 2).await;

    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/property/system/"),
            json!({"type": "system", "name": "tag", "value": "gold", "view": "any"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");
    let (status, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/{prod}/property/system/"),
            json!({"type": "system", "name": "tag", "value": "silver", "view": "any"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");

    let properties = node_properties(&server, &repository, &prod, &prod_node).await;
    assert_eq!(system_values(&properties, "tag"), vec!["silver"]);

    let properties = node_properties(&server, &repository, &dev, &dev_node).await;
    assert_eq!(system_values(&properties, "tag"), vec!["gold"]);
}

#[tokio::test]
async fn test_check_instantiation_is_deterministic() {
    let server = TestServer::start().await;
    let fixture = check_fixture(&server).await;

    let first = instances(&server, &fixture.repository).await;
    assert_eq!(first.len(), fixture.nodes.len());
    for node in &fixture.nodes {
        assert_eq!(
            first.iter().filter(|i| i["object_id"] == node.as_str()).count(),
            1,
            "node {node} should carry exactly one instance"
        );
    }

    for _ in 0..2 {
        let (status, reply) = server
            .post(&format!("/repository/{}/rebuild", fixture.repository), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{reply}");
        let rebuilt = instances(&server, &fixture.repository).await;
        let hashes = |set: &[Value]| -> Vec<Value> { set.iter().map(|i| i["hash"].clone()).collect() };
        assert_eq!(hashes(&rebuilt), hashes(&first));
    }
}

#[tokio::test]
async fn test_duplicate_property_rejected() {
    let server = TestServer::start().await;
    let ops = team(&server, "ops").await;
    let repository = server.repository("R", &ops).await;
    let b = bucket(&server, &repository, "R_B").await;
    let n = node(&server, &repository, &b, &ops, "web01", 1).await;
    let path = format!("/repository/{repository}/bucket/{b}/node/{n}/property/custom/");

    let (status, reply) = server
        .post(&path, json!({"type": "custom", "name": "foo", "value": "1"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{reply}");

    let (status, reply) = server
        .post(&path, json!({"type": "custom", "name": "foo", "value": "2"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        reply["errors"][0]
            .as_str()
            .unwrap_or_default()
            .contains("duplicate")
    );

    let properties = node_properties(&server, &repository, &b, &n).await;
    let custom: Vec<&Value> = properties
        .iter()
        .filter(|p| p["value"]["type"] == "custom" && p["value"]["name"] == "foo")
        .collect();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0]["value"]["value"], "1");
}

#[tokio::test]
async fn test_force_set_without_permission_is_forbidden() {
    let server = TestServer::start().await;
    check_fixture(&server).await;
    let configs = instance_configs(&server).await;
    let target = configs[0]["id"].as_str().expect("config id").to_string();
    let bob_team = team(&server, "dev").await;
    user(&server, "bob", &bob_team, "bob-password").await;
    let (bob, _) = server.login("bob", "bob-password").await;

    let (status, _) = server
        .call(
            Method::PATCH,
            &format!("/workflow/set/{target}"),
            &bob,
            Some(json!({"status": "active"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, reply) = server.get("/workflow/").await;
    let after = reply["result"]
        .as_array()
        .expect("configs")
        .iter()
        .find(|c| c["id"] == target.as_str())
        .map(|c| c["status"].clone())
        .expect("config still listed");
    assert_ne!(after, json!("active"));

    let (status, reply) = server.get(&format!("/workflow/history/{target}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        reply["result"]
            .as_array()
            .expect("history")
            .iter()
            .all(|h| h["forced"] != json!(true))
    );
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let server = TestServer::start_with(|config| config.auth.token_ttl_secs = 1).await;
    let ops = team(&server, "ops").await;
    user(&server, "alice", &ops, "alice-password").await;
    let (token, _) = server.login("alice", "alice-password").await;

    let (status, _) = server.call(Method::GET, "/team/", &token, None).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let (status, reply) = server.call(Method::GET, "/team/", &token, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["code"], 401);
}

#[tokio::test]
async fn test_request_without_token_is_unauthorized() {
    let server = TestServer::start().await;
    let response = reqwest::get(server.url("/team/")).await.expect("send");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_jobs_are_visible_to_their_owner_only() {
    let server = TestServer::start().await;
    let ops = team(&server, "ops").await;
    let repository = server.repository("R", &ops).await;
    let (_, reply) = server
        .post(
            &format!("/repository/{repository}/bucket/"),
            json!({"name": "R_B", "environment": "production"}),
        )
        .await;
    let job = reply["job_id"].as_str().expect("job id").to_string();

    let (status, reply) = server.get(&format!("/job/{job}/wait?timeout_ms=1000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["result"][0]["status"], "processed");
    assert_eq!(reply["result"][0]["result"], "success");

    let (_, reply) = server.get("/job/").await;
    assert!(
        reply["result"]
            .as_array()
            .expect("jobs")
            .iter()
            .any(|j| j["id"] == job.as_str())
    );

    user(&server, "carol", &ops, "carol-password").await;
    let (carol, _) = server.login("carol", "carol-password").await;
    let (status, _) = server
        .call(Method::GET, &format!("/job/{job}"), &carol, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, reply) = server.call(Method::GET, "/job/", &carol, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
async fn test_observer_mode_refuses_repository_creation() {
    let server = TestServer::start_with(|config| config.observer = true).await;
    let ops = team(&server, "ops").await;
    let (status, _) = server
        .post("/repository/", json!({"name": "R", "team_id": ops}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_shutdown_needs_permission() {
    let server = TestServer::start().await;
    let ops = team(&server, "ops").await;
    user(&server, "dave", &ops, "dave-password").await;
    let (dave, _) = server.login("dave", "dave-password").await;

    let (status, _) = server
        .call(Method::POST, "/system/shutdown", &dave, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!server.state.reaper.is_shutting_down());

    let (status, _) = server.post("/system/shutdown", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(server.state.reaper.is_shutting_down());
}
