//! Integration tests for the `rewind serve` HTTP API.
//!
//! Each test serves the control surface in-process on an ephemeral port
//! and drives it over real HTTP with `ureq`.

use std::net::SocketAddr;

use rewind_cli::config::Config;
use rewind_cli::serve::{self, ACTOR_HEADER, MODE_HEADER, SESSION_HEADER};
use serde_json::{json, Value};

struct TestServer {
    base: String,
    agent: ureq::Agent,
    _runtime: tokio::runtime::Runtime,
}

type HttpResult = Result<ureq::http::Response<ureq::Body>, ureq::Error>;

impl TestServer {
    fn start(config: Config, api_key: Option<&str>) -> TestServer {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let addr = runtime.block_on(async {
            let state = serve::build_state(&config, api_key.map(str::to_string))
                .await
                .expect("state");
            let app = serve::app(state, config.server.max_body_bytes);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            let addr = listener.local_addr().expect("addr");
            tokio::spawn(async move {
                let _ = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await;
            });
            addr
        });
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build(),
        );
        TestServer {
            base: format!("http://{}", addr),
            agent,
            _runtime: runtime,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get(&self, path: &str) -> (u16, Value) {
        read(self.agent.get(&self.url(path)).call())
    }

    fn get_in(&self, path: &str, session: &str) -> (u16, Value) {
        read(
            self.agent
                .get(&self.url(path))
                .header(MODE_HEADER, "evaluation")
                .header(SESSION_HEADER, session)
                .call(),
        )
    }

    fn post(&self, path: &str, body: Value) -> (u16, Value) {
        read(self.agent.post(&self.url(path)).send_json(&body))
    }

    /// A mutating resource call as `actor`, in production or in `session`.
    fn mutate(
        &self,
        method: &str,
        path: &str,
        session: Option<&str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        let url = self.url(path);
        let mode = if session.is_some() { "evaluation" } else { "production" };
        let session = session.unwrap_or("");
        match method {
            "DELETE" => read(
                self.agent
                    .delete(&url)
                    .header(ACTOR_HEADER, "agent-1")
                    .header(MODE_HEADER, mode)
                    .header(SESSION_HEADER, session)
                    .call(),
            ),
            "POST" => read(
                self.agent
                    .post(&url)
                    .header(ACTOR_HEADER, "agent-1")
                    .header(MODE_HEADER, mode)
                    .header(SESSION_HEADER, session)
                    .send_json(body.unwrap_or(Value::Null)),
            ),
            "PUT" => read(
                self.agent
                    .put(&url)
                    .header(ACTOR_HEADER, "agent-1")
                    .header(MODE_HEADER, mode)
                    .header(SESSION_HEADER, session)
                    .send_json(body.unwrap_or(Value::Null)),
            ),
            "PATCH" => read(
                self.agent
                    .patch(&url)
                    .header(ACTOR_HEADER, "agent-1")
                    .header(MODE_HEADER, mode)
                    .header(SESSION_HEADER, session)
                    .send_json(body.unwrap_or(Value::Null)),
            ),
            other => panic!("unsupported method {other}"),
        }
    }
}

fn read(result: HttpResult) -> (u16, Value) {
    let mut response = result.expect("request failed");
    let status = response.status().as_u16();
    let text = response.body_mut().read_to_string().unwrap_or_default();
    let body = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    (status, body)
}

fn id_of(body: &Value, field: &str) -> String {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("no {field} in {body}"))
        .to_string()
}

// ──────────────────────────────────────────────
// 1. Health and routing
// ──────────────────────────────────────────────

#[test]
fn health_reports_no_active_session() {
    let server = TestServer::start(Config::default(), None);
    let (status, body) = server.get("/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["active_session"].is_null());
}

#[test]
fn unknown_route_is_json_404() {
    let server = TestServer::start(Config::default(), None);
    let (status, body) = server.get("/nope");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

// ──────────────────────────────────────────────
// 2. Production writes and rollback
// ──────────────────────────────────────────────

#[test]
fn production_write_then_rollback() {
    let server = TestServer::start(Config::default(), None);

    let (status, created) = server.mutate(
        "POST",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "A"})),
    );
    assert_eq!(status, 201, "{created}");
    assert_eq!(created["resource"], json!({"title": "A"}));
    let t1 = id_of(&created, "transaction_id");

    let (status, replaced) = server.mutate(
        "PUT",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "B"})),
    );
    assert_eq!(status, 200, "{replaced}");
    let t2 = id_of(&replaced, "transaction_id");

    let (status, listed) = server.get("/transactions?resource_id=doc-1");
    assert_eq!(status, 200);
    let txns = listed["transactions"].as_array().unwrap();
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0]["operation"], "create");
    assert_eq!(txns[1]["operation"], "update");
    assert_eq!(txns[1]["actor"], "agent-1");

    let (status, rolled) = server.post("/rollback", json!({ "transaction_id": t2 }));
    assert_eq!(status, 200, "{rolled}");
    assert_eq!(rolled["status"], "ROLLED_BACK");
    let (_, doc) = server.get("/resources/document/doc-1");
    assert_eq!(doc, json!({"title": "A"}));

    let (status, report) = server.post("/rollback", json!({ "transaction_ids": [t1, t2] }));
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["rolled_back"].as_array().unwrap().len(), 2);
    let (status, _) = server.get("/resources/document/doc-1");
    assert_eq!(status, 404);

    let (status, txn) = server.get(&format!("/transactions/{}", t1));
    assert_eq!(status, 200);
    assert_eq!(txn["status"], "ROLLED_BACK");
}

#[test]
fn merge_and_set_field_record_updates() {
    let server = TestServer::start(Config::default(), None);
    server.mutate(
        "POST",
        "/resources/form/f-1",
        None,
        Some(json!({"title": "Intake", "draft": true})),
    );

    let (status, merged) = server.mutate(
        "PATCH",
        "/resources/form/f-1",
        None,
        Some(json!({"draft": null, "owner": "ops"})),
    );
    assert_eq!(status, 200, "{merged}");
    assert_eq!(merged["resource"], json!({"title": "Intake", "owner": "ops"}));

    let (status, answered) = server.mutate(
        "PUT",
        "/resources/form/f-1/field",
        None,
        Some(json!({"path": ["answers", "q1"], "value": "yes"})),
    );
    assert_eq!(status, 200, "{answered}");
    assert_eq!(answered["resource"]["answers"], json!({"q1": "yes"}));

    let (_, listed) = server.get("/transactions?operation=update&order=desc");
    let txns = listed["transactions"].as_array().unwrap();
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0]["transaction_id"], answered["transaction_id"]);
}

// ──────────────────────────────────────────────
// 3. Error mapping
// ──────────────────────────────────────────────

#[test]
fn error_statuses_follow_error_kind() {
    let server = TestServer::start(Config::default(), None);
    server.mutate(
        "POST",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "A"})),
    );

    // Create of an existing resource.
    let (status, body) = server.mutate(
        "POST",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "again"})),
    );
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "already_exists");

    // Update of a missing resource.
    let (status, body) = server.mutate(
        "PUT",
        "/resources/document/ghost",
        None,
        Some(json!({"title": "x"})),
    );
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not_found");

    // A write that changes nothing.
    let (status, body) = server.mutate(
        "PUT",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "A"})),
    );
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "no_effect");

    // Unknown transaction.
    let (status, body) = server.post(
        "/rollback",
        json!({ "transaction_id": "00000000-0000-4000-8000-000000000000" }),
    );
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "transaction_not_found");

    // Non-object body.
    let (status, _) = server.mutate("POST", "/resources/document/doc-2", None, Some(json!([1])));
    assert_eq!(status, 422);

    // Bad filter.
    let (status, _) = server.get("/transactions?status=MAYBE");
    assert_eq!(status, 400);
}

#[test]
fn mutations_need_an_actor() {
    let server = TestServer::start(Config::default(), None);
    let (status, body) = read(
        server
            .agent
            .post(&server.url("/resources/document/doc-1"))
            .send_json(json!({"title": "A"})),
    );
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains(ACTOR_HEADER));
}

// ──────────────────────────────────────────────
// 4. Evaluation sessions
// ──────────────────────────────────────────────

#[test]
fn evaluation_session_is_isolated_from_production() {
    let mut config = Config::default();
    config.evaluation.verify_production_isolation = true;
    let server = TestServer::start(config, None);
    server.mutate(
        "POST",
        "/resources/document/doc-1",
        None,
        Some(json!({"title": "Live"})),
    );

    let (status, seed) = server.post("/evaluation/seeds", json!({}));
    assert_eq!(status, 201, "{seed}");
    let seed_id = id_of(&seed, "seed_snapshot_id");

    let (status, started) = server.post("/evaluation/start", json!({ "seed_snapshot_id": seed_id }));
    assert_eq!(status, 201, "{started}");
    let session = id_of(&started, "session_id");

    let (status, again) = server.post("/evaluation/start", json!({ "seed_snapshot_id": seed_id }));
    assert_eq!(status, 409);
    assert_eq!(again["kind"], "session_already_active");

    let (status, patched) = server.mutate(
        "PATCH",
        "/resources/document/doc-1",
        Some(&session),
        Some(json!({"title": "Agent edit"})),
    );
    assert_eq!(status, 200, "{patched}");

    let (_, in_sandbox) = server.get_in("/resources/document/doc-1", &session);
    assert_eq!(in_sandbox["title"], "Agent edit");
    let (_, in_production) = server.get("/resources/document/doc-1");
    assert_eq!(in_production["title"], "Live");

    let (status, detail) = server.get(&format!("/evaluation/sessions/{}", session));
    assert_eq!(status, 200);
    assert_eq!(detail["transaction_ids"].as_array().unwrap().len(), 1);

    let (status, ended) = server.post("/evaluation/end", json!({ "session_id": session }));
    assert_eq!(status, 200, "{ended}");
    let summary = &ended["session_summary"];
    assert_eq!(summary["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(summary["status_counts"]["ACTIVE"], 1);
    assert_eq!(summary["production_unchanged"], true);

    // The session is closed: its transactions can no longer be rolled back
    // and its id no longer routes.
    let t = patched["transaction_id"].clone();
    let (status, body) = server.post("/rollback", json!({ "transaction_id": t }));
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "session_closed");
    let (status, body) = server.get_in("/resources/document/doc-1", &session);
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "session_not_active");

    let (_, sessions) = server.get("/evaluation/sessions");
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 1);
}

#[test]
fn unknown_seed_is_unprocessable() {
    let server = TestServer::start(Config::default(), None);
    let (status, body) = server.post(
        "/evaluation/start",
        json!({ "seed_snapshot_id": "00000000-0000-4000-8000-000000000000" }),
    );
    assert_eq!(status, 422);
    assert_eq!(body["kind"], "seed_unavailable");
}

// ──────────────────────────────────────────────
// 5. Authentication
// ──────────────────────────────────────────────

#[test]
fn api_key_guards_everything_but_health() {
    let server = TestServer::start(Config::default(), Some("k3y"));

    let (status, _) = server.get("/health");
    assert_eq!(status, 200);

    let (status, body) = server.get("/transactions");
    assert_eq!(status, 401);
    assert_eq!(body["kind"], "unauthenticated");

    let (status, _) = read(
        server
            .agent
            .get(&server.url("/transactions"))
            .header("authorization", "Bearer wrong")
            .call(),
    );
    assert_eq!(status, 403);

    let (status, _) = read(
        server
            .agent
            .get(&server.url("/transactions"))
            .header("x-api-key", "k3y")
            .call(),
    );
    assert_eq!(status, 200);
}

// ──────────────────────────────────────────────
// 6. Durable journal
// ──────────────────────────────────────────────

#[test]
fn file_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.log.path = Some(dir.path().join("txns.jsonl"));

    let (t, session) = {
        let server = TestServer::start(config.clone(), None);
        let (_, created) = server.mutate(
            "POST",
            "/resources/document/doc-1",
            None,
            Some(json!({"title": "A"})),
        );
        let (_, seed) = server.post("/evaluation/seeds", json!({}));
        let (_, started) = server.post(
            "/evaluation/start",
            json!({ "seed_snapshot_id": id_of(&seed, "seed_snapshot_id") }),
        );
        (
            id_of(&created, "transaction_id"),
            id_of(&started, "session_id"),
        )
    };

    let server = TestServer::start(config, None);
    let (status, txn) = server.get(&format!("/transactions/{}", t));
    assert_eq!(status, 200);
    assert_eq!(txn["resource_id"], "doc-1");
    assert_eq!(txn["status"], "ACTIVE");

    // The session open at shutdown is listed, and closed on restart.
    let (status, listed) = server.get("/evaluation/sessions");
    assert_eq!(status, 200);
    let sessions = listed["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], session.as_str());
    assert!(sessions[0]["ended_at"].is_string());
    let (_, health) = server.get("/health");
    assert!(health["active_session"].is_null());
}
