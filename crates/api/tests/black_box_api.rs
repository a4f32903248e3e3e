use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use closet_ai::{AiError, Completion, CompletionModel, CompletionOptions, TokenUsage};
use closet_api::app::{self, AppServices};
use closet_auth::{JwtClaims, Role};
use closet_core::UserId;
use closet_infra::config::AppConfig;
use closet_infra::ledger::InMemoryLedgerStore;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value as JsonValue, json};

const JWT_SECRET: &str = "test-secret";
const SERVICE_TOKEN: &str = "worker-token";

/// Model double that answers with queued JSON replies in order.
#[derive(Default)]
struct QueuedModel {
    replies: Mutex<VecDeque<JsonValue>>,
    tokens_per_call: u64,
}

impl QueuedModel {
    fn new(tokens_per_call: u64) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            tokens_per_call,
        })
    }

    fn push(&self, reply: JsonValue) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl CompletionModel for QueuedModel {
    async fn complete_json(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<Completion, AiError> {
        let data = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AiError::InferenceFailed("no reply queued".into()))?;
        Ok(Completion {
            raw: data.to_string(),
            data,
            model: "gpt-4o-mini".into(),
            usage: TokenUsage {
                prompt_tokens: self.tokens_per_call / 2,
                completion_tokens: self.tokens_per_call - self.tokens_per_call / 2,
                total_tokens: self.tokens_per_call,
            },
            cost_estimate_usd: 0.0001,
            latency_ms: 5,
        })
    }
}

struct TestServer {
    base_url: String,
    model: Arc<QueuedModel>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(&[]).await
    }

    async fn spawn_with(overrides: &[(&str, &str)]) -> Self {
        let mut env: HashMap<String, String> = HashMap::from([
            ("JWT_SECRET".to_string(), JWT_SECRET.to_string()),
            ("AI_WORKER_SERVICE_TOKEN".to_string(), SERVICE_TOKEN.to_string()),
        ]);
        for (k, v) in overrides {
            env.insert(k.to_string(), v.to_string());
        }
        let config = AppConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        let model = QueuedModel::new(120);
        let services = AppServices::new(&config, InMemoryLedgerStore::arc(), model.clone());

        // Same router as prod, bound to an ephemeral port.
        let app = app::router(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            model,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user: UserId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user,
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// A user with a provisioned quota and one item.
async fn user_with_item(srv: &TestServer, client: &reqwest::Client) -> (String, String) {
    let token = mint_jwt(UserId::new(), vec![]);
    let res = client
        .post(srv.url("/api/items"))
        .bearer_auth(&token)
        .json(&json!({"title": "Vintage Levi's 501", "brand": "levis", "color": "blue"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let item: JsonValue = res.json().await.unwrap();
    (token, item["id"].as_str().unwrap().to_string())
}

async fn submit(
    srv: &TestServer,
    client: &reqwest::Client,
    token: &str,
    body: JsonValue,
) -> (StatusCode, JsonValue) {
    let res = client
        .post(srv.url("/api/aijobs"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

async fn process(srv: &TestServer, client: &reqwest::Client, batch_size: u32) -> JsonValue {
    let res = client
        .post(srv.url("/api/aijobs/process"))
        .bearer_auth(SERVICE_TOKEN)
        .json(&json!({"batchSize": batch_size}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

fn normalize_reply() -> JsonValue {
    json!({
        "category": "Bottoms",
        "subcategory": "Jeans",
        "brand_normalized": "Levi's",
        "color_hex_or_name": "",
        "tags": ["denim", "vintage"],
        "confidence_scores": {"category": 0.95, "brand": 0.9}
    })
}

fn price_reply(confidence: f64) -> JsonValue {
    json!({
        "suggestedMinCents": 3000,
        "suggestedMedianCents": 4500,
        "suggestedMaxCents": 6000,
        "confidence": confidence,
        "reasoning": ["comparable sold listings"]
    })
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/whoami", "/api/aijobs", "/api/quota"] {
        let res = client.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
        let body: JsonValue = res.json().await.unwrap();
        assert_eq!(body["error"], "unauthorized");
    }

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();
    let token = mint_jwt(user, vec![Role::AI_WORKER]);

    let res = reqwest::Client::new()
        .get(srv.url("/whoami"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["userId"].as_str().unwrap(), user.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "ai_worker"));
}

#[tokio::test]
async fn submit_without_quota_is_not_found() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(UserId::new(), vec![]);

    let (status, body) = submit(
        &srv,
        &reqwest::Client::new(),
        &token,
        json!({"jobType": "NORMALIZE", "inputPayload": {"title": "Coat"}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn invalid_submissions_are_validation_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, _) = user_with_item(&srv, &client).await;

    for body in [
        json!({"jobType": "SUMMON", "inputPayload": {}}),
        json!({"jobType": "NORMALIZE", "inputPayload": "text"}),
        json!({"jobType": "NORMALIZE", "inputPayload": {}, "promptVersion": ""}),
        json!({"jobType": "NORMALIZE", "inputPayload": {}, "itemId": "nope"}),
        json!({"inputPayload": {}}),
    ] {
        let (status, resp) = submit(&srv, &client, &token, body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp["error"], "validation_error");
    }
}

#[tokio::test]
async fn normalize_job_lifecycle_submit_process_apply() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, item_id) = user_with_item(&srv, &client).await;

    let (status, created) = submit(
        &srv,
        &client,
        &token,
        json!({
            "itemId": item_id,
            "jobType": "NORMALIZE",
            "inputPayload": {"title": "Vintage Levi's 501", "description": "blue denim"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["inputHash"].as_str().unwrap().len(), 64);
    let job_id = created["jobId"].as_str().unwrap().to_string();

    srv.model.push(normalize_reply());
    let run = process(&srv, &client, 5).await;
    assert_eq!(run["processed"], 1);
    assert_eq!(run["results"][0]["status"], "SUCCEEDED");
    assert_eq!(run["results"][0]["tokensUsed"], 120);

    let job: JsonValue = client
        .get(srv.url(&format!("/api/aijobs/{job_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "SUCCEEDED");
    assert_eq!(job["attempts"], 1);
    assert_eq!(job["result"]["category"], "Bottoms");

    let res = client
        .post(srv.url(&format!("/api/aijobs/{job_id}/apply")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let applied: JsonValue = res.json().await.unwrap();
    assert_eq!(applied["itemId"], item_id.as_str());
    assert_eq!(applied["applied"]["brand"], "Levi's");
    assert!(applied["applied"].get("color").is_none());

    let item: JsonValue = client
        .get(srv.url(&format!("/api/items/{item_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(item["brand"], "Levi's");
    assert_eq!(item["color"], "blue");
    assert_eq!(item["category"], "Bottoms");
    assert_eq!(item["tags"], json!(["denim", "vintage"]));
    assert!(item["lastAiRunAt"].is_string());

    let audit: JsonValue = client
        .get(srv.url(&format!("/api/aijobs/{job_id}/audit")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(audit["entries"][0]["action"], "APPLY_TO_ITEM");
    assert_eq!(audit["entries"][0]["reason"], "Applied via API");

    // Applying twice is an illegal transition.
    let res = client
        .post(srv.url(&format!("/api/aijobs/{job_id}/apply")))
        .bearer_auth(&token)
        .json(&json!({"reason": "again"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn identical_submission_reuses_succeeded_result() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, _) = user_with_item(&srv, &client).await;

    let body = json!({"jobType": "PRICE_SUGGESTION", "inputPayload": {"brand": "Patagonia", "title": "Fleece"}});
    let (_, created) = submit(&srv, &client, &token, body.clone()).await;
    srv.model.push(price_reply(0.9));
    process(&srv, &client, 1).await;

    let (status, reused) = submit(&srv, &client, &token, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reused["reused"], true);
    assert_eq!(reused["ownedByCaller"], true);
    assert_eq!(reused["jobId"], created["jobId"]);
    assert_eq!(reused["status"], "SUCCEEDED");
    assert_eq!(reused["result"]["suggestedMedianCents"], 4500);

    // A different prompt version is a different computation.
    let (status, fresh) = submit(
        &srv,
        &client,
        &token,
        json!({"jobType": "PRICE_SUGGESTION", "inputPayload": {"title": "Fleece", "brand": "Patagonia"}, "promptVersion": "v2"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(fresh["jobId"], created["jobId"]);
}

#[tokio::test]
async fn reuse_across_users_flags_the_foreign_job() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (alice, _) = user_with_item(&srv, &client).await;
    let (bob, _) = user_with_item(&srv, &client).await;

    let body = json!({"jobType": "NORMALIZE", "inputPayload": {"title": "Nike Hoodie"}});
    let (_, created) = submit(&srv, &client, &alice, body.clone()).await;
    srv.model.push(normalize_reply());
    process(&srv, &client, 1).await;

    let (status, reused) = submit(&srv, &client, &bob, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reused["jobId"], created["jobId"]);
    assert_eq!(reused["ownedByCaller"], false);

    let res = client
        .get(srv.url(&format!("/api/aijobs/{}", created["jobId"].as_str().unwrap())))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn low_confidence_result_needs_review_and_can_be_applied() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, item_id) = user_with_item(&srv, &client).await;

    let (_, created) = submit(
        &srv,
        &client,
        &token,
        json!({"itemId": item_id, "jobType": "PRICE_SUGGESTION", "inputPayload": {"title": "Jacket"}}),
    )
    .await;
    let job_id = created["jobId"].as_str().unwrap().to_string();
    srv.model.push(price_reply(0.4));
    let run = process(&srv, &client, 1).await;
    assert_eq!(run["results"][0]["status"], "NEEDS_REVIEW");

    let res = client
        .post(srv.url(&format!("/api/aijobs/{job_id}/apply")))
        .bearer_auth(&token)
        .json(&json!({"reason": "checked comps by hand"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let item: JsonValue = client
        .get(srv.url(&format!("/api/items/{item_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(item["suggestedPrice"]["suggestedMaxCents"], 6000);
}

#[tokio::test]
async fn quota_gate_returns_429_once_budget_is_spent() {
    let srv = TestServer::spawn_with(&[("DEFAULT_DAILY_TOKEN_BUDGET", "100")]).await;
    let client = reqwest::Client::new();
    let (token, _) = user_with_item(&srv, &client).await;

    let (status, _) = submit(
        &srv,
        &client,
        &token,
        json!({"jobType": "PRICE_SUGGESTION", "inputPayload": {"title": "Boots"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    srv.model.push(price_reply(0.9));
    process(&srv, &client, 1).await;

    let quota: JsonValue = client
        .get(srv.url("/api/quota"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(quota["tokensUsedToday"], 120);
    assert_eq!(quota["dailyTokenBudget"], 100);
    assert_eq!(quota["remaining"], 0);

    let (status, body) = submit(
        &srv,
        &client,
        &token,
        json!({"jobType": "PRICE_SUGGESTION", "inputPayload": {"title": "Scarf"}}),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["tokensUsedToday"], 120);
    assert_eq!(body["dailyTokenBudget"], 100);
}

#[tokio::test]
async fn process_requires_worker_credentials() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/aijobs/process"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let user_token = mint_jwt(UserId::new(), vec![]);
    let res = client
        .post(srv.url("/api/aijobs/process"))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let worker_token = mint_jwt(UserId::new(), vec![Role::AI_WORKER]);
    let res = client
        .post(srv.url("/api/aijobs/process"))
        .bearer_auth(&worker_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["processed"], 0);
    assert_eq!(body["message"], "No jobs to process");
}

#[tokio::test]
async fn process_rejects_service_token_when_unconfigured() {
    let srv = TestServer::spawn_with(&[("AI_WORKER_SERVICE_TOKEN", "")]).await;
    let res = reqwest::Client::new()
        .post(srv.url("/api/aijobs/process"))
        .bearer_auth("")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = reqwest::Client::new()
        .post(srv.url("/api/aijobs/process"))
        .bearer_auth(SERVICE_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn jobs_and_items_are_isolated_by_owner() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (alice, alice_item) = user_with_item(&srv, &client).await;
    let (bob, _) = user_with_item(&srv, &client).await;

    let (_, created) = submit(
        &srv,
        &client,
        &alice,
        json!({"itemId": alice_item, "jobType": "NORMALIZE", "inputPayload": {"title": "Tee"}}),
    )
    .await;
    let job_id = created["jobId"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url(&format!("/api/aijobs/{job_id}")))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url(&format!("/api/aijobs/{job_id}/apply")))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url(&format!("/api/items/{alice_item}")))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Bob cannot target Alice's item either.
    let (status, _) = submit(
        &srv,
        &client,
        &bob,
        json!({"itemId": alice_item, "jobType": "NORMALIZE", "inputPayload": {"title": "Other"}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let list: JsonValue = client
        .get(srv.url("/api/aijobs"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, item_id) = user_with_item(&srv, &client).await;

    for title in ["a", "b", "c"] {
        submit(
            &srv,
            &client,
            &token,
            json!({"itemId": item_id, "jobType": "NORMALIZE", "inputPayload": {"title": title}}),
        )
        .await;
    }
    submit(
        &srv,
        &client,
        &token,
        json!({"jobType": "CONDITION_GRADE", "inputPayload": {"title": "d"}}),
    )
    .await;

    let page: JsonValue = client
        .get(srv.url("/api/aijobs?jobType=NORMALIZE&limit=2"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["offset"], 0);
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["jobs"].as_array().unwrap().len(), 2);

    let page: JsonValue = client
        .get(srv.url(&format!("/api/aijobs?itemId={item_id}&status=PENDING&offset=2")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["hasMore"], false);
    assert_eq!(page["jobs"].as_array().unwrap().len(), 1);

    let res = client
        .get(srv.url("/api/aijobs?status=DONE"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn apply_after_item_deleted_changes_nothing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, item_id) = user_with_item(&srv, &client).await;

    let (_, created) = submit(
        &srv,
        &client,
        &token,
        json!({"itemId": item_id, "jobType": "NORMALIZE", "inputPayload": {"title": "Dress"}}),
    )
    .await;
    let job_id = created["jobId"].as_str().unwrap().to_string();
    srv.model.push(normalize_reply());
    process(&srv, &client, 1).await;

    let res = client
        .delete(srv.url(&format!("/api/items/{item_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(srv.url(&format!("/api/aijobs/{job_id}/apply")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let job: JsonValue = client
        .get(srv.url(&format!("/api/aijobs/{job_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "SUCCEEDED");
    assert!(job["appliedAt"].is_null());
}
