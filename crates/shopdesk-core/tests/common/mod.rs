//! In-process fake of the Auth Service and Resource API.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use shopdesk_core::api::{AuthClient, RequestGateway, ResourceApi};
use shopdesk_core::auth::{KeyValueStore, MemoryStore, SessionConfig, SessionManager};

pub struct Fake {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    /// Access token handed out by login/register.
    pub login_token: Mutex<String>,
    /// Access token handed out by refresh; `None` rejects with 401.
    pub refresh_token_result: Mutex<Option<String>>,
    pub refresh_delay: Mutex<Duration>,
    pub accepted_tokens: Mutex<HashSet<String>>,
    pub refresh_bodies: Mutex<Vec<Value>>,
    pub register_bodies: Mutex<Vec<Value>>,
    pub seen_auth: Mutex<Vec<Option<String>>>,
}

impl Default for Fake {
    fn default() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            resource_calls: AtomicUsize::new(0),
            login_token: Mutex::new("t1".to_string()),
            refresh_token_result: Mutex::new(Some("t2".to_string())),
            refresh_delay: Mutex::new(Duration::ZERO),
            accepted_tokens: Mutex::new(HashSet::from(["t2".to_string()])),
            refresh_bodies: Mutex::new(Vec::new()),
            register_bodies: Mutex::new(Vec::new()),
            seen_auth: Mutex::new(Vec::new()),
        }
    }
}

impl Fake {
    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn resource_hits(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn set_login_token(&self, token: &str) {
        *self.login_token.lock().unwrap() = token.to_string();
    }

    pub fn set_refresh_result(&self, token: Option<&str>) {
        *self.refresh_token_result.lock().unwrap() = token.map(str::to_string);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn accept(&self, token: &str) {
        self.accepted_tokens.lock().unwrap().insert(token.to_string());
    }
}

fn auth_body(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": "r1",
        "user": {
            "id": "u1",
            "email": "a@b.com",
            "role": "admin",
            "is_active": true,
            "created_at": "2024-01-01T00:00:00"
        },
        "client": {
            "id": "c1",
            "name": "Acme",
            "slug": "acme",
            "created_at": "2024-01-01T00:00:00Z"
        }
    })
}

async fn login(State(fake): State<Arc<Fake>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.login_calls.fetch_add(1, Ordering::SeqCst);
    if body["password"] != "pw" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid credentials"})),
        );
    }
    let token = fake.login_token.lock().unwrap().clone();
    (StatusCode::OK, Json(auth_body(&token)))
}

async fn register(State(fake): State<Arc<Fake>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.register_bodies.lock().unwrap().push(body.clone());
    if body["email"] == "taken@b.com" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Email already registered"})),
        );
    }
    let token = fake.login_token.lock().unwrap().clone();
    (StatusCode::CREATED, Json(auth_body(&token)))
}

async fn refresh(State(fake): State<Arc<Fake>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.refresh_calls.fetch_add(1, Ordering::SeqCst);
    fake.refresh_bodies.lock().unwrap().push(body.clone());

    let delay = *fake.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let result = fake.refresh_token_result.lock().unwrap().clone();
    match result {
        Some(token) if body["refresh_token"] == "r1" => {
            (StatusCode::OK, Json(json!({"access_token": token})))
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid refresh token"})),
        ),
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn products(State(fake): State<Arc<Fake>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    fake.resource_calls.fetch_add(1, Ordering::SeqCst);
    let auth = bearer(&headers);
    fake.seen_auth.lock().unwrap().push(auth.clone());

    let token = auth.as_deref().and_then(|h| h.strip_prefix("Bearer "));
    let accepted = token
        .map(|t| fake.accepted_tokens.lock().unwrap().contains(t))
        .unwrap_or(false);
    if accepted {
        (StatusCode::OK, Json(json!([{"id": "p1", "name": "Coffee"}])))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"})))
    }
}

async fn always_unauthorized(State(fake): State<Arc<Fake>>, headers: HeaderMap) -> StatusCode {
    fake.resource_calls.fetch_add(1, Ordering::SeqCst);
    fake.seen_auth.lock().unwrap().push(bearer(&headers));
    StatusCode::UNAUTHORIZED
}

async fn broken(State(fake): State<Arc<Fake>>) -> (StatusCode, &'static str) {
    fake.resource_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

/// Start the fake on an ephemeral port and return its base URL.
pub async fn spawn_fake(fake: Arc<Fake>) -> String {
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh", post(refresh))
        .route("/products", get(products))
        .route("/orders", get(always_unauthorized))
        .route("/campaigns", get(broken))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A JWT-shaped token expiring `secs` from now.
pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

pub struct Harness {
    pub fake: Arc<Fake>,
    pub storage: Arc<MemoryStore>,
    pub session: SessionManager,
    pub api: ResourceApi,
}

pub async fn harness() -> Harness {
    harness_with(Fake::default(), SessionConfig::default()).await
}

pub async fn harness_with(fake: Fake, config: SessionConfig) -> Harness {
    let fake = Arc::new(fake);
    let base_url = spawn_fake(Arc::clone(&fake)).await;
    let storage = Arc::new(MemoryStore::new());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let auth = AuthClient::with_client(client.clone(), &base_url);
    let session = SessionManager::new(auth, Arc::clone(&storage) as Arc<dyn KeyValueStore>, config);
    session.initialize();
    let api = ResourceApi::new(RequestGateway::new(client, &base_url, session.clone()));

    Harness {
        fake,
        storage,
        session,
        api,
    }
}
