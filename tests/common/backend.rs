// In-process stand-in for the hosted auth and data APIs
//
// Emulates what the RLS suite relies on: sign-up inserting a profile row (the database
// trigger), password login issuing bearer tokens, admin confirmation, and owner-only reads of
// the profile table for session tokens while the service key sees every row.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use rls_harness::Profile;
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpListener, task::JoinHandle};
use uuid::Uuid;

pub const ANON_KEY: &str = "test-anon-key";
pub const SERVICE_KEY: &str = "test-service-key";

#[derive(Clone, Debug)]
pub struct MockUser {
    pub id: Uuid,
    pub email: String,
    pub password: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl MockUser {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "aud": "authenticated",
            "role": "authenticated",
            "email": self.email,
            "email_confirmed_at": self.email_confirmed_at,
        })
    }
}

/// Tables and switches shared by the mock APIs and the in-memory store
#[derive(Debug, Default)]
pub struct BackendState {
    pub users: Vec<MockUser>,
    pub profiles: Vec<Profile>,
    pub sessions: HashMap<String, Uuid>,
    pub signups: usize,
    pub shutdowns: usize,
    /// Sign-up answers 500
    pub reject_signups: bool,
    /// Confirmation updates report a matched row but never stamp it
    pub ignore_confirmations: bool,
    /// Deleting profile rows fails
    pub fail_profile_deletes: bool,
    /// Session tokens see every profile row, as if the select policy were missing
    pub disable_rls: bool,
}

impl BackendState {
    /// Inserts an identity directly, firing the profile trigger like a real insert would
    pub fn insert_user(&mut self, email: &str, password: &str, confirmed: bool) -> Uuid {
        let id = Uuid::new_v4();

        self.users.push(MockUser {
            id,
            email: email.to_string(),
            password: password.to_string(),
            email_confirmed_at: confirmed.then(Utc::now),
        });
        self.profiles.push(Profile {
            id: Uuid::new_v4(),
            auth_user_id: id,
        });

        id
    }

    pub fn user(&self, email: &str) -> Option<&MockUser> {
        self.users.iter().find(|user| user.email == email)
    }

    pub fn profile_count(&self, user_id: Uuid) -> usize {
        self.profiles
            .iter()
            .filter(|profile| profile.auth_user_id == user_id)
            .count()
    }
}

pub type SharedState = Arc<Mutex<BackendState>>;

pub fn lock(state: &SharedState) -> MutexGuard<'_, BackendState> {
    state.lock().unwrap()
}

pub struct MockBackend {
    pub url: String,
    pub state: SharedState,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Serves the mock APIs on an ephemeral local port
    pub async fn start() -> Self {
        let state = SharedState::default();

        let router = Router::new()
            .route("/auth/v1/signup", post(sign_up))
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/admin/users/:id", put(admin_update_user))
            .route("/rest/v1/users", get(read_profiles))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { url, state, server }
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        lock(&self.state)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn error(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("apikey").and_then(|value| value.to_str().ok())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn check_api_key(headers: &HeaderMap) -> Result<(), Response> {
    match api_key(headers) {
        Some(ANON_KEY | SERVICE_KEY) => Ok(()),
        _ => Err(error(
            StatusCode::UNAUTHORIZED,
            json!({ "message": "Invalid API key" }),
        )),
    }
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn sign_up(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(Credentials { email, password }): Json<Credentials>,
) -> Response {
    if let Err(res) = check_api_key(&headers) {
        return res;
    }

    let mut state = lock(&state);

    if state.reject_signups {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "code": 500, "msg": "Database error saving new user" }),
        );
    }

    if state.user(&email).is_some() {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "code": 422, "error_code": "user_already_exists", "msg": "User already registered" }),
        );
    }

    state.signups += 1;
    let id = state.insert_user(&email, &password, false);

    let user = state.users.iter().find(|user| user.id == id).unwrap();

    Json(user.to_json()).into_response()
}

#[derive(Deserialize)]
struct TokenQuery {
    grant_type: String,
}

async fn token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(TokenQuery { grant_type }): Query<TokenQuery>,
    Json(Credentials { email, password }): Json<Credentials>,
) -> Response {
    if let Err(res) = check_api_key(&headers) {
        return res;
    }

    if grant_type != "password" {
        return error(
            StatusCode::BAD_REQUEST,
            json!({ "error": "unsupported_grant_type", "error_description": "Unsupported grant type" }),
        );
    }

    let mut state = lock(&state);

    let Some(user) = state
        .user(&email)
        .filter(|user| user.password == password)
        .cloned()
    else {
        return error(
            StatusCode::BAD_REQUEST,
            json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }),
        );
    };

    if user.email_confirmed_at.is_none() {
        return error(
            StatusCode::BAD_REQUEST,
            json!({ "error": "invalid_grant", "error_description": "Email not confirmed" }),
        );
    }

    let access_token = format!("session-{}", Uuid::new_v4());
    state.sessions.insert(access_token.clone(), user.id);

    Json(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": Uuid::new_v4().to_string(),
        "user": user.to_json(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct AdminAttributes {
    email_confirm: Option<bool>,
}

async fn admin_update_user(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(attributes): Json<AdminAttributes>,
) -> Response {
    if let Err(res) = check_api_key(&headers) {
        return res;
    }

    if bearer(&headers) != Some(SERVICE_KEY) {
        return error(
            StatusCode::FORBIDDEN,
            json!({ "code": 403, "error_code": "not_admin", "msg": "User not allowed" }),
        );
    }

    let mut state = lock(&state);

    let Some(user) = state.users.iter_mut().find(|user| user.id == id) else {
        return error(
            StatusCode::NOT_FOUND,
            json!({ "code": 404, "error_code": "user_not_found", "msg": "User not found" }),
        );
    };

    if attributes.email_confirm == Some(true) && user.email_confirmed_at.is_none() {
        user.email_confirmed_at = Some(Utc::now());
    }

    Json(user.to_json()).into_response()
}

async fn read_profiles(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(res) = check_api_key(&headers) {
        return res;
    }

    let state = lock(&state);

    // Which rows the caller's role may see
    let visible_to: Option<Option<Uuid>> = match bearer(&headers) {
        Some(SERVICE_KEY) => Some(None),
        Some(ANON_KEY) => None,
        Some(token) => match state.sessions.get(token) {
            Some(_) if state.disable_rls => Some(None),
            Some(&user_id) => Some(Some(user_id)),
            None => {
                return error(
                    StatusCode::UNAUTHORIZED,
                    json!({ "code": "PGRST301", "message": "JWT expired" }),
                );
            }
        },
        None => None,
    };

    let owner_filter = match params.get("auth_user_id") {
        Some(filter) => match filter.strip_prefix("eq.").map(Uuid::parse_str) {
            Some(Ok(owner)) => Some(owner),
            _ => {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({ "code": "22P02", "message": format!("invalid input syntax for type uuid: {filter:?}") }),
                );
            }
        },
        None => None,
    };

    let rows: Vec<&Profile> = match visible_to {
        None => Vec::new(),
        Some(owner) => state
            .profiles
            .iter()
            .filter(|profile| owner.is_none_or(|owner| profile.auth_user_id == owner))
            .filter(|profile| owner_filter.is_none_or(|owner| profile.auth_user_id == owner))
            .collect(),
    };

    Json(rows).into_response()
}
