//! Password auth subset: sign-up, password grant, logout, current user.
//!
//! Error bodies reproduce the real service's literal messages, including
//! its two shapes (`msg` and the OAuth `error_description`).

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::AppState;

const TOKEN_LIFETIME_SECS: i64 = 3600;
const MIN_PASSWORD_LEN: usize = 6;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(sign_up))
        .route("/token", post(token))
        .route("/logout", post(logout))
        .route("/user", get(current_user))
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    password: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Account {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "aud": "authenticated",
            "role": "authenticated",
            "email": self.email,
            "email_confirmed_at": self.confirmed_at,
            "created_at": self.created_at,
            "user_metadata": {},
        })
    }
}

/// Registered accounts by email, and live access tokens.
#[derive(Debug, Default)]
pub struct Accounts {
    by_email: HashMap<String, Account>,
    tokens: HashMap<String, String>,
}

impl Accounts {
    /// Mark an account confirmed, as clicking the emailed link would.
    pub fn confirm(&mut self, email: &str) -> bool {
        match self.by_email.get_mut(email) {
            Some(account) => {
                account.confirmed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    fn issue_session(&mut self, email: &str) -> Option<Value> {
        let account = self.by_email.get(email)?.clone();
        let access_token = format!("mock-at-{}", Uuid::new_v4().simple());
        let refresh_token = format!("mock-rt-{}", Uuid::new_v4().simple());
        self.tokens.insert(access_token.clone(), email.to_string());
        Some(json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": TOKEN_LIFETIME_SECS,
            "expires_at": Utc::now().timestamp() + TOKEN_LIFETIME_SECS,
            "refresh_token": refresh_token,
            "user": account.to_json(),
        }))
    }

    fn account_for_token(&self, token: &str) -> Option<&Account> {
        self.tokens.get(token).and_then(|email| self.by_email.get(email))
    }
}

#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct TokenParams {
    grant_type: Option<String>,
}

fn auth_error(status: StatusCode, error_code: &str, msg: &str) -> Response {
    (
        status,
        Json(json!({
            "code": status.as_u16(),
            "error_code": error_code,
            "msg": msg,
        })),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

async fn sign_up(State(state): State<AppState>, Json(creds): Json<Credentials>) -> Response {
    if !looks_like_email(&creds.email) {
        return auth_error(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            "Unable to validate email address: invalid format",
        );
    }
    if creds.password.chars().count() < MIN_PASSWORD_LEN {
        return auth_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "weak_password",
            "Password should be at least 6 characters",
        );
    }

    let mut accounts = state.accounts.write().await;
    if accounts.by_email.contains_key(&creds.email) {
        return auth_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "user_already_exists",
            "User already registered",
        );
    }

    let now = Utc::now();
    let account = Account {
        id: Uuid::new_v4(),
        email: creds.email.clone(),
        password: creds.password,
        created_at: now,
        confirmed_at: (!state.config.require_email_confirmation).then_some(now),
    };
    let user = account.to_json();
    accounts.by_email.insert(creds.email.clone(), account);
    tracing::debug!(email = %creds.email, "account created");

    if state.config.require_email_confirmation {
        return (StatusCode::OK, Json(user)).into_response();
    }
    match accounts.issue_session(&creds.email) {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn token(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
    Json(creds): Json<Credentials>,
) -> Response {
    if params.grant_type.as_deref() != Some("password") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unsupported_grant_type",
                "error_description": "grant_type must be password",
            })),
        )
            .into_response();
    }

    let mut accounts = state.accounts.write().await;
    let account = match accounts.by_email.get(&creds.email) {
        Some(account) if account.password == creds.password => account,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_grant",
                    "error_description": "Invalid login credentials",
                })),
            )
                .into_response();
        }
    };
    if account.confirmed_at.is_none() {
        return auth_error(StatusCode::BAD_REQUEST, "email_not_confirmed", "Email not confirmed");
    }

    match accounts.issue_session(&creds.email) {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer(&headers) else {
        return auth_error(StatusCode::UNAUTHORIZED, "no_authorization", "This endpoint requires a Bearer token");
    };
    let mut accounts = state.accounts.write().await;
    if accounts.tokens.remove(token).is_none() {
        return auth_error(StatusCode::UNAUTHORIZED, "bad_jwt", "invalid JWT");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn current_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let accounts = state.accounts.read().await;
    match bearer(&headers).and_then(|t| accounts.account_for_token(t)) {
        Some(account) => (StatusCode::OK, Json(account.to_json())).into_response(),
        None => auth_error(StatusCode::UNAUTHORIZED, "bad_jwt", "invalid JWT"),
    }
}
