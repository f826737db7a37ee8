//! In-memory stand-in for the hosted backend: row store REST endpoints for
//! `todos`, password auth and the realtime websocket.

pub mod auth;
pub mod realtime;
pub mod rest;

use std::sync::Arc;

use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{broadcast, RwLock},
};
use uuid::Uuid;

/// Realtime fan-out buffer per socket.
const CHANGE_BUFFER: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub completed: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed row change, fanned out to realtime sockets.
#[derive(Clone, Debug)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub row: Todo,
    pub committed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// Sign-ups return a bare user and sign-in fails until confirmed.
    pub require_email_confirmation: bool,
}

pub type Db = Arc<RwLock<Vec<Todo>>>;

#[derive(Clone)]
pub struct AppState {
    pub todos: Db,
    pub accounts: Arc<RwLock<auth::Accounts>>,
    pub changes: broadcast::Sender<RowChange>,
    pub config: MockConfig,
}

impl AppState {
    pub fn new(config: MockConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            todos: Arc::new(RwLock::new(Vec::new())),
            accounts: Arc::new(RwLock::new(auth::Accounts::default())),
            changes,
            config,
        }
    }

    pub(crate) fn publish(&self, kind: ChangeKind, row: Todo) {
        // No sockets listening is fine.
        let _ = self.changes.send(RowChange {
            kind,
            row,
            committed_at: Utc::now(),
        });
    }
}

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    router(AppState::new(config))
}

/// Router over caller-owned state, so tests can inspect or seed it.
pub fn router(state: AppState) -> Router {
    let keyed = Router::new()
        .nest("/rest/v1", rest::routes())
        .nest("/auth/v1", auth::routes())
        .layer(middleware::from_fn(rest::require_api_key));

    Router::new()
        .merge(keyed)
        .nest("/realtime/v1", realtime::routes())
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, AppState::new(MockConfig::default())).await
}

pub async fn run_with(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo() -> Todo {
        let at = "2024-05-01T10:00:00Z".parse().unwrap();
        Todo {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            text: "Test".to_string(),
            completed: false,
            tags: vec!["home".to_string()],
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn todo_serializes_to_json() {
        let json = serde_json::to_value(todo()).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["text"], "Test");
        assert_eq!(json["completed"], false);
        assert_eq!(json["tags"], serde_json::json!(["home"]));
        assert_eq!(json["created_at"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn change_kind_uses_uppercase_names() {
        assert_eq!(serde_json::to_value(ChangeKind::Delete).unwrap(), "DELETE");
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let state = AppState::new(MockConfig::default());
        let mut rx = state.changes.subscribe();
        state.publish(ChangeKind::Insert, todo());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.row.text, "Test");
    }
}
