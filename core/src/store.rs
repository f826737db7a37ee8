//! Reactive auth state for the UI.
//!
//! # Design
//! The state lives in a `watch` channel: the UI holds receivers and re-renders
//! on change, while updates come from two directions. A listener task
//! applies every session-change notification from the `AuthApi`; the
//! `sign_up` / `sign_in` / `sign_out` actions set `loading`, call the
//! backend and record either the user or a localized error.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::messages::localize_auth_error;
use crate::session::{AuthApi, AuthChange};
use crate::types::{Session, User};

/// Snapshot observed by the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for AuthState {
    /// Loading until the first session check completes.
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
            error: None,
        }
    }
}

/// Outcome of an auth action. `error` is already localized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    pub error: Option<String>,
}

impl ActionResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
        }
    }
}

pub struct AuthStore<A: AuthApi> {
    api: Arc<A>,
    state: Arc<watch::Sender<AuthState>>,
    listener: JoinHandle<()>,
}

impl<A: AuthApi> AuthStore<A> {
    /// Create the store and start following session changes.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(api: Arc<A>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        let state = Arc::new(state);
        let listener = tokio::spawn(follow_session_changes(api.on_auth_state_change(), state.clone()));
        Self { api, state, listener }
    }

    /// Apply the session the backend already holds, if any.
    pub async fn init(&self) {
        let session = self.api.get_session().await;
        apply_session(&self.state, session.as_ref());
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> ActionResult {
        self.begin();
        let result = self.api.sign_up(email, password).await;
        self.finish(result.map(|r| r.user))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ActionResult {
        self.begin();
        let result = self.api.sign_in(email, password).await;
        self.finish(result.map(|s| Some(s.user)))
    }

    pub async fn sign_out(&self) -> ActionResult {
        self.begin();
        let result = self.api.sign_out().await;
        self.finish(result.map(|()| None))
    }

    pub fn clear_error(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn finish(&self, result: Result<Option<User>, ApiError>) -> ActionResult {
        match result {
            Ok(user) => {
                self.state.send_modify(|s| {
                    s.user = user;
                    s.loading = false;
                    s.error = None;
                });
                ActionResult::ok()
            }
            Err(e) => {
                tracing::error!(error = %e, "auth action failed");
                let message = localize_auth_error(&e.message());
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(message.clone());
                });
                ActionResult::failed(message)
            }
        }
    }
}

impl<A: AuthApi> Drop for AuthStore<A> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn follow_session_changes(mut changes: broadcast::Receiver<AuthChange>, state: Arc<watch::Sender<AuthState>>) {
    loop {
        match changes.recv().await {
            Ok(change) => apply_session(&state, change.session.as_ref()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "auth listener lagged behind session changes");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn apply_session(state: &watch::Sender<AuthState>, session: Option<&Session>) {
    let user = session.map(|s| s.user.clone());
    state.send_modify(|s| {
        s.user = user;
        s.loading = false;
    });
}
