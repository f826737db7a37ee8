//! Signed-in session and its change notifications.
//!
//! # Design
//! `SessionAuth` keeps the current `Session` in memory and announces every
//! change on a `broadcast` channel, the way the hosted client library
//! exposes `onAuthStateChange`. Sessions are never refreshed or persisted
//! here; restoring one from storage goes through `set_session`.

use std::future::Future;

use tokio::sync::{broadcast, RwLock};

use crate::auth::AuthClient;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{AuthResponse, Session};

/// Buffered notifications per subscriber before it starts lagging.
const CHANGE_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    UserUpdated,
}

/// One session-change notification.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

/// The auth operations `AuthStore` depends on.
pub trait AuthApi: Send + Sync + 'static {
    fn sign_up(&self, email: &str, password: &str) -> impl Future<Output = Result<AuthResponse, ApiError>> + Send;

    fn sign_in(&self, email: &str, password: &str) -> impl Future<Output = Result<Session, ApiError>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_session(&self) -> impl Future<Output = Option<Session>> + Send;

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange>;
}

/// `AuthApi` backed by the auth service.
pub struct SessionAuth<T = ReqwestTransport> {
    client: AuthClient,
    transport: T,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<AuthChange>,
}

impl SessionAuth<ReqwestTransport> {
    pub fn connect(config: &ClientConfig) -> Self {
        Self::new(AuthClient::new(config), ReqwestTransport::new())
    }
}

impl<T: Transport> SessionAuth<T> {
    pub fn new(client: AuthClient, transport: T) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            client,
            transport,
            session: RwLock::new(None),
            changes,
        }
    }

    /// Install a previously obtained session.
    pub async fn set_session(&self, session: Session) {
        self.replace_session(AuthChangeEvent::SignedIn, Some(session)).await;
    }

    /// Access token of the current session, if signed in.
    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.access_token.clone())
    }

    /// Reload the user of the current session from the backend.
    pub async fn refresh_user(&self) -> Result<Option<Session>, ApiError> {
        let Some(token) = self.access_token().await else {
            return Ok(None);
        };
        let response = self.transport.execute(self.client.build_get_user(&token)).await?;
        let user = self.client.parse_get_user(response)?;

        let updated = {
            let mut slot = self.session.write().await;
            match slot.as_mut() {
                // Signed out while the request was in flight.
                None => return Ok(None),
                Some(session) => {
                    session.user = user;
                    session.clone()
                }
            }
        };
        self.notify(AuthChangeEvent::UserUpdated, Some(updated.clone()));
        Ok(Some(updated))
    }

    async fn replace_session(&self, event: AuthChangeEvent, session: Option<Session>) {
        *self.session.write().await = session.clone();
        self.notify(event, session);
    }

    fn notify(&self, event: AuthChangeEvent, session: Option<Session>) {
        tracing::debug!(?event, "auth state changed");
        // No subscribers is fine.
        let _ = self.changes.send(AuthChange { event, session });
    }
}

impl<T: Transport> AuthApi for SessionAuth<T>
where
    T: 'static,
{
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let req = self.client.build_sign_up(email, password)?;
        let response = self.transport.execute(req).await?;
        let result = self.client.parse_sign_up(response)?;
        if let Some(session) = &result.session {
            self.replace_session(AuthChangeEvent::SignedIn, Some(session.clone())).await;
        }
        Ok(result)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let req = self.client.build_sign_in(email, password)?;
        let response = self.transport.execute(req).await?;
        let session = self.client.parse_sign_in(response)?;
        self.replace_session(AuthChangeEvent::SignedIn, Some(session.clone())).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ApiError> {
        if let Some(token) = self.access_token().await {
            let response = self.transport.execute(self.client.build_sign_out(&token)).await?;
            match self.client.parse_sign_out(response) {
                Ok(()) => {}
                // The backend already forgot this session; drop ours too.
                Err(e) if matches!(e.status(), Some(401 | 403 | 404)) => {
                    tracing::debug!(error = %e, "session already revoked");
                }
                Err(e) => return Err(e),
            }
        }
        self.replace_session(AuthChangeEvent::SignedOut, None).await;
        Ok(())
    }

    async fn get_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}
