//! Client layer for a to-do app on a hosted backend-as-a-service.
//!
//! # Overview
//! Three pieces sit on top of the backend's row store, auth service and
//! realtime socket:
//! - [`TodoService`]: list / create / update / delete rows of `todos`,
//!   always scoped to the owning user, failing with localized messages.
//! - [`subscribe_todo_changes`]: forward realtime inserts, updates and
//!   deletes of a user's todos to three callbacks.
//! - [`AuthStore`]: a `watch`-based `{user, loading, error}` container fed
//!   by session-change notifications and the sign-up / sign-in / sign-out
//!   actions.
//!
//! # Design
//! - Request construction and response parsing (`TodoClient`, `AuthClient`,
//!   `TodoChannel`) never touch the network, so they are deterministic and
//!   unit-testable. A [`Transport`] executes HTTP requests in between.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod messages;
pub mod realtime;
pub mod service;
pub mod session;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod types;

pub use auth::AuthClient;
pub use client::TodoClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, RealtimeError, TodoError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use messages::localize_auth_error;
pub use realtime::{ChangeHandlers, TodoChange};
pub use service::TodoService;
pub use session::{AuthApi, AuthChange, AuthChangeEvent, SessionAuth};
pub use store::{ActionResult, AuthState, AuthStore};
pub use subscription::{subscribe_todo_changes, TodoSubscription};
pub use transport::{ReqwestTransport, Transport};
pub use types::{AuthResponse, NewTodo, Session, Todo, TodoInsert, TodoUpdate, User};
