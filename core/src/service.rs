//! Async todo operations: one request each, localized failures.

use uuid::Uuid;

use crate::client::TodoClient;
use crate::config::ClientConfig;
use crate::error::{ApiError, TodoError};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{Todo, TodoInsert, TodoUpdate};

/// Runs `TodoClient` requests over a `Transport`.
///
/// Every backend failure is logged and then replaced by the fixed message
/// of the matching `TodoError` variant. Nothing is retried or cached.
#[derive(Debug, Clone)]
pub struct TodoService<T = ReqwestTransport> {
    client: TodoClient,
    transport: T,
}

impl TodoService<ReqwestTransport> {
    pub fn connect(config: &ClientConfig) -> Self {
        Self::new(TodoClient::new(config), ReqwestTransport::new())
    }
}

impl<T: Transport> TodoService<T> {
    pub fn new(client: TodoClient, transport: T) -> Self {
        Self { client, transport }
    }

    /// Same transport, requests authorized as the signed-in user.
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.with_access_token(token),
            transport: self.transport,
        }
    }

    /// All todos owned by `user_id`, oldest first.
    pub async fn fetch_todos(&self, user_id: Uuid) -> Result<Vec<Todo>, TodoError> {
        self.try_fetch(user_id).await.map_err(|e| {
            tracing::error!(%user_id, error = %e, "Error fetching todos");
            TodoError::Fetch(e)
        })
    }

    /// Insert a todo for `user_id`; `completed` and `tags` default to
    /// `false` and empty.
    pub async fn add_todo(&self, user_id: Uuid, todo: TodoInsert) -> Result<Todo, TodoError> {
        self.try_add(user_id, &todo).await.map_err(|e| {
            tracing::error!(%user_id, error = %e, "Error adding todo");
            TodoError::Add(e)
        })
    }

    pub async fn update_todo(&self, todo_id: Uuid, updates: TodoUpdate) -> Result<Todo, TodoError> {
        self.try_update(todo_id, &updates).await.map_err(|e| {
            tracing::error!(%todo_id, error = %e, "Error updating todo");
            TodoError::Update(e)
        })
    }

    pub async fn delete_todo(&self, todo_id: Uuid) -> Result<(), TodoError> {
        self.try_delete(todo_id).await.map_err(|e| {
            tracing::error!(%todo_id, error = %e, "Error deleting todo");
            TodoError::Delete(e)
        })
    }

    async fn try_fetch(&self, user_id: Uuid) -> Result<Vec<Todo>, ApiError> {
        let req = self.client.build_fetch_todos(user_id);
        let response = self.transport.execute(req).await?;
        self.client.parse_fetch_todos(response)
    }

    async fn try_add(&self, user_id: Uuid, todo: &TodoInsert) -> Result<Todo, ApiError> {
        let req = self.client.build_add_todo(user_id, todo)?;
        let response = self.transport.execute(req).await?;
        self.client.parse_add_todo(response)
    }

    async fn try_update(&self, todo_id: Uuid, updates: &TodoUpdate) -> Result<Todo, ApiError> {
        let req = self.client.build_update_todo(todo_id, updates)?;
        let response = self.transport.execute(req).await?;
        self.client.parse_update_todo(response)
    }

    async fn try_delete(&self, todo_id: Uuid) -> Result<(), ApiError> {
        let req = self.client.build_delete_todo(todo_id);
        let response = self.transport.execute(req).await?;
        self.client.parse_delete_todo(response)
    }
}
