//! Stateless request builder and response parser for the `todos` table.
//!
//! # Design
//! `TodoClient` holds only the REST base URL and the credentials sent with
//! every request. Each operation is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. The caller executes the round-trip, keeping this layer
//! deterministic and free of I/O.
//!
//! Rows are addressed with row-store filters (`column=eq.value`). Inserts
//! and updates ask for the affected row back as a single JSON object.

use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{Todo, TodoInsert, TodoUpdate};

const TABLE: &str = "todos";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
/// Row-store error code for a single-object request that matched no rows.
const NO_ROWS_CODE: &str = "PGRST116";

/// Request builder / response parser for todo rows.
#[derive(Debug, Clone)]
pub struct TodoClient {
    rest_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl TodoClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            rest_url: config.rest_url(),
            api_key: config.anon_key().to_string(),
            access_token: None,
        }
    }

    /// Act as a signed-in user instead of the anonymous role.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn build_fetch_todos(&self, user_id: Uuid) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: format!(
                "{}/{TABLE}?select=*&user_id=eq.{user_id}&order=created_at.asc",
                self.rest_url
            ),
            headers: self.headers(false),
            body: None,
        }
    }

    pub fn build_add_todo(&self, user_id: Uuid, input: &TodoInsert) -> Result<HttpRequest, ApiError> {
        let row = input.clone().into_row(user_id);
        let body = serde_json::to_string(&row).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}/{TABLE}?select=*", self.rest_url),
            headers: self.headers(true),
            body: Some(body),
        })
    }

    pub fn build_update_todo(&self, id: Uuid, input: &TodoUpdate) -> Result<HttpRequest, ApiError> {
        let body = serde_json::to_string(input).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Patch,
            path: format!("{}/{TABLE}?id=eq.{id}&select=*", self.rest_url),
            headers: self.headers(true),
            body: Some(body),
        })
    }

    pub fn build_delete_todo(&self, id: Uuid) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Delete,
            path: format!("{}/{TABLE}?id=eq.{id}", self.rest_url),
            headers: self.headers(false),
            body: None,
        }
    }

    pub fn parse_fetch_todos(&self, response: HttpResponse) -> Result<Vec<Todo>, ApiError> {
        check_status(&response, &[200])?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn parse_add_todo(&self, response: HttpResponse) -> Result<Todo, ApiError> {
        check_status(&response, &[201])?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn parse_update_todo(&self, response: HttpResponse) -> Result<Todo, ApiError> {
        check_status(&response, &[200])?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    pub fn parse_delete_todo(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, &[200, 204])?;
        Ok(())
    }

    fn headers(&self, writes_row: bool) -> Vec<(String, String)> {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        let mut headers = vec![
            ("apikey".to_string(), self.api_key.clone()),
            ("authorization".to_string(), format!("Bearer {bearer}")),
        ];
        if writes_row {
            headers.push(("content-type".to_string(), "application/json".to_string()));
            headers.push(("prefer".to_string(), "return=representation".to_string()));
            headers.push(("accept".to_string(), SINGLE_OBJECT.to_string()));
        } else {
            headers.push(("accept".to_string(), "application/json".to_string()));
        }
        headers
    }
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: &[u16]) -> Result<(), ApiError> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    if response.status == 406 && response.body.contains(NO_ROWS_CODE) {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::from_body(response.status, &response.body))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = r#"{"id":"00000000-0000-0000-0000-000000000001","user_id":"00000000-0000-0000-0000-0000000000aa","text":"Test","completed":false,"tags":[],"created_at":"2024-05-01T10:00:00+00:00","updated_at":"2024-05-01T10:00:00+00:00"}"#;

    fn client() -> TodoClient {
        TodoClient::new(&ClientConfig::new("http://localhost:54321", "anon"))
    }

    fn user() -> Uuid {
        "00000000-0000-0000-0000-0000000000aa".parse().unwrap()
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn build_fetch_todos_filters_by_user_and_orders_by_creation() {
        let req = client().build_fetch_todos(user());
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.path,
            "http://localhost:54321/rest/v1/todos?select=*&user_id=eq.00000000-0000-0000-0000-0000000000aa&order=created_at.asc"
        );
        assert!(req.body.is_none());
        assert_eq!(req.header("apikey"), Some("anon"));
        assert_eq!(req.header("Authorization"), Some("Bearer anon"));
    }

    #[test]
    fn access_token_replaces_anon_bearer() {
        let req = client().with_access_token("user-jwt").build_fetch_todos(user());
        assert_eq!(req.header("authorization"), Some("Bearer user-jwt"));
        assert_eq!(req.header("apikey"), Some("anon"));
    }

    #[test]
    fn build_add_todo_applies_defaults() {
        let req = client().build_add_todo(user(), &TodoInsert::new("Buy milk")).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:54321/rest/v1/todos?select=*");
        assert_eq!(req.header("prefer"), Some("return=representation"));
        assert_eq!(req.header("accept"), Some(SINGLE_OBJECT));
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["user_id"], "00000000-0000-0000-0000-0000000000aa");
        assert_eq!(body["text"], "Buy milk");
        assert_eq!(body["completed"], false);
        assert_eq!(body["tags"], serde_json::json!([]));
    }

    #[test]
    fn build_update_todo_sends_only_present_fields() {
        let input = TodoUpdate {
            text: Some("Updated".to_string()),
            ..TodoUpdate::default()
        };
        let req = client().build_update_todo(Uuid::nil(), &input).unwrap();
        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(
            req.path,
            "http://localhost:54321/rest/v1/todos?id=eq.00000000-0000-0000-0000-000000000000&select=*"
        );
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"text": "Updated"}));
    }

    #[test]
    fn build_delete_todo_produces_correct_request() {
        let req = client().build_delete_todo(Uuid::nil());
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(
            req.path,
            "http://localhost:54321/rest/v1/todos?id=eq.00000000-0000-0000-0000-000000000000"
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_fetch_todos_success() {
        let todos = client().parse_fetch_todos(response(200, &format!("[{ROW}]"))).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].text, "Test");
    }

    #[test]
    fn parse_fetch_todos_empty() {
        let todos = client().parse_fetch_todos(response(200, "[]")).unwrap();
        assert!(todos.is_empty());
    }

    #[test]
    fn parse_add_todo_success() {
        let todo = client().parse_add_todo(response(201, ROW)).unwrap();
        assert_eq!(todo.user_id, user());
    }

    #[test]
    fn parse_add_todo_backend_error() {
        let err = client()
            .parse_add_todo(response(
                403,
                r#"{"code":"42501","message":"new row violates row-level security policy for table \"todos\""}"#,
            ))
            .unwrap_err();
        match err {
            ApiError::Backend { status, message } => {
                assert_eq!(status, 403);
                assert!(message.starts_with("new row violates"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_update_todo_no_rows_is_not_found() {
        let err = client()
            .parse_update_todo(response(
                406,
                r#"{"code":"PGRST116","details":"The result contains 0 rows","hint":null,"message":"JSON object requested, multiple (or no) rows returned"}"#,
            ))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[test]
    fn parse_delete_todo_accepts_no_content() {
        assert!(client().parse_delete_todo(response(204, "")).is_ok());
    }

    #[test]
    fn parse_delete_todo_server_error() {
        let err = client().parse_delete_todo(response(500, "internal error")).unwrap_err();
        assert!(matches!(err, ApiError::Backend { status: 500, .. }));
    }

    #[test]
    fn parse_fetch_todos_bad_json() {
        let err = client().parse_fetch_todos(response(200, "not json")).unwrap_err();
        assert!(matches!(err, ApiError::DeserializationError(_)));
    }
}
