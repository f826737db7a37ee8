//! Row store subset: `/rest/v1/todos` with `eq.` filters and ordering.

use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{AppState, ChangeKind, Todo};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/todos",
        get(list_todos)
            .post(create_todo)
            .patch(update_todos)
            .delete(delete_todos),
    )
}

#[derive(Deserialize)]
pub struct NewTodo {
    pub user_id: Option<Uuid>,
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct TodoPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Every keyed endpoint rejects requests without an `apikey` header.
pub async fn require_api_key(request: Request, next: Next) -> Response {
    if request.headers().contains_key("apikey") {
        return next.run(request).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "message": "No API key found in request",
            "hint": "No `apikey` request header or url param was found."
        })),
    )
        .into_response()
}

pub(crate) fn row_error(status: StatusCode, code: &str, message: &str, details: Option<&str>) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "details": details,
            "hint": null,
            "message": message,
        })),
    )
        .into_response()
}

/// Filters understood by the mock: `id=eq.{uuid}`, `user_id=eq.{uuid}` and
/// `order=created_at.asc|desc`.
#[derive(Debug, Default)]
struct RowQuery {
    id: Option<Uuid>,
    user_id: Option<Uuid>,
    descending: bool,
}

impl RowQuery {
    fn parse(params: &HashMap<String, String>) -> Result<Self, Response> {
        Ok(Self {
            id: eq_uuid(params.get("id"))?,
            user_id: eq_uuid(params.get("user_id"))?,
            descending: params.get("order").is_some_and(|o| o.ends_with(".desc")),
        })
    }

    fn matches(&self, todo: &Todo) -> bool {
        self.id.is_none_or(|id| todo.id == id) && self.user_id.is_none_or(|uid| todo.user_id == uid)
    }

    fn is_unfiltered(&self) -> bool {
        self.id.is_none() && self.user_id.is_none()
    }
}

fn eq_uuid(value: Option<&String>) -> Result<Option<Uuid>, Response> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(raw) = value.strip_prefix("eq.") else {
        return Err(row_error(
            StatusCode::BAD_REQUEST,
            "PGRST100",
            &format!("\"failed to parse filter ({value})\""),
            None,
        ));
    };
    raw.parse().map(Some).map_err(|_| {
        row_error(
            StatusCode::BAD_REQUEST,
            "22P02",
            &format!("invalid input syntax for type uuid: \"{raw}\""),
            None,
        )
    })
}

fn wants_single(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(SINGLE_OBJECT))
}

fn wants_representation(headers: &HeaderMap) -> bool {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("return=representation"))
}

/// Array body, or a single object when the client asked for one.
fn rows_response(status: StatusCode, headers: &HeaderMap, rows: Vec<Todo>) -> Response {
    if !wants_single(headers) {
        return (status, Json(rows)).into_response();
    }
    match <[Todo; 1]>::try_from(rows) {
        Ok([row]) => (status, Json(row)).into_response(),
        Err(rows) => row_error(
            StatusCode::NOT_ACCEPTABLE,
            "PGRST116",
            "JSON object requested, multiple (or no) rows returned",
            Some(&format!("The result contains {} rows", rows.len())),
        ),
    }
}

async fn list_todos(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let query = match RowQuery::parse(&params) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let mut rows: Vec<Todo> = state
        .todos
        .read()
        .await
        .iter()
        .filter(|t| query.matches(t))
        .cloned()
        .collect();
    // Stable sort keeps insertion order for equal timestamps.
    rows.sort_by_key(|t| t.created_at);
    if query.descending {
        rows.reverse();
    }
    rows_response(StatusCode::OK, &headers, rows)
}

async fn create_todo(State(state): State<AppState>, headers: HeaderMap, Json(input): Json<NewTodo>) -> Response {
    let Some(user_id) = input.user_id else {
        return not_null_violation("user_id");
    };
    let Some(text) = input.text else {
        return not_null_violation("text");
    };
    let now = Utc::now();
    let todo = Todo {
        id: Uuid::new_v4(),
        user_id,
        text,
        completed: input.completed.unwrap_or(false),
        tags: input.tags.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    state.todos.write().await.push(todo.clone());
    tracing::debug!(id = %todo.id, "todo inserted");
    state.publish(ChangeKind::Insert, todo.clone());

    if wants_representation(&headers) {
        rows_response(StatusCode::CREATED, &headers, vec![todo])
    } else {
        StatusCode::CREATED.into_response()
    }
}

fn not_null_violation(column: &str) -> Response {
    row_error(
        StatusCode::BAD_REQUEST,
        "23502",
        &format!("null value in column \"{column}\" of relation \"todos\" violates not-null constraint"),
        None,
    )
}

async fn update_todos(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(patch): Json<TodoPatch>,
) -> Response {
    let query = match RowQuery::parse(&params) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    if query.is_unfiltered() {
        return row_error(StatusCode::BAD_REQUEST, "21000", "UPDATE requires a WHERE clause", None);
    }

    let now = Utc::now();
    let updated: Vec<Todo> = {
        let mut todos = state.todos.write().await;
        todos
            .iter_mut()
            .filter(|t| query.matches(t))
            .map(|todo| {
                if let Some(text) = &patch.text {
                    todo.text = text.clone();
                }
                if let Some(completed) = patch.completed {
                    todo.completed = completed;
                }
                if let Some(tags) = &patch.tags {
                    todo.tags = tags.clone();
                }
                todo.updated_at = now;
                todo.clone()
            })
            .collect()
    };
    for todo in &updated {
        state.publish(ChangeKind::Update, todo.clone());
    }

    if wants_representation(&headers) {
        rows_response(StatusCode::OK, &headers, updated)
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn delete_todos(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    let query = match RowQuery::parse(&params) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    if query.is_unfiltered() {
        return row_error(StatusCode::BAD_REQUEST, "21000", "DELETE requires a WHERE clause", None);
    }

    let removed: Vec<Todo> = {
        let mut todos = state.todos.write().await;
        let (removed, kept): (Vec<Todo>, Vec<Todo>) = std::mem::take(&mut *todos).into_iter().partition(|t| query.matches(t));
        *todos = kept;
        removed
    };
    for todo in removed {
        state.publish(ChangeKind::Delete, todo);
    }
    StatusCode::NO_CONTENT.into_response()
}
