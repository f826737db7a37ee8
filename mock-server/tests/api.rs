use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, app_with, MockConfig, Todo};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

const API_KEY: &str = "test-anon-key";

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder()
        .uri(uri)
        .header("apikey", API_KEY)
        .body(String::new())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header("prefer", "return=representation")
        .body(body.to_string())
        .unwrap()
}

fn single(mut request: Request<String>) -> Request<String> {
    request.headers_mut().insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("application/vnd.pgrst.object+json"),
    );
    request
}

// --- gateway ---

#[tokio::test]
async fn missing_api_key_returns_401() {
    let resp = app()
        .oneshot(Request::builder().uri("/rest/v1/todos").body(String::new()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = body_json(resp).await;
    assert_eq!(body["message"], "No API key found in request");
}

// --- list ---

#[tokio::test]
async fn list_todos_empty() {
    let resp = app().oneshot(get("/rest/v1/todos?select=*")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let todos: Vec<Todo> = body_json(resp).await;
    assert!(todos.is_empty());
}

#[tokio::test]
async fn list_with_malformed_filter_returns_400() {
    let resp = app().oneshot(get("/rest/v1/todos?user_id=not-a-uuid")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(resp).await;
    assert_eq!(body["code"], "PGRST100");
}

// --- create ---

#[tokio::test]
async fn create_todo_applies_defaults() {
    let user_id = Uuid::new_v4();
    let resp = app()
        .oneshot(single(json_request(
            "POST",
            "/rest/v1/todos",
            &format!(r#"{{"user_id":"{user_id}","text":"Buy milk"}}"#),
        )))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let todo: Todo = body_json(resp).await;
    assert_eq!(todo.text, "Buy milk");
    assert_eq!(todo.user_id, user_id);
    assert!(!todo.completed);
    assert!(todo.tags.is_empty());
    assert_eq!(todo.created_at, todo.updated_at);
}

#[tokio::test]
async fn create_without_text_violates_not_null() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/rest/v1/todos",
            &format!(r#"{{"user_id":"{}"}}"#, Uuid::new_v4()),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(resp).await;
    assert_eq!(body["code"], "23502");
}

// --- single object ---

#[tokio::test]
async fn single_object_with_no_rows_returns_406() {
    let resp = app()
        .oneshot(single(json_request(
            "PATCH",
            &format!("/rest/v1/todos?id=eq.{}", Uuid::new_v4()),
            r#"{"completed":true}"#,
        )))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    let body: Value = body_json(resp).await;
    assert_eq!(body["code"], "PGRST116");
}

#[tokio::test]
async fn unfiltered_delete_is_refused() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/rest/v1/todos")
                .header("apikey", API_KEY)
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- auth ---

#[tokio::test]
async fn sign_up_returns_session() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/auth/v1/signup",
            r#"{"email":"a@example.com","password":"secret1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert!(body["access_token"].is_string());
    assert_eq!(body["user"]["email"], "a@example.com");
}

#[tokio::test]
async fn sign_up_with_confirmation_returns_bare_user() {
    let app = app_with(MockConfig {
        require_email_confirmation: true,
    });
    let resp = app
        .oneshot(json_request(
            "POST",
            "/auth/v1/signup",
            r#"{"email":"a@example.com","password":"secret1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert!(body.get("access_token").is_none());
    assert!(body["email_confirmed_at"].is_null());
}

#[tokio::test]
async fn sign_up_rejects_weak_password() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/auth/v1/signup",
            r#"{"email":"a@example.com","password":"abc"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = body_json(resp).await;
    assert_eq!(body["msg"], "Password should be at least 6 characters");
}

#[tokio::test]
async fn sign_in_with_unknown_account_is_invalid_grant() {
    let resp = app()
        .oneshot(json_request(
            "POST",
            "/auth/v1/token?grant_type=password",
            r#"{"email":"nobody@example.com","password":"secret1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error_description"], "Invalid login credentials");
}

#[tokio::test]
async fn current_user_requires_valid_token() {
    let mut request = get("/auth/v1/user");
    request
        .headers_mut()
        .insert(http::header::AUTHORIZATION, http::HeaderValue::from_static("Bearer bogus"));
    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- full CRUD lifecycle ---

#[tokio::test]
async fn crud_lifecycle() {
    use tower::Service;

    let mut app = app().into_service();
    let user_id = Uuid::new_v4();

    // create
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(single(json_request(
            "POST",
            "/rest/v1/todos",
            &format!(r#"{{"user_id":"{user_id}","text":"Walk dog","tags":["home"]}}"#),
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Todo = body_json(resp).await;
    assert_eq!(created.tags, vec!["home".to_string()]);
    let id = created.id;

    // another user's row stays invisible to the filter below
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request(
            "POST",
            "/rest/v1/todos",
            &format!(r#"{{"user_id":"{}","text":"Other"}}"#, Uuid::new_v4()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // list by owner
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/rest/v1/todos?select=*&user_id=eq.{user_id}&order=created_at.asc")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let todos: Vec<Todo> = body_json(resp).await;
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].id, id);

    // update, partial
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(single(json_request(
            "PATCH",
            &format!("/rest/v1/todos?id=eq.{id}"),
            r#"{"completed":true}"#,
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Todo = body_json(resp).await;
    assert_eq!(updated.text, "Walk dog");
    assert!(updated.completed);
    assert!(updated.updated_at >= created.updated_at);

    // delete
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rest/v1/todos?id=eq.{id}"))
                .header("apikey", API_KEY)
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    // list after delete
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(get(&format!("/rest/v1/todos?user_id=eq.{user_id}")))
        .await
        .unwrap();
    let todos: Vec<Todo> = body_json(resp).await;
    assert!(todos.is_empty());
}
