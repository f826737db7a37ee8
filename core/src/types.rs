//! Domain DTOs for the row store and the auth service.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined
//! independently. Integration tests catch any schema drift between the two
//! crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A row of the `todos` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub completed: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for creating a todo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoInsert {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl TodoInsert {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// The row actually inserted, with defaults applied.
    pub fn into_row(self, user_id: Uuid) -> NewTodo {
        NewTodo {
            user_id,
            text: self.text,
            completed: self.completed.unwrap_or(false),
            tags: self.tags.unwrap_or_default(),
        }
    }
}

/// Request body for inserting a todo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTodo {
    pub user_id: Uuid,
    pub text: String,
    pub completed: bool,
    pub tags: Vec<String>,
}

/// Partial update. Only the fields present are sent; omitted fields remain
/// unchanged on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// An authenticated user as reported by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// Tokens issued on sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub refresh_token: String,
    pub user: User,
}

/// A nullable `tags` column reads as no tags.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Result of a sign-up. `session` is absent when the project requires email
/// confirmation before the first sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_defaults_completed_and_tags() {
        let user_id = Uuid::new_v4();
        let row = TodoInsert::new("Buy milk").into_row(user_id);
        assert_eq!(row.user_id, user_id);
        assert_eq!(row.text, "Buy milk");
        assert!(!row.completed);
        assert!(row.tags.is_empty());
    }

    #[test]
    fn todo_with_null_or_missing_tags_has_none() {
        let base = r#""id":"00000000-0000-0000-0000-000000000001","user_id":"00000000-0000-0000-0000-0000000000aa","text":"T","completed":false,"created_at":"2024-05-01T10:00:00+00:00","updated_at":"2024-05-01T10:00:00+00:00""#;
        let null_tags: Todo = serde_json::from_str(&format!(r#"{{{base},"tags":null}}"#)).unwrap();
        assert!(null_tags.tags.is_empty());
        let no_tags: Todo = serde_json::from_str(&format!("{{{base}}}")).unwrap();
        assert!(no_tags.tags.is_empty());
    }

    #[test]
    fn insert_keeps_explicit_values() {
        let row = TodoInsert {
            text: "Ship it".to_string(),
            completed: Some(true),
            tags: Some(vec!["work".to_string()]),
        }
        .into_row(Uuid::nil());
        assert!(row.completed);
        assert_eq!(row.tags, vec!["work".to_string()]);
    }

    #[test]
    fn insert_deserializes_without_optional_fields() {
        let input: TodoInsert = serde_json::from_str(r#"{"text":"Only text"}"#).unwrap();
        assert!(input.completed.is_none());
        assert!(input.tags.is_none());
    }

    #[test]
    fn update_omits_absent_fields() {
        let update = TodoUpdate {
            completed: Some(true),
            ..TodoUpdate::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"completed": true}));
    }

    #[test]
    fn todo_parses_row_store_timestamps() {
        let todo: Todo = serde_json::from_str(
            r#"{
                "id":"00000000-0000-0000-0000-000000000001",
                "user_id":"00000000-0000-0000-0000-0000000000aa",
                "text":"Test",
                "completed":false,
                "tags":["a","b"],
                "created_at":"2024-05-01T10:00:00.123456+00:00",
                "updated_at":"2024-05-01T10:00:00.123456+00:00"
            }"#,
        )
        .unwrap();
        assert_eq!(todo.tags, vec!["a", "b"]);
        assert_eq!(todo.created_at, todo.updated_at);
    }

    #[test]
    fn session_defaults_token_type() {
        let session: Session = serde_json::from_str(
            r#"{
                "access_token":"at","expires_in":3600,"refresh_token":"rt",
                "user":{"id":"00000000-0000-0000-0000-0000000000aa","email":"a@example.com"}
            }"#,
        )
        .unwrap();
        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.user.email.as_deref(), Some("a@example.com"));
        assert!(session.user.user_metadata.is_null());
    }
}
