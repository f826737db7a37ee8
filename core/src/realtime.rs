//! Realtime channel protocol for `todos` row changes.
//!
//! # Design
//! The realtime service frames everything as Phoenix channel messages
//! (`topic`, `event`, `payload`, `ref`, `join_ref`). `TodoChannel` is a pure
//! state machine over those messages: it produces the outgoing join,
//! heartbeat and leave frames and classifies incoming ones. The socket
//! itself is driven by [`subscription`](crate::subscription).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::types::Todo;

pub const CHANNEL_NAME: &str = "todos-changes";
const SCHEMA: &str = "public";
const TABLE: &str = "todos";
const PHOENIX_TOPIC: &str = "phoenix";

/// One Phoenix channel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One `postgres_changes` listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    pub filter: String,
}

/// A decoded row change.
#[derive(Debug, Clone, PartialEq)]
pub enum TodoChange {
    Inserted(Todo),
    Updated(Todo),
    Deleted(Uuid),
}

/// What an incoming frame means for the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Joined,
    JoinRejected(String),
    Change(TodoChange),
    /// The server closed the channel.
    Closed,
    Error(String),
    Ignored,
}

#[derive(Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    old_record: Value,
}

#[derive(Deserialize)]
struct DeletedKey {
    id: Uuid,
}

/// Channel subscribed to the three change events of one user's todos.
#[derive(Debug)]
pub struct TodoChannel {
    topic: String,
    user_id: Uuid,
    access_token: Option<String>,
    join_ref: Option<String>,
    next_ref: u64,
}

impl TodoChannel {
    pub fn new(user_id: Uuid, access_token: Option<String>) -> Self {
        Self {
            topic: format!("realtime:{CHANNEL_NAME}"),
            user_id,
            access_token,
            join_ref: None,
            next_ref: 1,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// INSERT, UPDATE and DELETE on `public.todos`, scoped to the user.
    pub fn filters(&self) -> Vec<ChangeFilter> {
        [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            .into_iter()
            .map(|event| ChangeFilter {
                event,
                schema: SCHEMA.to_string(),
                table: TABLE.to_string(),
                filter: format!("user_id=eq.{}", self.user_id),
            })
            .collect()
    }

    pub fn join_message(&mut self) -> PhoenixMessage {
        let join_ref = self.make_ref();
        self.join_ref = Some(join_ref.clone());

        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": self.filters(),
            }
        });
        if let Some(token) = &self.access_token {
            payload["access_token"] = Value::String(token.clone());
        }

        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload,
            msg_ref: Some(join_ref.clone()),
            join_ref: Some(join_ref),
        }
    }

    pub fn heartbeat_message(&mut self) -> PhoenixMessage {
        PhoenixMessage {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(self.make_ref()),
            join_ref: None,
        }
    }

    pub fn leave_message(&mut self) -> PhoenixMessage {
        PhoenixMessage {
            topic: self.topic.clone(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(self.make_ref()),
            join_ref: self.join_ref.clone(),
        }
    }

    /// Classify an incoming frame.
    pub fn handle(&self, message: &PhoenixMessage) -> ChannelEvent {
        if message.topic != self.topic {
            return ChannelEvent::Ignored;
        }
        match message.event.as_str() {
            "phx_reply" => self.handle_reply(message),
            "postgres_changes" => decode_change(&message.payload),
            "phx_close" => ChannelEvent::Closed,
            "phx_error" => ChannelEvent::Error("channel crashed on the server".to_string()),
            "system" => match message.payload.get("status").and_then(Value::as_str) {
                Some("error") => ChannelEvent::Error(payload_text(&message.payload, "message")),
                _ => ChannelEvent::Ignored,
            },
            _ => ChannelEvent::Ignored,
        }
    }

    fn handle_reply(&self, message: &PhoenixMessage) -> ChannelEvent {
        // Only the reply to our join matters; heartbeat replies use the
        // phoenix topic and leave replies arrive after we stop listening.
        if message.msg_ref.is_none() || message.msg_ref != self.join_ref {
            return ChannelEvent::Ignored;
        }
        match message.payload.get("status").and_then(Value::as_str) {
            Some("ok") => ChannelEvent::Joined,
            _ => {
                let reason = message
                    .payload
                    .get("response")
                    .map(|r| payload_text(r, "reason"))
                    .unwrap_or_default();
                ChannelEvent::JoinRejected(reason)
            }
        }
    }

    fn make_ref(&mut self) -> String {
        let r = self.next_ref.to_string();
        self.next_ref += 1;
        r
    }
}

fn payload_text(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => value.to_string(),
    }
}

fn decode_change(payload: &Value) -> ChannelEvent {
    let parsed: ChangesPayload = match serde_json::from_value(payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable postgres_changes payload");
            return ChannelEvent::Ignored;
        }
    };
    let data = parsed.data;
    if data.table.as_deref().is_some_and(|t| t != TABLE) {
        return ChannelEvent::Ignored;
    }

    let change = match data.kind {
        ChangeKind::Insert => serde_json::from_value(data.record).map(TodoChange::Inserted),
        ChangeKind::Update => serde_json::from_value(data.record).map(TodoChange::Updated),
        ChangeKind::Delete => serde_json::from_value::<DeletedKey>(data.old_record).map(|k| TodoChange::Deleted(k.id)),
    };
    match change {
        Ok(change) => ChannelEvent::Change(change),
        Err(e) => {
            tracing::warn!(kind = ?data.kind, error = %e, "undecodable todo record");
            ChannelEvent::Ignored
        }
    }
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Caller callbacks, one per change kind.
pub struct ChangeHandlers {
    on_insert: Callback<Todo>,
    on_update: Callback<Todo>,
    on_delete: Callback<Uuid>,
}

impl ChangeHandlers {
    pub fn new(
        on_insert: impl Fn(Todo) + Send + Sync + 'static,
        on_update: impl Fn(Todo) + Send + Sync + 'static,
        on_delete: impl Fn(Uuid) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_insert: Box::new(on_insert),
            on_update: Box::new(on_update),
            on_delete: Box::new(on_delete),
        }
    }

    pub fn dispatch(&self, change: TodoChange) {
        match change {
            TodoChange::Inserted(todo) => (self.on_insert)(todo),
            TodoChange::Updated(todo) => (self.on_update)(todo),
            TodoChange::Deleted(id) => (self.on_delete)(id),
        }
    }
}

impl std::fmt::Debug for ChangeHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandlers").finish_non_exhaustive()
    }
}
