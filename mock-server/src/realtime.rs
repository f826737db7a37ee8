//! Realtime websocket speaking the Phoenix channel framing.
//!
//! Supports `phx_join` with `postgres_changes` bindings, `phx_leave` and
//! heartbeats. Committed row changes are pushed to every joined channel
//! whose bindings match the row.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use crate::{AppState, ChangeKind, RowChange};

pub fn routes() -> Router<AppState> {
    Router::new().route("/websocket", get(websocket))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

/// Requested event kind; `*` matches every kind.
#[derive(Debug, Clone, Deserialize)]
struct BindingRequest {
    event: String,
    #[serde(default = "default_schema")]
    schema: String,
    table: String,
    #[serde(default)]
    filter: Option<String>,
}

fn default_schema() -> String {
    "public".to_string()
}

#[derive(Debug, Clone)]
struct Binding {
    id: u64,
    request: BindingRequest,
    /// `column=eq.value`, split.
    eq: Option<(String, String)>,
}

impl Binding {
    fn matches(&self, change: &RowChange, row: &Value) -> bool {
        let kind = match change.kind {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        if self.request.event != "*" && self.request.event != kind {
            return false;
        }
        if self.request.schema != "public" || self.request.table != "todos" {
            return false;
        }
        match &self.eq {
            None => true,
            Some((column, value)) => match row.get(column) {
                Some(Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            },
        }
    }
}

fn parse_filter(filter: &str) -> Result<(String, String), String> {
    let (column, rest) = filter
        .split_once('=')
        .ok_or_else(|| format!("invalid filter: {filter}"))?;
    let value = rest
        .strip_prefix("eq.")
        .ok_or_else(|| format!("unsupported filter operator: {filter}"))?;
    Ok((column.to_string(), value.to_string()))
}

struct JoinedChannel {
    join_ref: Option<String>,
    bindings: Vec<Binding>,
}

#[derive(Deserialize)]
pub struct SocketParams {
    apikey: Option<String>,
}

async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
) -> Response {
    if params.apikey.is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "apikey required"}))).into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut changes = state.changes.subscribe();
    let mut channels: HashMap<String, JoinedChannel> = HashMap::new();
    let mut next_binding_id = 1u64;

    loop {
        let outgoing: Vec<Frame> = tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket error");
                        break;
                    }
                };
                match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(frame) => handle_frame(frame, &mut channels, &mut next_binding_id),
                    Err(e) => {
                        tracing::debug!(error = %e, "bad frame");
                        Vec::new()
                    }
                }
            }
            change = changes.recv() => match change {
                Ok(change) => change_frames(&change, &channels),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "realtime socket lagged");
                    Vec::new()
                }
                Err(RecvError::Closed) => break,
            }
        };

        for frame in outgoing {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    }
}

fn reply(frame: &Frame, topic: &str, status: &str, response: Value) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_reply".to_string(),
        payload: json!({ "status": status, "response": response }),
        msg_ref: frame.msg_ref.clone(),
        join_ref: frame.join_ref.clone(),
    }
}

fn handle_frame(frame: Frame, channels: &mut HashMap<String, JoinedChannel>, next_id: &mut u64) -> Vec<Frame> {
    match (frame.topic.as_str(), frame.event.as_str()) {
        ("phoenix", "heartbeat") => vec![reply(&frame, "phoenix", "ok", json!({}))],
        (topic, "phx_join") => {
            let requests: Vec<BindingRequest> = match serde_json::from_value(
                frame.payload["config"]["postgres_changes"].clone(),
            ) {
                Ok(r) => r,
                Err(_) => Vec::new(),
            };
            let mut bindings = Vec::with_capacity(requests.len());
            for request in requests {
                let eq = match request.filter.as_deref().map(parse_filter).transpose() {
                    Ok(eq) => eq,
                    Err(reason) => {
                        return vec![reply(&frame, topic, "error", json!({ "reason": reason }))];
                    }
                };
                bindings.push(Binding {
                    id: *next_id,
                    request,
                    eq,
                });
                *next_id += 1;
            }
            let registered: Vec<Value> = bindings
                .iter()
                .map(|b| {
                    json!({
                        "id": b.id,
                        "event": b.request.event,
                        "schema": b.request.schema,
                        "table": b.request.table,
                        "filter": b.request.filter,
                    })
                })
                .collect();
            tracing::debug!(topic, bindings = bindings.len(), "channel joined");
            let response = reply(&frame, topic, "ok", json!({ "postgres_changes": registered }));
            channels.insert(
                topic.to_string(),
                JoinedChannel {
                    join_ref: frame.join_ref.clone(),
                    bindings,
                },
            );
            vec![response]
        }
        (topic, "phx_leave") => {
            channels.remove(topic);
            vec![reply(&frame, topic, "ok", json!({}))]
        }
        _ => Vec::new(),
    }
}

fn change_frames(change: &RowChange, channels: &HashMap<String, JoinedChannel>) -> Vec<Frame> {
    let Ok(row) = serde_json::to_value(&change.row) else {
        return Vec::new();
    };
    let key = json!({ "id": change.row.id });
    let (record, old_record) = match change.kind {
        ChangeKind::Insert => (row.clone(), json!({})),
        ChangeKind::Update => (row.clone(), key),
        ChangeKind::Delete => (json!({}), key),
    };

    channels
        .iter()
        .filter_map(|(topic, channel)| {
            let ids: Vec<u64> = channel
                .bindings
                .iter()
                .filter(|b| b.matches(change, &row))
                .map(|b| b.id)
                .collect();
            if ids.is_empty() {
                return None;
            }
            Some(Frame {
                topic: topic.clone(),
                event: "postgres_changes".to_string(),
                payload: json!({
                    "ids": ids,
                    "data": {
                        "type": change.kind,
                        "schema": "public",
                        "table": "todos",
                        "commit_timestamp": change.committed_at,
                        "record": record,
                        "old_record": old_record,
                        "errors": null,
                    }
                }),
                msg_ref: None,
                join_ref: channel.join_ref.clone(),
            })
        })
        .collect()
}
