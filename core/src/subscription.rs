//! Live subscription to a user's todo changes over the realtime websocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::RealtimeError;
use crate::realtime::{ChangeHandlers, ChannelEvent, PhoenixMessage, TodoChannel};

/// Timeout for the server's reply to `phx_join`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// The service drops sockets that stay silent for longer than this.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Handle to a running subscription.
///
/// Dropping the handle stops delivery immediately; `unsubscribe` leaves the
/// channel politely first.
#[derive(Debug)]
pub struct TodoSubscription {
    topic: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TodoSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the socket task is still delivering changes.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Leave the channel, close the socket and wait for the task to end.
    pub async fn unsubscribe(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TodoSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Join the `todos-changes` channel for `user_id` and forward every insert,
/// update and delete to `handlers`, in the order the service sends them.
///
/// Returns once the service has accepted the join.
pub async fn subscribe_todo_changes(
    config: &ClientConfig,
    access_token: Option<&str>,
    user_id: Uuid,
    handlers: ChangeHandlers,
) -> Result<TodoSubscription, RealtimeError> {
    let (ws_stream, _) = connect_async(config.realtime_url())
        .await
        .map_err(|e| RealtimeError::Connection(e.to_string()))?;
    let (mut sender, mut receiver) = ws_stream.split();

    let mut channel = TodoChannel::new(user_id, access_token.map(str::to_string));
    send(&mut sender, &channel.join_message()).await?;
    tracing::debug!(topic = channel.topic(), %user_id, "joining channel");

    match timeout(JOIN_TIMEOUT, await_join(&mut receiver, &channel, &handlers)).await {
        Ok(result) => result?,
        Err(_) => return Err(RealtimeError::JoinTimeout),
    }
    tracing::debug!(topic = channel.topic(), "channel joined");

    let topic = channel.topic().to_string();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    let leave = channel.leave_message();
                    if let Err(e) = send(&mut sender, &leave).await {
                        tracing::debug!(error = %e, "leave not delivered");
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    let beat = channel.heartbeat_message();
                    if let Err(e) = send(&mut sender, &beat).await {
                        tracing::warn!(error = %e, "heartbeat failed, stopping subscription");
                        break;
                    }
                }
                frame = receiver.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::debug!("realtime socket closed");
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "realtime socket error");
                            break;
                        }
                    };
                    let message = match PhoenixMessage::decode(text.as_str()) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(error = %e, "undecodable realtime frame");
                            continue;
                        }
                    };
                    match channel.handle(&message) {
                        ChannelEvent::Change(change) => handlers.dispatch(change),
                        ChannelEvent::Closed => {
                            tracing::debug!("channel closed by server");
                            break;
                        }
                        ChannelEvent::Error(reason) => {
                            tracing::warn!(%reason, "channel error");
                        }
                        ChannelEvent::Joined | ChannelEvent::JoinRejected(_) | ChannelEvent::Ignored => {}
                    }
                }
            }
        }
    });

    Ok(TodoSubscription {
        topic,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

/// Read frames until the service answers our `phx_join`. Changes that
/// arrive first are still delivered.
async fn await_join<R>(receiver: &mut R, channel: &TodoChannel, handlers: &ChangeHandlers) -> Result<(), RealtimeError>
where
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                return Err(RealtimeError::Connection("server closed connection during join".to_string()));
            }
            Ok(_) => continue,
            Err(e) => return Err(RealtimeError::WebSocket(e.to_string())),
        };
        let message = PhoenixMessage::decode(text.as_str()).map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        match channel.handle(&message) {
            ChannelEvent::Joined => return Ok(()),
            ChannelEvent::JoinRejected(reason) | ChannelEvent::Error(reason) => {
                return Err(RealtimeError::JoinRejected(reason));
            }
            ChannelEvent::Change(change) => handlers.dispatch(change),
            ChannelEvent::Closed => return Err(RealtimeError::JoinRejected("channel closed".to_string())),
            ChannelEvent::Ignored => {}
        }
    }
    Err(RealtimeError::Connection("connection closed before join completed".to_string()))
}

async fn send<S>(sender: &mut S, message: &PhoenixMessage) -> Result<(), RealtimeError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = message.encode().map_err(|e| RealtimeError::Protocol(e.to_string()))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| RealtimeError::WebSocket(e.to_string()))
}
