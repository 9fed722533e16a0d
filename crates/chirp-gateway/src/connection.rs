use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chirp_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::presence::ConnHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket connection until it closes.
///
/// Three tasks per connection: a writer (broadcasts, targeted events,
/// heartbeat), a reader that parses frames onto an ordered command queue,
/// and a worker that handles queued commands one at a time. When the
/// socket goes away the worker still finishes what was queued, so an
/// in-flight send is never cut short; only then is the connection
/// unregistered from presence.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, receiver) = socket.split();
    let presence = dispatcher.presence().clone();

    let (conn, conn_rx) = presence.connect();
    let conn_id = conn.id();
    info!("Connection {} opened", conn_id);

    // Subscribe before taking the snapshot so no presence change falls in between
    let broadcast_rx = presence.subscribe();
    let snapshot = GatewayEvent::OnlineSet {
        user_ids: presence.online_users().await,
    };
    if send_event(&mut sender, &snapshot).await.is_err() {
        return;
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(run_command_worker(dispatcher.clone(), conn, cmd_rx));

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(run_writer(sender, broadcast_rx, conn_rx, pong_received.clone()));
    let mut recv_task = tokio::spawn(run_reader(receiver, cmd_tx, pong_received, conn_id));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // The reader owned the queue's sender; with it gone the worker drains and exits.
    if let Err(e) = worker.await {
        error!("Command worker for connection {} failed: {}", conn_id, e);
    }

    dispatcher.disconnect(conn_id).await;
    info!("Connection {} closed", conn_id);
}

async fn run_command_worker(
    dispatcher: Dispatcher,
    conn: ConnHandle,
    mut commands: mpsc::UnboundedReceiver<GatewayCommand>,
) {
    while let Some(cmd) = commands.recv().await {
        dispatcher.dispatch(&conn, cmd).await;
    }
}

async fn run_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut broadcast_rx: tokio::sync::broadcast::Receiver<GatewayEvent>,
    mut conn_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            result = broadcast_rx.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(_) => break,
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            result = conn_rx.recv() => {
                let Some(event) = result else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_reader(
    mut receiver: SplitStream<WebSocket>,
    commands: mpsc::UnboundedSender<GatewayCommand>,
    pong_received: Arc<AtomicBool>,
    conn_id: uuid::Uuid,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(cmd) => {
                    if commands.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        "Connection {} bad command: {} -- raw: {}",
                        conn_id,
                        e,
                        truncate(&text, 200)
                    );
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// Cut `s` to at most `max` bytes without splitting a character.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
