use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use chirp_types::events::GatewayEvent;

/// Addressing detail of one open connection: its id plus the queue feeding
/// its socket writer.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection. Returns false once the
    /// connection's writer has gone away.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Who is online, and how to reach them.
///
/// One entry per user; the last registration wins. Mutations hold the
/// write lock while the new online set is broadcast, so every connection
/// observes online sets in mutation order.
#[derive(Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    /// Broadcast channel: every open connection receives these events, joined or not
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> connection that most recently joined as that user
    online: RwLock<HashMap<Uuid, ConnHandle>>,
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

impl Presence {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(PresenceInner {
                broadcast_tx,
                online: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Allocate a handle for a newly opened connection. The receiver feeds
    /// that connection's socket writer.
    pub fn connect(&self) -> (ConnHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnHandle { id: Uuid::new_v4(), tx }, rx)
    }

    /// Subscribe to events addressed to every connection.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Bind `user_id` to `conn`, replacing any previous binding.
    pub async fn register(&self, user_id: Uuid, conn: &ConnHandle) {
        let mut online = self.inner.online.write().await;
        if let Some(previous) = online.insert(user_id, conn.clone()) {
            if previous.id != conn.id {
                debug!("{} rebound from connection {} to {}", user_id, previous.id, conn.id);
            }
        }
        info!("User {} online on connection {}", user_id, conn.id);
        self.broadcast_online_set(&online);
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnHandle> {
        self.inner.online.read().await.get(&user_id).cloned()
    }

    /// Drop whatever users are bound to `conn_id`. A connection that was
    /// superseded by a newer one for the same user owns nothing, so this is
    /// a no-op for it. Returns the users that went offline.
    pub async fn unregister(&self, conn_id: Uuid) -> Vec<Uuid> {
        let mut online = self.inner.online.write().await;

        let gone: Vec<Uuid> = online
            .iter()
            .filter(|(_, conn)| conn.id == conn_id)
            .map(|(user_id, _)| *user_id)
            .collect();

        if gone.is_empty() {
            return gone;
        }

        for user_id in &gone {
            online.remove(user_id);
            info!("User {} offline (connection {} closed)", user_id, conn_id);
        }
        self.broadcast_online_set(&online);
        gone
    }

    /// Send a targeted event to a user. Returns false if they're offline.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.lookup(user_id).await {
            Some(conn) => conn.send(event),
            None => false,
        }
    }

    /// Online user ids, sorted.
    pub async fn online_users(&self) -> Vec<Uuid> {
        let online = self.inner.online.read().await;
        sorted_ids(&online)
    }

    fn broadcast_online_set(&self, online: &HashMap<Uuid, ConnHandle>) {
        self.broadcast(GatewayEvent::OnlineSet {
            user_ids: sorted_ids(online),
        });
    }
}

fn sorted_ids(online: &HashMap<Uuid, ConnHandle>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = online.keys().copied().collect();
    ids.sort();
    ids
}
