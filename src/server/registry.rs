use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::server::events::ServerEvent;

pub type ConnId = String;

/// One live connection bound to a user identity. The registry owns the set
/// of bindings; the transport owns the socket behind the sender.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    pub user_id: String,
    pub joined_at: i64,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Best-effort, non-blocking delivery. A closed receiver means the
    /// connection is going away; its cleanup path handles the rest.
    pub fn send(&self, event: ServerEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("[REGISTRY] Dropped event for closed connection {}", self.conn_id);
        }
    }
}

#[derive(Debug)]
pub struct Departure {
    pub user_id: String,
    pub went_offline: bool,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnId, ConnectionHandle>,
    // user identity -> its bound connections; doubles as the identity's
    // private delivery channel and as the presence source of truth
    users: HashMap<String, HashSet<ConnId>>,
    // group channel key -> joined connections
    groups: HashMap<String, HashSet<ConnId>>,
}

/// Source of truth for which user owns which live connection. All binding
/// state lives behind one mutex so registrations, unregistrations and
/// presence reads always observe a consistent snapshot.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new connection to an identity. Safe to call any number of
    /// times per identity; every binding gets its own connection id and the
    /// identity joins its own delivery channel.
    pub async fn register(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle {
            conn_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            joined_at: chrono::Utc::now().timestamp_millis(),
            sender,
        };
        let mut inner = self.inner.lock().await;
        inner
            .connections
            .insert(handle.conn_id.clone(), handle.clone());
        inner
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(handle.conn_id.clone());
        log::info!(
            "[REGISTRY] Bound connection {} to user {} (bindings={})",
            handle.conn_id,
            user_id,
            inner.users.get(user_id).map(|s| s.len()).unwrap_or(0)
        );
        handle
    }

    /// Remove exactly one binding. Reports whether this was the identity's
    /// last connection, i.e. whether it just went offline.
    pub async fn unregister(&self, conn_id: &str) -> Option<Departure> {
        let mut inner = self.inner.lock().await;
        let handle = inner.connections.remove(conn_id)?;
        for joined in inner.groups.values_mut() {
            joined.remove(conn_id);
        }
        let went_offline = match inner.users.get_mut(&handle.user_id) {
            Some(bindings) => {
                bindings.remove(conn_id);
                bindings.is_empty()
            }
            None => false,
        };
        if went_offline {
            inner.users.remove(&handle.user_id);
        }
        log::info!(
            "[REGISTRY] Unbound connection {} from user {} (offline={})",
            conn_id,
            handle.user_id,
            went_offline
        );
        Some(Departure {
            user_id: handle.user_id,
            went_offline,
        })
    }

    /// Join a live connection to a group delivery channel.
    pub async fn join_group(&self, group_id: &str, conn_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.connections.contains_key(conn_id) {
            return false;
        }
        inner
            .groups
            .entry(group_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().await.users.contains_key(user_id)
    }

    /// Snapshot of every identity with at least one binding.
    pub async fn online_set(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut users: Vec<String> = inner.users.keys().cloned().collect();
        users.sort();
        users
    }

    /// Deliver to every connection bound to an identity. No binding is a
    /// silent no-op; the message stays retrievable through history.
    pub async fn deliver(&self, user_id: &str, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(bindings) = inner.users.get(user_id) {
            for conn_id in bindings {
                if let Some(conn) = inner.connections.get(conn_id) {
                    conn.send(event.clone());
                }
            }
        }
    }

    /// Deliver to every connection joined to a group channel.
    pub async fn deliver_to_group(&self, group_id: &str, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        if let Some(joined) = inner.groups.get(group_id) {
            for conn_id in joined {
                if let Some(conn) = inner.connections.get(conn_id) {
                    conn.send(event.clone());
                }
            }
        }
    }

    pub async fn broadcast_all(&self, event: &ServerEvent) {
        let inner = self.inner.lock().await;
        for conn in inner.connections.values() {
            conn.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_conn() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn presence_follows_the_last_binding() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = fake_conn();
        let (tx2, _rx2) = fake_conn();

        let conn1 = registry.register("u1", tx1).await;
        assert!(registry.is_online("u1").await);

        let conn2 = registry.register("u1", tx2).await;
        let departure = registry.unregister(&conn1.conn_id).await.unwrap();
        assert!(!departure.went_offline);
        assert!(registry.is_online("u1").await);

        let departure = registry.unregister(&conn2.conn_id).await.unwrap();
        assert!(departure.went_offline);
        assert!(!registry.is_online("u1").await);
        assert!(registry.online_set().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_is_exact_and_single_shot() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = fake_conn();
        let conn = registry.register("u1", tx).await;

        assert!(registry.unregister(&conn.conn_id).await.is_some());
        assert!(registry.unregister(&conn.conn_id).await.is_none());
    }

    #[tokio::test]
    async fn deliver_reaches_every_binding_of_the_user() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = fake_conn();
        let (tx2, mut rx2) = fake_conn();
        let (tx3, mut rx3) = fake_conn();
        registry.register("u1", tx1).await;
        registry.register("u1", tx2).await;
        registry.register("u2", tx3).await;

        registry
            .deliver("u1", &ServerEvent::MessagesRead { read_by: "u2".into() })
            .await;

        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert!(drain(&mut rx3).is_empty());
    }

    #[tokio::test]
    async fn deliver_to_absent_user_is_a_noop() {
        let registry = SessionRegistry::new();
        registry
            .deliver("ghost", &ServerEvent::MessagesRead { read_by: "u1".into() })
            .await;
    }

    #[tokio::test]
    async fn group_channel_reaches_joined_connections_only() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = fake_conn();
        let (tx2, mut rx2) = fake_conn();
        let conn1 = registry.register("u1", tx1).await;
        registry.register("u2", tx2).await;

        assert!(registry.join_group("g1", &conn1.conn_id).await);
        registry
            .deliver_to_group("g1", &ServerEvent::MessagesRead { read_by: "x".into() })
            .await;

        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn unregister_leaves_group_channels() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = fake_conn();
        let conn = registry.register("u1", tx).await;
        registry.join_group("g1", &conn.conn_id).await;
        registry.unregister(&conn.conn_id).await;

        registry
            .deliver_to_group("g1", &ServerEvent::MessagesRead { read_by: "x".into() })
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn slow_or_closed_connection_does_not_stall_the_rest() {
        let registry = SessionRegistry::new();
        let (tx1, rx1) = fake_conn();
        let (tx2, mut rx2) = fake_conn();
        registry.register("u1", tx1).await;
        registry.register("u1", tx2).await;
        drop(rx1);

        registry
            .deliver("u1", &ServerEvent::MessagesRead { read_by: "u2".into() })
            .await;
        assert_eq!(drain(&mut rx2).len(), 1);
    }
}
