use std::sync::Arc;

use tokio::sync::mpsc;

use crate::server::config::ServerConfig;
use crate::server::error::ChatError;
use crate::server::events::{ClientEvent, ServerEvent};
use crate::server::groups::GroupProvider;
use crate::server::moderation;
use crate::server::presence;
use crate::server::registry::{ConnectionHandle, SessionRegistry};
use crate::server::store::MessageStore;

/// Orchestrator for inbound events: validates, moderates, persists and fans
/// out. One event from a connection runs to completion before the next event
/// from that connection is dispatched; events from different connections run
/// concurrently.
pub struct Router {
    registry: Arc<SessionRegistry>,
    store: MessageStore,
    groups: Arc<dyn GroupProvider>,
    max_message_length: usize,
    history_limit: i64,
}

impl Router {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: MessageStore,
        groups: Arc<dyn GroupProvider>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            groups,
            max_message_length: config.max_message_length,
            history_limit: config.history_limit,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Connection lifecycle hook: bind the verified identity and announce
    /// the new online set to everyone.
    pub async fn on_connect(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionHandle {
        let handle = self.registry.register(user_id, sender).await;
        presence::broadcast_online_presence(&self.registry).await;
        handle
    }

    /// Connection lifecycle hook: drop the binding; only a transition to
    /// offline is worth a presence broadcast.
    pub async fn on_disconnect(&self, conn_id: &str) {
        if let Some(departure) = self.registry.unregister(conn_id).await {
            if departure.went_offline {
                presence::broadcast_online_presence(&self.registry).await;
            }
        }
    }

    pub async fn handle_event(&self, conn: &ConnectionHandle, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room } => self.handle_join_room(conn, &room).await,
            ClientEvent::SendMessage {
                content,
                kind,
                receiver_id,
                group_id,
            } => {
                self.handle_send(conn, &content, &kind, receiver_id.as_deref(), group_id.as_deref())
                    .await
            }
            ClientEvent::GetHistory {
                group_id,
                user1,
                user2,
            } => self.handle_get_history(conn, group_id, user1, user2).await,
            ClientEvent::MarkAsRead {
                sender_id,
                receiver_id,
            } => self.handle_mark_as_read(conn, &sender_id, &receiver_id).await,
        }
    }

    /// A user's own channel is joined at registration, so joining it again
    /// just re-announces presence. Any other room names a group channel and
    /// is membership-checked against a fresh snapshot.
    async fn handle_join_room(&self, conn: &ConnectionHandle, room: &str) {
        if room == conn.user_id {
            presence::broadcast_online_presence(&self.registry).await;
            return;
        }
        let snapshot = match self.groups.get_group(room).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("[ROUTER] Join of {} by {} failed: {}", room, conn.user_id, err);
                conn.send(ServerEvent::rejected(&err));
                return;
            }
        };
        if !snapshot.is_member(&conn.user_id) {
            let err = ChatError::NotAMember {
                user_id: conn.user_id.clone(),
                group_id: room.to_string(),
            };
            log::warn!("[ROUTER] {}", err);
            conn.send(ServerEvent::rejected(&err));
            return;
        }
        self.registry.join_group(room, &conn.conn_id).await;
        log::info!("[ROUTER] {} joined group channel {}", conn.user_id, room);
    }

    async fn handle_send(
        &self,
        conn: &ConnectionHandle,
        content: &str,
        kind: &str,
        receiver_id: Option<&str>,
        group_id: Option<&str>,
    ) {
        if let Err(err) = self
            .route_message(conn, content, kind, receiver_id, group_id)
            .await
        {
            log::warn!("[ROUTER] Send from {} rejected: {}", conn.user_id, err);
            conn.send(ServerEvent::rejected(&err));
        }
    }

    /// The send state machine: validate, moderate, persist, fan out. Denied
    /// and malformed sends never reach the store, so nothing a muted user
    /// sends can resurface through history.
    async fn route_message(
        &self,
        conn: &ConnectionHandle,
        content: &str,
        kind: &str,
        receiver_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<(), ChatError> {
        #[derive(Clone, Copy)]
        enum Target<'a> {
            Direct(&'a str),
            Group(&'a str),
        }
        let target = match (receiver_id, group_id) {
            (Some(receiver_id), None) => Target::Direct(receiver_id),
            (None, Some(group_id)) => Target::Group(group_id),
            _ => return Err(ChatError::InvalidMessageTarget),
        };
        if content.is_empty() {
            return Err(ChatError::InvalidMessageTarget);
        }
        if content.len() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }
        if let Target::Group(group_id) = target {
            moderation::check_send(self.groups.as_ref(), group_id, &conn.user_id).await?;
        }

        let message = self
            .store
            .append(&conn.user_id, content, kind, receiver_id, group_id)
            .await?;
        log::info!(
            "[ROUTER] Message {} from {} persisted, fanning out",
            message.id,
            conn.user_id
        );

        // The payload carries the store-assigned id and timestamp; receivers
        // never see client-supplied ones.
        let payload = ServerEvent::ReceiveMessage(message);
        match target {
            Target::Group(group_id) => self.registry.deliver_to_group(group_id, &payload).await,
            Target::Direct(receiver_id) => {
                self.registry.deliver(receiver_id, &payload).await;
                // Canonical echo so the sender's own connections never have
                // to synthesize the sent message locally
                if receiver_id != conn.user_id {
                    self.registry.deliver(&conn.user_id, &payload).await;
                }
            }
        }
        Ok(())
    }

    /// History goes only to the requesting connection, never broadcast.
    async fn handle_get_history(
        &self,
        conn: &ConnectionHandle,
        group_id: Option<String>,
        user1: Option<String>,
        user2: Option<String>,
    ) {
        let result = match (group_id, user1, user2) {
            (Some(group_id), _, _) => self.store.group_history(&group_id, self.history_limit).await,
            (None, Some(user1), Some(user2)) => {
                self.store
                    .direct_history(&user1, &user2, self.history_limit)
                    .await
            }
            _ => Err(ChatError::InvalidMessageTarget),
        };
        match result {
            Ok(messages) => conn.send(ServerEvent::History { messages }),
            Err(err) => {
                log::warn!("[ROUTER] History request from {} failed: {}", conn.user_id, err);
                conn.send(ServerEvent::rejected(&err));
            }
        }
    }

    /// Flip the read flag on the sender -> receiver direction, then tell the
    /// original sender's connections. The receiver initiated the action and
    /// needs no reply.
    async fn handle_mark_as_read(
        &self,
        conn: &ConnectionHandle,
        sender_id: &str,
        receiver_id: &str,
    ) {
        match self.store.mark_read(sender_id, receiver_id).await {
            Ok(updated) => {
                log::info!(
                    "[ROUTER] {} acknowledged {} messages from {}",
                    receiver_id,
                    updated,
                    sender_id
                );
                self.registry
                    .deliver(
                        sender_id,
                        &ServerEvent::MessagesRead {
                            read_by: receiver_id.to_string(),
                        },
                    )
                    .await;
            }
            Err(err) => {
                log::warn!("[ROUTER] markAsRead from {} failed: {}", conn.user_id, err);
                conn.send(ServerEvent::rejected(&err));
            }
        }
    }
}
