use crate::server::events::ServerEvent;
use crate::server::registry::SessionRegistry;

/// Emit the full current online set to every live connection. Always the
/// whole set, never a delta; broadcasting an unchanged set is fine.
pub async fn broadcast_online_presence(registry: &SessionRegistry) {
    let users = registry.online_set().await;
    log::debug!("[PRESENCE] Broadcasting online set ({} users)", users.len());
    registry
        .broadcast_all(&ServerEvent::OnlineUsers { users })
        .await;
}
