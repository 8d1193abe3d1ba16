use crate::server::error::ChatError;
use crate::server::groups::GroupProvider;

/// Send-time mute check. Fetches a fresh group snapshot on every call: mute
/// state can change between two sends from the same user, so nothing here is
/// cached. A group that no longer exists denies the send; it never silently
/// allows it.
pub async fn check_send(
    groups: &dyn GroupProvider,
    group_id: &str,
    sender_id: &str,
) -> Result<(), ChatError> {
    let snapshot = groups.get_group(group_id).await?;
    if snapshot.is_muted(sender_id) {
        log::info!("[MODERATION] Denied send to {} by muted user {}", group_id, sender_id);
        return Err(ChatError::SenderMuted {
            user_id: sender_id.to_string(),
            group_id: group_id.to_string(),
        });
    }
    Ok(())
}
