/// Pending-item counts shown as notification badges
use super::models::{NotificationCounts, UserId};
use super::{DbPool, InvitationStore, RelationshipStore};
use crate::error::ChatResult;

pub struct NotificationStore;

impl NotificationStore {
    /// Pending friend requests and group invitations, read under one lock
    pub async fn counts(pool: &DbPool, user_id: UserId) -> ChatResult<NotificationCounts> {
        let conn = pool.lock().await;
        Ok(NotificationCounts {
            pending_requests: RelationshipStore::count_requests_sync(&conn, user_id)?,
            pending_invitations: InvitationStore::count_pending_sync(&conn, user_id)?,
        })
    }
}
