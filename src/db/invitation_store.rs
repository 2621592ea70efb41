/// Group invitation storage.
/// An invitation is created `pending` and ends `accepted` or `rejected`;
/// terminal invitations accept no further transitions.
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::models::*;
use super::relationship_store::normalize_email;
use super::{now_millis, rows, ConversationStore, Database, DbPool, MessageStore};
use crate::error::{ChatError, ChatResult};

/// Invitation storage operations
pub struct InvitationStore;

impl InvitationStore {
    /// Invite the user registered under `email` to a group
    pub async fn send_invitation(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
        email: &str,
    ) -> ChatResult<GroupInvitation> {
        let email = normalize_email(email)?;

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        ConversationStore::admin_group(&tx, actor_id, conversation_id)?;
        let receiver = Database::user_by_email(&tx, &email)?.ok_or(ChatError::ReceiverNotFound)?;
        if let Some(membership) = rows::membership_for(&tx, receiver.id, conversation_id)? {
            if membership.is_active() {
                return Err(ChatError::AlreadyActiveMember);
            }
        }
        if Self::pending_for(&tx, receiver.id, conversation_id)?.is_some() {
            return Err(ChatError::InvitationAlreadyPending);
        }

        tx.execute(
            "INSERT INTO group_invitations (group_id, sender_id, receiver_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                actor_id,
                receiver.id,
                InvitationStatus::Pending.as_str(),
                now_millis(),
            ],
        )?;
        let invitation = Self::invitation_by_id(&tx, tx.last_insert_rowid())?
            .ok_or(ChatError::InvitationNotFound)?;

        tx.commit()?;
        log::info!(
            "User {} invited user {} to group {}",
            actor_id,
            receiver.id,
            conversation_id
        );
        Ok(invitation)
    }

    /// Accept an invitation and join the group. Returns the join announcement,
    /// or `None` when the receiver had already become an active member.
    pub async fn accept_invitation(
        pool: &DbPool,
        actor_id: UserId,
        invitation_id: InvitationId,
    ) -> ChatResult<(GroupInvitation, Option<Message>)> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let mut invitation = Self::pending_invitation_for(&tx, actor_id, invitation_id)?;
        ConversationStore::group(&tx, invitation.group_id)?;

        let already_active = rows::membership_for(&tx, actor_id, invitation.group_id)?
            .is_some_and(|m| m.is_active());
        let message = if already_active {
            None
        } else {
            ConversationStore::activate_membership(&tx, actor_id, invitation.group_id)?;
            let name = ConversationStore::username(&tx, actor_id)?;
            Some(MessageStore::insert_system_message(
                &tx,
                actor_id,
                invitation.group_id,
                format!("{} joined the group", name),
            )?)
        };

        Self::set_status(&tx, invitation.id, InvitationStatus::Accepted)?;
        invitation.status = InvitationStatus::Accepted;

        tx.commit()?;
        log::info!(
            "User {} accepted invitation {} to group {}",
            actor_id,
            invitation_id,
            invitation.group_id
        );
        Ok((invitation, message))
    }

    pub async fn reject_invitation(
        pool: &DbPool,
        actor_id: UserId,
        invitation_id: InvitationId,
    ) -> ChatResult<GroupInvitation> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let mut invitation = Self::pending_invitation_for(&tx, actor_id, invitation_id)?;
        Self::set_status(&tx, invitation.id, InvitationStatus::Rejected)?;
        invitation.status = InvitationStatus::Rejected;

        tx.commit()?;
        log::info!("User {} rejected invitation {}", actor_id, invitation_id);
        Ok(invitation)
    }

    /// Pending invitations addressed to the user, with group and sender when still present
    pub async fn list_pending(pool: &DbPool, user_id: UserId) -> ChatResult<Vec<InvitationDetails>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM group_invitations
             WHERE receiver_id = ?1 AND status = ?2
             ORDER BY created_at DESC, id DESC",
            rows::INVITATION_COLUMNS
        ))?;
        let invitations = stmt
            .query_map(
                params![user_id, InvitationStatus::Pending.as_str()],
                rows::map_invitation,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        invitations
            .into_iter()
            .map(|invitation| -> ChatResult<InvitationDetails> {
                Ok(InvitationDetails {
                    group: rows::conversation_by_id(&conn, invitation.group_id)?,
                    sender: rows::user_by_id(&conn, invitation.sender_id)?,
                    invitation,
                })
            })
            .collect()
    }

    pub async fn count_pending(pool: &DbPool, user_id: UserId) -> ChatResult<usize> {
        let conn = pool.lock().await;
        Ok(Self::count_pending_sync(&conn, user_id)?)
    }

    pub(crate) fn count_pending_sync(conn: &Connection, user_id: UserId) -> SqliteResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM group_invitations WHERE receiver_id = ?1 AND status = ?2",
            params![user_id, InvitationStatus::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn invitation_by_id(
        conn: &Connection,
        invitation_id: InvitationId,
    ) -> SqliteResult<Option<GroupInvitation>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM group_invitations WHERE id = ?1",
                rows::INVITATION_COLUMNS
            ),
            params![invitation_id],
            rows::map_invitation,
        )
        .optional()
    }

    fn pending_for(
        conn: &Connection,
        receiver_id: UserId,
        group_id: ConversationId,
    ) -> SqliteResult<Option<GroupInvitation>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM group_invitations
                 WHERE receiver_id = ?1 AND group_id = ?2 AND status = ?3",
                rows::INVITATION_COLUMNS
            ),
            params![receiver_id, group_id, InvitationStatus::Pending.as_str()],
            rows::map_invitation,
        )
        .optional()
    }

    fn pending_invitation_for(
        conn: &Connection,
        actor_id: UserId,
        invitation_id: InvitationId,
    ) -> ChatResult<GroupInvitation> {
        let invitation =
            Self::invitation_by_id(conn, invitation_id)?.ok_or(ChatError::InvitationNotFound)?;
        if invitation.receiver_id != actor_id {
            return Err(ChatError::NotYourInvitation);
        }
        if invitation.status != InvitationStatus::Pending {
            return Err(ChatError::InvitationNotPending);
        }
        Ok(invitation)
    }

    fn set_status(
        conn: &Connection,
        invitation_id: InvitationId,
        status: InvitationStatus,
    ) -> SqliteResult<()> {
        conn.execute(
            "UPDATE group_invitations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), invitation_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, test_support};

    #[tokio::test]
    async fn test_invite_and_accept() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;
        let group_id = ConversationStore::create_group(&pool, u1.id, "Team", None)
            .await
            .unwrap();

        let invitation = InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .expect("Invite failed");
        assert_eq!(invitation.status, InvitationStatus::Pending);
        assert_eq!(InvitationStore::count_pending(&pool, u2.id).await.unwrap(), 1);

        let pending = InvitationStore::list_pending(&pool, u2.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].group.as_ref().map(|g| g.id), Some(group_id));
        assert_eq!(pending[0].sender.as_ref().map(|s| s.id), Some(u1.id));

        let (accepted, message) = InvitationStore::accept_invitation(&pool, u2.id, invitation.id)
            .await
            .expect("Accept failed");
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert_eq!(
            message.map(|m| m.body()),
            Some("u2 joined the group".to_string())
        );
        assert_eq!(InvitationStore::count_pending(&pool, u2.id).await.unwrap(), 0);

        let members = ConversationStore::get_group_members(&pool, u2.id, group_id)
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_invitation_guards() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;
        let u3 = test_support::user(&pool, "u3").await;
        let group_id = ConversationStore::create_group(&pool, u1.id, "Team", None)
            .await
            .unwrap();
        ConversationStore::add_member(&pool, u1.id, group_id, u3.id).await.unwrap();

        assert!(matches!(
            InvitationStore::send_invitation(&pool, u3.id, group_id, "u2@example.com").await,
            Err(ChatError::NotAdmin)
        ));
        assert!(matches!(
            InvitationStore::send_invitation(&pool, u1.id, group_id, "nobody@example.com").await,
            Err(ChatError::ReceiverNotFound)
        ));
        assert!(matches!(
            InvitationStore::send_invitation(&pool, u1.id, group_id, "u3@example.com").await,
            Err(ChatError::AlreadyActiveMember)
        ));

        let invitation = InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .unwrap();
        assert!(matches!(
            InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com").await,
            Err(ChatError::InvitationAlreadyPending)
        ));
        assert!(matches!(
            InvitationStore::accept_invitation(&pool, u3.id, invitation.id).await,
            Err(ChatError::NotYourInvitation)
        ));
        assert!(matches!(
            InvitationStore::accept_invitation(&pool, u2.id, 9999).await,
            Err(ChatError::InvitationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_terminal_invitations() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;
        let group_id = ConversationStore::create_group(&pool, u1.id, "Team", None)
            .await
            .unwrap();

        let invitation = InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .unwrap();
        let rejected = InvitationStore::reject_invitation(&pool, u2.id, invitation.id)
            .await
            .expect("Reject failed");
        assert_eq!(rejected.status, InvitationStatus::Rejected);

        assert!(matches!(
            InvitationStore::accept_invitation(&pool, u2.id, invitation.id).await,
            Err(ChatError::InvitationNotPending)
        ));
        assert!(matches!(
            InvitationStore::reject_invitation(&pool, u2.id, invitation.id).await,
            Err(ChatError::InvitationNotPending)
        ));

        // A rejected invitation does not block a fresh one
        InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .expect("Re-invite failed");
    }

    #[tokio::test]
    async fn test_accept_when_already_active() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;
        let group_id = ConversationStore::create_group(&pool, u1.id, "Team", None)
            .await
            .unwrap();

        let invitation = InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .unwrap();
        ConversationStore::add_member(&pool, u1.id, group_id, u2.id).await.unwrap();

        let (accepted, message) = InvitationStore::accept_invitation(&pool, u2.id, invitation.id)
            .await
            .expect("Accept failed");
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert!(message.is_none());

        let conn = pool.lock().await;
        assert_eq!(rows::memberships_of(&conn, group_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_group_removes_invitations() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;
        let group_id = ConversationStore::create_group(&pool, u1.id, "Team", None)
            .await
            .unwrap();
        InvitationStore::send_invitation(&pool, u1.id, group_id, "u2@example.com")
            .await
            .unwrap();

        ConversationStore::delete_group(&pool, u1.id, group_id).await.unwrap();
        assert_eq!(InvitationStore::count_pending(&pool, u2.id).await.unwrap(), 0);
    }
}
