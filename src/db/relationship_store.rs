/// Relationship storage: blocks, friend requests and friendships.
///
/// Blocks are directional and gate new conversations and direct-message sends;
/// they never tear down an existing conversation. Friend requests exist only
/// while pending and are deleted on accept or deny.
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::models::*;
use super::{now_millis, rows, Database, DbPool};
use crate::error::{ChatError, ChatResult};

/// Relationship storage operations
pub struct RelationshipStore;

impl RelationshipStore {
    /// Block another user
    pub async fn block(pool: &DbPool, blocker_id: UserId, blocked_id: UserId) -> ChatResult<i64> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        if Self::block_exists(&tx, blocker_id, blocked_id)? {
            return Err(ChatError::AlreadyBlocked);
        }
        if blocker_id == blocked_id {
            return Err(ChatError::SelfBlockRejected);
        }
        if rows::user_by_id(&tx, blocked_id)?.is_none() {
            return Err(ChatError::UserNotFound);
        }

        tx.execute(
            "INSERT INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
            params![blocker_id, blocked_id, now_millis()],
        )?;
        let block_id = tx.last_insert_rowid();

        tx.commit()?;
        log::info!("User {} blocked user {}", blocker_id, blocked_id);
        Ok(block_id)
    }

    /// Remove an existing block
    pub async fn unblock(pool: &DbPool, blocker_id: UserId, blocked_id: UserId) -> ChatResult<()> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker_id, blocked_id],
        )?;
        if deleted == 0 {
            return Err(ChatError::NotBlocked);
        }

        tx.commit()?;
        log::info!("User {} unblocked user {}", blocker_id, blocked_id);
        Ok(())
    }

    /// Whether the viewer has blocked `other_id`. Anonymous viewers get `false`.
    pub async fn is_blocked(
        pool: &DbPool,
        viewer_id: Option<UserId>,
        other_id: UserId,
    ) -> ChatResult<bool> {
        let Some(viewer_id) = viewer_id else {
            return Ok(false);
        };
        let conn = pool.lock().await;
        Ok(Self::block_exists(&conn, viewer_id, other_id)?)
    }

    /// Whether `other_id` has blocked the viewer. Anonymous viewers get `false`.
    pub async fn is_blocked_by(
        pool: &DbPool,
        viewer_id: Option<UserId>,
        other_id: UserId,
    ) -> ChatResult<bool> {
        let Some(viewer_id) = viewer_id else {
            return Ok(false);
        };
        let conn = pool.lock().await;
        Ok(Self::block_exists(&conn, other_id, viewer_id)?)
    }

    /// Users the viewer has blocked. Blocks pointing at deleted users are skipped.
    pub async fn list_blocked(pool: &DbPool, viewer_id: Option<UserId>) -> ChatResult<Vec<User>> {
        let Some(viewer_id) = viewer_id else {
            return Ok(Vec::new());
        };
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(
            "SELECT blocked_id FROM blocks WHERE blocker_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let blocked_ids = stmt
            .query_map(params![viewer_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut users = Vec::with_capacity(blocked_ids.len());
        for blocked_id in blocked_ids {
            match rows::user_by_id(&conn, blocked_id)? {
                Some(user) => users.push(user),
                None => log::debug!("Skipping block of deleted user {}", blocked_id),
            }
        }
        Ok(users)
    }

    /// Send a friend request to the user registered under `email`
    pub async fn send_request(
        pool: &DbPool,
        sender_id: UserId,
        email: &str,
    ) -> ChatResult<FriendRequest> {
        let email = normalize_email(email)?;

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let sender = rows::user_by_id(&tx, sender_id)?.ok_or(ChatError::UserNotFound)?;
        if sender.email == email {
            return Err(ChatError::SelfRequestRejected);
        }
        let receiver = Database::user_by_email(&tx, &email)?.ok_or(ChatError::ReceiverNotFound)?;

        if Self::has_block_between(&tx, sender_id, receiver.id)? {
            return Err(ChatError::ConversationBlocked);
        }
        if Self::are_friends(&tx, sender_id, receiver.id)? {
            return Err(ChatError::AlreadyFriends);
        }
        if Self::request_between(&tx, sender_id, receiver.id)?.is_some() {
            return Err(ChatError::RequestAlreadySent);
        }
        if Self::request_between(&tx, receiver.id, sender_id)?.is_some() {
            return Err(ChatError::RequestAlreadyReceived);
        }

        let created_at = now_millis();
        tx.execute(
            "INSERT INTO friend_requests (sender_id, receiver_id, created_at) VALUES (?1, ?2, ?3)",
            params![sender_id, receiver.id, created_at],
        )?;
        let request = FriendRequest {
            id: tx.last_insert_rowid(),
            sender_id,
            receiver_id: receiver.id,
            created_at,
        };

        tx.commit()?;
        log::info!(
            "User {} sent friend request {} to {}",
            sender_id,
            request.id,
            receiver.id
        );
        Ok(request)
    }

    /// Accept a pending friend request: opens the direct conversation between
    /// both users, records the friendship and consumes the request.
    pub async fn accept_request(
        pool: &DbPool,
        actor_id: UserId,
        request_id: RequestId,
    ) -> ChatResult<ConversationId> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let request = Self::pending_request_for(&tx, actor_id, request_id)?;
        if Self::has_block_between(&tx, request.sender_id, request.receiver_id)? {
            return Err(ChatError::ConversationBlocked);
        }
        if rows::user_by_id(&tx, request.sender_id)?.is_none() {
            return Err(ChatError::SenderNotFound);
        }

        tx.execute(
            "INSERT INTO conversations (is_group, created_at) VALUES (0, ?1)",
            params![now_millis()],
        )?;
        let conversation_id = tx.last_insert_rowid();

        for member_id in [request.sender_id, request.receiver_id] {
            tx.execute(
                "INSERT INTO conversation_members (member_id, conversation_id, role, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    member_id,
                    conversation_id,
                    MemberRole::Member.as_str(),
                    MembershipStatus::Active.as_str(),
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO friends (user1_id, user2_id, conversation_id) VALUES (?1, ?2, ?3)",
            params![request.sender_id, request.receiver_id, conversation_id],
        )?;
        tx.execute("DELETE FROM friend_requests WHERE id = ?1", params![request.id])?;

        tx.commit()?;
        log::info!(
            "Friend request {} accepted, conversation {} opened",
            request_id,
            conversation_id
        );
        Ok(conversation_id)
    }

    /// Deny a pending friend request, deleting it
    pub async fn deny_request(pool: &DbPool, actor_id: UserId, request_id: RequestId) -> ChatResult<()> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let request = Self::pending_request_for(&tx, actor_id, request_id)?;
        tx.execute("DELETE FROM friend_requests WHERE id = ?1", params![request.id])?;

        tx.commit()?;
        log::info!("Friend request {} denied by {}", request_id, actor_id);
        Ok(())
    }

    /// Incoming friend requests with their senders
    pub async fn list_requests(pool: &DbPool, actor_id: UserId) -> ChatResult<Vec<IncomingRequest>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM friend_requests WHERE receiver_id = ?1 ORDER BY created_at ASC, id ASC",
            rows::REQUEST_COLUMNS
        ))?;
        let requests = stmt
            .query_map(params![actor_id], rows::map_request)?
            .collect::<Result<Vec<_>, _>>()?;

        requests
            .into_iter()
            .map(|request| -> ChatResult<IncomingRequest> {
                let sender =
                    rows::user_by_id(&conn, request.sender_id)?.ok_or(ChatError::SenderNotFound)?;
                Ok(IncomingRequest { request, sender })
            })
            .collect()
    }

    /// Number of incoming friend requests
    pub async fn count_requests(pool: &DbPool, actor_id: UserId) -> ChatResult<usize> {
        let conn = pool.lock().await;
        Ok(Self::count_requests_sync(&conn, actor_id)?)
    }

    pub(crate) fn count_requests_sync(conn: &Connection, actor_id: UserId) -> SqliteResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM friend_requests WHERE receiver_id = ?1",
            params![actor_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub(crate) fn block_exists(
        conn: &Connection,
        blocker_id: UserId,
        blocked_id: UserId,
    ) -> SqliteResult<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2)",
            params![blocker_id, blocked_id],
            |row| row.get(0),
        )
    }

    /// True if either user has blocked the other
    pub(crate) fn has_block_between(conn: &Connection, a: UserId, b: UserId) -> SqliteResult<bool> {
        Ok(Self::block_exists(conn, a, b)? || Self::block_exists(conn, b, a)?)
    }

    fn are_friends(conn: &Connection, a: UserId, b: UserId) -> SqliteResult<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM friends
                 WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1))",
            params![a, b],
            |row| row.get(0),
        )
    }

    fn request_between(
        conn: &Connection,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> SqliteResult<Option<FriendRequest>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM friend_requests WHERE sender_id = ?1 AND receiver_id = ?2",
                rows::REQUEST_COLUMNS
            ),
            params![sender_id, receiver_id],
            rows::map_request,
        )
        .optional()
    }

    fn pending_request_for(
        conn: &Connection,
        actor_id: UserId,
        request_id: RequestId,
    ) -> ChatResult<FriendRequest> {
        let request = conn
            .query_row(
                &format!(
                    "SELECT {} FROM friend_requests WHERE id = ?1",
                    rows::REQUEST_COLUMNS
                ),
                params![request_id],
                rows::map_request,
            )
            .optional()?
            .ok_or(ChatError::RequestNotFound)?;

        if request.receiver_id != actor_id {
            return Err(ChatError::NotYourRequest);
        }
        Ok(request)
    }
}

/// Trim and lowercase an email, rejecting obviously malformed input
pub(crate) fn normalize_email(email: &str) -> ChatResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ChatError::validation("email", "Email is required"));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ChatError::validation("email", "Invalid email address"));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, test_support};

    #[tokio::test]
    async fn test_block_and_unblock() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;

        RelationshipStore::block(&pool, alice.id, bob.id)
            .await
            .expect("Block failed");
        assert!(RelationshipStore::is_blocked(&pool, Some(alice.id), bob.id)
            .await
            .unwrap());

        let again = RelationshipStore::block(&pool, alice.id, bob.id).await;
        assert!(matches!(again, Err(ChatError::AlreadyBlocked)));

        RelationshipStore::unblock(&pool, alice.id, bob.id)
            .await
            .expect("Unblock failed");
        assert!(!RelationshipStore::is_blocked(&pool, Some(alice.id), bob.id)
            .await
            .unwrap());

        let missing = RelationshipStore::unblock(&pool, alice.id, bob.id).await;
        assert!(matches!(missing, Err(ChatError::NotBlocked)));
    }

    #[tokio::test]
    async fn test_self_block_rejected() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;

        let result = RelationshipStore::block(&pool, alice.id, alice.id).await;
        assert!(matches!(result, Err(ChatError::SelfBlockRejected)));
    }

    #[tokio::test]
    async fn test_anonymous_status_queries_are_false() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;

        assert!(!RelationshipStore::is_blocked(&pool, None, alice.id).await.unwrap());
        assert!(!RelationshipStore::is_blocked_by(&pool, None, alice.id).await.unwrap());
        assert!(RelationshipStore::list_blocked(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_blocked_skips_deleted_users() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;
        let carol = test_support::user(&pool, "carol").await;

        RelationshipStore::block(&pool, alice.id, bob.id).await.unwrap();
        RelationshipStore::block(&pool, alice.id, carol.id).await.unwrap();
        Database::delete_user_by_external_id(&pool, &carol.external_id)
            .await
            .unwrap();

        let blocked = RelationshipStore::list_blocked(&pool, Some(alice.id))
            .await
            .expect("List failed");
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, bob.id);
    }

    #[tokio::test]
    async fn test_friend_request_accept_opens_conversation() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;

        let request_id = RelationshipStore::send_request(&pool, alice.id, "Bob@Example.com ")
            .await
            .expect("Send failed")
            .id;
        assert_eq!(RelationshipStore::count_requests(&pool, bob.id).await.unwrap(), 1);

        let incoming = RelationshipStore::list_requests(&pool, bob.id).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].sender.id, alice.id);

        let stolen = RelationshipStore::accept_request(&pool, alice.id, request_id).await;
        assert!(matches!(stolen, Err(ChatError::NotYourRequest)));

        let conversation_id = RelationshipStore::accept_request(&pool, bob.id, request_id)
            .await
            .expect("Accept failed");
        assert_eq!(RelationshipStore::count_requests(&pool, bob.id).await.unwrap(), 0);

        let conn = pool.lock().await;
        let memberships = rows::memberships_of(&conn, conversation_id).unwrap();
        assert_eq!(memberships.len(), 2);
        assert!(memberships.iter().all(|m| m.is_active()));
        let conversation = rows::conversation_by_id(&conn, conversation_id)
            .unwrap()
            .expect("Conversation missing");
        assert!(!conversation.is_group);
        assert!(conversation.admin_id.is_none());
        drop(conn);

        let again = RelationshipStore::send_request(&pool, alice.id, "bob@example.com").await;
        assert!(matches!(again, Err(ChatError::AlreadyFriends)));
    }

    #[tokio::test]
    async fn test_friend_request_guards() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;
        let carol = test_support::user(&pool, "carol").await;

        assert!(matches!(
            RelationshipStore::send_request(&pool, alice.id, "alice@example.com").await,
            Err(ChatError::SelfRequestRejected)
        ));
        assert!(matches!(
            RelationshipStore::send_request(&pool, alice.id, "ghost@example.com").await,
            Err(ChatError::ReceiverNotFound)
        ));
        assert!(matches!(
            RelationshipStore::send_request(&pool, alice.id, "not-an-email").await,
            Err(ChatError::Validation { field: "email", .. })
        ));

        RelationshipStore::send_request(&pool, alice.id, "bob@example.com")
            .await
            .unwrap();
        assert!(matches!(
            RelationshipStore::send_request(&pool, alice.id, "bob@example.com").await,
            Err(ChatError::RequestAlreadySent)
        ));
        assert!(matches!(
            RelationshipStore::send_request(&pool, bob.id, "alice@example.com").await,
            Err(ChatError::RequestAlreadyReceived)
        ));

        RelationshipStore::block(&pool, carol.id, alice.id).await.unwrap();
        assert!(matches!(
            RelationshipStore::send_request(&pool, alice.id, "carol@example.com").await,
            Err(ChatError::ConversationBlocked)
        ));
    }

    #[tokio::test]
    async fn test_deny_request_deletes_it() {
        let pool = create_test_pool();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;

        let request_id = RelationshipStore::send_request(&pool, alice.id, "bob@example.com")
            .await
            .unwrap()
            .id;
        RelationshipStore::deny_request(&pool, bob.id, request_id)
            .await
            .expect("Deny failed");

        assert_eq!(RelationshipStore::count_requests(&pool, bob.id).await.unwrap(), 0);
        assert!(matches!(
            RelationshipStore::deny_request(&pool, bob.id, request_id).await,
            Err(ChatError::RequestNotFound)
        ));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" A@B.io ").unwrap(), "a@b.io");
        assert!(normalize_email("").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("@b.io").is_err());
        assert!(normalize_email("a b@c.io").is_err());
    }
}
