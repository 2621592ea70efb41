/// Conversation and membership storage.
///
/// A membership row is created once per (user, conversation) and reused
/// through every lifecycle transition:
/// `active -> removed` (admin), `active -> left` (self), `removed | left -> active`.
/// Each transition writes a system message in the same transaction; exits stamp
/// `exit_at` with that message's timestamp and reactivation clears it.
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::message_store::Visibility;
use super::models::*;
use super::{now_millis, rows, DbPool, MessageStore};
use crate::error::{ChatError, ChatResult};

/// Preview shown for messages that are not plain text
pub const NON_TEXT_PREVIEW: &str = "[Non-text]";

/// Conversation storage operations
pub struct ConversationStore;

impl ConversationStore {
    /// Create a group with the creator as its admin and only member
    pub async fn create_group(
        pool: &DbPool,
        creator_id: UserId,
        name: &str,
        image_url: Option<&str>,
    ) -> ChatResult<ConversationId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("name", "Group name is required"));
        }
        let image_url = image_url.map(str::trim).filter(|url| !url.is_empty());

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        if rows::user_by_id(&tx, creator_id)?.is_none() {
            return Err(ChatError::UserNotFound);
        }

        tx.execute(
            "INSERT INTO conversations (name, is_group, image_url, admin_id, created_at)
             VALUES (?1, 1, ?2, ?3, ?4)",
            params![name, image_url, creator_id, now_millis()],
        )?;
        let conversation_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO conversation_members (member_id, conversation_id, role, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                creator_id,
                conversation_id,
                MemberRole::Admin.as_str(),
                MembershipStatus::Active.as_str(),
            ],
        )?;

        tx.commit()?;
        log::info!("User {} created group {} ({})", creator_id, conversation_id, name);
        Ok(conversation_id)
    }

    /// Add a user to a group, reactivating a previous membership if one exists
    pub async fn add_member(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Message> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let group = Self::admin_group(&tx, actor_id, conversation_id)?;
        let user = rows::user_by_id(&tx, user_id)?.ok_or(ChatError::UserNotFound)?;
        if let Some(existing) = rows::membership_for(&tx, user_id, conversation_id)? {
            if existing.is_active() {
                return Err(ChatError::AlreadyActiveMember);
            }
        }

        Self::activate_membership(&tx, user_id, conversation_id)?;
        let actor_name = Self::username(&tx, actor_id)?;
        let message = MessageStore::insert_system_message(
            &tx,
            actor_id,
            conversation_id,
            format!("{} added {} to the group", actor_name, user.username),
        )?;

        tx.commit()?;
        log::info!(
            "User {} added user {} to group {}",
            actor_id,
            user_id,
            group.id
        );
        Ok(message)
    }

    /// Remove an active member from a group. History and the membership row are kept.
    pub async fn remove_member(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> ChatResult<Message> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        Self::admin_group(&tx, actor_id, conversation_id)?;
        if user_id == actor_id {
            return Err(ChatError::AdminMustTransferFirst);
        }
        let membership =
            rows::membership_for(&tx, user_id, conversation_id)?.ok_or(ChatError::NotAMember)?;
        if !membership.is_active() {
            return Err(ChatError::MemberNotActive);
        }

        let actor_name = Self::username(&tx, actor_id)?;
        let user_name = Self::username(&tx, user_id)?;
        let message = MessageStore::insert_system_message(
            &tx,
            actor_id,
            conversation_id,
            format!("{} removed {} from the group", actor_name, user_name),
        )?;
        Self::deactivate_membership(&tx, &membership, MembershipStatus::Removed, message.created_at)?;

        tx.commit()?;
        log::info!(
            "User {} removed user {} from group {}",
            actor_id,
            user_id,
            conversation_id
        );
        Ok(message)
    }

    /// Leave a group. The admin may only leave once they are its sole member.
    pub async fn leave_group(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Message> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let group = Self::group(&tx, conversation_id)?;
        let membership =
            rows::membership_for(&tx, actor_id, conversation_id)?.ok_or(ChatError::NotAMember)?;
        if group.admin_id == Some(actor_id) && rows::memberships_of(&tx, conversation_id)?.len() > 1 {
            return Err(ChatError::AdminMustTransferFirst);
        }
        if !membership.is_active() {
            return Err(ChatError::MemberNotActive);
        }

        let actor_name = Self::username(&tx, actor_id)?;
        let message = MessageStore::insert_system_message(
            &tx,
            actor_id,
            conversation_id,
            format!("{} left the group", actor_name),
        )?;
        Self::deactivate_membership(&tx, &membership, MembershipStatus::Left, message.created_at)?;

        tx.commit()?;
        log::info!("User {} left group {}", actor_id, conversation_id);
        Ok(message)
    }

    /// Hand the admin role to another active member
    pub async fn transfer_admin(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
        new_admin_id: UserId,
    ) -> ChatResult<Message> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        Self::admin_group(&tx, actor_id, conversation_id)?;
        if new_admin_id == actor_id {
            return Err(ChatError::validation("user_id", "You are already the admin"));
        }
        let target =
            rows::membership_for(&tx, new_admin_id, conversation_id)?.ok_or(ChatError::NotAMember)?;
        if !target.is_active() {
            return Err(ChatError::MemberNotActive);
        }

        tx.execute(
            "UPDATE conversations SET admin_id = ?1 WHERE id = ?2",
            params![new_admin_id, conversation_id],
        )?;
        tx.execute(
            "UPDATE conversation_members SET role = ?1 WHERE member_id = ?2 AND conversation_id = ?3",
            params![MemberRole::Member.as_str(), actor_id, conversation_id],
        )?;
        tx.execute(
            "UPDATE conversation_members SET role = ?1 WHERE id = ?2",
            params![MemberRole::Admin.as_str(), target.id],
        )?;

        let actor_name = Self::username(&tx, actor_id)?;
        let target_name = Self::username(&tx, new_admin_id)?;
        let message = MessageStore::insert_system_message(
            &tx,
            actor_id,
            conversation_id,
            format!("{} made {} the group admin", actor_name, target_name),
        )?;

        tx.commit()?;
        log::info!(
            "Group {} admin transferred from {} to {}",
            conversation_id,
            actor_id,
            new_admin_id
        );
        Ok(message)
    }

    pub async fn update_group_image(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
        image_url: &str,
    ) -> ChatResult<()> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(ChatError::validation("image_url", "Image URL is required"));
        }

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        Self::admin_group(&tx, actor_id, conversation_id)?;
        tx.execute(
            "UPDATE conversations SET image_url = ?1 WHERE id = ?2",
            params![image_url, conversation_id],
        )?;

        tx.commit()?;
        log::info!("User {} updated image of group {}", actor_id, conversation_id);
        Ok(())
    }

    /// Delete a group with all of its memberships, messages and invitations.
    /// Returns the ids of everyone who held a membership.
    pub async fn delete_group(
        pool: &DbPool,
        actor_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<UserId>> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        Self::admin_group(&tx, actor_id, conversation_id)?;
        let member_ids: Vec<UserId> = rows::memberships_of(&tx, conversation_id)?
            .into_iter()
            .map(|m| m.member_id)
            .collect();

        tx.execute(
            "DELETE FROM conversation_members WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        let messages = tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute(
            "DELETE FROM group_invitations WHERE group_id = ?1",
            params![conversation_id],
        )?;
        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;

        tx.commit()?;
        log::info!(
            "User {} deleted group {} ({} members, {} messages)",
            actor_id,
            conversation_id,
            member_ids.len(),
            messages
        );
        Ok(member_ids)
    }

    /// Whether the viewer administers this group. Never fails on missing data.
    pub async fn is_group_admin(
        pool: &DbPool,
        viewer_id: Option<UserId>,
        conversation_id: ConversationId,
    ) -> ChatResult<bool> {
        let Some(viewer_id) = viewer_id else {
            return Ok(false);
        };
        let conn = pool.lock().await;
        Ok(match rows::conversation_by_id(&conn, conversation_id)? {
            Some(conversation) => conversation.is_group && conversation.admin_id == Some(viewer_id),
            None => false,
        })
    }

    /// Active members of a group with their roles. Any membership row grants access.
    pub async fn get_group_members(
        pool: &DbPool,
        viewer_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<GroupMember>> {
        let conn = pool.lock().await;

        Self::group(&conn, conversation_id)?;
        if rows::membership_for(&conn, viewer_id, conversation_id)?.is_none() {
            return Err(ChatError::NotAMember);
        }

        let mut members = Vec::new();
        for membership in rows::memberships_of(&conn, conversation_id)? {
            if !membership.is_active() {
                continue;
            }
            if let Some(user) = rows::user_by_id(&conn, membership.member_id)? {
                members.push(GroupMember {
                    user,
                    role: membership.role,
                });
            }
        }
        Ok(members)
    }

    /// Conversation details as seen by one of its members
    pub async fn get(
        pool: &DbPool,
        viewer_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<ConversationDetails> {
        let conn = pool.lock().await;

        let conversation =
            rows::conversation_by_id(&conn, conversation_id)?.ok_or(ChatError::ConversationNotFound)?;
        let memberships = rows::memberships_of(&conn, conversation_id)?;
        let own = memberships
            .iter()
            .find(|m| m.member_id == viewer_id)
            .ok_or(ChatError::NotAMember)?;

        let viewer = rows::user_by_id(&conn, viewer_id)?.ok_or(ChatError::UserNotFound)?;
        let current_member = CurrentMember {
            user: viewer,
            last_seen_message_id: own.last_seen_message_id,
            status: own.status,
            is_member_active: !conversation.is_group || own.is_active(),
        };

        let mut others = Vec::new();
        for membership in memberships.iter().filter(|m| m.member_id != viewer_id) {
            if conversation.is_group && !membership.is_active() {
                continue;
            }
            if let Some(user) = rows::user_by_id(&conn, membership.member_id)? {
                others.push(Participant {
                    user,
                    last_seen_message_id: membership.last_seen_message_id,
                });
            }
        }

        let (other_member, other_members) = if conversation.is_group {
            (None, Some(others))
        } else {
            (others.into_iter().next(), None)
        };

        Ok(ConversationDetails {
            conversation,
            other_member,
            other_members,
            current_member,
        })
    }

    /// Every conversation the user holds a membership in, most recent activity first
    pub async fn list_for_user(pool: &DbPool, user_id: UserId) -> ChatResult<Vec<ConversationSummary>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversation_members WHERE member_id = ?1",
            rows::MEMBERSHIP_COLUMNS
        ))?;
        let memberships = stmt
            .query_map(params![user_id], rows::map_membership)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summaries = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let Some(conversation) = rows::conversation_by_id(&conn, membership.conversation_id)?
            else {
                log::debug!(
                    "Skipping membership {} of missing conversation {}",
                    membership.id,
                    membership.conversation_id
                );
                continue;
            };

            let mut others = Vec::new();
            for other in rows::memberships_of(&conn, conversation.id)? {
                if other.member_id == user_id || (conversation.is_group && !other.is_active()) {
                    continue;
                }
                if let Some(user) = rows::user_by_id(&conn, other.member_id)? {
                    others.push(user);
                }
            }

            let visibility = Visibility::for_member(&conversation, &membership);
            let last = Self::latest_visible_message(&conn, &conversation, visibility)?;
            let activity = last.as_ref().map_or(conversation.created_at, |m| m.created_at);
            let last_message = match last {
                Some(message) => Some(Self::preview(&conn, &message)?),
                None => None,
            };

            let (other_member, other_members) = if conversation.is_group {
                (None, Some(others))
            } else {
                (others.into_iter().next(), None)
            };
            summaries.push((
                activity,
                ConversationSummary {
                    conversation,
                    other_member,
                    other_members,
                    last_message,
                },
            ));
        }

        summaries.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.conversation.id.cmp(&a.1.conversation.id)));
        Ok(summaries.into_iter().map(|(_, summary)| summary).collect())
    }

    /// Ids of the active members of a conversation
    pub async fn active_member_ids(
        pool: &DbPool,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<UserId>> {
        let conn = pool.lock().await;
        Ok(rows::memberships_of(&conn, conversation_id)?
            .into_iter()
            .filter(Membership::is_active)
            .map(|m| m.member_id)
            .collect())
    }

    /// Whether the user holds any membership row in the conversation
    pub async fn has_membership(
        pool: &DbPool,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<bool> {
        let conn = pool.lock().await;
        Ok(rows::membership_for(&conn, user_id, conversation_id)?.is_some())
    }

    /// Insert an active member row, or reactivate the existing one
    pub(crate) fn activate_membership(
        conn: &Connection,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> SqliteResult<()> {
        let updated = conn.execute(
            "UPDATE conversation_members SET status = ?1, role = ?2, exit_at = NULL
             WHERE member_id = ?3 AND conversation_id = ?4",
            params![
                MembershipStatus::Active.as_str(),
                MemberRole::Member.as_str(),
                user_id,
                conversation_id,
            ],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO conversation_members (member_id, conversation_id, role, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user_id,
                    conversation_id,
                    MemberRole::Member.as_str(),
                    MembershipStatus::Active.as_str(),
                ],
            )?;
        }
        Ok(())
    }

    pub(crate) fn username(conn: &Connection, user_id: UserId) -> SqliteResult<String> {
        Ok(rows::user_by_id(conn, user_id)?
            .map(|u| u.username)
            .unwrap_or_else(|| "A former user".to_string()))
    }

    /// The conversation, provided it exists and is a group
    pub(crate) fn group(conn: &Connection, conversation_id: ConversationId) -> ChatResult<Conversation> {
        let conversation =
            rows::conversation_by_id(conn, conversation_id)?.ok_or(ChatError::ConversationNotFound)?;
        if !conversation.is_group {
            return Err(ChatError::NotAGroup);
        }
        Ok(conversation)
    }

    /// The group, provided `actor_id` is its admin
    pub(crate) fn admin_group(
        conn: &Connection,
        actor_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Conversation> {
        let group = Self::group(conn, conversation_id)?;
        if group.admin_id != Some(actor_id) {
            return Err(ChatError::NotAdmin);
        }
        Ok(group)
    }

    fn deactivate_membership(
        conn: &Connection,
        membership: &Membership,
        status: MembershipStatus,
        exit_at: i64,
    ) -> SqliteResult<()> {
        conn.execute(
            "UPDATE conversation_members SET status = ?1, exit_at = ?2 WHERE id = ?3",
            params![status.as_str(), exit_at, membership.id],
        )?;
        Ok(())
    }

    fn latest_visible_message(
        conn: &Connection,
        conversation: &Conversation,
        visibility: Visibility,
    ) -> SqliteResult<Option<Message>> {
        match visibility {
            Visibility::All => match conversation.last_message_id {
                Some(message_id) => rows::message_by_id(conn, message_id),
                None => Ok(None),
            },
            Visibility::UpTo(exit_at) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM messages
                         WHERE conversation_id = ?1 AND created_at <= ?2
                         ORDER BY created_at DESC, id DESC LIMIT 1",
                        rows::MESSAGE_COLUMNS
                    ),
                    params![conversation.id, exit_at],
                    rows::map_message,
                )
                .optional(),
            Visibility::Nothing => Ok(None),
        }
    }

    fn preview(conn: &Connection, message: &Message) -> SqliteResult<LastMessagePreview> {
        let content = match message.kind {
            MessageKind::Text => message.body(),
            MessageKind::System => NON_TEXT_PREVIEW.to_string(),
        };
        Ok(LastMessagePreview {
            content,
            sender: Self::username(conn, message.sender_id)?,
        })
    }
}
