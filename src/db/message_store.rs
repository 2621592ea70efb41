/// Message storage with read receipts and windowed history.
///
/// Creation timestamps are assigned here and are strictly increasing across the
/// store, so `created_at` alone orders history. Inactive group members see the
/// history up to their exit timestamp and nothing after it.
use rusqlite::{params, Connection, Result as SqliteResult};

use super::models::*;
use super::{now_millis, rows, DbPool, RelationshipStore};
use crate::error::{ChatError, ChatResult};

/// Longest accepted text body, counted in characters after joining fragments
pub const MAX_TEXT_LENGTH: usize = 1000;

/// Which part of a conversation's history a viewer may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    All,
    UpTo(i64),
    Nothing,
}

impl Visibility {
    pub(crate) fn for_member(conversation: &Conversation, membership: &Membership) -> Self {
        if !conversation.is_group || membership.is_active() {
            return Visibility::All;
        }
        match membership.exit_at {
            Some(exit_at) => Visibility::UpTo(exit_at),
            None => Visibility::Nothing,
        }
    }

    fn cutoff(&self) -> Option<i64> {
        match self {
            Visibility::All => Some(i64::MAX),
            Visibility::UpTo(exit_at) => Some(*exit_at),
            Visibility::Nothing => None,
        }
    }
}

/// Message storage operations
pub struct MessageStore;

impl MessageStore {
    /// Send a message as `sender_id`
    pub async fn create(
        pool: &DbPool,
        sender_id: UserId,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: Vec<String>,
    ) -> ChatResult<Message> {
        validate_content(kind, &content)?;

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let conversation =
            rows::conversation_by_id(&tx, conversation_id)?.ok_or(ChatError::ConversationNotFound)?;
        let membership =
            rows::membership_for(&tx, sender_id, conversation_id)?.ok_or(ChatError::NotAMember)?;

        if conversation.is_group {
            if !membership.is_active() {
                return Err(ChatError::InactiveGroupMember);
            }
        } else {
            for other in rows::memberships_of(&tx, conversation_id)? {
                if other.member_id != sender_id
                    && RelationshipStore::has_block_between(&tx, sender_id, other.member_id)?
                {
                    return Err(ChatError::ConversationBlocked);
                }
            }
        }

        let message = Self::insert_message(&tx, sender_id, conversation_id, kind, &content)?;
        tx.execute(
            "UPDATE conversations SET last_message_id = ?1 WHERE id = ?2",
            params![message.id, conversation_id],
        )?;

        tx.commit()?;
        log::info!(
            "User {} sent message {} to conversation {}",
            sender_id,
            message.id,
            conversation_id
        );
        Ok(message)
    }

    /// Move a message from `sent` to `delivered`. Later states are left alone.
    pub async fn mark_as_delivered(
        pool: &DbPool,
        message_id: MessageId,
        user_id: UserId,
    ) -> ChatResult<bool> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let message = Self::readable_message(&tx, message_id, user_id)?;
        if message.read_status >= ReadStatus::Delivered {
            return Ok(false);
        }

        tx.execute(
            "UPDATE messages SET read_status = ?1 WHERE id = ?2",
            params![ReadStatus::Delivered.as_str(), message_id],
        )?;

        tx.commit()?;
        log::debug!("Message {} delivered to user {}", message_id, user_id);
        Ok(true)
    }

    /// Mark a message read by `user_id`. Returns whether anything changed;
    /// a sender reading their own message never does.
    pub async fn mark_as_read(
        pool: &DbPool,
        message_id: MessageId,
        user_id: UserId,
    ) -> ChatResult<bool> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let message = Self::readable_message(&tx, message_id, user_id)?;
        let changed = Self::apply_read(&tx, &message, user_id)?;

        tx.commit()?;
        if changed {
            log::debug!("Message {} read by user {}", message_id, user_id);
        }
        Ok(changed)
    }

    /// Mark every visible message of a conversation read by `user_id`.
    ///
    /// Runs in batches of `batch_size`, each committed on its own. Re-running
    /// after an interruption only repeats idempotent work. Also advances the
    /// reader's `last_seen_message_id`. Returns the number of messages processed.
    pub async fn mark_all_as_read(
        pool: &DbPool,
        conversation_id: ConversationId,
        user_id: UserId,
        batch_size: usize,
    ) -> ChatResult<usize> {
        let batch_size = batch_size.max(1);

        let visibility = {
            let conn = pool.lock().await;
            let (conversation, membership) = Self::member_view(&conn, user_id, conversation_id)?;
            Visibility::for_member(&conversation, &membership)
        };
        let Some(cutoff) = visibility.cutoff() else {
            return Ok(0);
        };

        let mut processed = 0;
        let mut after_id: MessageId = 0;
        loop {
            let mut conn = pool.lock().await;
            let tx = conn.transaction()?;

            let batch = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND id > ?2 AND created_at <= ?3
                     ORDER BY id ASC LIMIT ?4",
                    rows::MESSAGE_COLUMNS
                ))?;
                let batch = stmt
                    .query_map(
                        params![conversation_id, after_id, cutoff, batch_size as i64],
                        rows::map_message,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                batch
            };

            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;

            for message in &batch {
                Self::apply_read(&tx, message, user_id)?;
            }
            tx.execute(
                "UPDATE conversation_members
                 SET last_seen_message_id = MAX(COALESCE(last_seen_message_id, 0), ?1)
                 WHERE member_id = ?2 AND conversation_id = ?3",
                params![after_id, user_id, conversation_id],
            )?;

            tx.commit()?;
            processed += batch.len();

            if batch.len() < batch_size {
                break;
            }
        }

        log::info!(
            "User {} marked {} messages read in conversation {}",
            user_id,
            processed,
            conversation_id
        );
        Ok(processed)
    }

    /// The viewer's visible history, newest first
    pub async fn list_for_viewer(
        pool: &DbPool,
        viewer_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<MessageView>> {
        let conn = pool.lock().await;
        let (conversation, membership) = Self::member_view(&conn, viewer_id, conversation_id)?;
        let visibility = Visibility::for_member(&conversation, &membership);

        let messages = Self::visible_messages(&conn, conversation_id, visibility, None, None)?;
        Self::to_views(&conn, viewer_id, messages)
    }

    /// One page of the viewer's visible history, newest first.
    /// `before` is the `created_at` cursor returned by the previous page.
    pub async fn list_page(
        pool: &DbPool,
        viewer_id: UserId,
        conversation_id: ConversationId,
        before: Option<i64>,
        limit: usize,
    ) -> ChatResult<MessagePage> {
        let limit = limit.max(1);

        let conn = pool.lock().await;
        let (conversation, membership) = Self::member_view(&conn, viewer_id, conversation_id)?;
        let visibility = Visibility::for_member(&conversation, &membership);

        let mut messages =
            Self::visible_messages(&conn, conversation_id, visibility, before, Some(limit + 1))?;
        let has_more = messages.len() > limit;
        messages.truncate(limit);

        let next_cursor = if has_more {
            messages.last().map(|m| m.created_at)
        } else {
            None
        };
        let items = Self::to_views(&conn, viewer_id, messages)?;
        Ok(MessagePage { items, next_cursor })
    }

    /// Get message by ID
    pub async fn get(pool: &DbPool, message_id: MessageId) -> ChatResult<Option<Message>> {
        let conn = pool.lock().await;
        Ok(rows::message_by_id(&conn, message_id)?)
    }

    /// Insert a membership-lifecycle announcement authored by `actor_id`
    pub(crate) fn insert_system_message(
        conn: &Connection,
        actor_id: UserId,
        conversation_id: ConversationId,
        text: String,
    ) -> SqliteResult<Message> {
        Self::insert_message(conn, actor_id, conversation_id, MessageKind::System, &[text])
    }

    /// Next creation timestamp: wall clock, bumped past the newest stored message
    pub(crate) fn next_message_timestamp(conn: &Connection) -> SqliteResult<i64> {
        let last: Option<i64> =
            conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
        let now = now_millis();
        Ok(match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        })
    }

    fn insert_message(
        conn: &Connection,
        sender_id: UserId,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: &[String],
    ) -> SqliteResult<Message> {
        let created_at = Self::next_message_timestamp(conn)?;
        let read_by = vec![sender_id];

        conn.execute(
            "INSERT INTO messages (sender_id, conversation_id, kind, content, read_status, read_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sender_id,
                conversation_id,
                kind.as_str(),
                to_json(content)?,
                ReadStatus::Sent.as_str(),
                to_json(&read_by)?,
                created_at,
            ],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            sender_id,
            conversation_id,
            kind,
            content: content.to_vec(),
            read_status: ReadStatus::Sent,
            read_by,
            created_at,
        })
    }

    /// Set `read` and add the reader to `read_by` unless they sent the message
    fn apply_read(conn: &Connection, message: &Message, reader_id: UserId) -> SqliteResult<bool> {
        if message.sender_id == reader_id {
            return Ok(false);
        }
        if message.read_status == ReadStatus::Read && message.read_by.contains(&reader_id) {
            return Ok(false);
        }

        let mut read_by = message.read_by.clone();
        if !read_by.contains(&reader_id) {
            read_by.push(reader_id);
        }
        conn.execute(
            "UPDATE messages SET read_status = ?1, read_by = ?2 WHERE id = ?3",
            params![ReadStatus::Read.as_str(), to_json(&read_by)?, message.id],
        )?;
        Ok(true)
    }

    /// The message, provided it lies inside the reader's visible history.
    /// Messages past a former member's exit read as missing.
    fn readable_message(
        conn: &Connection,
        message_id: MessageId,
        reader_id: UserId,
    ) -> ChatResult<Message> {
        let message = rows::message_by_id(conn, message_id)?.ok_or(ChatError::MessageNotFound)?;
        let (conversation, membership) =
            Self::member_view(conn, reader_id, message.conversation_id)?;

        match Visibility::for_member(&conversation, &membership).cutoff() {
            Some(cutoff) if message.created_at <= cutoff => Ok(message),
            _ => Err(ChatError::MessageNotFound),
        }
    }

    fn member_view(
        conn: &Connection,
        viewer_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<(Conversation, Membership)> {
        let conversation =
            rows::conversation_by_id(conn, conversation_id)?.ok_or(ChatError::ConversationNotFound)?;
        let membership =
            rows::membership_for(conn, viewer_id, conversation_id)?.ok_or(ChatError::NotAMember)?;
        Ok((conversation, membership))
    }

    fn visible_messages(
        conn: &Connection,
        conversation_id: ConversationId,
        visibility: Visibility,
        before: Option<i64>,
        limit: Option<usize>,
    ) -> SqliteResult<Vec<Message>> {
        let Some(cutoff) = visibility.cutoff() else {
            return Ok(Vec::new());
        };
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE conversation_id = ?1 AND created_at <= ?2 AND created_at < ?3
             ORDER BY created_at DESC, id DESC LIMIT ?4",
            rows::MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(
                params![conversation_id, cutoff, before.unwrap_or(i64::MAX), limit],
                rows::map_message,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Attach the sender's current profile to each message
    fn to_views(
        conn: &Connection,
        viewer_id: UserId,
        messages: Vec<Message>,
    ) -> ChatResult<Vec<MessageView>> {
        messages
            .into_iter()
            .map(|message| -> ChatResult<MessageView> {
                let sender =
                    rows::user_by_id(conn, message.sender_id)?.ok_or(ChatError::SenderNotFound)?;
                Ok(MessageView {
                    sender_name: sender.username,
                    sender_image: sender.avatar_url,
                    is_current_user: message.sender_id == viewer_id,
                    read_status: message.read_status,
                    read_by: message.read_by.clone(),
                    message,
                })
            })
            .collect()
    }
}

fn validate_content(kind: MessageKind, content: &[String]) -> ChatResult<()> {
    match kind {
        MessageKind::Text => {
            if content.is_empty() {
                return Err(ChatError::validation("content", "Message is empty"));
            }
            let length = content.iter().map(|part| part.chars().count()).sum::<usize>();
            if length == 0 {
                return Err(ChatError::validation("content", "Message is empty"));
            }
            if length > MAX_TEXT_LENGTH {
                return Err(ChatError::validation(
                    "content",
                    format!("Message exceeds {} characters", MAX_TEXT_LENGTH),
                ));
            }
        }
        MessageKind::System => {
            if content.len() != 1 || content[0].trim().is_empty() {
                return Err(ChatError::validation(
                    "content",
                    "System messages carry exactly one sentence",
                ));
            }
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
