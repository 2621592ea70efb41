/// Row mapping shared by the stores.
/// Column lists are kept next to their mappers so SELECTs and mappers stay in step.
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::*;

pub const USER_COLUMNS: &str =
    "id, external_id, username, email, avatar_url, online_status, last_seen_at";

pub const CONVERSATION_COLUMNS: &str =
    "id, name, is_group, image_url, admin_id, last_message_id, created_at";

pub const MEMBERSHIP_COLUMNS: &str =
    "id, member_id, conversation_id, role, status, last_seen_message_id, exit_at";

pub const MESSAGE_COLUMNS: &str =
    "id, sender_id, conversation_id, kind, content, read_status, read_by, created_at";

pub const INVITATION_COLUMNS: &str = "id, group_id, sender_id, receiver_id, status, created_at";

pub const REQUEST_COLUMNS: &str = "id, sender_id, receiver_id, created_at";

pub fn map_user(row: &Row) -> rusqlite::Result<User> {
    let status: Option<String> = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        external_id: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        avatar_url: row.get(4)?,
        online_status: status.as_deref().and_then(OnlineStatus::from_str),
        last_seen_at: row.get(6)?,
    })
}

pub fn map_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        image_url: row.get(3)?,
        admin_id: row.get(4)?,
        last_message_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn map_membership(row: &Row) -> rusqlite::Result<Membership> {
    let role: String = row.get(3)?;
    let status: Option<String> = row.get(4)?;
    Ok(Membership {
        id: row.get(0)?,
        member_id: row.get(1)?,
        conversation_id: row.get(2)?,
        role: MemberRole::from_str(&role).unwrap_or(MemberRole::Member),
        status: MembershipStatus::from_db(status.as_deref()),
        last_seen_message_id: row.get(5)?,
        exit_at: row.get(6)?,
    })
}

pub fn map_message(row: &Row) -> rusqlite::Result<Message> {
    let kind: String = row.get(3)?;
    let read_status: String = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        conversation_id: row.get(2)?,
        kind: MessageKind::from_str(&kind).unwrap_or(MessageKind::Text),
        content: json_column(row, 4)?,
        read_status: ReadStatus::from_str(&read_status).unwrap_or(ReadStatus::Sent),
        read_by: json_column(row, 6)?,
        created_at: row.get(7)?,
    })
}

pub fn map_invitation(row: &Row) -> rusqlite::Result<GroupInvitation> {
    let status: String = row.get(4)?;
    Ok(GroupInvitation {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        status: InvitationStatus::from_str(&status).unwrap_or(InvitationStatus::Pending),
        created_at: row.get(5)?,
    })
}

pub fn map_request(row: &Row) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Decode a JSON array stored in a TEXT column
fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn user_by_id(conn: &Connection, user_id: UserId) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        map_user,
    )
    .optional()
}

pub fn conversation_by_id(
    conn: &Connection,
    conversation_id: ConversationId,
) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        ),
        params![conversation_id],
        map_conversation,
    )
    .optional()
}

pub fn membership_for(
    conn: &Connection,
    member_id: UserId,
    conversation_id: ConversationId,
) -> rusqlite::Result<Option<Membership>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM conversation_members WHERE member_id = ?1 AND conversation_id = ?2",
            MEMBERSHIP_COLUMNS
        ),
        params![member_id, conversation_id],
        map_membership,
    )
    .optional()
}

/// Every membership row of a conversation, regardless of status
pub fn memberships_of(
    conn: &Connection,
    conversation_id: ConversationId,
) -> rusqlite::Result<Vec<Membership>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conversation_members WHERE conversation_id = ?1 ORDER BY id ASC",
        MEMBERSHIP_COLUMNS
    ))?;
    let rows = stmt.query_map(params![conversation_id], map_membership)?;
    rows.collect()
}

pub fn message_by_id(conn: &Connection, message_id: MessageId) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
        params![message_id],
        map_message,
    )
    .optional()
}
