/// Data models for database operations.
/// Entities mirror the stored documents; view structs are what queries return.
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;
pub type InvitationId = i64;
pub type RequestId = i64;

/// Last reported activity state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Away,
    Offline,
}

impl OnlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineStatus::Online => "online",
            OnlineStatus::Away => "away",
            OnlineStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(OnlineStatus::Online),
            "away" => Some(OnlineStatus::Away),
            "offline" => Some(OnlineStatus::Offline),
            _ => None,
        }
    }
}

/// Membership lifecycle: `Active -> Removed | Left`, `Removed | Left -> Active`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Removed,
    Left,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Removed => "removed",
            MembershipStatus::Left => "left",
        }
    }

    /// Rows written before the status column existed have no value; they are active.
    pub fn from_db(s: Option<&str>) -> Self {
        match s {
            Some("removed") => MembershipStatus::Removed,
            Some("left") => MembershipStatus::Left,
            _ => MembershipStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(MemberRole::Admin),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// Delivery state of a message. Only ever moves forward: sent < delivered < read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Sent,
    Delivered,
    Read,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Sent => "sent",
            ReadStatus::Delivered => "delivered",
            ReadStatus::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(ReadStatus::Sent),
            "delivered" => Some(ReadStatus::Delivered),
            "read" => Some(ReadStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            "rejected" => Some(InvitationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub username: String,
    pub email: String,
    pub avatar_url: String,
    pub online_status: Option<OnlineStatus>,
    pub last_seen_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: RequestId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    pub is_group: bool,
    pub image_url: Option<String>,
    pub admin_id: Option<UserId>,
    pub last_message_id: Option<MessageId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub member_id: UserId,
    pub conversation_id: ConversationId,
    pub role: MemberRole,
    pub status: MembershipStatus,
    pub last_seen_message_id: Option<MessageId>,
    /// Creation time of the exit system message while removed/left, `None` while active
    pub exit_at: Option<i64>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub conversation_id: ConversationId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: Vec<String>,
    pub read_status: ReadStatus,
    pub read_by: Vec<UserId>,
    pub created_at: i64,
}

impl Message {
    /// Display text: content fragments joined with no separator
    pub fn body(&self) -> String {
        self.content.concat()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvitation {
    pub id: InvitationId,
    pub group_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: InvitationStatus,
    pub created_at: i64,
}

// Query views

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    #[serde(flatten)]
    pub user: User,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    #[serde(flatten)]
    pub user: User,
    pub last_seen_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentMember {
    #[serde(flatten)]
    pub user: User,
    pub last_seen_message_id: Option<MessageId>,
    pub status: MembershipStatus,
    pub is_member_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetails {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub other_member: Option<Participant>,
    pub other_members: Option<Vec<Participant>>,
    pub current_member: CurrentMember,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LastMessagePreview {
    pub content: String,
    pub sender: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other_member: Option<User>,
    pub other_members: Option<Vec<User>>,
    pub last_message: Option<LastMessagePreview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message: Message,
    pub sender_name: String,
    pub sender_image: String,
    pub is_current_user: bool,
    pub read_status: ReadStatus,
    pub read_by: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub items: Vec<MessageView>,
    /// Pass as `before` to fetch the next (older) page
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingRequest {
    pub request: FriendRequest,
    pub sender: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvitationDetails {
    #[serde(flatten)]
    pub invitation: GroupInvitation,
    pub group: Option<Conversation>,
    pub sender: Option<User>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Presence {
    pub online_status: OnlineStatus,
    pub last_seen_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NotificationCounts {
    pub pending_requests: usize,
    pub pending_invitations: usize,
}

// Request/Response DTOs

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateGroupImageRequest {
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub content: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatePresenceRequest {
    pub status: OnlineStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePageQuery {
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStatusResponse {
    pub is_blocked: bool,
    pub is_blocked_by: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_status_legacy_absent_is_active() {
        assert_eq!(MembershipStatus::from_db(None), MembershipStatus::Active);
        assert_eq!(MembershipStatus::from_db(Some("")), MembershipStatus::Active);
        assert_eq!(MembershipStatus::from_db(Some("left")), MembershipStatus::Left);
        assert_eq!(
            MembershipStatus::from_db(Some("removed")),
            MembershipStatus::Removed
        );
    }

    #[test]
    fn test_read_status_ordering() {
        assert!(ReadStatus::Sent < ReadStatus::Delivered);
        assert!(ReadStatus::Delivered < ReadStatus::Read);
    }

    #[test]
    fn test_message_body_joins_fragments() {
        let message = Message {
            id: 1,
            sender_id: 1,
            conversation_id: 1,
            kind: MessageKind::Text,
            content: vec!["hel".to_string(), "lo".to_string()],
            read_status: ReadStatus::Sent,
            read_by: vec![1],
            created_at: 0,
        };
        assert_eq!(message.body(), "hello");
    }

    #[test]
    fn test_send_message_request_defaults_to_text() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"content":["hi"]}"#).expect("Deserialization failed");
        assert_eq!(req.kind, MessageKind::Text);

        let req: SendMessageRequest =
            serde_json::from_str(r#"{"type":"system","content":["x"]}"#)
                .expect("Deserialization failed");
        assert_eq!(req.kind, MessageKind::System);
    }

    #[test]
    fn test_message_serializes_kind_as_type() {
        let message = Message {
            id: 7,
            sender_id: 2,
            conversation_id: 3,
            kind: MessageKind::System,
            content: vec!["alice joined the group".to_string()],
            read_status: ReadStatus::Delivered,
            read_by: vec![2],
            created_at: 10,
        };
        let value = serde_json::to_value(&message).expect("Serialization failed");
        assert_eq!(value["type"], "system");
        assert_eq!(value["read_status"], "delivered");
    }
}
