/// Error types for the huddle server.
/// Every store operation returns a typed `ChatError`; the HTTP layer renders it
/// as a JSON body carrying the reason string.
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Coarse classification of a failure, used for status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    AuthorizationDenied,
    StateConflict,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AuthorizationDenied => "authorization_denied",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not authenticated")]
    Unauthenticated,

    // Referenced entity absent
    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("User with that email not found")]
    ReceiverNotFound,

    #[error("Sender not found")]
    SenderNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Friend request not found")]
    RequestNotFound,

    // Caller lacks rights
    #[error("Only the group admin can do that")]
    NotAdmin,

    #[error("Not a member of this conversation")]
    NotAMember,

    #[error("This invitation is not for you")]
    NotYourInvitation,

    #[error("This friend request is not for you")]
    NotYourRequest,

    // Invalid given current state
    #[error("User is already blocked")]
    AlreadyBlocked,

    #[error("User is not blocked")]
    NotBlocked,

    #[error("You cannot block yourself")]
    SelfBlockRejected,

    #[error("User is already a member of this group")]
    AlreadyActiveMember,

    #[error("Invitation already sent to this user")]
    InvitationAlreadyPending,

    #[error("This invitation is no longer valid")]
    InvitationNotPending,

    #[error("You are no longer an active member of this group")]
    InactiveGroupMember,

    #[error("Member is no longer active in this group")]
    MemberNotActive,

    #[error("As the admin, you must transfer ownership before leaving the group")]
    AdminMustTransferFirst,

    #[error("Conversation is not a group")]
    NotAGroup,

    #[error("Messaging is blocked between these users")]
    ConversationBlocked,

    #[error("You are already friends with this user")]
    AlreadyFriends,

    #[error("Friend request already sent")]
    RequestAlreadySent,

    #[error("This user has already sent you a request")]
    RequestAlreadyReceived,

    #[error("You cannot send a request to yourself")]
    SelfRequestRejected,

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ChatError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Unauthenticated => ErrorKind::Unauthenticated,
            ChatError::ConversationNotFound
            | ChatError::UserNotFound
            | ChatError::InvitationNotFound
            | ChatError::ReceiverNotFound
            | ChatError::SenderNotFound
            | ChatError::MessageNotFound
            | ChatError::RequestNotFound => ErrorKind::NotFound,
            ChatError::NotAdmin
            | ChatError::NotAMember
            | ChatError::NotYourInvitation
            | ChatError::NotYourRequest => ErrorKind::AuthorizationDenied,
            ChatError::AlreadyBlocked
            | ChatError::NotBlocked
            | ChatError::SelfBlockRejected
            | ChatError::AlreadyActiveMember
            | ChatError::InvitationAlreadyPending
            | ChatError::InvitationNotPending
            | ChatError::InactiveGroupMember
            | ChatError::MemberNotActive
            | ChatError::AdminMustTransferFirst
            | ChatError::NotAGroup
            | ChatError::ConversationBlocked
            | ChatError::AlreadyFriends
            | ChatError::RequestAlreadySent
            | ChatError::RequestAlreadyReceived
            | ChatError::SelfRequestRejected => ErrorKind::StateConflict,
            ChatError::Validation { .. } | ChatError::InvalidWebhook(_) => ErrorKind::Validation,
            ChatError::Database(_) | ChatError::Json(_) | ChatError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AuthorizationDenied => StatusCode::FORBIDDEN,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = self.kind();
        let reason = if kind == ErrorKind::Internal {
            log::error!("Internal error: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": reason,
            "kind": kind.as_str(),
        }))
    }
}
