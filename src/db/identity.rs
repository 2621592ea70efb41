/// Identity resolution: maps an authenticated external subject to its user record.
/// Every other store works with internal user ids resolved here first.
use super::models::{User, UserId};
use super::{Database, DbPool};
use crate::error::{ChatError, ChatResult};

/// Resolve the caller for a mutation or a strict query.
/// No subject means `Unauthenticated`; a subject with no user record is `UserNotFound`.
pub async fn resolve(pool: &DbPool, subject: Option<&str>) -> ChatResult<User> {
    let subject = subject
        .filter(|s| !s.trim().is_empty())
        .ok_or(ChatError::Unauthenticated)?;

    Database::get_user_by_external_id(pool, subject)
        .await?
        .ok_or(ChatError::UserNotFound)
}

/// Resolve the caller for lenient status queries: any failure yields `None`.
pub async fn resolve_optional(pool: &DbPool, subject: Option<&str>) -> Option<UserId> {
    match resolve(pool, subject).await {
        Ok(user) => Some(user.id),
        Err(e) => {
            log::debug!("Anonymous status query: {}", e);
            None
        }
    }
}
