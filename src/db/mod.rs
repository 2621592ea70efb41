/// Database layer for persistent storage.
/// Each engine has its own store; every mutation runs in a single transaction
/// so a failed operation never leaves a partial write behind.
pub mod conversation_store;
pub mod identity;
pub mod init;
pub mod invitation_store;
pub mod message_store;
pub mod models;
pub mod notifications;
pub mod presence_store;
pub mod relationship_store;
pub(crate) mod rows;

use crate::error::{ChatError, ChatResult};
use models::User;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use conversation_store::ConversationStore;
pub use invitation_store::InvitationStore;
pub use message_store::MessageStore;
pub use notifications::NotificationStore;
pub use presence_store::PresenceStore;
pub use relationship_store::RelationshipStore;

pub type DbPool = Arc<Mutex<Connection>>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// Wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Profile fields carried by an identity-provisioning event
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: String,
    pub username: String,
    pub email: String,
    pub avatar_url: String,
}

/// User records, written only by identity provisioning
pub struct Database;

impl Database {
    /// Create the user for an external subject unless it is already mapped.
    /// Returns the user and whether it was created by this call.
    pub async fn provision_user(pool: &DbPool, new_user: &NewUser) -> ChatResult<(User, bool)> {
        if new_user.external_id.trim().is_empty() {
            return Err(ChatError::validation("external_id", "External id is required"));
        }
        let email = new_user.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ChatError::validation("email", "Email is required"));
        }

        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        if let Some(existing) = Self::user_by_external_id(&tx, &new_user.external_id)? {
            return Ok((existing, false));
        }
        if Self::user_by_email(&tx, &email)?.is_some() {
            return Err(ChatError::validation("email", "Email is already registered"));
        }

        tx.execute(
            "INSERT INTO users (external_id, username, email, avatar_url) VALUES (?1, ?2, ?3, ?4)",
            params![
                &new_user.external_id,
                &new_user.username,
                &email,
                &new_user.avatar_url,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let user = rows::user_by_id(&tx, id)?.ok_or(ChatError::UserNotFound)?;

        tx.commit()?;
        log::info!("Provisioned user {} for subject {}", user.id, user.external_id);
        Ok((user, true))
    }

    /// Delete the user mapped to an external subject; `None` if there was none
    pub async fn delete_user_by_external_id(
        pool: &DbPool,
        external_id: &str,
    ) -> ChatResult<Option<User>> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let user = match Self::user_by_external_id(&tx, external_id)? {
            Some(user) => user,
            None => return Ok(None),
        };
        tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;

        tx.commit()?;
        log::info!("Deleted user {} for subject {}", user.id, external_id);
        Ok(Some(user))
    }

    /// Get user by ID
    pub async fn get_user(pool: &DbPool, user_id: i64) -> ChatResult<Option<User>> {
        let conn = pool.lock().await;
        Ok(rows::user_by_id(&conn, user_id)?)
    }

    /// Get user by external subject id
    pub async fn get_user_by_external_id(
        pool: &DbPool,
        external_id: &str,
    ) -> ChatResult<Option<User>> {
        let conn = pool.lock().await;
        Ok(Self::user_by_external_id(&conn, external_id)?)
    }

    /// Get user by email
    pub async fn get_user_by_email(pool: &DbPool, email: &str) -> ChatResult<Option<User>> {
        let conn = pool.lock().await;
        Ok(Self::user_by_email(&conn, &email.trim().to_lowercase())?)
    }

    pub(crate) fn user_by_external_id(
        conn: &Connection,
        external_id: &str,
    ) -> SqliteResult<Option<User>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM users WHERE external_id = ?1",
                rows::USER_COLUMNS
            ),
            params![external_id],
            rows::map_user,
        )
        .optional()
    }

    pub(crate) fn user_by_email(conn: &Connection, email: &str) -> SqliteResult<Option<User>> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", rows::USER_COLUMNS),
            params![email],
            rows::map_user,
        )
        .optional()
    }
}
