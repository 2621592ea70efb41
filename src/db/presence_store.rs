/// Presence storage.
/// Clients push their status on a heartbeat; a status that has not been
/// refreshed within the staleness window reads as offline.
use rusqlite::{params, Connection, Result as SqliteResult};

use super::models::*;
use super::{now_millis, rows, DbPool};
use crate::error::{ChatError, ChatResult};

/// Default staleness window: three missed 15 second heartbeats
pub const DEFAULT_STALE_AFTER_SECS: u64 = 45;

pub struct PresenceStore;

impl PresenceStore {
    /// Record the user's status and stamp `last_seen_at` with the current time
    pub async fn update_presence(
        pool: &DbPool,
        user_id: UserId,
        status: OnlineStatus,
    ) -> ChatResult<Presence> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let now = now_millis();
        let updated = tx.execute(
            "UPDATE users SET online_status = ?1, last_seen_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, user_id],
        )?;
        if updated == 0 {
            return Err(ChatError::UserNotFound);
        }

        tx.commit()?;
        log::debug!("User {} is {}", user_id, status.as_str());
        Ok(Presence {
            online_status: status,
            last_seen_at: Some(now),
        })
    }

    /// Effective presence of a user. Unknown users and users that never
    /// reported read as offline with no timestamp.
    pub async fn get_presence(
        pool: &DbPool,
        user_id: UserId,
        stale_after_secs: u64,
    ) -> ChatResult<Presence> {
        let conn = pool.lock().await;
        let Some(user) = rows::user_by_id(&conn, user_id)? else {
            log::debug!("Presence requested for unknown user {}", user_id);
            return Ok(Presence {
                online_status: OnlineStatus::Offline,
                last_seen_at: None,
            });
        };
        Ok(effective_presence(&user, now_millis(), stale_after_secs))
    }

    /// Persist `offline` for every user whose online or away status went stale
    /// as of `now`. Returns the number of users swept.
    pub async fn sweep_stale(pool: &DbPool, now: i64, stale_after_secs: u64) -> ChatResult<usize> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let swept = Self::sweep_stale_sync(&tx, now, stale_after_secs)?;

        tx.commit()?;
        if swept > 0 {
            log::info!("Marked {} stale users offline", swept);
        }
        Ok(swept)
    }

    fn sweep_stale_sync(conn: &Connection, now: i64, stale_after_secs: u64) -> SqliteResult<usize> {
        let threshold = now - stale_window_millis(stale_after_secs);
        conn.execute(
            "UPDATE users SET online_status = ?1
             WHERE online_status IN (?2, ?3) AND (last_seen_at IS NULL OR last_seen_at < ?4)",
            params![
                OnlineStatus::Offline.as_str(),
                OnlineStatus::Online.as_str(),
                OnlineStatus::Away.as_str(),
                threshold,
            ],
        )
    }
}

fn stale_window_millis(stale_after_secs: u64) -> i64 {
    i64::try_from(stale_after_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Stored presence adjusted for staleness as of `now`
pub fn effective_presence(user: &User, now: i64, stale_after_secs: u64) -> Presence {
    let stored = user.online_status.unwrap_or(OnlineStatus::Offline);
    let stale = match user.last_seen_at {
        Some(seen) => now.saturating_sub(seen) > stale_window_millis(stale_after_secs),
        None => true,
    };
    let online_status = if stored != OnlineStatus::Offline && stale {
        OnlineStatus::Offline
    } else {
        stored
    };
    Presence {
        online_status,
        last_seen_at: user.last_seen_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, test_support};

    #[tokio::test]
    async fn test_presence_defaults_to_offline() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;

        let presence = PresenceStore::get_presence(&pool, u1.id, DEFAULT_STALE_AFTER_SECS)
            .await
            .unwrap();
        assert_eq!(presence.online_status, OnlineStatus::Offline);
        assert_eq!(presence.last_seen_at, None);

        let unknown = PresenceStore::get_presence(&pool, 9999, DEFAULT_STALE_AFTER_SECS)
            .await
            .unwrap();
        assert_eq!(unknown.online_status, OnlineStatus::Offline);
    }

    #[tokio::test]
    async fn test_update_and_get_presence() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;

        PresenceStore::update_presence(&pool, u1.id, OnlineStatus::Away)
            .await
            .expect("Update failed");
        let presence = PresenceStore::get_presence(&pool, u1.id, DEFAULT_STALE_AFTER_SECS)
            .await
            .unwrap();
        assert_eq!(presence.online_status, OnlineStatus::Away);
        assert!(presence.last_seen_at.is_some());

        assert!(matches!(
            PresenceStore::update_presence(&pool, 9999, OnlineStatus::Online).await,
            Err(ChatError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_users_offline() {
        let pool = create_test_pool();
        let u1 = test_support::user(&pool, "u1").await;
        let u2 = test_support::user(&pool, "u2").await;

        let seen = PresenceStore::update_presence(&pool, u1.id, OnlineStatus::Online)
            .await
            .unwrap()
            .last_seen_at
            .unwrap();
        PresenceStore::update_presence(&pool, u2.id, OnlineStatus::Offline)
            .await
            .unwrap();

        let swept = PresenceStore::sweep_stale(&pool, seen + 10_000, 45).await.unwrap();
        assert_eq!(swept, 0);

        let swept = PresenceStore::sweep_stale(&pool, seen + 46_000, 45).await.unwrap();
        assert_eq!(swept, 1);

        let conn = pool.lock().await;
        let user = rows::user_by_id(&conn, u1.id).unwrap().unwrap();
        assert_eq!(user.online_status, Some(OnlineStatus::Offline));
        assert_eq!(user.last_seen_at, Some(seen));
    }

    #[test]
    fn test_effective_presence_staleness() {
        let mut user = User {
            id: 1,
            external_id: "subject_1".to_string(),
            username: "u1".to_string(),
            email: "u1@example.com".to_string(),
            avatar_url: String::new(),
            online_status: Some(OnlineStatus::Online),
            last_seen_at: Some(1_000),
        };

        let fresh = effective_presence(&user, 1_000 + 45_000, 45);
        assert_eq!(fresh.online_status, OnlineStatus::Online);

        let stale = effective_presence(&user, 1_000 + 45_001, 45);
        assert_eq!(stale.online_status, OnlineStatus::Offline);
        assert_eq!(stale.last_seen_at, Some(1_000));

        user.online_status = None;
        assert_eq!(
            effective_presence(&user, 1_000, 45).online_status,
            OnlineStatus::Offline
        );
    }
}
