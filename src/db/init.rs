/// Database schema initialization.
/// Sets up SQLite WAL mode, creates tables, and normalizes legacy rows on startup.
use rusqlite::{Connection, Result as SqliteResult};

/// Initialize database connection with WAL mode and schema
pub fn initialize_database(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode (for file-based DB only, ignore error for in-memory)
    let _ = conn.execute("PRAGMA journal_mode = WAL", []);
    let _ = conn.execute("PRAGMA synchronous = NORMAL", []);

    create_schema(conn)?;

    let migrated = migrate_legacy_membership_status(conn)?;
    if migrated > 0 {
        log::info!("Normalized {} legacy memberships to active", migrated);
    }

    Ok(())
}

/// Create all database tables.
/// References between tables are plain ids; the stores enforce them.
fn create_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            avatar_url TEXT NOT NULL DEFAULT '',
            online_status TEXT,
            last_seen_at INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_external_id ON users(external_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email);

        CREATE TABLE IF NOT EXISTS friend_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id INTEGER NOT NULL,
            receiver_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_sender_receiver
            ON friend_requests(sender_id, receiver_id);
        CREATE INDEX IF NOT EXISTS idx_requests_receiver ON friend_requests(receiver_id);

        CREATE TABLE IF NOT EXISTS friends (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user1_id INTEGER NOT NULL,
            user2_id INTEGER NOT NULL,
            conversation_id INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_friends_user1 ON friends(user1_id);
        CREATE INDEX IF NOT EXISTS idx_friends_user2 ON friends(user2_id);
        CREATE INDEX IF NOT EXISTS idx_friends_conversation ON friends(conversation_id);

        CREATE TABLE IF NOT EXISTS blocks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            blocker_id INTEGER NOT NULL,
            blocked_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_blocker_blocked
            ON blocks(blocker_id, blocked_id);
        CREATE INDEX IF NOT EXISTS idx_blocks_blocked ON blocks(blocked_id);

        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            is_group INTEGER NOT NULL,
            image_url TEXT,
            admin_id INTEGER,
            last_message_id INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            conversation_id INTEGER NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            status TEXT DEFAULT 'active',
            last_seen_message_id INTEGER,
            exit_at INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_members_member_conversation
            ON conversation_members(member_id, conversation_id);
        CREATE INDEX IF NOT EXISTS idx_members_conversation
            ON conversation_members(conversation_id);

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id INTEGER NOT NULL,
            conversation_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            read_status TEXT NOT NULL DEFAULT 'sent',
            read_by TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);

        CREATE TABLE IF NOT EXISTS group_invitations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL,
            sender_id INTEGER NOT NULL,
            receiver_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_invitations_receiver ON group_invitations(receiver_id);
        CREATE INDEX IF NOT EXISTS idx_invitations_group ON group_invitations(group_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_invitations_pending
            ON group_invitations(receiver_id, group_id) WHERE status = 'pending';
        "#,
    )?;

    Ok(())
}

/// Memberships stored without a status predate the lifecycle column and are active.
fn migrate_legacy_membership_status(conn: &Connection) -> SqliteResult<usize> {
    conn.execute(
        "UPDATE conversation_members SET status = 'active' WHERE status IS NULL OR status = ''",
        [],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_initialize_in_memory_database() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        let tables: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            )
            .expect("Query failed")
            .query_map([], |row| row.get(0))
            .expect("Mapping failed")
            .collect::<Result<Vec<_>, _>>()
            .expect("Collection failed");

        for table in [
            "users",
            "friend_requests",
            "friends",
            "blocks",
            "conversations",
            "conversation_members",
            "messages",
            "group_invitations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_membership_table_schema() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        let mut stmt = conn
            .prepare("PRAGMA table_info(conversation_members)")
            .expect("Query failed");
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("Mapping failed")
            .collect::<Result<Vec<_>, _>>()
            .expect("Collection failed");

        assert!(columns.contains(&"status".to_string()));
        assert!(columns.contains(&"exit_at".to_string()));
        assert!(columns.contains(&"last_seen_message_id".to_string()));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("First init failed");
        initialize_database(&conn).expect("Second init failed");
    }

    #[test]
    fn test_legacy_membership_status_migrated() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        conn.execute(
            "INSERT INTO conversation_members (member_id, conversation_id, role, status)
             VALUES (1, 1, 'member', NULL)",
            [],
        )
        .expect("Insert failed");

        initialize_database(&conn).expect("Re-init failed");

        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM conversation_members WHERE member_id = 1",
                [],
                |row| row.get(0),
            )
            .expect("Query failed");
        assert_eq!(status.as_deref(), Some("active"));
    }

    #[test]
    fn test_only_one_pending_invitation_per_receiver_group() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        conn.execute(
            "INSERT INTO group_invitations (group_id, sender_id, receiver_id, status, created_at)
             VALUES (1, 1, 2, 'rejected', 0)",
            [],
        )
        .expect("Insert failed");
        conn.execute(
            "INSERT INTO group_invitations (group_id, sender_id, receiver_id, status, created_at)
             VALUES (1, 1, 2, 'pending', 1)",
            [],
        )
        .expect("Pending insert next to a terminal row should succeed");

        let duplicate = conn.execute(
            "INSERT INTO group_invitations (group_id, sender_id, receiver_id, status, created_at)
             VALUES (1, 1, 2, 'pending', 2)",
            [],
        );
        assert!(duplicate.is_err());
    }
}
