use rusqlite::OptionalExtension;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use praxis_core::error::PraxisError;
use praxis_core::timestamp::{now_iso_z, parse_timestamp, to_iso_z};

pub const DB_FILE_NAME: &str = "praxis.db";

pub struct Database {
    conn: Mutex<Connection>,
}

pub async fn call_blocking<T, F>(db: std::sync::Arc<Database>, f: F) -> Result<T, PraxisError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, PraxisError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| PraxisError::Task(format!("DB task join error: {e}")))?
}

#[derive(Debug, Clone)]
pub struct StoredChat {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub archived: bool,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub user_id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// A turn of the single per-user transcript served by the legacy endpoints.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub time: String,
}

const SCHEMA_VERSION_CURRENT: i64 = 2;

fn get_schema_version(conn: &Connection) -> Result<i64, PraxisError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS db_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM db_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<(), PraxisError> {
    conn.execute(
        "INSERT INTO db_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn apply_schema_migrations(conn: &Connection) -> Result<(), PraxisError> {
    let mut version = get_schema_version(conn)?;
    if version < 1 {
        set_schema_version(conn, 1)?;
        version = 1;
    }
    if version < 2 {
        // Secondary index for per-chat scrolling without the user prefix.
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_chat_created
                ON chat_messages(chat_id, created_at)",
            [],
        )?;
        set_schema_version(conn, 2)?;
        version = 2;
    }
    if version != SCHEMA_VERSION_CURRENT {
        set_schema_version(conn, SCHEMA_VERSION_CURRENT)?;
    }
    Ok(())
}

/// Random positive 63-bit identifier for a newly registered user.
fn random_user_id() -> i64 {
    let bits = (uuid::Uuid::new_v4().as_u128() as u64) & (i64::MAX as u64);
    (bits as i64).max(1)
}

/// `wanted`, or one millisecond past `latest` when that is not already later.
fn next_message_stamp(wanted: &str, latest: Option<&str>) -> String {
    let Some(latest) = latest else {
        return wanted.to_string();
    };
    if wanted > latest {
        return wanted.to_string();
    }
    match parse_timestamp(latest) {
        Some(dt) => to_iso_z(dt + chrono::Duration::milliseconds(1)),
        None => wanted.to_string(),
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredChat> {
    Ok(StoredChat {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        archived: row.get::<_, i32>(5)? != 0,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chat_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Database {
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn new(data_dir: &str) -> Result<Self, PraxisError> {
        let db_path = Path::new(data_dir).join(DB_FILE_NAME);
        std::fs::create_dir_all(data_dir)?;

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_chats_user_updated
                ON chats(user_id, updated_at DESC);

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_user_chat_created
                ON chat_messages(user_id, chat_id, created_at);

            CREATE TABLE IF NOT EXISTS history_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                time TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_messages_user_time
                ON history_messages(user_id, time);
            ",
        )?;
        apply_schema_migrations(&conn)?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn ping(&self) -> bool {
        let conn = self.lock_conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    // --- Users ---

    /// Return the id registered for `username`, allocating a fresh random id
    /// on first sight.
    pub fn resolve_or_create_user(&self, username: &str) -> Result<i64, PraxisError> {
        let conn = self.lock_conn();
        if let Some(id) = conn
            .query_row(
                "SELECT user_id FROM users WHERE username = ?1",
                params![username],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        let now = now_iso_z();
        loop {
            let candidate = random_user_id();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users(username, user_id, created_at) VALUES(?1, ?2, ?3)",
                params![username, candidate, now],
            )?;
            if inserted > 0 {
                return Ok(candidate);
            }
            // Either the id collided or another writer registered the name.
            if let Some(id) = conn
                .query_row(
                    "SELECT user_id FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
            {
                return Ok(id);
            }
        }
    }

    // --- Chats ---

    pub fn create_chat(&self, user_id: &str, title: Option<&str>) -> Result<StoredChat, PraxisError> {
        let conn = self.lock_conn();
        let now = now_iso_z();
        let chat = StoredChat {
            id: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            title: title.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
            archived: false,
        };
        conn.execute(
            "INSERT INTO chats(id, user_id, title, created_at, updated_at, archived)
             VALUES(?1, ?2, ?3, ?4, ?5, 0)",
            params![
                chat.id,
                chat.user_id,
                chat.title,
                chat.created_at,
                chat.updated_at
            ],
        )?;
        Ok(chat)
    }

    /// Non-archived chats for a user, most recently updated first.
    pub fn list_chats(&self, user_id: &str, limit: usize) -> Result<Vec<StoredChat>, PraxisError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at, archived
             FROM chats
             WHERE user_id = ?1 AND archived = 0
             ORDER BY updated_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let chats = stmt
            .query_map(params![user_id, limit as i64], row_to_chat)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    /// Look up a chat only if it belongs to `user_id` and is not archived.
    pub fn get_owned_chat(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> Result<Option<StoredChat>, PraxisError> {
        let conn = self.lock_conn();
        let chat = conn
            .query_row(
                "SELECT id, user_id, title, created_at, updated_at, archived
                 FROM chats
                 WHERE id = ?1 AND user_id = ?2 AND archived = 0",
                params![chat_id, user_id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    pub fn touch_chat(&self, chat_id: &str, updated_at: &str) -> Result<bool, PraxisError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
            params![updated_at, chat_id],
        )?;
        Ok(rows > 0)
    }

    /// Soft-archive a chat. Messages are kept.
    pub fn archive_chat(&self, user_id: &str, chat_id: &str) -> Result<bool, PraxisError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            "UPDATE chats SET archived = 1, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3 AND archived = 0",
            params![now_iso_z(), chat_id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Chat messages ---

    /// Insert a message and return the `created_at` actually stored. Stamps
    /// are kept strictly increasing per chat so `before` cursors never skip a
    /// row that shares a millisecond with its neighbour.
    pub fn insert_chat_message(&self, msg: &StoredMessage) -> Result<String, PraxisError> {
        let conn = self.lock_conn();
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM chat_messages WHERE chat_id = ?1",
            params![msg.chat_id],
            |row| row.get(0),
        )?;
        let created_at = next_message_stamp(&msg.created_at, latest.as_deref());
        conn.execute(
            "INSERT INTO chat_messages (id, user_id, chat_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.id,
                msg.user_id,
                msg.chat_id,
                msg.role,
                msg.content,
                created_at,
            ],
        )?;
        Ok(created_at)
    }

    /// Newest-first page of messages strictly older than `before` (or the
    /// latest ones when `before` is absent), returned oldest first. The flag
    /// reports whether older messages remain.
    pub fn fetch_messages_page(
        &self,
        user_id: &str,
        chat_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<(Vec<StoredMessage>, bool), PraxisError> {
        let conn = self.lock_conn();
        let fetch = (limit + 1) as i64;
        let mut messages = match before {
            Some(before) => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, chat_id, role, content, created_at
                     FROM chat_messages
                     WHERE user_id = ?1 AND chat_id = ?2 AND created_at < ?3
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(params![user_id, chat_id, before, fetch], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, chat_id, role, content, created_at
                     FROM chat_messages
                     WHERE user_id = ?1 AND chat_id = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![user_id, chat_id, fetch], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        Ok((messages, has_more))
    }

    /// Last `limit` messages of a chat, oldest first.
    pub fn recent_chat_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, PraxisError> {
        let (messages, _) = self.fetch_messages_page(user_id, chat_id, limit, None)?;
        Ok(messages)
    }

    // --- Legacy single-transcript history ---

    pub fn append_history(&self, records: &[HistoryRecord]) -> Result<(), PraxisError> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        for r in records {
            tx.execute(
                "INSERT INTO history_messages (user_id, role, content, time)
                 VALUES (?1, ?2, ?3, ?4)",
                params![r.user_id, r.role, r.content, r.time],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_history(&self, user_id: &str) -> Result<Vec<HistoryRecord>, PraxisError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, role, content, time
             FROM history_messages
             WHERE user_id = ?1
             ORDER BY time ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(HistoryRecord {
                    user_id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("praxis_test_{}", uuid::Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (db, dir)
    }

    fn cleanup(dir: &std::path::Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn msg(user: &str, chat: &str, role: &str, content: &str, ts: &str) -> StoredMessage {
        StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            chat_id: chat.into(),
            role: role.into(),
            content: content.into(),
            created_at: ts.into(),
        }
    }

    #[test]
    fn test_new_database_creates_tables() {
        let (db, dir) = test_db();
        assert!(db.ping());
        assert!(db.list_chats("1", 10).unwrap().is_empty());
        assert!(db.get_history("1").unwrap().is_empty());
        cleanup(&dir);
    }

    #[test]
    fn test_schema_version_is_tracked() {
        let (db, dir) = test_db();
        let conn = db.lock_conn();
        let version: String = conn
            .query_row(
                "SELECT value FROM db_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION_CURRENT.to_string());
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_resolve_or_create_user_is_stable() {
        let (db, dir) = test_db();
        let first = db.resolve_or_create_user("alice").unwrap();
        let again = db.resolve_or_create_user("alice").unwrap();
        let other = db.resolve_or_create_user("bob").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(first > 0);
        cleanup(&dir);
    }

    #[test]
    fn test_list_chats_newest_first_and_skips_archived() {
        let (db, dir) = test_db();
        let a = db.create_chat("1", Some("first")).unwrap();
        let b = db.create_chat("1", None).unwrap();
        let c = db.create_chat("1", Some("third")).unwrap();
        db.create_chat("2", Some("not mine")).unwrap();

        db.touch_chat(&a.id, "2999-01-01T00:00:00.000Z").unwrap();
        assert!(db.archive_chat("1", &c.id).unwrap());

        let chats = db.list_chats("1", 200).unwrap();
        let ids: Vec<&str> = chats.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
        assert!(chats[1].title.is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_get_owned_chat_scopes_by_user() {
        let (db, dir) = test_db();
        let chat = db.create_chat("1", None).unwrap();
        assert!(db.get_owned_chat("1", &chat.id).unwrap().is_some());
        assert!(db.get_owned_chat("2", &chat.id).unwrap().is_none());
        assert!(db.get_owned_chat("1", "no-such-chat").unwrap().is_none());
        assert!(!db.archive_chat("2", &chat.id).unwrap());
        assert!(db.archive_chat("1", &chat.id).unwrap());
        assert!(db.get_owned_chat("1", &chat.id).unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_fetch_messages_page_and_has_more() {
        let (db, dir) = test_db();
        for i in 0..5 {
            let ts = format!("2025-01-01T00:00:0{i}.000Z");
            db.insert_chat_message(&msg("1", "c", "user", &format!("m{i}"), &ts))
                .unwrap();
        }
        db.insert_chat_message(&msg("2", "c", "user", "foreign", "2025-01-01T00:00:09.000Z"))
            .unwrap();

        let (page, has_more) = db.fetch_messages_page("1", "c", 2, None).unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
        assert!(has_more);

        let (older, has_more) = db
            .fetch_messages_page("1", "c", 2, Some(&page[0].created_at))
            .unwrap();
        let texts: Vec<&str> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2"]);
        assert!(has_more);

        let (oldest, has_more) = db
            .fetch_messages_page("1", "c", 2, Some(&older[0].created_at))
            .unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].content, "m0");
        assert!(!has_more);
        cleanup(&dir);
    }

    #[test]
    fn test_same_millisecond_messages_stay_reachable() {
        let (db, dir) = test_db();
        let ts = "2025-01-01T00:00:00.000Z";
        let first = db
            .insert_chat_message(&msg("1", "c", "user", "question", ts))
            .unwrap();
        let second = db
            .insert_chat_message(&msg("1", "c", "assistant", "answer", ts))
            .unwrap();
        assert_eq!(first, ts);
        assert_eq!(second, "2025-01-01T00:00:00.001Z");

        let recent = db.recent_chat_messages("1", "c", 20).unwrap();
        assert_eq!(recent[0].content, "question");
        assert_eq!(recent[1].content, "answer");

        let (page, has_more) = db.fetch_messages_page("1", "c", 1, None).unwrap();
        assert_eq!(page[0].content, "answer");
        assert!(has_more);
        let (older, has_more) = db
            .fetch_messages_page("1", "c", 1, Some(&page[0].created_at))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].content, "question");
        assert!(!has_more);
        cleanup(&dir);
    }

    #[test]
    fn test_stamps_are_per_chat() {
        let (db, dir) = test_db();
        let ts = "2025-01-01T00:00:05.000Z";
        db.insert_chat_message(&msg("1", "a", "user", "x", ts)).unwrap();
        let other = db.insert_chat_message(&msg("1", "b", "user", "y", ts)).unwrap();
        assert_eq!(other, ts);
        let earlier = db
            .insert_chat_message(&msg("1", "a", "user", "z", "2025-01-01T00:00:01.000Z"))
            .unwrap();
        assert_eq!(earlier, "2025-01-01T00:00:05.001Z");
        cleanup(&dir);
    }

    #[test]
    fn test_history_roundtrip_is_ordered_and_scoped() {
        let (db, dir) = test_db();
        db.append_history(&[
            HistoryRecord {
                user_id: "1".into(),
                role: "user".into(),
                content: "hi".into(),
                time: "2025-01-01T00:00:00.000Z".into(),
            },
            HistoryRecord {
                user_id: "1".into(),
                role: "assistant".into(),
                content: "hello".into(),
                time: "2025-01-01T00:00:00.000Z".into(),
            },
            HistoryRecord {
                user_id: "2".into(),
                role: "user".into(),
                content: "other".into(),
                time: "2024-01-01T00:00:00.000Z".into(),
            },
        ])
        .unwrap();
        let history = db.get_history("1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].role, "assistant");
        cleanup(&dir);
    }
}
