//! SQLite-backed persistence.
//!
//! [`MetaStore`] holds the relational metadata (users, sessions, files, chat
//! history) behind a single mutex-guarded connection. Tabular data extracted
//! from spreadsheets lives in separate per-user database files managed by
//! [`tabular::TabularStore`].

pub mod tabular;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::service::types::{
    Citation, FileRecord, MessageRecord, ServiceError, TablePayload, UserRecord,
};

/// Metadata database holding users, sessions, file records, and chat history.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

/// Full file row including storage details not exposed through the API.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Stable file identifier.
    pub id: String,
    /// Owning user identifier.
    pub owner_id: String,
    /// Sanitized filename, unique per owner.
    pub filename: String,
    /// Lowercased extension.
    pub file_type: String,
    /// Whether the file was routed to the tabular pipeline.
    pub is_structured: bool,
    /// Location of the stored bytes on disk.
    pub storage_path: String,
    /// Size of the stored bytes.
    pub size_bytes: u64,
    /// RFC 3339 upload timestamp.
    pub created_at: String,
}

impl StoredFile {
    /// Project the row into its API-facing shape.
    pub fn to_record(&self) -> FileRecord {
        FileRecord {
            id: self.id.clone(),
            filename: self.filename.clone(),
            file_type: self.file_type.clone(),
            is_structured: self.is_structured,
            size_bytes: self.size_bytes,
            created_at: self.created_at.clone(),
        }
    }
}

impl MetaStore {
    /// Open (or create) the metadata database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory metadata database, used by tests.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                is_structured INTEGER NOT NULL DEFAULT 0,
                storage_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (owner_id, filename),
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                table_json TEXT,
                citations_json TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    // users

    /// Insert a new user.
    ///
    /// A duplicate email surfaces as [`ServiceError::Conflict`].
    pub fn create_user(
        &self,
        email: &str,
        password_digest: &str,
        role: &str,
    ) -> Result<UserRecord, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO users (id, email, password_digest, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, email, password_digest, role, created_at],
        );
        match inserted {
            Ok(_) => Ok(UserRecord {
                id,
                email: email.to_string(),
                role: role.to_string(),
                created_at,
            }),
            Err(err) if is_unique_violation(&err) => {
                Err(ServiceError::Conflict("Email already registered".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Look up a user by email, returning the record and the stored password digest.
    pub fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(UserRecord, String)>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, email, role, created_at, password_digest FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    UserRecord {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        role: row.get(2)?,
                        created_at: row.get(3)?,
                    },
                    row.get(4)?,
                ))
            },
        )
        .optional()
    }

    // sessions

    /// Persist a freshly issued session token.
    pub fn insert_session(
        &self,
        token: &str,
        user_id: &str,
        expires_at: &str,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id, now_rfc3339(), expires_at],
        )?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Expired sessions are deleted on sight and reported as absent.
    pub fn session_user(&self, token: &str) -> Result<Option<UserRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT u.id, u.email, u.role, u.created_at, s.expires_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1",
                params![token],
                |row| {
                    Ok((
                        UserRecord {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            role: row.get(2)?,
                            created_at: row.get(3)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((user, expires_at)) if !is_expired(&expires_at) => Ok(Some(user)),
            Some(_) => {
                conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Delete a session token, returning whether one existed.
    pub fn delete_session(&self, token: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    // files

    /// Insert or replace the file record for `(owner, filename)`.
    pub fn upsert_file(&self, file: &StoredFile) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (id, owner_id, filename, file_type, is_structured, storage_path, size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (owner_id, filename) DO UPDATE SET
                 id = excluded.id,
                 file_type = excluded.file_type,
                 is_structured = excluded.is_structured,
                 storage_path = excluded.storage_path,
                 size_bytes = excluded.size_bytes,
                 created_at = excluded.created_at",
            params![
                file.id,
                file.owner_id,
                file.filename,
                file.file_type,
                file.is_structured,
                file.storage_path,
                file.size_bytes as i64,
                file.created_at,
            ],
        )?;
        Ok(())
    }

    /// List a user's files, oldest first.
    pub fn list_files(&self, owner_id: &str) -> Result<Vec<StoredFile>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, filename, file_type, is_structured, storage_path, size_bytes, created_at
             FROM files WHERE owner_id = ?1 ORDER BY created_at, filename",
        )?;
        let rows = stmt.query_map(params![owner_id], file_from_row)?;
        rows.collect()
    }

    /// Fetch one file record by owner and filename.
    pub fn get_file(
        &self,
        owner_id: &str,
        filename: &str,
    ) -> Result<Option<StoredFile>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, owner_id, filename, file_type, is_structured, storage_path, size_bytes, created_at
             FROM files WHERE owner_id = ?1 AND filename = ?2",
            params![owner_id, filename],
            file_from_row,
        )
        .optional()
    }

    /// Delete one file record, returning whether it existed.
    pub fn delete_file(&self, owner_id: &str, filename: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM files WHERE owner_id = ?1 AND filename = ?2",
            params![owner_id, filename],
        )?;
        Ok(deleted > 0)
    }

    /// Whether the user has at least one structured file.
    pub fn has_structured_files(&self, owner_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE owner_id = ?1 AND is_structured = 1",
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All file rows across users, used to reconcile against the upload directory.
    pub fn all_files(&self) -> Result<Vec<StoredFile>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, filename, file_type, is_structured, storage_path, size_bytes, created_at
             FROM files ORDER BY owner_id, filename",
        )?;
        let rows = stmt.query_map([], file_from_row)?;
        rows.collect()
    }

    // chat history

    /// Append one chat turn to the user's history.
    pub fn append_message(
        &self,
        owner_id: &str,
        role: &str,
        content: &str,
        table: Option<&TablePayload>,
        citations: Option<&[Citation]>,
    ) -> Result<(), ServiceError> {
        let table_json = table.map(serde_json::to_string).transpose()?;
        let citations_json = citations.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (owner_id, role, content, table_json, citations_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                owner_id,
                role,
                content,
                table_json,
                citations_json,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// The user's most recent chat turns, oldest first.
    pub fn recent_messages(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, table_json, citations_json, created_at
             FROM messages WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![owner_id, limit as i64], |row| {
            let table_json: Option<String> = row.get(3)?;
            let citations_json: Option<String> = row.get(4)?;
            Ok(MessageRecord {
                id: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
                table: table_json.and_then(|json| serde_json::from_str(&json).ok()),
                citations: citations_json.and_then(|json| serde_json::from_str(&json).ok()),
                created_at: row.get(5)?,
            })
        })?;
        let mut messages: Vec<MessageRecord> = rows.collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn file_from_row(row: &rusqlite::Row<'_>) -> Result<StoredFile, rusqlite::Error> {
    Ok(StoredFile {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        file_type: row.get(3)?,
        is_structured: row.get(4)?,
        storage_path: row.get(5)?,
        size_bytes: row.get::<_, i64>(6)? as u64,
        created_at: row.get(7)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn is_expired(expires_at: &str) -> bool {
    match OffsetDateTime::parse(expires_at, &Rfc3339) {
        Ok(expiry) => expiry <= OffsetDateTime::now_utc(),
        Err(_) => true,
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(owner_id: &str, filename: &str) -> StoredFile {
        StoredFile {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            file_type: "pdf".into(),
            is_structured: false,
            storage_path: format!("uploads/{owner_id}/{filename}"),
            size_bytes: 128,
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let store = MetaStore::open_in_memory().expect("store");
        store
            .create_user("ada@example.com", "digest", "user")
            .expect("first insert");
        let err = store
            .create_user("ada@example.com", "other", "user")
            .expect_err("duplicate insert");
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn session_round_trip_and_expiry() {
        let store = MetaStore::open_in_memory().expect("store");
        let user = store
            .create_user("ada@example.com", "digest", "user")
            .expect("user");

        store
            .insert_session("tok-live", &user.id, "2999-01-01T00:00:00Z")
            .expect("insert live");
        let resolved = store.session_user("tok-live").expect("lookup");
        assert_eq!(resolved.map(|u| u.email), Some("ada@example.com".into()));

        store
            .insert_session("tok-dead", &user.id, "2000-01-01T00:00:00Z")
            .expect("insert dead");
        assert!(store.session_user("tok-dead").expect("lookup").is_none());
        // expired row was dropped, so a delete finds nothing
        assert!(!store.delete_session("tok-dead").expect("delete"));

        assert!(store.delete_session("tok-live").expect("delete"));
        assert!(store.session_user("tok-live").expect("lookup").is_none());
    }

    #[test]
    fn files_are_scoped_per_owner_and_replaced_on_upsert() {
        let store = MetaStore::open_in_memory().expect("store");
        let ada = store.create_user("ada@example.com", "d", "user").expect("ada");
        let bob = store.create_user("bob@example.com", "d", "user").expect("bob");

        store
            .upsert_file(&sample_file(&ada.id, "report.pdf"))
            .expect("insert");
        store
            .upsert_file(&sample_file(&bob.id, "report.pdf"))
            .expect("insert other owner");

        let mut replacement = sample_file(&ada.id, "report.pdf");
        replacement.size_bytes = 999;
        store.upsert_file(&replacement).expect("replace");

        let ada_files = store.list_files(&ada.id).expect("list");
        assert_eq!(ada_files.len(), 1);
        assert_eq!(ada_files[0].size_bytes, 999);
        assert_eq!(ada_files[0].id, replacement.id);

        assert!(store.delete_file(&ada.id, "report.pdf").expect("delete"));
        assert!(!store.delete_file(&ada.id, "report.pdf").expect("repeat"));
        // the other owner's copy is untouched
        assert!(store.get_file(&bob.id, "report.pdf").expect("get").is_some());
    }

    #[test]
    fn structured_flag_is_tracked() {
        let store = MetaStore::open_in_memory().expect("store");
        let user = store.create_user("ada@example.com", "d", "user").expect("user");
        assert!(!store.has_structured_files(&user.id).expect("empty"));

        let mut file = sample_file(&user.id, "sales.csv");
        file.file_type = "csv".into();
        file.is_structured = true;
        store.upsert_file(&file).expect("insert");
        assert!(store.has_structured_files(&user.id).expect("structured"));
    }

    #[test]
    fn messages_round_trip_with_payloads() {
        let store = MetaStore::open_in_memory().expect("store");
        let user = store.create_user("ada@example.com", "d", "user").expect("user");

        store
            .append_message(&user.id, "user", "how many rows?", None, None)
            .expect("user turn");
        let table = TablePayload {
            columns: vec!["count".into()],
            rows: vec![vec![serde_json::json!(42)]],
        };
        let citations = vec![Citation {
            source: "sales.csv".into(),
            locator: Some("row=1".into()),
            score: 0.9,
            snippet: "Row 1 of sales.csv".into(),
        }];
        store
            .append_message(
                &user.id,
                "assistant",
                "There are 42 rows.",
                Some(&table),
                Some(&citations),
            )
            .expect("assistant turn");

        let messages = store.recent_messages(&user.id, 10).expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        let stored_table = messages[1].table.as_ref().expect("table");
        assert_eq!(stored_table.columns, vec!["count".to_string()]);
        let stored_citations = messages[1].citations.as_ref().expect("citations");
        assert_eq!(stored_citations[0].source, "sales.csv");
    }

    #[test]
    fn recent_messages_honors_limit_and_order() {
        let store = MetaStore::open_in_memory().expect("store");
        let user = store.create_user("ada@example.com", "d", "user").expect("user");
        for n in 0..5 {
            store
                .append_message(&user.id, "user", &format!("turn {n}"), None, None)
                .expect("append");
        }
        let messages = store.recent_messages(&user.id, 2).expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "turn 3");
        assert_eq!(messages[1].content, "turn 4");
    }
}
