use chrono::Utc;
use remb_api::Tokens;
use remb_core::{RembError, RembResult};
use remb_fs::DataPaths;
use rusqlite::{Connection, Error as SqlError, ErrorCode, OptionalExtension, params};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TOKENS_KEY: &str = "auth/tokens";
const COOKIE_KEY: &str = "sync/cookie";

/// Key namespace of user records in the remote patch stream.
pub const USER_KEY_PREFIX: &str = "User/";

/// Fields shared by every locally stored note.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNote {
    pub guid: String,
    pub link: String,
    pub note_text: String,
    pub content: Value,
    pub slots: Vec<String>,
}

/// A stored note together with its local row id. The id is what gives a
/// remote item a stable local identity across updates.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalNote {
    pub id: i64,
    pub guid: String,
    pub link: String,
    pub note_text: String,
    pub content: Value,
    pub slots: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn open(paths: &DataPaths) -> RembResult<Self> {
        fs::create_dir_all(&paths.root).map_err(|err| {
            RembError::io(format!(
                "failed to create data directory '{}': {}",
                paths.root.display(),
                err
            ))
        })?;

        let store = Self {
            db_path: paths.state_db_path.clone(),
        };

        let conn = store.connection()?;
        store.initialize_schema(&conn)?;
        Ok(store)
    }

    pub fn load_tokens(&self) -> RembResult<Option<Tokens>> {
        let Some(payload) = self.kv_get(TOKENS_KEY)? else {
            return Ok(None);
        };

        let tokens = serde_json::from_str::<Tokens>(&payload).map_err(|err| {
            RembError::store(format!(
                "failed to parse stored tokens in '{}': {}",
                self.db_path.display(),
                err
            ))
        })?;
        Ok(Some(tokens))
    }

    pub fn save_tokens(&self, tokens: &Tokens) -> RembResult<()> {
        let payload = serde_json::to_string(tokens)
            .map_err(|err| RembError::store(format!("failed to encode tokens: {err}")))?;
        self.kv_set(TOKENS_KEY, &payload)
    }

    pub fn clear_tokens(&self) -> RembResult<()> {
        self.kv_delete(TOKENS_KEY)
    }

    pub fn load_cookie(&self) -> RembResult<Option<i64>> {
        let Some(payload) = self.kv_get(COOKIE_KEY)? else {
            return Ok(None);
        };

        let cookie = serde_json::from_str::<i64>(&payload).map_err(|err| {
            RembError::store(format!(
                "failed to parse sync cursor in '{}': {}",
                self.db_path.display(),
                err
            ))
        })?;
        Ok(Some(cookie))
    }

    pub fn save_cookie(&self, cookie: i64) -> RembResult<()> {
        self.kv_set(COOKIE_KEY, &cookie.to_string())
    }

    pub fn clear_cookie(&self) -> RembResult<()> {
        self.kv_delete(COOKIE_KEY)
    }

    /// Stores a user record under its raw patch key, e.g. `User/abc123`.
    pub fn put_user(&self, key: &str, value: &Map<String, Value>) -> RembResult<()> {
        let payload = serde_json::to_string(value)
            .map_err(|err| RembError::store(format!("failed to encode user record: {err}")))?;
        self.kv_set(key, &payload)
    }

    pub fn delete_user(&self, key: &str) -> RembResult<()> {
        self.kv_delete(key)
    }

    pub fn clear_users(&self) -> RembResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM kv WHERE key LIKE ?1",
            params![format!("{USER_KEY_PREFIX}%")],
        )
        .map_err(|err| sqlite_error("clear user records", &self.db_path, err))?;
        Ok(())
    }

    /// Looks up the email of the signed-in user by subject id. Absent record
    /// is `None`; a record without a usable email is a content error.
    pub fn user_email(&self, subject_id: &str) -> RembResult<Option<String>> {
        let key = user_record_key(subject_id);
        let Some(payload) = self.kv_get(&key)? else {
            return Ok(None);
        };

        let value = serde_json::from_str::<Value>(&payload).map_err(|err| {
            RembError::store(format!(
                "failed to parse user record '{}' in '{}': {}",
                key,
                self.db_path.display(),
                err
            ))
        })?;
        email_from_record(&key, &value).map(Some)
    }

    /// Maps every stored note guid to its local row id.
    pub fn note_guid_index(&self) -> RembResult<BTreeMap<String, i64>> {
        let conn = self.connection()?;
        let mut statement = conn
            .prepare("SELECT guid, id FROM notes")
            .map_err(|err| sqlite_error("prepare note index query", &self.db_path, err))?;

        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|err| sqlite_error("query note index", &self.db_path, err))?;

        let mut index = BTreeMap::new();
        for row in rows {
            let (guid, id) =
                row.map_err(|err| sqlite_error("read note index row", &self.db_path, err))?;
            index.insert(guid, id);
        }

        Ok(index)
    }

    pub fn get_note(&self, id: i64) -> RembResult<Option<LocalNote>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                "SELECT guid, link, note_text, content_json, slots_json FROM notes WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| sqlite_error("load note", &self.db_path, err))?;

        let Some((guid, link, note_text, content_json, slots_json)) = row else {
            return Ok(None);
        };

        Ok(Some(LocalNote {
            id,
            guid,
            link,
            note_text,
            content: self.parse_note_json(&content_json)?,
            slots: serde_json::from_str::<Vec<String>>(&slots_json).map_err(|err| {
                RembError::store(format!(
                    "failed to parse note slots in '{}': {}",
                    self.db_path.display(),
                    err
                ))
            })?,
        }))
    }

    pub fn add_notes(&self, notes: &[NewNote]) -> RembResult<()> {
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start note insert transaction", &self.db_path, err))?;

        for note in notes {
            let (content_json, slots_json) = encode_note_payloads(&note.content, &note.slots)?;
            transaction
                .execute(
                    "INSERT INTO notes (guid, link, note_text, content_json, slots_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        note.guid,
                        note.link,
                        note.note_text,
                        content_json,
                        slots_json,
                        Utc::now().to_rfc3339()
                    ],
                )
                .map_err(|err| sqlite_error("insert note", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit note insert transaction", &self.db_path, err))?;
        Ok(())
    }

    pub fn update_notes(&self, notes: &[LocalNote]) -> RembResult<()> {
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start note update transaction", &self.db_path, err))?;

        for note in notes {
            let (content_json, slots_json) = encode_note_payloads(&note.content, &note.slots)?;
            transaction
                .execute(
                    "UPDATE notes SET link = ?2, note_text = ?3, content_json = ?4,
                     slots_json = ?5, updated_at = ?6 WHERE id = ?1",
                    params![
                        note.id,
                        note.link,
                        note.note_text,
                        content_json,
                        slots_json,
                        Utc::now().to_rfc3339()
                    ],
                )
                .map_err(|err| sqlite_error("update note", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit note update transaction", &self.db_path, err))?;
        Ok(())
    }

    pub fn remove_notes(&self, ids: &[i64]) -> RembResult<()> {
        let mut conn = self.connection()?;
        let transaction = conn
            .transaction()
            .map_err(|err| sqlite_error("start note delete transaction", &self.db_path, err))?;

        for id in ids {
            transaction
                .execute("DELETE FROM notes WHERE id = ?1", params![id])
                .map_err(|err| sqlite_error("delete note", &self.db_path, err))?;
        }

        transaction
            .commit()
            .map_err(|err| sqlite_error("commit note delete transaction", &self.db_path, err))?;
        Ok(())
    }

    pub fn note_count(&self) -> RembResult<i64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .map_err(|err| sqlite_error("count notes", &self.db_path, err))
    }

    fn kv_get(&self, key: &str) -> RembResult<Option<String>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT value_json FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|err| sqlite_error("load kv cell", &self.db_path, err))
    }

    fn kv_set(&self, key: &str, payload: &str) -> RembResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv (key, value_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error("save kv cell", &self.db_path, err))?;
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> RembResult<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|err| sqlite_error("delete kv cell", &self.db_path, err))?;
        Ok(())
    }

    fn parse_note_json(&self, payload: &str) -> RembResult<Value> {
        serde_json::from_str::<Value>(payload).map_err(|err| {
            RembError::store(format!(
                "failed to parse note content in '{}': {}",
                self.db_path.display(),
                err
            ))
        })
    }

    fn connection(&self) -> RembResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|err| sqlite_error("open state database", &self.db_path, err))
    }

    fn initialize_schema(&self, conn: &Connection) -> RembResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS notes (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 guid TEXT NOT NULL UNIQUE,
                 link TEXT NOT NULL,
                 note_text TEXT NOT NULL,
                 content_json TEXT NOT NULL,
                 slots_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|err| sqlite_error("initialize schema", &self.db_path, err))?;

        Ok(())
    }
}

pub fn user_record_key(subject_id: &str) -> String {
    format!("{USER_KEY_PREFIX}{subject_id}")
}

fn email_from_record(key: &str, value: &Value) -> RembResult<String> {
    value
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            RembError::content(format!(
                "user record '{key}' carries no usable 'email' field"
            ))
        })
}

fn encode_note_payloads(content: &Value, slots: &[String]) -> RembResult<(String, String)> {
    let content_json = serde_json::to_string(content)
        .map_err(|err| RembError::store(format!("failed to encode note content: {err}")))?;
    let slots_json = serde_json::to_string(slots)
        .map_err(|err| RembError::store(format!("failed to encode note slots: {err}")))?;
    Ok((content_json, slots_json))
}

fn sqlite_error(action: &str, db_path: &Path, err: SqlError) -> RembError {
    if let SqlError::SqliteFailure(code, message) = &err
        && (code.code == ErrorCode::DatabaseCorrupt || code.code == ErrorCode::NotADatabase)
    {
        let detail = message.as_deref().unwrap_or("sqlite reported corruption");
        return RembError::store(format!(
            "failed to {action}: state database '{}' is corrupted ({detail}); remove 'state.db' from the data directory and run `remb pull` to rebuild it",
            db_path.display()
        ));
    }

    RembError::store(format!(
        "failed to {action} using state database '{}': {}",
        db_path.display(),
        err
    ))
}
