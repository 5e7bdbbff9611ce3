//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::SecretString;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::models::{
    Account, AuthState, DestinationChannel, DestinationWithTopics, Post, SourceChannel, Topic,
};
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // Cascades on destination_topics/post_topics depend on this.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Destination row id for (account, channel), if present.
    async fn destination_row_id(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM destination_channels WHERE account_id = ?1 AND channel_id = ?2",
                params![account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("destination_row_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("destination_row_id parse: {e}")))?;
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("destination_row_id: {e}"))),
        }
    }

    /// Topic row id by name, if present.
    async fn topic_row_id(&self, name: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id FROM topics WHERE name = ?1", params![name])
            .await
            .map_err(|e| DatabaseError::Query(format!("topic_row_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("topic_row_id parse: {e}")))?;
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("topic_row_id: {e}"))),
        }
    }

    async fn topics_by_destination_row(
        &self,
        destination_id: &str,
    ) -> Result<Vec<Topic>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT t.id, t.name FROM topics t
                 JOIN destination_topics dt ON dt.topic_id = t.id
                 WHERE dt.destination_id = ?1
                 ORDER BY t.name",
                params![destination_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("topics_by_destination_row: {e}")))?;

        let mut topics = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("topics_by_destination_row: {e}")))?
        {
            topics.push(
                row_to_topic(&row)
                    .map_err(|e| DatabaseError::Query(format!("topic row parse: {e}")))?,
            );
        }
        Ok(topics)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

const ACCOUNT_COLUMNS: &str =
    "id, external_user_id, api_id, api_hash, phone, session_name, auth_state";

fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let id_str: String = row.get(0)?;
    let api_hash: String = row.get(3)?;
    let state_str: String = row.get(6)?;

    Ok(Account {
        id: parse_uuid(&id_str),
        external_user_id: row.get(1)?,
        api_id: row.get(2)?,
        api_hash: SecretString::from(api_hash),
        phone: row.get(4)?,
        session_name: row.get::<String>(5).ok().filter(|s| !s.is_empty()),
        auth_state: AuthState::parse(&state_str),
    })
}

fn row_to_source(row: &libsql::Row) -> Result<SourceChannel, libsql::Error> {
    let id_str: String = row.get(0)?;
    let account_str: String = row.get(1)?;
    Ok(SourceChannel {
        id: parse_uuid(&id_str),
        account_id: parse_uuid(&account_str),
        channel_id: row.get(2)?,
        title: row.get::<String>(3).ok(),
    })
}

const DESTINATION_COLUMNS: &str =
    "id, account_id, channel_id, title, rewrite_prompt, image_prompt, include_image";

fn row_to_destination(row: &libsql::Row) -> Result<DestinationChannel, libsql::Error> {
    let id_str: String = row.get(0)?;
    let account_str: String = row.get(1)?;
    let include: i64 = row.get(6)?;
    Ok(DestinationChannel {
        id: parse_uuid(&id_str),
        account_id: parse_uuid(&account_str),
        channel_id: row.get(2)?,
        title: row.get::<String>(3).ok(),
        rewrite_prompt: row.get(4)?,
        image_prompt: row.get(5)?,
        include_image: include != 0,
    })
}

fn row_to_topic(row: &libsql::Row) -> Result<Topic, libsql::Error> {
    let id_str: String = row.get(0)?;
    Ok(Topic {
        id: parse_uuid(&id_str),
        name: row.get(1)?,
    })
}

fn row_to_post(row: &libsql::Row) -> Result<Post, libsql::Error> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(4)?;
    Ok(Post {
        id: parse_uuid(&id_str),
        channel_id: row.get(1)?,
        message_id: row.get(2)?,
        text: row.get(3)?,
        ts: parse_datetime(&ts_str),
    })
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    // ── Accounts ────────────────────────────────────────────────────

    async fn get_or_create_account(
        &self,
        external_user_id: i64,
    ) -> Result<Account, DatabaseError> {
        let conn = self.conn();

        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE external_user_id = ?1"),
                params![external_user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_or_create_account: {e}")))?;

        if let Ok(Some(row)) = rows.next().await {
            return row_to_account(&row)
                .map_err(|e| DatabaseError::Query(format!("account row parse: {e}")));
        }

        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO accounts (id, external_user_id) VALUES (?1, ?2)",
            params![id.to_string(), external_user_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_or_create_account insert: {e}")))?;

        debug!(account = %id, external_user_id, "Account created");
        Ok(Account {
            id,
            external_user_id,
            api_id: 0,
            api_hash: SecretString::from(String::new()),
            phone: String::new(),
            session_name: None,
            auth_state: AuthState::Unconfigured,
        })
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_account(&row).map_err(|e| {
                DatabaseError::Query(format!("account row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_account: {e}"))),
        }
    }

    async fn set_account_credentials(
        &self,
        id: Uuid,
        api_id: i64,
        api_hash: &str,
        phone: &str,
        session_name: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE accounts SET api_id = ?1, api_hash = ?2, phone = ?3,
                 session_name = ?4, auth_state = 'credentials_stored',
                 updated_at = datetime('now') WHERE id = ?5",
                params![api_id, api_hash, phone, session_name, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_account_credentials: {e}")))?;
        Ok(affected > 0)
    }

    async fn update_auth_state(&self, id: Uuid, state: AuthState) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET auth_state = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![state.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_auth_state: {e}")))?;
        debug!(account = %id, state = state.as_str(), "Auth state updated");
        Ok(())
    }

    async fn set_account_session_name(&self, id: Uuid, name: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET session_name = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![name, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_account_session_name: {e}")))?;
        Ok(())
    }

    async fn clear_session_artifact(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE accounts SET session_name = NULL,
                 auth_state = 'credentials_stored', updated_at = datetime('now')
                 WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_session_artifact: {e}")))?;
        Ok(())
    }

    async fn list_configured_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts
                     WHERE auth_state != 'unconfigured' ORDER BY external_user_id"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_configured_accounts: {e}")))?;

        let mut accounts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_configured_accounts: {e}")))?
        {
            accounts.push(
                row_to_account(&row)
                    .map_err(|e| DatabaseError::Query(format!("account row parse: {e}")))?,
            );
        }
        Ok(accounts)
    }

    // ── Source channels ─────────────────────────────────────────────

    async fn add_source_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO source_channels (id, account_id, channel_id, title)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    account_id.to_string(),
                    channel_id,
                    opt_text(title),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_source_channel: {e}")))?;
        Ok(affected > 0)
    }

    async fn remove_source_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM source_channels WHERE account_id = ?1 AND channel_id = ?2",
                params![account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_source_channel: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_source_channels(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<SourceChannel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, account_id, channel_id, title FROM source_channels
                 WHERE account_id = ?1 ORDER BY channel_id",
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_source_channels: {e}")))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_source_channels: {e}")))?
        {
            channels.push(
                row_to_source(&row)
                    .map_err(|e| DatabaseError::Query(format!("source row parse: {e}")))?,
            );
        }
        Ok(channels)
    }

    async fn set_source_channel_title(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE source_channels SET title = ?1
                 WHERE account_id = ?2 AND channel_id = ?3",
                params![title, account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_source_channel_title: {e}")))?;
        Ok(())
    }

    // ── Destination channels ────────────────────────────────────────

    async fn add_destination_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO destination_channels (id, account_id, channel_id, title)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    account_id.to_string(),
                    channel_id,
                    opt_text(title),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_destination_channel: {e}")))?;
        Ok(affected > 0)
    }

    async fn remove_destination_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM destination_channels WHERE account_id = ?1 AND channel_id = ?2",
                params![account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_destination_channel: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_destination_channels(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<DestinationChannel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DESTINATION_COLUMNS} FROM destination_channels
                     WHERE account_id = ?1 ORDER BY channel_id"
                ),
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_destination_channels: {e}")))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_destination_channels: {e}")))?
        {
            channels.push(
                row_to_destination(&row)
                    .map_err(|e| DatabaseError::Query(format!("destination row parse: {e}")))?,
            );
        }
        Ok(channels)
    }

    async fn set_rewrite_prompt(
        &self,
        account_id: Uuid,
        channel_id: i64,
        prompt: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE destination_channels SET rewrite_prompt = ?1
                 WHERE account_id = ?2 AND channel_id = ?3",
                params![prompt, account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_rewrite_prompt: {e}")))?;
        Ok(affected > 0)
    }

    async fn set_image_prompt(
        &self,
        account_id: Uuid,
        channel_id: i64,
        prompt: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE destination_channels SET image_prompt = ?1
                 WHERE account_id = ?2 AND channel_id = ?3",
                params![prompt, account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_image_prompt: {e}")))?;
        Ok(affected > 0)
    }

    async fn set_include_image(
        &self,
        account_id: Uuid,
        channel_id: i64,
        include: bool,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE destination_channels SET include_image = ?1
                 WHERE account_id = ?2 AND channel_id = ?3",
                params![include as i64, account_id.to_string(), channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_include_image: {e}")))?;
        Ok(affected > 0)
    }

    // ── Topics ──────────────────────────────────────────────────────

    async fn seed_topics(&self, names: &[&str]) -> Result<(), DatabaseError> {
        let conn = self.conn();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM topics", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("seed_topics count: {e}")))?;
        let count: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("seed_topics count parse: {e}")))?,
            _ => 0,
        };
        if count > 0 {
            return Ok(());
        }

        for name in names {
            conn.execute(
                "INSERT OR IGNORE INTO topics (id, name) VALUES (?1, ?2)",
                params![Uuid::new_v4().to_string(), *name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("seed_topics insert: {e}")))?;
        }
        info!(count = names.len(), "Topic vocabulary seeded");
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name FROM topics ORDER BY name", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_topics: {e}")))?;

        let mut topics = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_topics: {e}")))?
        {
            topics.push(
                row_to_topic(&row)
                    .map_err(|e| DatabaseError::Query(format!("topic row parse: {e}")))?,
            );
        }
        Ok(topics)
    }

    async fn add_topic_to_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
        topic_name: &str,
    ) -> Result<bool, DatabaseError> {
        let Some(destination_id) = self.destination_row_id(account_id, channel_id).await? else {
            return Ok(false);
        };
        let Some(topic_id) = self.topic_row_id(topic_name).await? else {
            return Ok(false);
        };

        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO destination_topics (destination_id, topic_id)
                 VALUES (?1, ?2)",
                params![destination_id, topic_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_topic_to_destination: {e}")))?;
        Ok(affected > 0)
    }

    async fn remove_topic_from_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
        topic_name: &str,
    ) -> Result<bool, DatabaseError> {
        let Some(destination_id) = self.destination_row_id(account_id, channel_id).await? else {
            return Ok(false);
        };
        let Some(topic_id) = self.topic_row_id(topic_name).await? else {
            return Ok(false);
        };

        let affected = self
            .conn()
            .execute(
                "DELETE FROM destination_topics WHERE destination_id = ?1 AND topic_id = ?2",
                params![destination_id, topic_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_topic_from_destination: {e}")))?;
        Ok(affected > 0)
    }

    async fn topics_for_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<Vec<Topic>, DatabaseError> {
        match self.destination_row_id(account_id, channel_id).await? {
            Some(destination_id) => self.topics_by_destination_row(&destination_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn all_destinations_with_topics(
        &self,
    ) -> Result<Vec<DestinationWithTopics>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DESTINATION_COLUMNS} FROM destination_channels ORDER BY channel_id"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("all_destinations_with_topics: {e}")))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("all_destinations_with_topics: {e}")))?
        {
            channels.push(
                row_to_destination(&row)
                    .map_err(|e| DatabaseError::Query(format!("destination row parse: {e}")))?,
            );
        }

        let mut out = Vec::with_capacity(channels.len());
        for channel in channels {
            let allowed_topics = self.topics_by_destination_row(&channel.id.to_string()).await?;
            out.push(DestinationWithTopics {
                channel,
                allowed_topics,
            });
        }
        Ok(out)
    }

    // ── Posts ───────────────────────────────────────────────────────

    async fn insert_post(
        &self,
        channel_id: i64,
        message_id: i64,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO posts (id, channel_id, message_id, text, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    channel_id,
                    message_id,
                    text,
                    ts.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_post: {e}")))?;
        debug!(post = %id, channel = channel_id, "Post persisted");
        Ok(id)
    }

    async fn add_post_topics(
        &self,
        post_id: Uuid,
        topic_names: &[String],
    ) -> Result<usize, DatabaseError> {
        let mut written = 0;
        for name in topic_names {
            let Some(topic_id) = self.topic_row_id(name).await? else {
                continue;
            };
            let affected = self
                .conn()
                .execute(
                    "INSERT OR IGNORE INTO post_topics (post_id, topic_id) VALUES (?1, ?2)",
                    params![post_id.to_string(), topic_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("add_post_topics: {e}")))?;
            written += affected as usize;
        }
        Ok(written)
    }

    async fn topics_for_post(&self, post_id: Uuid) -> Result<Vec<Topic>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT t.id, t.name FROM topics t
                 JOIN post_topics pt ON pt.topic_id = t.id
                 WHERE pt.post_id = ?1
                 ORDER BY t.name",
                params![post_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("topics_for_post: {e}")))?;

        let mut topics = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("topics_for_post: {e}")))?
        {
            topics.push(
                row_to_topic(&row)
                    .map_err(|e| DatabaseError::Query(format!("topic row parse: {e}")))?,
            );
        }
        Ok(topics)
    }

    async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, channel_id, message_id, text, ts FROM posts WHERE id = ?1",
                params![post_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_post: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row).map_err(|e| {
                DatabaseError::Query(format!("post row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_post: {e}"))),
        }
    }

    async fn find_post(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<Option<Post>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, channel_id, message_id, text, ts FROM posts
                 WHERE channel_id = ?1 AND message_id = ?2
                 ORDER BY ts DESC LIMIT 1",
                params![channel_id, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_post: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row).map_err(|e| {
                DatabaseError::Query(format!("post row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_post: {e}"))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
