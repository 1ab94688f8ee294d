use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use self::models::{Newsletter, ProcessedNewsletter, SyncState, UpsertAction};
use crate::config::env_value;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;

const NEWSLETTER_COLUMNS: &str = r#"
    id, message_id, subject, sender_name, sender_email, received_at, html_raw,
    html_sanitized, auth_results, has_attachments, hero_image_path, created_at, updated_at
"#;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let mut db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&mut self) -> Result<(), DbError> {
        migrations::migrate(&mut self.conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e:#}")))
    }

    /// `NEWSLETTER_DB_PATH`, else `~/.newsletter-ingest/newsletters.db`.
    pub fn default_db_path() -> Result<PathBuf, DbError> {
        if let Some(path) = env_value("NEWSLETTER_DB_PATH") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".newsletter-ingest").join("newsletters.db"))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert-or-update keyed by `message_id`, atomically. On any error the
    /// transaction is dropped and rolled back.
    pub fn upsert_newsletter(
        &self,
        newsletter: &ProcessedNewsletter,
    ) -> Result<UpsertAction, DbError> {
        let auth_json = serde_json::to_string(&newsletter.auth_results)?;
        let received_at = newsletter.received_at_stored();

        let tx = self.conn.unchecked_transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM newsletters WHERE message_id = ?1",
                [&newsletter.message_id],
                |row| row.get(0),
            )
            .optional()?;

        let action = match existing {
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE newsletters SET
                        subject = ?1,
                        sender_name = ?2,
                        sender_email = ?3,
                        received_at = ?4,
                        html_raw = ?5,
                        html_sanitized = ?6,
                        auth_results = ?7,
                        has_attachments = ?8,
                        hero_image_path = ?9,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                    WHERE id = ?10
                    "#,
                    params![
                        newsletter.subject,
                        newsletter.sender_name,
                        newsletter.sender_email,
                        received_at,
                        newsletter.html_raw,
                        newsletter.html_sanitized,
                        auth_json,
                        newsletter.has_attachments,
                        newsletter.hero_image_path,
                        id,
                    ],
                )?;
                UpsertAction::Updated
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO newsletters (
                        message_id, subject, sender_name, sender_email, received_at, html_raw,
                        html_sanitized, auth_results, has_attachments, hero_image_path
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                    params![
                        newsletter.message_id,
                        newsletter.subject,
                        newsletter.sender_name,
                        newsletter.sender_email,
                        received_at,
                        newsletter.html_raw,
                        newsletter.html_sanitized,
                        auth_json,
                        newsletter.has_attachments,
                        newsletter.hero_image_path,
                    ],
                )?;
                UpsertAction::Inserted
            }
        };

        tx.commit()?;
        Ok(action)
    }

    /// Most recent first.
    pub fn recent_newsletters(&self, limit: usize) -> Result<Vec<Newsletter>, DbError> {
        let sql = format!(
            "SELECT {NEWSLETTER_COLUMNS} FROM newsletters ORDER BY received_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([limit as i64], Newsletter::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_newsletter(&self, id: i64) -> Result<Option<Newsletter>, DbError> {
        let sql = format!("SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id], Newsletter::from_row)
            .optional()?)
    }

    pub fn get_newsletter_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Newsletter>, DbError> {
        let sql = format!("SELECT {NEWSLETTER_COLUMNS} FROM newsletters WHERE message_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [message_id], Newsletter::from_row)
            .optional()?)
    }

    pub fn count_newsletters(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM newsletters", [], |row| row.get(0))?)
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM sync_state WHERE key = ?1",
                [key],
                SyncState::from_row,
            )
            .optional()?)
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_sync_state(&self, key: &str) -> Result<(), DbError> {
        self.conn
            .execute("DELETE FROM sync_state WHERE key = ?1", [key])?;
        Ok(())
    }
}
