use std::fmt::{Display, Formatter};

use chrono::NaiveDateTime;
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

use crate::ingest::auth_results::AuthenticationVerdict;

/// Storage format of `received_at`: naive local time in the configured zone.
pub const RECEIVED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Display format used by list and detail views.
pub const RECEIVED_AT_DISPLAY_FORMAT: &str = "%d.%m.%Y %H:%M";

/// A validated, sanitized newsletter ready to be upserted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedNewsletter {
    pub message_id: String,
    pub subject: String,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub received_at: NaiveDateTime,
    pub html_raw: String,
    pub html_sanitized: String,
    pub auth_results: AuthenticationVerdict,
    /// True only when at least one inline image was embedded.
    pub has_attachments: bool,
    pub hero_image_path: Option<String>,
}

impl ProcessedNewsletter {
    pub fn received_at_stored(&self) -> String {
        self.received_at.format(RECEIVED_AT_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Newsletter {
    pub id: i64,
    pub message_id: String,
    pub subject: String,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub received_at: String,
    pub received_at_formatted: String,
    pub html_raw: Option<String>,
    pub html_sanitized: Option<String>,
    pub auth_results: Option<AuthenticationVerdict>,
    pub has_attachments: bool,
    pub hero_image_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

impl Display for UpsertAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: Option<String>,
}

pub fn format_received_at(stored: &str) -> String {
    NaiveDateTime::parse_from_str(stored.trim(), RECEIVED_AT_FORMAT)
        .map(|parsed| parsed.format(RECEIVED_AT_DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|_| stored.to_string())
}

impl Newsletter {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let received_at: String = row.get("received_at")?;
        let auth_raw: Option<String> = row.get("auth_results")?;
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            subject: row.get("subject")?,
            sender_name: row.get("sender_name")?,
            sender_email: row.get("sender_email")?,
            received_at_formatted: format_received_at(&received_at),
            received_at,
            html_raw: row.get("html_raw")?,
            html_sanitized: row.get("html_sanitized")?,
            auth_results: auth_raw.as_deref().and_then(AuthenticationVerdict::from_json),
            has_attachments: row.get("has_attachments")?,
            hero_image_path: row.get("hero_image_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
