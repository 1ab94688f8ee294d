use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_MAILBOX_USER: &str = "nyhetsbrev@gronvoldmaskin.no";
pub const DEFAULT_FOLDER: &str = "Godkjent";
pub const DEFAULT_MAX_NEWSLETTERS: usize = 10;
pub const DEFAULT_SENDER_DOMAIN: &str = "@gronvoldmaskin.no";
pub const DEFAULT_UPLOADS_DIR: &str = "uploads/newsletters";
pub const DEFAULT_STATIC_PREFIX: &str = "/static/newsletters";
pub const DEFAULT_TIMEZONE: &str = "Europe/Oslo";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Extra messages listed beyond `max_newsletters` so that rejected or
/// already-seen messages do not starve a run.
pub const LIST_BUFFER: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Everything the ingestion core needs to know about its environment.
///
/// Built once by the caller and handed to the service constructor; nothing
/// inside the core reads the process environment on its own.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Mailbox (UPN or address) that receives the curated newsletters.
    pub mailbox_user: String,
    /// Folder display name or slash-delimited path, e.g. `Inbox/Approved`.
    pub folder: String,
    /// Pre-resolved folder id. When set, name/path resolution is skipped.
    pub folder_id: Option<String>,
    pub max_newsletters: usize,
    /// Required suffix of the sender address, matched case-insensitively.
    pub sender_domain: String,
    pub uploads_dir: PathBuf,
    /// URL prefix under which `uploads_dir` is served by the web layer.
    pub static_prefix: String,
    pub timezone: Tz,
    pub graph_base: String,
    pub request_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mailbox_user: DEFAULT_MAILBOX_USER.to_string(),
            folder: DEFAULT_FOLDER.to_string(),
            folder_id: None,
            max_newsletters: DEFAULT_MAX_NEWSLETTERS,
            sender_domain: DEFAULT_SENDER_DOMAIN.to_string(),
            uploads_dir: PathBuf::from(DEFAULT_UPLOADS_DIR),
            static_prefix: DEFAULT_STATIC_PREFIX.to_string(),
            timezone: chrono_tz::Europe::Oslo,
            graph_base: DEFAULT_GRAPH_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user) = env_value("NEWSLETTER_USER") {
            config.mailbox_user = user;
        }
        if let Some(folder) = env_value("NEWSLETTER_FOLDER") {
            config.folder = folder;
        }
        config.folder_id = env_value("NEWSLETTER_FOLDER_ID");
        if let Some(raw) = env_value("MAX_NEWSLETTERS") {
            config.max_newsletters = parse_usize("MAX_NEWSLETTERS", &raw)?;
        }
        if let Some(domain) = env_value("NEWSLETTER_SENDER_DOMAIN") {
            config.sender_domain = domain;
        }
        if let Some(dir) = env_value("NEWSLETTER_UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_value("NEWSLETTER_STATIC_PREFIX") {
            config.static_prefix = prefix;
        }
        if let Some(raw) = env_value("NEWSLETTER_TIMEZONE") {
            config.timezone = parse_timezone(&raw)?;
        }
        if let Some(base) = env_value("GRAPH_BASE") {
            config.graph_base = base;
        }
        if let Some(raw) = env_value("GRAPH_TIMEOUT_SECS") {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| invalid("GRAPH_TIMEOUT_SECS", &raw))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_user.trim().is_empty() {
            return Err(ConfigError::Missing("NEWSLETTER_USER"));
        }
        if self.folder.trim().is_empty() && self.folder_id.is_none() {
            return Err(ConfigError::Missing("NEWSLETTER_FOLDER"));
        }
        if self.max_newsletters == 0 {
            return Err(invalid("MAX_NEWSLETTERS", "0"));
        }
        if self.sender_domain.trim().is_empty() {
            return Err(ConfigError::Missing("NEWSLETTER_SENDER_DOMAIN"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("GRAPH_TIMEOUT_SECS", "0"));
        }
        Ok(())
    }

    /// Soft cap passed as `$top` when listing the folder.
    pub fn fetch_limit(&self) -> usize {
        self.max_newsletters.saturating_add(LIST_BUFFER)
    }

    pub fn explicit_folder_id(&self) -> Option<&str> {
        self.folder_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

pub fn parse_timezone(raw: &str) -> Result<Tz, ConfigError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| invalid("NEWSLETTER_TIMEZONE", raw))
}

/// Reads an environment variable, treating blank values as unset.
pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_usize(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse::<usize>().map_err(|_| invalid(key, raw))
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_timezone, ConfigError, IngestConfig, LIST_BUFFER};

    #[test]
    fn defaults_validate() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch_limit(), config.max_newsletters + LIST_BUFFER);
        assert_eq!(config.timezone, chrono_tz::Europe::Oslo);
    }

    #[test]
    fn fetch_limit_saturates() {
        let config = IngestConfig {
            max_newsletters: usize::MAX,
            ..IngestConfig::default()
        };
        assert_eq!(config.fetch_limit(), usize::MAX);
    }

    #[test]
    fn blank_folder_id_is_not_explicit() {
        let config = IngestConfig {
            folder_id: Some("   ".to_string()),
            ..IngestConfig::default()
        };
        assert_eq!(config.explicit_folder_id(), None);

        let config = IngestConfig {
            folder_id: Some(" AAMkAD= ".to_string()),
            ..IngestConfig::default()
        };
        assert_eq!(config.explicit_folder_id(), Some("AAMkAD="));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero = IngestConfig {
            max_newsletters: 0,
            ..IngestConfig::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Invalid {
                key: "MAX_NEWSLETTERS",
                ..
            })
        ));

        let no_domain = IngestConfig {
            sender_domain: " ".to_string(),
            ..IngestConfig::default()
        };
        assert_eq!(
            no_domain.validate(),
            Err(ConfigError::Missing("NEWSLETTER_SENDER_DOMAIN"))
        );

        let no_timeout = IngestConfig {
            request_timeout: Duration::ZERO,
            ..IngestConfig::default()
        };
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn timezone_parsing() {
        assert_eq!(
            parse_timezone(" Europe/Oslo ").expect("parse oslo"),
            chrono_tz::Europe::Oslo
        );
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
