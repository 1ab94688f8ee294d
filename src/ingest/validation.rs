use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

use crate::config::IngestConfig;
use crate::db::models::ProcessedNewsletter;
use crate::graph::models::{BodyKind, RawMessage};
use crate::ingest::auth_results::AuthenticationVerdict;
use crate::sanitizer::{sanitize_html, text_to_html_lines};

/// Why a message was not accepted. Checks run cheapest first and stop at the
/// first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing message id")]
    MissingMessageId,
    #[error("missing subject")]
    MissingSubject,
    #[error("invalid sender domain")]
    InvalidSenderDomain,
    #[error("failed authentication")]
    FailedAuthentication,
    #[error("no content found")]
    NoContent,
    #[error("sanitization failure")]
    SanitizationFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid(Box<ProcessedNewsletter>),
    Rejected(RejectReason),
}

pub struct NewsletterValidator {
    sender_domain: String,
    timezone: Tz,
}

impl NewsletterValidator {
    pub fn new(sender_domain: &str, timezone: Tz) -> Self {
        Self {
            sender_domain: normalize_domain(sender_domain),
            timezone,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.sender_domain, config.timezone)
    }

    /// Produces a sanitized newsletter without inline images embedded yet.
    pub fn validate(&self, message: &RawMessage) -> ValidationResult {
        let Some(message_id) = non_blank(message.id.as_deref()) else {
            return ValidationResult::Rejected(RejectReason::MissingMessageId);
        };
        let Some(subject) = non_blank(message.subject.as_deref()) else {
            return ValidationResult::Rejected(RejectReason::MissingSubject);
        };
        let Some(sender_email) = message
            .sender_address()
            .filter(|address| self.sender_matches(address))
        else {
            return ValidationResult::Rejected(RejectReason::InvalidSenderDomain);
        };

        let auth_results = AuthenticationVerdict::from_message(message);
        if auth_results.is_failed() {
            return ValidationResult::Rejected(RejectReason::FailedAuthentication);
        }

        let Some(html_raw) = resolve_body(message) else {
            return ValidationResult::Rejected(RejectReason::NoContent);
        };
        let html_sanitized = sanitize_html(&html_raw);
        if html_sanitized.trim().is_empty() {
            return ValidationResult::Rejected(RejectReason::SanitizationFailure);
        }

        ValidationResult::Valid(Box::new(ProcessedNewsletter {
            message_id: message_id.to_string(),
            subject: subject.to_string(),
            sender_name: Some(
                message
                    .from
                    .as_ref()
                    .and_then(|from| non_blank(from.name.as_deref()))
                    .unwrap_or(sender_email)
                    .to_string(),
            ),
            sender_email: sender_email.to_string(),
            received_at: local_received_at(message.received_at.as_deref(), self.timezone),
            html_raw,
            html_sanitized,
            auth_results,
            has_attachments: false,
            hero_image_path: None,
        }))
    }

    pub fn sender_matches(&self, address: &str) -> bool {
        address.trim().to_lowercase().ends_with(&self.sender_domain)
    }
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    if domain.starts_with('@') {
        domain
    } else {
        format!("@{domain}")
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// HTML bodies as-is, text bodies wrapped in a container.
fn resolve_body(message: &RawMessage) -> Option<String> {
    let body = message.body.as_ref()?;
    if body.content.trim().is_empty() {
        return None;
    }
    match body.kind {
        BodyKind::Html => Some(body.content.clone()),
        BodyKind::Text => Some(format!("<div>{}</div>", text_to_html_lines(body.content.trim()))),
    }
}

/// Graph timestamps are UTC; they are stored as naive wall-clock time in the
/// configured zone.
pub fn local_received_at(raw: Option<&str>, timezone: Tz) -> NaiveDateTime {
    let parsed = raw.and_then(|value| {
        DateTime::parse_from_rfc3339(value.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    });
    let utc = parsed.unwrap_or_else(|| {
        warn!("unparseable receivedDateTime {raw:?}, using current time");
        Utc::now()
    });
    utc.with_timezone(&timezone).naive_local()
}
