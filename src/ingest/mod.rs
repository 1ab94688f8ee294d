//! The sync pipeline: resolve folder, list, then per message fetch, validate,
//! sanitize, embed inline images and upsert.

pub mod auth_results;
pub mod images;
pub mod validation;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, IngestConfig};
use crate::db::models::UpsertAction;
use crate::db::{Database, DbError};
use crate::graph::auth::TokenProvider;
use crate::graph::folders::{FolderResolver, ResolvedFolder};
use crate::graph::messages::MessageFetcher;
use crate::graph::models::{MailboxContext, MessageSummary};
use crate::graph::{GraphError, MailboxApi};

use self::images::InlineImageProcessor;
use self::validation::{NewsletterValidator, RejectReason, ValidationResult};

pub const NO_NEWSLETTERS_MESSAGE: &str = "No newsletters found in mailbox";

/// Aborts the whole run before any message is processed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no access token available")]
    MissingToken,

    #[error("mail folder '{0}' could not be resolved")]
    FolderNotFound(String),

    #[error("could not list messages: {0}")]
    Listing(#[source] GraphError),
}

/// Counted against the run and reported; the loop continues.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Failed to fetch newsletter {0}")]
    Unavailable(String),

    #[error("Newsletter {message_id} validation failed: {reason}")]
    Rejected {
        message_id: String,
        reason: RejectReason,
    },

    #[error("Failed to save newsletter {message_id}: {source}")]
    Save {
        message_id: String,
        #[source]
        source: DbError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub processed: usize,
    pub saved: usize,
    pub updated: usize,
    pub errors: usize,
    pub messages: Vec<String>,
}

impl SyncReport {
    fn fatal(&mut self, err: &SyncError) {
        self.success = false;
        self.messages
            .push(format!("Newsletter synchronization failed: {err}"));
    }

    fn record(&mut self, outcome: Result<UpsertAction, MessageError>) {
        match outcome {
            Ok(UpsertAction::Inserted) => self.saved += 1,
            Ok(UpsertAction::Updated) => self.updated += 1,
            Err(err) => {
                self.errors += 1;
                self.messages.push(err.to_string());
            }
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Newsletter sync completed: {} new, {} updated, {} errors",
            self.saved, self.updated, self.errors
        )
    }

    pub fn persisted(&self) -> usize {
        self.saved + self.updated
    }
}

pub struct NewsletterIngestService {
    config: IngestConfig,
    api: Box<dyn MailboxApi>,
    tokens: Box<dyn TokenProvider>,
    db: Database,
    validator: NewsletterValidator,
    images: InlineImageProcessor,
}

impl NewsletterIngestService {
    pub fn new(
        config: IngestConfig,
        api: Box<dyn MailboxApi>,
        tokens: Box<dyn TokenProvider>,
        db: Database,
    ) -> Self {
        let validator = NewsletterValidator::from_config(&config);
        let images = InlineImageProcessor::new(&config.uploads_dir, &config.static_prefix);
        Self {
            config,
            api,
            tokens,
            db,
            validator,
            images,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn sync(&self) -> SyncReport {
        let mut report = SyncReport::default();
        info!(
            "starting newsletter sync for {} (folder '{}', max {})",
            self.config.mailbox_user, self.config.folder, self.config.max_newsletters
        );

        let (ctx, folder, messages) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(err) => {
                error!("newsletter sync aborted: {err}");
                report.fatal(&err);
                return report;
            }
        };

        if messages.is_empty() {
            info!("{NO_NEWSLETTERS_MESSAGE}");
            report.success = true;
            report.messages.push(NO_NEWSLETTERS_MESSAGE.to_string());
            return report;
        }
        info!(
            "found {} candidate messages in folder {}",
            messages.len(),
            folder.display_name.as_deref().unwrap_or(&folder.id)
        );

        let fetcher = MessageFetcher::new(self.api.as_ref());
        for summary in &messages {
            if report.persisted() >= self.config.max_newsletters {
                debug!("reached max newsletters ({})", self.config.max_newsletters);
                break;
            }
            report.processed += 1;
            let outcome = self.process_message(&fetcher, &ctx, summary).await;
            if let Err(err) = &outcome {
                warn!("{err}");
            }
            report.record(outcome);
        }

        report.success = true;
        let summary = report.summary();
        info!("{summary}");
        report.messages.push(summary);
        report
    }

    async fn prepare(
        &self,
    ) -> Result<(MailboxContext, ResolvedFolder, Vec<MessageSummary>), SyncError> {
        self.config.validate()?;

        let token = self.tokens.token().await.ok_or(SyncError::MissingToken)?;
        let ctx = MailboxContext::new(self.config.mailbox_user.clone(), token);

        let folder = FolderResolver::new(self.api.as_ref())
            .resolve(&ctx, &self.config.folder, self.config.explicit_folder_id())
            .await
            .ok_or_else(|| SyncError::FolderNotFound(self.config.folder.clone()))?;

        let messages = MessageFetcher::new(self.api.as_ref())
            .list_messages(&ctx, &folder.id, self.config.fetch_limit())
            .await
            .map_err(SyncError::Listing)?;

        Ok((ctx, folder, messages))
    }

    async fn process_message(
        &self,
        fetcher: &MessageFetcher<'_>,
        ctx: &MailboxContext,
        summary: &MessageSummary,
    ) -> Result<UpsertAction, MessageError> {
        let message = fetcher
            .get_full_message(ctx, &summary.id)
            .await
            .ok_or_else(|| MessageError::Unavailable(summary.id.clone()))?;
        let message_id = message.id.clone().unwrap_or_else(|| summary.id.clone());

        let mut newsletter = match self.validator.validate(&message) {
            ValidationResult::Valid(newsletter) => newsletter,
            ValidationResult::Rejected(reason) => {
                return Err(MessageError::Rejected { message_id, reason });
            }
        };

        let embedded = self.images.embed(
            &newsletter.html_sanitized,
            &message.attachments,
            &newsletter.message_id,
        );
        newsletter.html_sanitized = embedded.html;
        newsletter.has_attachments = embedded.had_inline_images;
        newsletter.hero_image_path = embedded.hero_image_path;

        let action = self
            .db
            .upsert_newsletter(&newsletter)
            .map_err(|source| MessageError::Save {
                message_id: message_id.clone(),
                source,
            })?;
        info!("newsletter {message_id} {action}: '{}'", newsletter.subject);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageError, SyncError, SyncReport};
    use crate::db::models::UpsertAction;
    use crate::ingest::validation::RejectReason;

    #[test]
    fn report_counts_and_messages() {
        let mut report = SyncReport::default();
        report.record(Ok(UpsertAction::Inserted));
        report.record(Ok(UpsertAction::Updated));
        report.record(Err(MessageError::Rejected {
            message_id: "m3".to_string(),
            reason: RejectReason::InvalidSenderDomain,
        }));

        assert_eq!((report.saved, report.updated, report.errors), (1, 1, 1));
        assert_eq!(
            report.messages,
            vec!["Newsletter m3 validation failed: invalid sender domain".to_string()]
        );
        assert_eq!(
            report.summary(),
            "Newsletter sync completed: 1 new, 1 updated, 1 errors"
        );
    }

    #[test]
    fn fatal_errors_mark_the_run_failed() {
        let mut report = SyncReport {
            success: true,
            ..SyncReport::default()
        };
        report.fatal(&SyncError::FolderNotFound("Godkjent".to_string()));
        assert!(!report.success);
        assert_eq!(
            report.messages,
            vec![
                "Newsletter synchronization failed: mail folder 'Godkjent' could not be resolved"
                    .to_string()
            ]
        );
    }

    #[test]
    fn report_serializes_for_operators() {
        let report = SyncReport {
            success: true,
            processed: 2,
            saved: 1,
            ..SyncReport::default()
        };
        let json = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(json["success"], true);
        assert_eq!(json["processed"], 2);
        assert_eq!(json["messages"], serde_json::json!([]));
    }
}
