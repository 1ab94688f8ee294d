use tracing::{debug, warn};

use crate::graph::models::{Attachment, MailboxContext, MessageSummary, RawMessage};
use crate::graph::{GraphError, MailboxApi};

/// Reads messages out of one resolved folder.
pub struct MessageFetcher<'a> {
    api: &'a dyn MailboxApi,
}

impl<'a> MessageFetcher<'a> {
    pub fn new(api: &'a dyn MailboxApi) -> Self {
        Self { api }
    }

    /// Newest first. Unlike the per-message calls this propagates failure so
    /// that an unreachable mailbox is never mistaken for an empty folder.
    pub async fn list_messages(
        &self,
        ctx: &MailboxContext,
        folder_id: &str,
        top: usize,
    ) -> Result<Vec<MessageSummary>, GraphError> {
        let messages = self.api.list_messages(ctx, folder_id, top).await?;
        debug!("listed {} messages from folder {folder_id}", messages.len());
        Ok(messages)
    }

    pub async fn get_detail(&self, ctx: &MailboxContext, message_id: &str) -> Option<RawMessage> {
        match self.api.get_message(ctx, message_id).await {
            Ok(mut message) => {
                if message.id.is_none() {
                    message.id = Some(message_id.to_string());
                }
                Some(message)
            }
            Err(err) => {
                warn!("failed to fetch message {message_id}: {err}");
                None
            }
        }
    }

    pub async fn get_attachments(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Option<Vec<Attachment>> {
        match self.api.list_attachments(ctx, message_id).await {
            Ok(attachments) => Some(attachments),
            Err(err) => {
                warn!("failed to fetch attachments for {message_id}: {err}");
                None
            }
        }
    }

    /// Detail plus attachments, the latter only when Graph flags any. A
    /// flagged message whose attachments cannot be read is unavailable as a
    /// whole, so a re-sync never replaces stored images with broken `cid:`
    /// references.
    pub async fn get_full_message(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Option<RawMessage> {
        let mut message = self.get_detail(ctx, message_id).await?;
        if message.has_attachments {
            message.attachments = self.get_attachments(ctx, message_id).await?;
        }
        Some(message)
    }
}
