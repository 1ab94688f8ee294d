pub mod auth;
pub mod folders;
pub mod messages;
pub mod models;
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::IngestConfig;
use crate::graph::models::{Attachment, MailFolder, MailboxContext, MessageSummary, RawMessage};
use crate::graph::wire::{
    GraphAttachment, GraphMailFolder, GraphMessage, GraphPage, MESSAGE_DETAIL_SELECT,
    MESSAGE_LIST_SELECT,
};

/// Well-known folder id Graph accepts in place of the real inbox id.
pub const WELL_KNOWN_INBOX: &str = "inbox";

const FOLDER_PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;
const REDACTED_BODY_MAX_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("graph request to {path} failed: status={status} body={body}")]
    Status {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("decode graph response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid graph url: {0}")]
    Url(String),

    #[error("graph response from {path} is missing {field}")]
    Missing { path: String, field: &'static str },
}

impl GraphError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The slice of the Graph mail API the ingestion core depends on.
#[async_trait(?Send)]
pub trait MailboxApi {
    async fn root_folders(&self, ctx: &MailboxContext) -> Result<Vec<MailFolder>, GraphError>;

    async fn child_folders(
        &self,
        ctx: &MailboxContext,
        parent_id: &str,
    ) -> Result<Vec<MailFolder>, GraphError>;

    async fn get_folder(
        &self,
        ctx: &MailboxContext,
        folder_id: &str,
    ) -> Result<MailFolder, GraphError>;

    /// Looks up a folder by its well-known name (`inbox`, `archive`, ...).
    async fn well_known_folder(
        &self,
        ctx: &MailboxContext,
        name: &str,
    ) -> Result<MailFolder, GraphError> {
        self.get_folder(ctx, name).await
    }

    /// Newest first, at most `top` entries.
    async fn list_messages(
        &self,
        ctx: &MailboxContext,
        folder_id: &str,
        top: usize,
    ) -> Result<Vec<MessageSummary>, GraphError>;

    async fn get_message(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Result<RawMessage, GraphError>;

    async fn list_attachments(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Result<Vec<Attachment>, GraphError>;
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    base_url: Url,
}

impl GraphClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, GraphError> {
        let base_url =
            Url::parse(base.trim()).map_err(|err| GraphError::Url(format!("{base}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GraphError::Url(base.to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| GraphError::Transport {
                path: base.to_string(),
                source,
            })?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, GraphError> {
        Self::new(&config.graph_base, config.request_timeout)
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GraphError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GraphError::Url(self.base_url.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn mailbox_endpoint(
        &self,
        ctx: &MailboxContext,
        segments: &[&str],
    ) -> Result<Url, GraphError> {
        let mut all = Vec::with_capacity(segments.len() + 2);
        all.push("users");
        all.push(ctx.user.as_str());
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &MailboxContext,
        url: Url,
    ) -> Result<T, GraphError> {
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .bearer_auth(&ctx.token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|source| GraphError::Transport {
                path: path.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| GraphError::Transport {
                path: path.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(GraphError::Status {
                path,
                status,
                body: redact_response_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|source| GraphError::Decode { path, source })
    }

    async fn collect_pages<W, M>(
        &self,
        ctx: &MailboxContext,
        first: Url,
        convert: fn(W) -> Option<M>,
    ) -> Result<Vec<M>, GraphError>
    where
        W: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page: GraphPage<W> = self.get_json(ctx, url).await?;
            items.extend(page.value.into_iter().filter_map(convert));
            pages += 1;
            if pages >= MAX_PAGES {
                tracing::warn!("stopping graph paging after {MAX_PAGES} pages");
                break;
            }
            next = page
                .next_link
                .map(|link| Url::parse(&link).map_err(|err| GraphError::Url(format!("{link}: {err}"))))
                .transpose()?;
        }

        Ok(items)
    }
}

#[async_trait(?Send)]
impl MailboxApi for GraphClient {
    async fn root_folders(&self, ctx: &MailboxContext) -> Result<Vec<MailFolder>, GraphError> {
        let mut url = self.mailbox_endpoint(ctx, &["mailFolders"])?;
        url.query_pairs_mut()
            .append_pair("$top", &FOLDER_PAGE_SIZE.to_string());
        self.collect_pages(ctx, url, GraphMailFolder::into_model)
            .await
    }

    async fn child_folders(
        &self,
        ctx: &MailboxContext,
        parent_id: &str,
    ) -> Result<Vec<MailFolder>, GraphError> {
        let mut url = self.mailbox_endpoint(ctx, &["mailFolders", parent_id, "childFolders"])?;
        url.query_pairs_mut()
            .append_pair("$top", &FOLDER_PAGE_SIZE.to_string());
        self.collect_pages(ctx, url, GraphMailFolder::into_model)
            .await
    }

    async fn get_folder(
        &self,
        ctx: &MailboxContext,
        folder_id: &str,
    ) -> Result<MailFolder, GraphError> {
        let url = self.mailbox_endpoint(ctx, &["mailFolders", folder_id])?;
        let path = url.path().to_string();
        let folder: GraphMailFolder = self.get_json(ctx, url).await?;
        folder
            .into_model()
            .ok_or(GraphError::Missing { path, field: "id" })
    }

    async fn list_messages(
        &self,
        ctx: &MailboxContext,
        folder_id: &str,
        top: usize,
    ) -> Result<Vec<MessageSummary>, GraphError> {
        let mut url = self.mailbox_endpoint(ctx, &["mailFolders", folder_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("$top", &top.to_string())
            .append_pair("$orderby", "receivedDateTime desc")
            .append_pair("$select", MESSAGE_LIST_SELECT);
        let page: GraphPage<GraphMessage> = self.get_json(ctx, url).await?;
        Ok(page
            .value
            .into_iter()
            .filter_map(GraphMessage::into_summary)
            .take(top)
            .collect())
    }

    async fn get_message(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Result<RawMessage, GraphError> {
        let mut url = self.mailbox_endpoint(ctx, &["messages", message_id])?;
        url.query_pairs_mut()
            .append_pair("$select", MESSAGE_DETAIL_SELECT);
        let message: GraphMessage = self.get_json(ctx, url).await?;
        Ok(message.into_raw())
    }

    async fn list_attachments(
        &self,
        ctx: &MailboxContext,
        message_id: &str,
    ) -> Result<Vec<Attachment>, GraphError> {
        let url = self.mailbox_endpoint(ctx, &["messages", message_id, "attachments"])?;
        self.collect_pages(ctx, url, GraphAttachment::into_model)
            .await
    }
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }
    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}
