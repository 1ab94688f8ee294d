//! Graph JSON payloads. Every field is optional on the wire; conversion into
//! the models in [`crate::graph::models`] applies the defaults explicitly.

use serde::Deserialize;

use crate::graph::models::{
    Attachment, BodyKind, MailFolder, MessageBody, MessageHeader, MessageSummary, RawMessage,
    Sender,
};

pub const MESSAGE_LIST_SELECT: &str = "id,subject,from,receivedDateTime,hasAttachments";
pub const MESSAGE_DETAIL_SELECT: &str =
    "id,internetMessageHeaders,subject,from,receivedDateTime,body,hasAttachments";

const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

#[derive(Debug, Clone, Deserialize)]
pub struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphMailFolder {
    id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "childFolderCount")]
    child_folder_count: Option<u32>,
}

impl GraphMailFolder {
    pub fn into_model(self) -> Option<MailFolder> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        Some(MailFolder {
            id,
            display_name: self.display_name.unwrap_or_default(),
            child_folder_count: self.child_folder_count,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    body: Option<GraphBody>,
    #[serde(rename = "hasAttachments")]
    has_attachments: Option<bool>,
    #[serde(rename = "internetMessageHeaders")]
    internet_message_headers: Option<Vec<GraphHeader>>,
}

impl GraphMessage {
    pub fn into_summary(self) -> Option<MessageSummary> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;
        Some(MessageSummary {
            id,
            subject: self.subject,
            received_at: self.received_date_time,
            has_attachments: self.has_attachments.unwrap_or(false),
        })
    }

    pub fn into_raw(self) -> RawMessage {
        RawMessage {
            id: self.id.filter(|id| !id.trim().is_empty()),
            subject: self.subject,
            from: self.from.map(GraphRecipient::into_sender),
            received_at: self.received_date_time,
            body: self.body.and_then(GraphBody::into_model),
            headers: self
                .internet_message_headers
                .unwrap_or_default()
                .into_iter()
                .filter_map(GraphHeader::into_model)
                .collect(),
            has_attachments: self.has_attachments.unwrap_or(false),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    fn into_sender(self) -> Sender {
        let Some(email) = self.email_address else {
            return Sender::default();
        };
        Sender {
            address: non_blank(email.address),
            name: non_blank(email.name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

impl GraphBody {
    fn into_model(self) -> Option<MessageBody> {
        let kind = match self.content_type.as_deref().map(str::trim) {
            Some(kind) if kind.eq_ignore_ascii_case("html") => BodyKind::Html,
            Some(kind) if kind.eq_ignore_ascii_case("text") => BodyKind::Text,
            _ => return None,
        };
        Some(MessageBody {
            kind,
            content: self.content.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphHeader {
    name: Option<String>,
    value: Option<String>,
}

impl GraphHeader {
    fn into_model(self) -> Option<MessageHeader> {
        Some(MessageHeader {
            name: self.name?,
            value: self.value.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    name: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "contentId")]
    content_id: Option<String>,
    #[serde(rename = "contentBytes")]
    content_bytes: Option<String>,
    #[serde(rename = "isInline")]
    is_inline: Option<bool>,
}

impl GraphAttachment {
    /// Item and reference attachments carry no payload and are dropped.
    pub fn into_model(self) -> Option<Attachment> {
        if self
            .odata_type
            .as_deref()
            .is_some_and(|kind| kind != FILE_ATTACHMENT_TYPE)
        {
            return None;
        }
        Some(Attachment {
            content_id: non_blank(self.content_id),
            content_type: non_blank(self.content_type),
            content_bytes: non_blank(self.content_bytes),
            name: non_blank(self.name),
            is_inline: self.is_inline.unwrap_or(false),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
