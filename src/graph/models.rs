use serde::Serialize;

/// Who a sync talks to Graph as: the target mailbox plus a bearer token.
#[derive(Debug, Clone)]
pub struct MailboxContext {
    pub user: String,
    pub token: String,
}

impl MailboxContext {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailFolder {
    pub id: String,
    pub display_name: String,
    /// `None` when Graph omitted the count; callers must then assume
    /// children may exist.
    pub child_folder_count: Option<u32>,
}

impl MailFolder {
    pub fn may_have_children(&self) -> bool {
        self.child_folder_count != Some(0)
    }

    pub fn name_matches(&self, wanted: &str) -> bool {
        self.display_name.trim().to_lowercase() == wanted.trim().to_lowercase()
    }
}

/// A root folder with its direct children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub folder: MailFolder,
    pub children: Vec<MailFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: String,
    pub subject: Option<String>,
    pub received_at: Option<String>,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub address: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub kind: BodyKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    /// Base64 payload as delivered by Graph.
    pub content_bytes: Option<String>,
    pub name: Option<String>,
    pub is_inline: bool,
}

impl Attachment {
    /// Content-ID without surrounding angle brackets, if any is present.
    pub fn normalized_content_id(&self) -> Option<&str> {
        self.content_id
            .as_deref()
            .map(|cid| cid.trim().trim_start_matches('<').trim_end_matches('>').trim())
            .filter(|cid| !cid.is_empty())
    }
}

/// One message as it exists during a single sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Sender>,
    /// ISO-8601 timestamp in UTC as returned by Graph.
    pub received_at: Option<String>,
    pub body: Option<MessageBody>,
    pub headers: Vec<MessageHeader>,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
}

impl RawMessage {
    pub fn sender_address(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|from| from.address.as_deref())
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }

    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |header| header.name.trim().eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }
}
