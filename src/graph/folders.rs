use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::models::{FolderNode, MailFolder, MailboxContext};
use crate::graph::{GraphError, MailboxApi, WELL_KNOWN_INBOX};

/// How the configured folder was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderSpec {
    Name(String),
    Path(Vec<String>),
}

impl FolderSpec {
    /// Blank segments (`"Inbox//Approved/"`) are ignored. Returns `None` when
    /// nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<String> = raw
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        match segments.len() {
            0 => None,
            1 if !raw.contains('/') => segments.into_iter().next().map(Self::Name),
            _ => Some(Self::Path(segments)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedVia {
    ExplicitId,
    RootName,
    ChildName,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolder {
    pub id: String,
    pub display_name: Option<String>,
    pub via: ResolvedVia,
}

impl ResolvedFolder {
    fn found(folder: MailFolder, via: ResolvedVia) -> Self {
        Self {
            id: folder.id,
            display_name: Some(folder.display_name),
            via,
        }
    }
}

pub struct FolderResolver<'a> {
    api: &'a dyn MailboxApi,
}

impl<'a> FolderResolver<'a> {
    pub fn new(api: &'a dyn MailboxApi) -> Self {
        Self { api }
    }

    /// Resolves the target folder once per sync. Any Graph failure is logged
    /// and reported as not found.
    pub async fn resolve(
        &self,
        ctx: &MailboxContext,
        folder: &str,
        explicit_id: Option<&str>,
    ) -> Option<ResolvedFolder> {
        if let Some(id) = explicit_id {
            debug!("using configured folder id {id}");
            return Some(ResolvedFolder {
                id: id.to_string(),
                display_name: None,
                via: ResolvedVia::ExplicitId,
            });
        }

        let Some(spec) = FolderSpec::parse(folder) else {
            warn!("no folder name configured");
            return None;
        };

        let outcome = match &spec {
            FolderSpec::Name(name) => self.find_by_name(ctx, name).await,
            FolderSpec::Path(segments) => self.find_by_path(ctx, segments).await,
        };

        match outcome {
            Ok(Some(resolved)) => {
                info!(
                    "resolved folder '{folder}' to {} ({:?})",
                    resolved.id, resolved.via
                );
                Some(resolved)
            }
            Ok(None) => {
                warn!("folder '{folder}' not found in mailbox {}", ctx.user);
                None
            }
            Err(err) => {
                warn!("folder lookup for '{folder}' failed: {err}");
                None
            }
        }
    }

    async fn find_by_name(
        &self,
        ctx: &MailboxContext,
        name: &str,
    ) -> Result<Option<ResolvedFolder>, GraphError> {
        let roots = self.api.root_folders(ctx).await?;
        if let Some(found) = roots.iter().find(|folder| folder.name_matches(name)) {
            return Ok(Some(ResolvedFolder::found(
                found.clone(),
                ResolvedVia::RootName,
            )));
        }

        for root in roots.iter().filter(|root| root.may_have_children()) {
            let children = self.api.child_folders(ctx, &root.id).await?;
            if let Some(found) = children.into_iter().find(|child| child.name_matches(name)) {
                debug!("found '{name}' under '{}'", root.display_name);
                return Ok(Some(ResolvedFolder::found(found, ResolvedVia::ChildName)));
            }
        }

        Ok(None)
    }

    async fn find_by_path(
        &self,
        ctx: &MailboxContext,
        segments: &[String],
    ) -> Result<Option<ResolvedFolder>, GraphError> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(None);
        };

        let roots = self.api.root_folders(ctx).await?;
        let mut current = match roots.into_iter().find(|folder| folder.name_matches(first)) {
            Some(folder) => folder,
            None => {
                let inbox = self.api.well_known_folder(ctx, WELL_KNOWN_INBOX).await?;
                debug!("'{first}' not at root, looking under {}", inbox.display_name);
                let children = self.api.child_folders(ctx, &inbox.id).await?;
                match children.into_iter().find(|child| child.name_matches(first)) {
                    Some(folder) => folder,
                    None => return Ok(None),
                }
            }
        };

        for segment in rest {
            let children = self.api.child_folders(ctx, &current.id).await?;
            match children.into_iter().find(|child| child.name_matches(segment)) {
                Some(next) => current = next,
                None => {
                    debug!("path segment '{segment}' missing under '{}'", current.display_name);
                    return Ok(None);
                }
            }
        }

        Ok(Some(ResolvedFolder::found(current, ResolvedVia::Path)))
    }
}

/// Root folders with their direct children, the same depth the name search
/// covers.
pub async fn list_folder_tree(
    api: &dyn MailboxApi,
    ctx: &MailboxContext,
) -> Result<Vec<FolderNode>, GraphError> {
    let roots = api.root_folders(ctx).await?;
    let mut tree = Vec::with_capacity(roots.len());
    for folder in roots {
        let children = if folder.may_have_children() {
            api.child_folders(ctx, &folder.id).await?
        } else {
            Vec::new()
        };
        tree.push(FolderNode { folder, children });
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::{list_folder_tree, FolderResolver, FolderSpec, ResolvedVia};
    use crate::graph::models::{
        Attachment, MailFolder, MailboxContext, MessageSummary, RawMessage,
    };
    use crate::graph::{GraphError, MailboxApi};

    fn folder(id: &str, name: &str, children: Option<u32>) -> MailFolder {
        MailFolder {
            id: id.to_string(),
            display_name: name.to_string(),
            child_folder_count: children,
        }
    }

    fn not_found(path: &str) -> GraphError {
        GraphError::Status {
            path: path.to_string(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        }
    }

    #[derive(Default)]
    struct FolderFake {
        roots: Vec<MailFolder>,
        children: HashMap<String, Vec<MailFolder>>,
        inbox: Option<MailFolder>,
        fail_roots: bool,
        child_calls: RefCell<Vec<String>>,
    }

    #[async_trait(?Send)]
    impl MailboxApi for FolderFake {
        async fn root_folders(&self, _ctx: &MailboxContext) -> Result<Vec<MailFolder>, GraphError> {
            if self.fail_roots {
                return Err(not_found("mailFolders"));
            }
            Ok(self.roots.clone())
        }

        async fn child_folders(
            &self,
            _ctx: &MailboxContext,
            parent_id: &str,
        ) -> Result<Vec<MailFolder>, GraphError> {
            self.child_calls.borrow_mut().push(parent_id.to_string());
            Ok(self.children.get(parent_id).cloned().unwrap_or_default())
        }

        async fn get_folder(
            &self,
            _ctx: &MailboxContext,
            folder_id: &str,
        ) -> Result<MailFolder, GraphError> {
            match (&self.inbox, folder_id) {
                (Some(inbox), "inbox") => Ok(inbox.clone()),
                _ => Err(not_found(folder_id)),
            }
        }

        async fn list_messages(
            &self,
            _ctx: &MailboxContext,
            _folder_id: &str,
            _top: usize,
        ) -> Result<Vec<MessageSummary>, GraphError> {
            Ok(Vec::new())
        }

        async fn get_message(
            &self,
            _ctx: &MailboxContext,
            message_id: &str,
        ) -> Result<RawMessage, GraphError> {
            Err(not_found(message_id))
        }

        async fn list_attachments(
            &self,
            _ctx: &MailboxContext,
            _message_id: &str,
        ) -> Result<Vec<Attachment>, GraphError> {
            Ok(Vec::new())
        }
    }

    fn ctx() -> MailboxContext {
        MailboxContext::new("box@example.no", "token")
    }

    #[test]
    fn folder_spec_parsing() {
        assert_eq!(
            FolderSpec::parse(" Godkjent "),
            Some(FolderSpec::Name("Godkjent".to_string()))
        );
        assert_eq!(
            FolderSpec::parse("Inbox//Approved/"),
            Some(FolderSpec::Path(vec![
                "Inbox".to_string(),
                "Approved".to_string()
            ]))
        );
        assert_eq!(
            FolderSpec::parse("/Approved"),
            Some(FolderSpec::Path(vec!["Approved".to_string()]))
        );
        assert_eq!(FolderSpec::parse(" / "), None);
    }

    #[tokio::test]
    async fn explicit_id_bypasses_lookup() {
        let fake = FolderFake {
            fail_roots: true,
            ..FolderFake::default()
        };
        let resolved = FolderResolver::new(&fake)
            .resolve(&ctx(), "whatever", Some("AAMk-explicit"))
            .await
            .expect("explicit id resolves");
        assert_eq!(resolved.id, "AAMk-explicit");
        assert_eq!(resolved.via, ResolvedVia::ExplicitId);
    }

    #[tokio::test]
    async fn path_walks_children() {
        let fake = FolderFake {
            roots: vec![folder("1", "Inbox", Some(1))],
            children: HashMap::from([("1".to_string(), vec![folder("7", "Approved", Some(0))])]),
            ..FolderFake::default()
        };
        let resolved = FolderResolver::new(&fake)
            .resolve(&ctx(), "Inbox/Approved", None)
            .await
            .expect("path resolves");
        assert_eq!(resolved.id, "7");
        assert_eq!(resolved.via, ResolvedVia::Path);
    }

    #[tokio::test]
    async fn path_falls_back_to_inbox_children() {
        let fake = FolderFake {
            roots: vec![folder("inbox-id", "Innboks", Some(1))],
            children: HashMap::from([
                ("inbox-id".to_string(), vec![folder("n1", "Nyhetsbrev", Some(1))]),
                ("n1".to_string(), vec![folder("g1", "Godkjent", Some(0))]),
            ]),
            inbox: Some(folder("inbox-id", "Innboks", Some(1))),
            ..FolderFake::default()
        };
        let resolved = FolderResolver::new(&fake)
            .resolve(&ctx(), "nyhetsbrev/GODKJENT", None)
            .await
            .expect("path under inbox resolves");
        assert_eq!(resolved.id, "g1");
    }

    #[tokio::test]
    async fn path_fails_fast_on_missing_segment() {
        let fake = FolderFake {
            roots: vec![folder("1", "Inbox", Some(1))],
            children: HashMap::from([("1".to_string(), vec![folder("7", "Approved", Some(0))])]),
            ..FolderFake::default()
        };
        let resolved = FolderResolver::new(&fake)
            .resolve(&ctx(), "Inbox/Missing/Approved", None)
            .await;
        assert!(resolved.is_none());
        assert_eq!(*fake.child_calls.borrow(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn bare_name_falls_through_to_children() {
        let fake = FolderFake {
            roots: vec![
                folder("1", "Inbox", Some(0)),
                folder("2", "Marketing", Some(1)),
            ],
            children: HashMap::from([("2".to_string(), vec![folder("9", "Approved", None)])]),
            ..FolderFake::default()
        };
        let resolved = FolderResolver::new(&fake)
            .resolve(&ctx(), "approved", None)
            .await
            .expect("child name resolves");
        assert_eq!(resolved.id, "9");
        assert_eq!(resolved.via, ResolvedVia::ChildName);
        // Inbox reports no children and is never listed.
        assert_eq!(*fake.child_calls.borrow(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn name_search_stops_at_depth_two() {
        let fake = FolderFake {
            roots: vec![folder("1", "Inbox", Some(1))],
            children: HashMap::from([
                ("1".to_string(), vec![folder("2", "Nested", Some(1))]),
                ("2".to_string(), vec![folder("3", "Approved", Some(0))]),
            ]),
            ..FolderFake::default()
        };
        assert!(FolderResolver::new(&fake)
            .resolve(&ctx(), "Approved", None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn lookup_failure_is_not_found() {
        let fake = FolderFake {
            fail_roots: true,
            ..FolderFake::default()
        };
        assert!(FolderResolver::new(&fake)
            .resolve(&ctx(), "Godkjent", None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn folder_tree_lists_two_levels() {
        let fake = FolderFake {
            roots: vec![folder("1", "Inbox", Some(1)), folder("2", "Drafts", Some(0))],
            children: HashMap::from([("1".to_string(), vec![folder("7", "Godkjent", Some(0))])]),
            ..FolderFake::default()
        };
        let tree = list_folder_tree(&fake, &ctx()).await.expect("list tree");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children[0].display_name, "Godkjent");
        assert!(tree[1].children.is_empty());
    }
}
