use anyhow::Result;

use crate::db::models::Newsletter;
use crate::graph::models::FolderNode;
use crate::ingest::SyncReport;

pub fn format_newsletters(newsletters: &[Newsletter]) -> Result<String> {
    Ok(serde_json::to_string_pretty(newsletters)?)
}

pub fn format_newsletter(newsletter: &Newsletter) -> Result<String> {
    Ok(serde_json::to_string_pretty(newsletter)?)
}

pub fn format_sync_report(report: &SyncReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn format_folder_tree(tree: &[FolderNode]) -> Result<String> {
    Ok(serde_json::to_string_pretty(tree)?)
}
