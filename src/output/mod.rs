pub mod json;
pub mod table;

use anyhow::Result;

use crate::db::models::Newsletter;
use crate::graph::models::FolderNode;
use crate::ingest::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_newsletters(format: OutputFormat, newsletters: &[Newsletter]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_newsletters(newsletters)),
        OutputFormat::Json => json::format_newsletters(newsletters),
    }
}

pub fn format_newsletter(format: OutputFormat, newsletter: &Newsletter) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_newsletter(newsletter)),
        OutputFormat::Json => json::format_newsletter(newsletter),
    }
}

pub fn format_sync_report(format: OutputFormat, report: &SyncReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_report(report)),
        OutputFormat::Json => json::format_sync_report(report),
    }
}

pub fn format_folder_tree(format: OutputFormat, tree: &[FolderNode]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_folder_tree(tree)),
        OutputFormat::Json => json::format_folder_tree(tree),
    }
}
