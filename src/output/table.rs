use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::Newsletter;
use crate::graph::models::FolderNode;
use crate::ingest::SyncReport;
use crate::sanitizer::render_text;

const ID_WIDTH: usize = 6;
const DATE_WIDTH: usize = 16;
const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 52;
const BODY_WIDTH: usize = 100;

pub fn format_newsletters(newsletters: &[Newsletter]) -> String {
    if newsletters.is_empty() {
        return "No newsletters stored.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:>id$}  {:<date$}  {:<from$}  {:<subject$}\n",
        "ID",
        "Received",
        "From",
        "Subject",
        id = ID_WIDTH,
        date = DATE_WIDTH,
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(ID_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH)
    ));

    for newsletter in newsletters {
        let from = truncate_for_width(sender_label(newsletter), FROM_WIDTH);
        let mut subject = newsletter.subject.clone();
        if newsletter.hero_image_path.is_some() {
            subject.push_str(" [img]");
        }
        out.push_str(&format!(
            "{:>id$}  {:<date$}  {}  {}\n",
            newsletter.id,
            newsletter.received_at_formatted,
            pad_to_width(&from, FROM_WIDTH),
            truncate_for_width(&subject, SUBJECT_WIDTH),
            id = ID_WIDTH,
            date = DATE_WIDTH,
        ));
    }

    out
}

pub fn format_newsletter(newsletter: &Newsletter) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", newsletter.id));
    out.push_str(&format!("Message ID: {}\n", newsletter.message_id));
    out.push_str(&format!("Subject: {}\n", newsletter.subject));
    out.push_str(&format!(
        "From: {} <{}>\n",
        newsletter.sender_name.as_deref().unwrap_or("(unknown)"),
        newsletter.sender_email.as_deref().unwrap_or("(unknown)")
    ));
    out.push_str(&format!("Received: {}\n", newsletter.received_at_formatted));
    match &newsletter.auth_results {
        Some(auth) => out.push_str(&format!(
            "Authentication: {} (spf={}, dkim={}, dmarc={})\n",
            auth.overall, auth.spf, auth.dkim, auth.dmarc
        )),
        None => out.push_str("Authentication: (not recorded)\n"),
    }
    if let Some(hero) = &newsletter.hero_image_path {
        out.push_str(&format!("Hero image: {hero}\n"));
    }
    out.push_str(&format!("Updated: {}\n", newsletter.updated_at));

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    let body = newsletter
        .html_sanitized
        .as_deref()
        .and_then(|html| render_text(html, BODY_WIDTH))
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| "(empty)".to_string());
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut out = String::new();
    out.push_str(if report.success {
        "Sync succeeded\n"
    } else {
        "Sync failed\n"
    });
    out.push_str("==============\n");
    out.push_str(&format!("Processed: {}\n", report.processed));
    out.push_str(&format!("Saved:     {}\n", report.saved));
    out.push_str(&format!("Updated:   {}\n", report.updated));
    out.push_str(&format!("Errors:    {}\n", report.errors));

    if !report.messages.is_empty() {
        out.push('\n');
        for message in &report.messages {
            out.push_str(&format!("- {message}\n"));
        }
    }
    out
}

pub fn format_folder_tree(tree: &[FolderNode]) -> String {
    if tree.is_empty() {
        return "No mail folders found.".to_string();
    }

    let mut out = String::new();
    for node in tree {
        out.push_str(&format!("{}  ({})\n", node.folder.display_name, node.folder.id));
        for child in &node.children {
            out.push_str(&format!("  └─ {}  ({})\n", child.display_name, child.id));
        }
    }
    out
}

fn sender_label(newsletter: &Newsletter) -> &str {
    newsletter
        .sender_name
        .as_deref()
        .or(newsletter.sender_email.as_deref())
        .unwrap_or("(unknown)")
}

fn pad_to_width(value: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(value);
    format!("{value}{}", " ".repeat(width.saturating_sub(used)))
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use unicode_width::UnicodeWidthStr;

    use super::{format_newsletter, format_newsletters, format_sync_report, truncate_for_width};
    use crate::db::models::Newsletter;
    use crate::ingest::auth_results::AuthenticationVerdict;
    use crate::ingest::SyncReport;

    fn sample_newsletter() -> Newsletter {
        Newsletter {
            id: 7,
            message_id: "AAMkAD-7".to_string(),
            subject: "Vårkampanje på gravemaskiner og tilhengere med ekstra lang tittel".to_string(),
            sender_name: Some("Grønvold Maskin".to_string()),
            sender_email: Some("info@gronvoldmaskin.no".to_string()),
            received_at: "2026-04-02T08:30:00".to_string(),
            received_at_formatted: "02.04.2026 08:30".to_string(),
            html_raw: None,
            html_sanitized: Some("<h1>Vårkampanje</h1><p>Gode priser.</p>".to_string()),
            auth_results: Some(AuthenticationVerdict::from_headers([
                "spf=pass; dkim=pass; dmarc=pass",
            ])),
            has_attachments: true,
            hero_image_path: Some("/static/newsletters/AAMkAD7_x.png".to_string()),
            created_at: "2026-04-02T08:31:00.000Z".to_string(),
            updated_at: "2026-04-02T08:31:00.000Z".to_string(),
        }
    }

    #[test]
    fn list_output_has_headers_and_truncates() {
        let rendered = format_newsletters(&[sample_newsletter()]);
        assert!(rendered.contains("Received"));
        assert!(rendered.contains("02.04.2026 08:30"));
        assert!(rendered.contains('…'));
        assert_eq!(format_newsletters(&[]), "No newsletters stored.");
    }

    #[test]
    fn detail_output_renders_body_as_text() {
        let rendered = format_newsletter(&sample_newsletter());
        assert!(rendered.contains("Authentication: pass"));
        assert!(rendered.contains("Hero image: /static/newsletters/AAMkAD7_x.png"));
        assert!(rendered.contains("Gode priser."));
        assert!(!rendered.contains("<p>"));
    }

    #[test]
    fn sync_report_lists_messages() {
        let report = SyncReport {
            success: false,
            messages: vec!["Newsletter synchronization failed: no access token available".to_string()],
            ..SyncReport::default()
        };
        let rendered = format_sync_report(&report);
        assert!(rendered.starts_with("Sync failed"));
        assert!(rendered.contains("- Newsletter synchronization failed"));
    }

    #[test]
    fn truncation_respects_display_width() {
        let truncated = truncate_for_width("日本語のニュースレター", 9);
        assert!(UnicodeWidthStr::width(truncated.as_str()) <= 9);
        assert!(truncated.ends_with('…'));
    }
}
