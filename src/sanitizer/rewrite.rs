use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Finds and replaces `cid:` references in already-sanitized HTML.
///
/// Callers only depend on this trait, so a tree-based rewriter can replace
/// the regex one without touching the image processor.
pub trait CidRewriter {
    /// Every referenced content-id, lowercased and without brackets.
    fn cid_references(&self, html: &str) -> BTreeSet<String>;

    /// Replaces every textual variant of `cid:<content_id>` with
    /// `replacement` and returns the new HTML with the replacement count.
    fn replace_cid(&self, html: &str, content_id: &str, replacement: &str) -> (String, usize);
}

/// Groups: opening bracket, content-id, closing bracket.
fn cid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)cid:(<|&lt;)?([^\s"'<>&]+)(>|&gt;)?"#).expect("compile cid regex")
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexRewriter;

impl CidRewriter for RegexRewriter {
    fn cid_references(&self, html: &str) -> BTreeSet<String> {
        cid_pattern()
            .captures_iter(html)
            .filter_map(|caps| caps.get(2))
            .map(|token| normalize(token.as_str()))
            .filter(|token| !token.is_empty())
            .collect()
    }

    fn replace_cid(&self, html: &str, content_id: &str, replacement: &str) -> (String, usize) {
        let wanted = normalize(content_id);
        if wanted.is_empty() {
            return (html.to_string(), 0);
        }

        let mut count = 0usize;
        let rewritten = cid_pattern().replace_all(html, |caps: &Captures<'_>| {
            if normalize(&caps[2]) != wanted {
                return caps[0].to_string();
            }
            count += 1;
            match (caps.get(1), caps.get(3)) {
                // A closing `>` without an opening bracket ends the tag.
                (None, Some(close)) => format!("{replacement}{}", close.as_str()),
                _ => replacement.to_string(),
            }
        });

        (rewritten.into_owned(), count)
    }
}

fn normalize(content_id: &str) -> String {
    content_id
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_lowercase()
}
