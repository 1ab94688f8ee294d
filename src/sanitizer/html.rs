use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ammonia::{Builder, UrlRelative};

use crate::sanitizer::safelinks::unwrap_safelinks;
use crate::sanitizer::style::filter_declarations;

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "b", "em", "i", "u", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5",
    "h6", "div", "span", "blockquote", "pre", "code", "a", "img", "table", "thead", "tbody", "tr",
    "th", "td", "hr", "small", "sub", "sup",
];

const TAG_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href", "title"]),
    ("img", &["src", "alt", "title", "width", "height", "style"]),
    ("div", &["style"]),
    ("span", &["style"]),
    ("p", &["style"]),
    ("table", &["style", "border", "cellpadding", "cellspacing"]),
    ("th", &["style", "colspan", "rowspan"]),
    ("td", &["style", "colspan", "rowspan"]),
];

const GENERIC_ATTRIBUTES: &[&str] = &["class"];

/// `cid` survives so inline images can be embedded afterwards; the attribute
/// filter keeps it off anything but `<img src>`.
const URL_SCHEMES: &[&str] = &["http", "https", "mailto", "data", "cid"];

/// Removed together with their content rather than unwrapped.
const DROPPED_WITH_CONTENT: &[&str] = &["script", "style", "iframe", "noscript", "object", "title"];

const SCRIPT_SCHEMES: &[&str] = &["javascript", "vbscript"];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href"];

const RASTER_DATA_PREFIXES: &[&str] = &[
    "data:image/png",
    "data:image/jpeg",
    "data:image/jpg",
    "data:image/gif",
    "data:image/webp",
    "data:image/bmp",
];

pub(crate) fn policy() -> Builder<'static> {
    let tag_attributes: HashMap<&'static str, HashSet<&'static str>> = TAG_ATTRIBUTES
        .iter()
        .map(|(tag, attributes)| (*tag, attributes.iter().copied().collect()))
        .collect();

    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(DROPPED_WITH_CONTENT.iter().copied().collect())
        .tag_attributes(tag_attributes)
        .generic_attributes(GENERIC_ATTRIBUTES.iter().copied().collect())
        .url_schemes(URL_SCHEMES.iter().copied().collect())
        .url_relative(UrlRelative::Deny)
        .link_rel(Some("noopener noreferrer"))
        .strip_comments(true)
        .attribute_filter(filter_attribute);
    builder
}

/// Second-parse policy over already sanitized output. Handler attributes and
/// script URLs are let through to the callback so they can be reported; the
/// resulting document is discarded.
pub(crate) fn inspection_policy(found: Arc<AtomicBool>) -> Builder<'static> {
    let mut attributes: HashSet<&'static str> = TAG_ATTRIBUTES
        .iter()
        .flat_map(|(_, attributes)| attributes.iter().copied())
        .chain(GENERIC_ATTRIBUTES.iter().copied())
        .chain(URL_ATTRIBUTES.iter().copied())
        .collect();
    attributes.insert("rel");

    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .generic_attributes(attributes)
        .generic_attribute_prefixes(HashSet::from(["on"]))
        .url_schemes(URL_SCHEMES.iter().chain(SCRIPT_SCHEMES).copied().collect())
        .url_relative(UrlRelative::PassThrough)
        .link_rel(None)
        .attribute_filter(move |_element, attribute, value| {
            if is_active_attribute(attribute, value) {
                found.store(true, Ordering::Relaxed);
            }
            Some(Cow::Borrowed(value))
        });
    builder
}

/// Event handlers, and script URLs in URL-bearing attributes or styles.
fn is_active_attribute(attribute: &str, value: &str) -> bool {
    if attribute.to_ascii_lowercase().starts_with("on") {
        return true;
    }
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    let mut script_urls = SCRIPT_SCHEMES.iter().map(|scheme| format!("{scheme}:"));
    if attribute == "style" {
        script_urls.any(|url| compact.contains(&url))
    } else if URL_ATTRIBUTES.contains(&attribute) {
        script_urls.any(|url| compact.starts_with(&url))
    } else {
        false
    }
}

fn filter_attribute<'u>(element: &str, attribute: &str, value: &'u str) -> Option<Cow<'u, str>> {
    match attribute {
        "style" => filter_declarations(value).map(Cow::Owned),
        "class" => filter_classes(value),
        "href" => filter_href(value),
        "src" => filter_src(element, value),
        _ => Some(Cow::Borrowed(value)),
    }
}

/// Class names are limited to plain identifier tokens.
fn filter_classes(value: &str) -> Option<Cow<'_, str>> {
    let kept: Vec<&str> = value
        .split_ascii_whitespace()
        .filter(|name| {
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .collect();
    (!kept.is_empty()).then(|| Cow::Owned(kept.join(" ")))
}

fn filter_href(value: &str) -> Option<Cow<'_, str>> {
    let lowered = value.trim_start().to_ascii_lowercase();
    if lowered.starts_with("data:") || lowered.starts_with("cid:") {
        return None;
    }
    Some(unwrap_safelinks(value))
}

fn filter_src<'u>(element: &str, value: &'u str) -> Option<Cow<'u, str>> {
    if element != "img" {
        return None;
    }
    let lowered = value.trim_start().to_ascii_lowercase();
    if lowered.starts_with("cid:") {
        return Some(Cow::Borrowed(value));
    }
    if lowered.starts_with("data:") {
        let raster = RASTER_DATA_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix));
        return raster.then_some(Cow::Borrowed(value));
    }
    Some(unwrap_safelinks(value))
}
