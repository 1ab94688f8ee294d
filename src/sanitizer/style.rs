use std::sync::OnceLock;

use regex::Regex;

const ALLOWED_PROPERTIES: &[&str] = &[
    "color",
    "background-color",
    "font-size",
    "font-weight",
    "font-family",
    "text-align",
    "text-decoration",
    "margin",
    "padding",
    "border",
    "border-color",
    "border-width",
    "border-style",
    "width",
    "height",
    "max-width",
    "max-height",
    "display",
    "float",
    "clear",
];

const COLOR_PROPERTIES: &[&str] = &["color", "background-color"];

/// Matched against the lowercased value with all whitespace removed.
const DENIED_VALUE_PATTERNS: &[&str] = &[
    "javascript:",
    "vbscript:",
    "expression(",
    "@import",
    "url(",
    "behavior:",
    "binding:",
    "mozbinding",
    "\\",
    "/*",
];

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(#[0-9a-f]{3,8}|rgba?\([0-9.,%\s]*\)|[a-z]+)$")
            .expect("compile css color regex")
    })
}

/// Re-serializes an inline `style` attribute keeping only allow-listed
/// declarations. `None` when nothing survives.
pub fn filter_declarations(style: &str) -> Option<String> {
    let kept: Vec<String> = style
        .split(';')
        .filter_map(|declaration| {
            let (property, value) = declaration.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            is_allowed(&property, value).then(|| format!("{property}: {value}"))
        })
        .collect();

    (!kept.is_empty()).then(|| kept.join("; "))
}

fn is_allowed(property: &str, value: &str) -> bool {
    if value.is_empty() || !ALLOWED_PROPERTIES.contains(&property) {
        return false;
    }
    if value.chars().any(|c| c.is_control() || c == '<' || c == '>' || c == '"') {
        return false;
    }

    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if DENIED_VALUE_PATTERNS
        .iter()
        .any(|pattern| compact.contains(pattern))
    {
        return false;
    }

    if COLOR_PROPERTIES.contains(&property) {
        return color_pattern().is_match(value);
    }
    true
}
