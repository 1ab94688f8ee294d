//! Untrusted newsletter HTML to a safe, allow-listed subset.

mod html;
pub mod rewrite;
pub mod safelinks;
pub mod style;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

const PLAIN_TEXT_WIDTH: usize = 120;

/// Sanitizes attacker-controlled HTML. Never returns markup it could not
/// fully clean: on any failure the result is escaped plain text, or empty.
pub fn sanitize_html(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let cleaned = catch_unwind(AssertUnwindSafe(|| {
        let safe = html::policy().clean(raw).to_string();
        let active = has_active_attributes(&safe) || contains_active_elements(&safe);
        (safe, active)
    }));

    match cleaned {
        Ok((safe, false)) => {
            debug!("sanitized {} bytes of html into {}", raw.len(), safe.len());
            safe
        }
        Ok((_, true)) => {
            warn!("active content survived sanitization, falling back to plain text");
            plain_text_fallback(raw)
        }
        Err(_) => {
            error!("html sanitizer panicked, falling back to plain text");
            plain_text_fallback(raw)
        }
    }
}

/// Parses sanitized output again and reports any event handler or script
/// URL left on an element. Text content is never inspected.
fn has_active_attributes(html: &str) -> bool {
    let found = Arc::new(AtomicBool::new(false));
    let _ = html::inspection_policy(Arc::clone(&found)).clean(html);
    found.load(Ordering::Relaxed)
}

fn contains_active_elements(html: &str) -> bool {
    let lowered = html.to_lowercase();
    ["<script", "<iframe", "<object", "<embed", "<svg", "<math", "<form"]
        .iter()
        .any(|tag| lowered.contains(tag))
}

/// All markup stripped; text escaped with line breaks kept as `<br>`.
pub fn plain_text_fallback(raw: &str) -> String {
    render_text(raw, PLAIN_TEXT_WIDTH)
        .map(|text| text_to_html_lines(text.trim()))
        .unwrap_or_default()
}

/// Readable text rendering of HTML, wrapped at `width` columns.
pub fn render_text(html: &str, width: usize) -> Option<String> {
    let text = catch_unwind(AssertUnwindSafe(|| {
        html2text::from_read(html.as_bytes(), width)
    }));
    match text {
        Ok(text) => Some(text),
        Err(_) => {
            error!("plain text conversion panicked, dropping content");
            None
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes text and turns line breaks into `<br>`.
pub fn text_to_html_lines(text: &str) -> String {
    text.lines()
        .map(|line| escape_html(line.trim_end()))
        .collect::<Vec<_>>()
        .join("<br>")
}

#[cfg(test)]
mod tests {
    use super::{
        escape_html, has_active_attributes, plain_text_fallback, sanitize_html, text_to_html_lines,
    };

    fn assert_inert(output: &str) {
        let lowered = output.to_lowercase();
        for needle in ["<script", "<iframe", "onerror", "onclick", "onload", "javascript:"] {
            assert!(!lowered.contains(needle), "{needle} survived in {output}");
        }
    }

    #[test]
    fn scripts_handlers_and_frames_are_removed() {
        let raw = r#"<div onclick="steal()"><SCRIPT>alert(1)</SCRIPT><p>Hei</p>
            <iframe src="https://evil.example"></iframe>
            <img src="https://cdn.example/a.png" onerror="x()" ONLOAD='y()'>
            <a href="JaVaScRiPt:alert(1)">klikk</a></div>"#;
        let safe = sanitize_html(raw);
        assert_inert(&safe);
        assert!(safe.contains("<p>Hei</p>"));
        assert!(safe.contains(r#"src="https://cdn.example/a.png""#));
        assert!(safe.contains(">klikk</a>"));
    }

    #[test]
    fn forms_and_unknown_tags_are_unwrapped() {
        let safe = sanitize_html(r#"<form action="/x"><input name="a"><font color="red">Tekst</font></form>"#);
        assert!(!safe.contains("<form"));
        assert!(!safe.contains("<input"));
        assert!(!safe.contains("<font"));
        assert!(safe.contains("Tekst"));
    }

    #[test]
    fn inline_styles_are_filtered() {
        let safe = sanitize_html(
            r#"<p style="color: red; position: fixed; background-color: url(x)">Rød</p>"#,
        );
        assert!(safe.contains(r#"<p style="color: red">Rød</p>"#), "{safe}");

        let unstyled = sanitize_html(r#"<span style="position: fixed">x</span>"#);
        assert_eq!(unstyled, "<span>x</span>");
    }

    #[test]
    fn safelinks_are_unwrapped_in_hrefs() {
        let raw = r#"<a href="https://eur02.safelinks.protection.outlook.com/?url=https%3A%2F%2Fexample.com%2Fpage&amp;data=05%7C01&amp;reserved=0">Les mer</a>"#;
        let safe = sanitize_html(raw);
        assert!(safe.contains(r#"href="https://example.com/page""#), "{safe}");
    }

    #[test]
    fn unsafe_safelinks_destination_stays_wrapped() {
        let raw = r#"<a href="https://eur02.safelinks.protection.outlook.com/?url=javascript%3Aalert(1)&amp;data=x">x</a>"#;
        let safe = sanitize_html(raw);
        assert!(safe.contains("safelinks.protection.outlook.com"));
        assert_inert(&safe);
    }

    #[test]
    fn cid_images_survive_for_embedding() {
        let safe = sanitize_html(r#"<img src="cid:image001.png@01DA" alt="logo">"#);
        assert!(safe.contains(r#"src="cid:image001.png@01DA""#), "{safe}");

        let linked = sanitize_html(r#"<a href="cid:image001.png@01DA">x</a>"#);
        assert!(!linked.contains("cid:"));
    }

    #[test]
    fn disallowed_schemes_and_svg_data_are_stripped() {
        let safe = sanitize_html(
            r#"<a href="file:///etc/passwd">f</a><img src="data:image/svg+xml;base64,PHN2Zz4="><a href="mailto:post@example.no">m</a>"#,
        );
        assert!(!safe.contains("file:"));
        assert!(!safe.contains("svg"));
        assert!(safe.contains(r#"href="mailto:post@example.no""#));
    }

    #[test]
    fn malformed_markup_is_never_returned_verbatim() {
        let raw = r#"<div><p>unterminated <b>bold <img src=x onerror=alert(1)"#;
        let safe = sanitize_html(raw);
        assert_ne!(safe, raw);
        assert_inert(&safe);
    }

    #[test]
    fn mixed_quotes_in_class_cannot_forge_a_handler() {
        let raw = r#"<span class="a onz='">X' Y"/onmouseover=alert(1) z="</span><p>tail</p>"#;
        let safe = sanitize_html(raw);
        assert!(safe.starts_with(r#"<span class="a">"#), "{safe}");
        assert!(safe.contains("<p>tail</p>"));
        assert!(!safe.contains("onz"));
        assert!(!has_active_attributes(&safe), "{safe}");
        assert_eq!(sanitize_html(&safe), safe);
    }

    #[test]
    fn handler_like_prose_is_kept() {
        let raw = "<p>see onclick=here</p><p>Kom innom onsdag = gratis kaffe</p>";
        assert_eq!(sanitize_html(raw), raw);
    }

    #[test]
    fn script_scheme_is_removed_from_links_but_not_from_text() {
        let raw = r#"<p>javascript: is a language</p><a href=" java&#x09;script:alert(1)">x</a><a title='say "onload=x"' href="https://example.com/">ok</a>"#;
        let safe = sanitize_html(raw);
        assert!(safe.contains("<p>javascript: is a language</p>"), "{safe}");
        assert!(!safe.contains("script:alert"), "{safe}");
        assert!(safe.contains(r#"title="say &quot;onload=x&quot;""#), "{safe}");
        assert!(safe.contains(r#"href="https://example.com/""#), "{safe}");
        assert!(!has_active_attributes(&safe));
    }

    #[test]
    fn second_parse_reports_handlers_and_script_urls() {
        assert!(has_active_attributes(r#"<b onclick="x()">a</b>"#));
        assert!(has_active_attributes(r#"<a href="javascript:alert(1)">a</a>"#));
        assert!(has_active_attributes(r#"<img src="VBScript:msgbox">"#));
        assert!(!has_active_attributes("<p>see onclick=here</p>"));
        assert!(!has_active_attributes(
            r#"<a title="javascript: guide" href="https://example.no/">a</a>"#
        ));
    }

    #[test]
    fn comments_are_stripped() {
        let safe = sanitize_html("<p>a<!-- [if mso]><script>x</script><![endif] -->b</p>");
        assert_eq!(safe, "<p>ab</p>");
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(sanitize_html("   \n"), "");
    }

    #[test]
    fn plain_text_fallback_escapes_everything() {
        let text = plain_text_fallback("<p>a &amp; b</p><p>c</p>");
        assert!(!text.contains("<p>"));
        assert!(text.contains("a &amp; b"));
        assert!(text.contains("<br>"));
    }

    #[test]
    fn escaping_helpers() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
        assert_eq!(text_to_html_lines("linje 1\r\nlinje <2>"), "linje 1<br>linje &lt;2&gt;");
    }
}
