//! Microsoft Defender SafeLinks unwrapping.
//!
//! Outlook rewrites outbound links to
//! `https://<region>.safelinks.protection.outlook.com/?url=<encoded>&data=...`.
//! The original destination is restored only when it is a plain http(s) URL
//! with a host; anything else keeps the wrapper.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

/// Guards against wrappers nested inside wrappers.
const MAX_UNWRAP_DEPTH: usize = 3;

fn wrapper_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*https?://(?:[a-z0-9-]+\.)*safelinks\.protection\.outlook\.com(?::\d+)?/")
            .expect("compile safelinks regex")
    })
}

pub fn is_safelinks(url: &str) -> bool {
    wrapper_pattern().is_match(url)
}

pub fn unwrap_safelinks(url: &str) -> Cow<'_, str> {
    let mut current: Option<String> = None;

    for _ in 0..MAX_UNWRAP_DEPTH {
        let candidate = current.as_deref().unwrap_or(url);
        if !is_safelinks(candidate) {
            break;
        }
        match original_destination(candidate) {
            Some(target) => current = Some(target),
            None => break,
        }
    }

    match current {
        Some(target) => Cow::Owned(target),
        None => Cow::Borrowed(url),
    }
}

fn original_destination(wrapper: &str) -> Option<String> {
    let parsed = Url::parse(wrapper.trim()).ok()?;
    let target = parsed
        .query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case("url"))
        .map(|(_, value)| value.trim().to_string())?;

    let destination = Url::parse(&target).ok()?;
    let safe_scheme = matches!(destination.scheme(), "http" | "https");
    let has_host = destination
        .host_str()
        .is_some_and(|host| !host.is_empty());
    (safe_scheme && has_host).then_some(target)
}

#[cfg(test)]
mod tests {
    use super::{is_safelinks, unwrap_safelinks};

    const WRAPPED: &str = "https://eur02.safelinks.protection.outlook.com/?url=https%3A%2F%2Fexample.com%2Fpage&data=05%7C01&reserved=0";

    #[test]
    fn unwraps_to_exact_destination() {
        assert!(is_safelinks(WRAPPED));
        assert_eq!(unwrap_safelinks(WRAPPED), "https://example.com/page");
    }

    #[test]
    fn keeps_query_of_destination() {
        let wrapped = "https://nam12.safelinks.protection.outlook.com/?url=https%3A%2F%2Fshop.example.no%2Fkampanje%3Futm_source%3Dnyhetsbrev%26id%3D4&data=x";
        assert_eq!(
            unwrap_safelinks(wrapped),
            "https://shop.example.no/kampanje?utm_source=nyhetsbrev&id=4"
        );
    }

    #[test]
    fn unsafe_destinations_keep_the_wrapper() {
        let script = "https://eur02.safelinks.protection.outlook.com/?url=javascript%3Aalert(1)&data=x";
        assert_eq!(unwrap_safelinks(script), script);

        let hostless = "https://eur02.safelinks.protection.outlook.com/?url=https%3A%2F%2F&data=x";
        assert_eq!(unwrap_safelinks(hostless), hostless);

        let missing = "https://eur02.safelinks.protection.outlook.com/?data=x";
        assert_eq!(unwrap_safelinks(missing), missing);
    }

    #[test]
    fn nested_wrappers_are_unwrapped() {
        let inner = urlencode(WRAPPED);
        let outer = format!("https://eur01.safelinks.protection.outlook.com/?url={inner}");
        assert_eq!(unwrap_safelinks(&outer), "https://example.com/page");
    }

    #[test]
    fn lookalike_hosts_are_ignored() {
        let fake = "https://safelinks.protection.outlook.com.evil.example/?url=https%3A%2F%2Fexample.com";
        assert!(!is_safelinks(fake));
        assert_eq!(unwrap_safelinks(fake), fake);
        assert_eq!(unwrap_safelinks("https://example.com/"), "https://example.com/");
    }

    fn urlencode(raw: &str) -> String {
        let mut url = reqwest::Url::parse("http://x/").expect("parse base");
        url.query_pairs_mut().append_pair("u", raw);
        url.query()
            .and_then(|query| query.strip_prefix("u="))
            .expect("encoded query")
            .to_string()
    }
}
