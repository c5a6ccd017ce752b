//! URL extraction, host canonicalization, and reputation classification
//! (spec §3 normalization rules, §4.2). Pure functions, no I/O — mirrors the
//! teacher's `filter.rs` priority-ordered `evaluate()` shape, generalized from
//! slur/invite/phishing regex sets to allow/block/TLD host sets.

use std::sync::LazyLock;

use regex::Regex;

use crate::reasons::{push_unique, ReasonTag};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://\S+").expect("static URL regex is valid"));

/// Extracts every `http(s)://` run of non-whitespace from `content`, in order
/// of appearance (spec §3 "URL extraction regex").
pub fn extract_urls(content: &str) -> Vec<String> {
    URL_PATTERN.find_iter(content).map(|m| m.as_str().to_string()).collect()
}

/// Lower-cases, strips a trailing dot and a leading `www.` from a hostname
/// (spec §3 "Host canonicalization").
pub fn canonicalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    let trimmed = lower.strip_suffix('.').unwrap_or(&lower);
    trimmed.strip_prefix("www.").unwrap_or(trimmed).to_string()
}

/// Parses a raw URL string and returns its canonicalized host, if parseable.
pub fn canonical_host_of(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    parsed.host_str().map(canonicalize_host)
}

/// Canonicalized host plus path, used as the repeat-post dedup key
/// (spec §3 `urlPosts`: "canonicalHost+path").
pub fn canonical_host_and_path(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    let host = parsed.host_str().map(canonicalize_host)?;
    Some(format!("{host}{}", parsed.path()))
}

/// The last label after the final dot in a canonicalized host, used for TLD
/// membership tests (spec §3 "TLD test compares the segment after the last dot").
pub fn tld_of(canonical_host: &str) -> &str {
    canonical_host.rsplit('.').next().unwrap_or(canonical_host)
}

/// Pure classification function (spec §4.2): walks each canonicalized host in
/// `urls` against `allow` / `block` / `suspicious_tlds` in priority order and
/// accumulates an extra score plus deduplicated reason tags.
pub fn classify(
    urls: &[String],
    allow: &[String],
    block: &[String],
    suspicious_tlds: &[String],
) -> (i64, Vec<ReasonTag>) {
    let mut extra_score = 0i64;
    let mut reasons = Vec::new();

    for raw in urls {
        let Some(host) = canonical_host_of(raw) else {
            continue;
        };
        if allow.iter().any(|a| a.eq_ignore_ascii_case(&host)) {
            continue;
        }
        if block.iter().any(|b| b.eq_ignore_ascii_case(&host)) {
            extra_score += 8;
            push_unique(&mut reasons, ReasonTag::PhishingDomain);
            continue;
        }
        let tld = tld_of(&host);
        if suspicious_tlds.iter().any(|t| t.eq_ignore_ascii_case(tld)) {
            extra_score += 4;
            push_unique(&mut reasons, ReasonTag::SuspiciousDomainTld);
        }
    }

    (extra_score, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_urls_in_order() {
        let urls = extract_urls("see https://a.example and http://b.example/path?q=1 thanks");
        assert_eq!(urls, vec!["https://a.example", "http://b.example/path?q=1"]);
    }

    #[test]
    fn canonicalize_host_strips_www_and_trailing_dot() {
        assert_eq!(canonicalize_host("WWW.Example.com."), "example.com");
        assert_eq!(canonicalize_host("example.com"), "example.com");
    }

    #[test]
    fn canonical_host_and_path_includes_path() {
        let key = canonical_host_and_path("https://www.Example.com/foo/bar?x=1").unwrap();
        assert_eq!(key, "example.com/foo/bar");
    }

    #[test]
    fn tld_of_returns_last_label() {
        assert_eq!(tld_of("safe-looking.zip"), "zip");
        assert_eq!(tld_of("example.co.uk"), "uk");
    }

    #[test]
    fn classify_allow_skips_entirely() {
        let urls = vec!["https://trusted.example".to_string()];
        let (score, reasons) = classify(&urls, &["trusted.example".to_string()], &[], &[]);
        assert_eq!(score, 0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn classify_block_adds_eight_and_phishing_tag() {
        let urls = vec!["https://login-discord-security.example".to_string()];
        let (score, reasons) = classify(
            &urls,
            &[],
            &["login-discord-security.example".to_string()],
            &[],
        );
        assert_eq!(score, 8);
        assert_eq!(reasons, vec![ReasonTag::PhishingDomain]);
    }

    #[test]
    fn classify_suspicious_tld_adds_four() {
        let urls = vec!["https://safe-looking.zip".to_string()];
        let (score, reasons) = classify(&urls, &[], &[], &["zip".to_string()]);
        assert_eq!(score, 4);
        assert_eq!(reasons, vec![ReasonTag::SuspiciousDomainTld]);
    }

    #[test]
    fn classify_deduplicates_reasons_across_multiple_blocked_urls() {
        let urls = vec![
            "https://bad.example".to_string(),
            "https://bad2.example".to_string(),
        ];
        let (score, reasons) = classify(
            &urls,
            &[],
            &["bad.example".to_string(), "bad2.example".to_string()],
            &[],
        );
        assert_eq!(score, 16);
        assert_eq!(reasons, vec![ReasonTag::PhishingDomain]);
    }
}
