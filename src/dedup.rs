// src/dedup.rs
// Content canonicalization + fingerprinting. The same story is republished
// under different URLs across portals, so the fingerprint is a digest over
// normalized content, never the URL.

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

/// Normalize raw article content before hashing: decode HTML entities,
/// strip markup, collapse whitespace, trim. Near-identical re-scrapes of
/// the same article collapse to one fingerprint.
pub fn normalize_content(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// SHA-256 hex digest over the normalized bytes.
pub fn fingerprint(raw_content: &str) -> String {
    let normalized = normalize_content(raw_content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write as _;
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

/// Pure membership check against the fingerprints of live (non-rejected)
/// items. Enforcement happens in the moderation queue at insert time.
pub fn is_duplicate<'a>(hash: &str, live: impl IntoIterator<Item = &'a str>) -> bool {
    live.into_iter().any(|f| f == hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_markup_and_collapses_ws() {
        let s = "  <p>Hello,&nbsp;&nbsp; <b>world</b>!</p>\n\n";
        assert_eq!(normalize_content(s), "Hello, world !");
    }

    #[test]
    fn near_identical_rescrapes_share_a_fingerprint() {
        let a = "<div>Council approves   budget</div>";
        let b = "Council approves budget";
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(fingerprint("story one"), fingerprint("story two"));
    }

    #[test]
    fn duplicate_check_is_exact_membership() {
        let live = ["aaa".to_string(), "bbb".to_string()];
        assert!(is_duplicate("aaa", live.iter().map(|s| s.as_str())));
        assert!(!is_duplicate("ccc", live.iter().map(|s| s.as_str())));
    }
}
