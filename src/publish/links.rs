//! Post links
//!
//! URL helpers for the manual flow: the web-intent composer link handed out
//! with every receipt, the canonical link of a published post, and parsing a
//! pasted post link back into its id.

use lazy_static::lazy_static;
use reqwest::Url;

lazy_static! {
    static ref INTENT_BASE: Url =
        Url::parse("https://twitter.com/intent/tweet").expect("Failed to parse intent URL");
}

/// Composer link prefilled with `text`
pub fn intent_url(text: &str) -> String {
    let mut url = INTENT_BASE.clone();
    url.query_pairs_mut().append_pair("text", text);
    url.into()
}

/// Canonical link of a published post
pub fn post_url(external_id: &str) -> String {
    format!("https://x.com/i/web/status/{}", external_id)
}

fn is_post_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Extract a post id from a bare id or a pasted post link
///
/// Accepts `12345`, `https://x.com/someone/status/12345` and
/// `https://twitter.com/someone/status/12345?s=20`.
pub fn extract_post_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_post_id(input) {
        return Some(input.to_string());
    }

    let url = Url::parse(input).ok()?;
    let host = url.host_str()?;
    let known = ["x.com", "twitter.com"]
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)));
    if !known {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "status" && is_post_id(pair[1]))
        .map(|pair| pair[1].to_string())
}
