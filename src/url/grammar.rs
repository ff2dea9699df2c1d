//! The onion URI grammar
//!
//! One compiled pattern is shared by every caller. The pattern itself carries
//! no scan position: each call to [`scan`] starts a new iterator at the
//! beginning of its input.

use regex::{CaptureMatches, Captures, Regex};
use std::sync::LazyLock;

/// Optional scheme, optional `www.`, optional subdomain labels, a v3 (56 char)
/// or v2 (16 char) base32 service label with the `.onion` suffix, then an
/// optional path and query taken verbatim up to whitespace, quotes or angle
/// brackets.
static ONION_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:(?P<scheme>https?)://)?(?:www\.)?(?P<sub>(?:[a-z0-9-]+\.)*?)(?P<host>(?:[a-z2-7]{56}|[a-z2-7]{16})\.onion)\b(?P<path>/[^\s"'<>`]*)?"#,
    )
    .expect("onion URI grammar is a valid regex")
});

/// One raw grammar match, borrowed from the scanned text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMatch<'t> {
    pub scheme: Option<&'t str>,
    /// Subdomain labels including the trailing dot, empty when absent
    pub subdomain: &'t str,
    pub host: &'t str,
    pub path: Option<&'t str>,
}

/// Iterator over grammar matches in a piece of text
pub struct Matches<'r, 't> {
    inner: CaptureMatches<'r, 't>,
}

impl<'r, 't> Iterator for Matches<'r, 't> {
    type Item = RawMatch<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|caps| to_raw(&caps))
    }
}

fn to_raw<'t>(caps: &Captures<'t>) -> RawMatch<'t> {
    RawMatch {
        scheme: caps.name("scheme").map(|m| m.as_str()),
        subdomain: caps.name("sub").map(|m| m.as_str()).unwrap_or(""),
        host: caps.name("host").map(|m| m.as_str()).unwrap_or(""),
        path: caps.name("path").map(|m| m.as_str()),
    }
}

/// Scans `text` for onion URIs, returning a fresh iterator
pub fn scan(text: &str) -> Matches<'static, '_> {
    Matches {
        inner: ONION_URI.captures_iter(text),
    }
}
