use crate::url::grammar::RawMatch;
use crate::url::DiscoveredLink;

/// Normalizes a raw grammar match into a discovered link
///
/// # Normalization Steps
///
/// 1. Lowercase the onion host and subdomain labels
/// 2. Drop the trailing dot of the subdomain; an empty subdomain becomes `None`
/// 3. Drop any `#fragment`; it is never sent to the server
/// 4. An absent or empty path becomes `/`
/// 5. `secure` is set only for an explicit `https` scheme
///
/// # Examples
///
/// ```
/// use onion_ripple::url::extract_links;
///
/// let links = extract_links("http://AbCdEfGhAbCdEfGh.onion");
/// assert_eq!(links[0].host, "abcdefghabcdefgh.onion");
/// assert_eq!(links[0].path, "/");
/// ```
pub fn normalize_match(raw: &RawMatch<'_>) -> DiscoveredLink {
    let subdomain = raw.subdomain.trim_end_matches('.').to_lowercase();

    DiscoveredLink {
        host: raw.host.to_lowercase(),
        subdomain: (!subdomain.is_empty()).then_some(subdomain),
        path: normalize_path(raw.path.unwrap_or("")),
        secure: raw
            .scheme
            .map(|s| s.eq_ignore_ascii_case("https"))
            .unwrap_or(false),
    }
}

/// Normalizes a captured path: strips the fragment and defaults to `/`
pub fn normalize_path(path: &str) -> String {
    let without_fragment = path.split('#').next().unwrap_or("");
    if without_fragment.is_empty() {
        "/".to_string()
    } else {
        without_fragment.to_string()
    }
}
