//! URL handling module for Onion-Ripple
//!
//! This module owns the onion URI grammar shared by seeding and link
//! extraction, and the normalization applied to every match.

mod grammar;
mod normalize;

pub use grammar::{scan, Matches, RawMatch};
pub use normalize::{normalize_match, normalize_path};

/// An onion URI found in a piece of text, normalized
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredLink {
    /// Lowercase service address, e.g. `abcdefghabcdefgh.onion`
    pub host: String,

    /// Lowercase subdomain labels in front of the service address
    pub subdomain: Option<String>,

    /// Path and query, always starting with `/`
    pub path: String,

    /// Whether the link used the `https` scheme
    pub secure: bool,
}

impl DiscoveredLink {
    /// Full host name including subdomain labels; this is what is fetched
    /// and what identifies a host in the frontier
    pub fn fqdn(&self) -> String {
        match &self.subdomain {
            Some(sub) => format!("{}.{}", sub, self.host),
            None => self.host.clone(),
        }
    }
}

/// Extracts every onion URI from `text`, in order of appearance
///
/// Duplicates are kept; deduplication happens when links are persisted.
///
/// # Examples
///
/// ```
/// use onion_ripple::url::extract_links;
///
/// let links = extract_links("a abcdefghabcdefgh.onion b abcdefghabcdefgh.onion");
/// assert_eq!(links.len(), 2);
/// ```
pub fn extract_links(text: &str) -> Vec<DiscoveredLink> {
    scan(text).map(|raw| normalize_match(&raw)).collect()
}
