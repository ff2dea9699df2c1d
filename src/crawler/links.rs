//! Link-graph building
//!
//! Turns a fetched body into new frontier items and deduplicated edges, and
//! keeps each destination's distinct-source-host count current.

use crate::storage::{now_millis, Edge, FrontierStore, NewFrontierItem, StoreHandle};
use crate::url::{extract_links, DiscoveredLink};
use crate::Result;

/// What one call to [`persist_links`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Links handed to the frontier (after the depth limit)
    pub discovered: usize,
    /// Edges that did not exist before
    pub new_edges: usize,
}

/// Finds every onion link in a page body; duplicates are kept
pub fn extract(body: &str) -> Vec<DiscoveredLink> {
    extract_links(body)
}

/// Persists links found on the page `source_id` at `source_depth`
///
/// 1. Upserts every link as a frontier item one hop deeper than the source.
///    Existing items keep their timestamps and the smallest depth seen.
/// 2. Inserts `source -> destination` edges, ignoring pairs already stored.
/// 3. Recomputes the distinct-source-host count of every destination.
///
/// Failures in steps 2 and 3 are logged and skipped; only a failed frontier
/// upsert is returned as an error.
pub async fn persist_links(
    store: &StoreHandle,
    discovered: &[DiscoveredLink],
    source_id: i64,
    source_depth: u32,
    max_depth: Option<u32>,
) -> Result<LinkStats> {
    let depth = source_depth.saturating_add(1);
    if discovered.is_empty() || max_depth.is_some_and(|max| depth > max) {
        return Ok(LinkStats::default());
    }

    let items: Vec<NewFrontierItem> = discovered
        .iter()
        .filter_map(|link| {
            NewFrontierItem::new(link.fqdn(), link.path.as_str(), depth, link.secure).ok()
        })
        .collect();

    let ids = store
        .with("upsert discovered links", |s| s.upsert_discovered(&items))
        .await?;

    let mut stats = LinkStats {
        discovered: ids.len(),
        new_edges: 0,
    };

    let now = now_millis();
    let edges: Vec<Edge> = ids
        .iter()
        .filter_map(|destination| Edge::new(source_id, *destination, now).ok())
        .collect();
    if edges.is_empty() {
        return Ok(stats);
    }

    match store.with("insert edges", |s| s.insert_edges(&edges)).await {
        Ok(inserted) => stats.new_edges = inserted,
        Err(e) => {
            tracing::warn!(source_id, "Failed to insert edges: {}", e);
            return Ok(stats);
        }
    }

    let destinations: Vec<i64> = edges.iter().map(|edge| edge.destination_id).collect();
    if let Err(e) = store
        .with("recompute inbound links", |s| s.recompute_inbound(&destinations))
        .await
    {
        tracing::warn!(source_id, "Failed to recompute inbound links: {}", e);
    }

    Ok(stats)
}
