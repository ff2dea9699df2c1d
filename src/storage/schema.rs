//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Onion-Ripple database.
//! Timestamps are stored as milliseconds since the Unix epoch, `0` meaning never.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Crawled hosts, one row per full host name
CREATE TABLE IF NOT EXISTS hosts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    discovered_at INTEGER NOT NULL
);

-- One crawl target per (host, path); rows are never deleted
CREATE TABLE IF NOT EXISTS frontier_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id INTEGER NOT NULL REFERENCES hosts(id),
    path TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    secure INTEGER NOT NULL DEFAULT 0,
    last_started INTEGER NOT NULL DEFAULT 0,
    last_scraped INTEGER NOT NULL DEFAULT 0,
    last_successful INTEGER NOT NULL DEFAULT 0,
    in_progress INTEGER NOT NULL DEFAULT 0,
    tie_break INTEGER NOT NULL DEFAULT (abs(random() % 1000000)),
    inbound_links INTEGER NOT NULL DEFAULT 0,
    discovered_at INTEGER NOT NULL,
    UNIQUE(host_id, path)
);

CREATE INDEX IF NOT EXISTS idx_frontier_schedule
    ON frontier_items(in_progress, last_scraped, tie_break);

-- Directed links between frontier items
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES frontier_items(id),
    destination_id INTEGER NOT NULL REFERENCES frontier_items(id),
    created_at INTEGER NOT NULL,
    UNIQUE(source_id, destination_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_destination ON edges(destination_id);

-- Fetched bodies
CREATE TABLE IF NOT EXISTS contents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frontier_item_id INTEGER NOT NULL REFERENCES frontier_items(id),
    status_code INTEGER NOT NULL,
    mime_type TEXT,
    body TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contents_item ON contents(frontier_item_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
