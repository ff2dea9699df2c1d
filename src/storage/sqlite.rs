//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the FrontierStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StorageError, StorageResult};
use crate::storage::{
    now_millis, ContentRecord, Edge, FrontierIds, FrontierItem, HostRecord, NewFrontierItem,
    RunRecord, RunStatus,
};
use crate::RippleError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Columns read for every frontier item, in the order `frontier_item_from_row` expects
const FRONTIER_SELECT: &str = "
    SELECT f.id, f.host_id, h.name, f.path, f.depth, f.secure, f.last_started,
           f.last_scraped, f.last_successful, f.in_progress, f.tie_break,
           f.inbound_links, f.discovered_at
    FROM frontier_items f
    JOIN hosts h ON h.id = f.host_id";

/// Scheduling order: never-scraped and oldest first, random tie-break, then id
const SCHEDULE_ORDER: &str = "ORDER BY f.last_scraped ASC, f.tie_break ASC, f.id ASC";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(RippleError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, RippleError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> Result<Self, RippleError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn frontier_item_from_row(row: &Row<'_>) -> rusqlite::Result<FrontierItem> {
    Ok(FrontierItem {
        id: row.get(0)?,
        host_id: row.get(1)?,
        host: row.get(2)?,
        path: row.get(3)?,
        depth: row.get(4)?,
        secure: row.get(5)?,
        last_started: row.get(6)?,
        last_scraped: row.get(7)?,
        last_successful: row.get(8)?,
        in_progress: row.get(9)?,
        tie_break: row.get(10)?,
        inbound_links: row.get(11)?,
        discovered_at: row.get(12)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
    })
}

/// Find-or-create a host on an open connection or transaction
fn find_or_create_host_in(conn: &Connection, name: &str, now: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO hosts (name, discovered_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
        params![name, now],
    )?;
    conn.query_row(
        "SELECT id FROM hosts WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
}

impl SqliteStorage {
    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl FrontierStore for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, started_at: i64) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![started_at, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        finished_at: i64,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        Ok(())
    }

    // ===== Hosts =====

    fn find_or_create_host(&mut self, name: &str) -> StorageResult<i64> {
        Ok(find_or_create_host_in(&self.conn, name, now_millis())?)
    }

    fn get_host(&self, name: &str) -> StorageResult<Option<HostRecord>> {
        let host = self
            .conn
            .query_row(
                "SELECT id, name, discovered_at FROM hosts WHERE name = ?1",
                params![name],
                |row| {
                    Ok(HostRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        discovered_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(host)
    }

    // ===== Frontier =====

    fn upsert_frontier_item(
        &mut self,
        item: &NewFrontierItem,
        last_scraped: i64,
        successful: bool,
    ) -> StorageResult<FrontierIds> {
        let now = now_millis();
        let tx = self.conn.transaction()?;

        let host_id = find_or_create_host_in(&tx, &item.host, now)?;
        let frontier_item_id: i64 = tx.query_row(
            "INSERT INTO frontier_items
                 (host_id, path, depth, secure, last_scraped, last_successful, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, CASE WHEN ?6 THEN ?5 ELSE 0 END, ?7)
             ON CONFLICT(host_id, path) DO UPDATE SET
                 last_scraped = excluded.last_scraped,
                 last_successful = CASE WHEN ?6
                     THEN MAX(last_successful, excluded.last_scraped)
                     ELSE last_successful END,
                 in_progress = 0
             RETURNING id",
            params![
                host_id,
                item.path,
                item.depth,
                item.secure,
                last_scraped,
                successful,
                now
            ],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(FrontierIds {
            host_id,
            frontier_item_id,
        })
    }

    fn upsert_discovered(&mut self, items: &[NewFrontierItem]) -> StorageResult<Vec<i64>> {
        let now = now_millis();
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(items.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO frontier_items (host_id, path, depth, secure, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(host_id, path) DO UPDATE SET depth = MIN(depth, excluded.depth)
                 RETURNING id",
            )?;

            for item in items {
                let host_id = find_or_create_host_in(&tx, &item.host, now)?;
                let id: i64 = stmt.query_row(
                    params![host_id, item.path, item.depth, item.secure, now],
                    |row| row.get(0),
                )?;
                ids.push(id);
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    fn claim_frontier(
        &mut self,
        watermark: i64,
        limit: usize,
        now: i64,
    ) -> StorageResult<Vec<FrontierItem>> {
        let tx = self.conn.transaction()?;

        let mut items = {
            let mut stmt = tx.prepare(&format!(
                "{} WHERE f.in_progress = 0 AND f.last_scraped <= ?1 {} LIMIT ?2",
                FRONTIER_SELECT, SCHEDULE_ORDER
            ))?;
            let rows = stmt.query_map(params![watermark, limit as i64], frontier_item_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        {
            let mut claim = tx.prepare(
                "UPDATE frontier_items SET in_progress = 1, last_started = ?1 WHERE id = ?2",
            )?;
            for item in &mut items {
                claim.execute(params![now, item.id])?;
                item.in_progress = true;
                item.last_started = now;
            }
        }

        tx.commit()?;
        Ok(items)
    }

    fn query_frontier(
        &self,
        watermark: i64,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<FrontierItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE f.last_scraped <= ?1 {} LIMIT ?2 OFFSET ?3",
            FRONTIER_SELECT, SCHEDULE_ORDER
        ))?;
        let items = stmt
            .query_map(
                params![watermark, limit as i64, offset as i64],
                frontier_item_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn get_frontier_item(&self, id: i64) -> StorageResult<FrontierItem> {
        self.conn
            .query_row(
                &format!("{} WHERE f.id = ?1", FRONTIER_SELECT),
                params![id],
                frontier_item_from_row,
            )
            .optional()?
            .ok_or(StorageError::FrontierItemNotFound(id))
    }

    fn find_frontier_item(&self, host: &str, path: &str) -> StorageResult<Option<FrontierItem>> {
        let item = self
            .conn
            .query_row(
                &format!("{} WHERE h.name = ?1 AND f.path = ?2", FRONTIER_SELECT),
                params![host, path],
                frontier_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn reset_in_progress(&mut self) -> StorageResult<usize> {
        Ok(self.conn.execute(
            "UPDATE frontier_items SET in_progress = 0 WHERE in_progress = 1",
            [],
        )?)
    }

    // ===== Edges =====

    fn insert_edges(&mut self, edges: &[Edge]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO edges (source_id, destination_id, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for edge in edges {
                inserted += stmt.execute(params![
                    edge.source_id,
                    edge.destination_id,
                    edge.created_at
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn recompute_inbound(&mut self, destinations: &[i64]) -> StorageResult<()> {
        let mut unique = destinations.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE frontier_items SET inbound_links = (
                     SELECT COUNT(DISTINCT src.host_id)
                     FROM edges e
                     JOIN frontier_items src ON src.id = e.source_id
                     WHERE e.destination_id = ?1
                 )
                 WHERE id = ?1",
            )?;
            for id in unique {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Content =====

    fn create_content(&mut self, content: &ContentRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO contents (frontier_item_id, status_code, mime_type, body, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                content.frontier_item_id,
                content.status_code,
                content.mime_type,
                content.body,
                content.fetched_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ===== Statistics =====

    fn count_hosts(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM hosts")
    }

    fn count_frontier_items(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM frontier_items")
    }

    fn count_attempted(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM frontier_items WHERE last_scraped > 0")
    }

    fn count_successful(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM frontier_items WHERE last_successful > 0")
    }

    fn count_in_progress(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM frontier_items WHERE in_progress = 1")
    }

    fn count_edges(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM edges")
    }

    fn count_contents(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM contents")
    }

    fn top_inbound(&self, limit: usize) -> StorageResult<Vec<FrontierItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE f.inbound_links > 0 ORDER BY f.inbound_links DESC, f.id ASC LIMIT ?1",
            FRONTIER_SELECT
        ))?;
        let items = stmt
            .query_map(params![limit as i64], frontier_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}
