//! SQLite-backed store for versioned rate documents and region assignments.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::info;

use ratewatch_core::{CarrierId, GroupingMode, Jurisdiction, RateKey, RatingRegion};

use crate::StoreError;
use crate::merge::merge_patch;

/// Process-wide store handle.
///
/// Rate documents are keyed by `(storage key, effective date)` and written
/// with merge-patch semantics: repeated partial writes for the same key/date
/// accumulate rather than overwrite. Region assignments are replaced
/// wholesale per carrier/jurisdiction in a single transaction so readers
/// never observe a half-written region set.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
pub struct RateStore {
    conn: Mutex<Connection>,
}

impl RateStore {
    /// Open an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rate_store (
                key            TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                value          TEXT NOT NULL,
                created_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (key, effective_date)
            );
            CREATE INDEX IF NOT EXISTS idx_rate_store_date
                ON rate_store (effective_date);
            CREATE TABLE IF NOT EXISTS rate_regions (
                carrier       INTEGER NOT NULL,
                jurisdiction  TEXT NOT NULL,
                region_number INTEGER NOT NULL,
                grouping_mode TEXT NOT NULL,
                locations     TEXT NOT NULL,
                PRIMARY KEY (carrier, jurisdiction, region_number)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Rate documents ──

    /// Merge `doc` into the stored document for this exact key and date.
    ///
    /// Fields present in `doc` overwrite; fields absent are left untouched,
    /// so multiple partial fetch passes accumulate into one record. The merge
    /// is computed in memory and applied as one atomic write inside a
    /// transaction. Non-object documents are rejected immediately.
    pub fn put(&self, key: &RateKey, date: NaiveDate, doc: &Value) -> Result<(), StoreError> {
        if !doc.is_object() {
            return Err(StoreError::MalformedDocument {
                key: key.to_string(),
                reason: "document is not a JSON object".into(),
            });
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        put_merged(&tx, &key.to_string(), date, doc)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch the document stored for this exact key and date, if any.
    pub fn get(&self, key: &RateKey, date: NaiveDate) -> Result<Option<Value>, StoreError> {
        get_doc(&self.lock(), &key.to_string(), date)
    }

    /// The latest stored document for this key whose effective date is not
    /// after `on_or_before`, together with that date.
    pub fn get_most_recent_before(
        &self,
        key: &RateKey,
        on_or_before: NaiveDate,
    ) -> Result<Option<(NaiveDate, Value)>, StoreError> {
        most_recent_before(&self.lock(), &key.to_string(), on_or_before)
    }

    /// Copy-on-miss: if no record exists for `date`, duplicate the latest
    /// prior record forward as an explicit new write. Returns the document
    /// now effective at `date`, or `None` when there is nothing to carry.
    pub fn carry_forward(
        &self,
        key: &RateKey,
        date: NaiveDate,
    ) -> Result<Option<Value>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let doc = carry_forward_one(&tx, &key.to_string(), date)?;
        tx.commit()?;
        Ok(doc)
    }

    /// Carry the latest prior document forward to `date` for every region
    /// key under the carrier/jurisdiction prefix. Returns the number of keys
    /// written.
    pub fn carry_forward_prefix(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        date: NaiveDate,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let keys = keys_like(&tx, &RateKey::prefix(carrier, jurisdiction))?;
        let mut written = 0;
        for key in &keys {
            let existed = get_doc(&tx, key, date)?.is_some();
            if !existed && carry_forward_one(&tx, key, date)?.is_some() {
                written += 1;
            }
        }
        tx.commit()?;
        if written > 0 {
            info!(%carrier, %jurisdiction, %date, written, "carried rates forward");
        }
        Ok(written)
    }

    /// All distinct storage keys matching the given colon-delimited prefix.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<RateKey>, StoreError> {
        let conn = self.lock();
        let keys = keys_like(&conn, prefix)?;
        keys.iter()
            .map(|k| RateKey::from_str(k).map_err(StoreError::from))
            .collect()
    }

    // ── Region assignments ──

    /// Replace the full region set for a carrier/jurisdiction in one
    /// transaction. Reruns of the mapper recover from any prior inconsistent
    /// state because nothing is patched incrementally.
    pub fn replace_regions(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        regions: &[RatingRegion],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM rate_regions WHERE carrier = ?1 AND jurisdiction = ?2",
            params![carrier.0, jurisdiction.as_str()],
        )?;
        for region in regions {
            tx.execute(
                "INSERT INTO rate_regions
                    (carrier, jurisdiction, region_number, grouping_mode, locations)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    region.carrier.0,
                    region.jurisdiction.as_str(),
                    region.region_number,
                    region.grouping.as_str(),
                    serde_json::to_string(&region.locations)?,
                ],
            )?;
        }
        tx.commit()?;
        info!(%carrier, %jurisdiction, count = regions.len(), "replaced region set");
        Ok(())
    }

    /// The stored region set for a carrier/jurisdiction, ordered by region
    /// number. Empty when the mapper has never run.
    pub fn regions(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
    ) -> Result<Vec<RatingRegion>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT region_number, grouping_mode, locations
             FROM rate_regions
             WHERE carrier = ?1 AND jurisdiction = ?2
             ORDER BY region_number",
        )?;
        let rows = stmt.query_map(params![carrier.0, jurisdiction.as_str()], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut regions = Vec::new();
        for row in rows {
            let (region_number, mode, locations) = row?;
            let grouping = mode.parse::<GroupingMode>().map_err(|value| {
                StoreError::MalformedDocument {
                    key: format!("{carrier}:{jurisdiction}:{region_number}"),
                    reason: format!("unknown grouping mode {value:?}"),
                }
            })?;
            regions.push(RatingRegion {
                carrier,
                jurisdiction: jurisdiction.clone(),
                region_number,
                grouping,
                locations: serde_json::from_str(&locations)?,
            });
        }
        Ok(regions)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a writer panicked mid-transaction; the
        // transaction itself already rolled back, so the data is intact.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// Internal helpers take the connection (or an open transaction) directly so
// multi-key operations run under one lock acquisition.

fn get_doc(conn: &Connection, key: &str, date: NaiveDate) -> Result<Option<Value>, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM rate_store WHERE key = ?1 AND effective_date = ?2",
            params![key, date.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn put_merged(
    conn: &Connection,
    key: &str,
    date: NaiveDate,
    doc: &Value,
) -> Result<(), StoreError> {
    let merged = match get_doc(conn, key, date)? {
        Some(mut existing) => {
            merge_patch(&mut existing, doc);
            existing
        }
        None => doc.clone(),
    };
    conn.execute(
        "INSERT OR REPLACE INTO rate_store (key, effective_date, value)
         VALUES (?1, ?2, ?3)",
        params![key, date.to_string(), serde_json::to_string(&merged)?],
    )?;
    Ok(())
}

fn most_recent_before(
    conn: &Connection,
    key: &str,
    on_or_before: NaiveDate,
) -> Result<Option<(NaiveDate, Value)>, StoreError> {
    // ISO dates sort lexicographically, so string comparison is date order.
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT effective_date, value FROM rate_store
             WHERE key = ?1 AND effective_date <= ?2
             ORDER BY effective_date DESC
             LIMIT 1",
            params![key, on_or_before.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((date, text)) => {
            let date = NaiveDate::from_str(&date)
                .map_err(|_| StoreError::BadStoredDate(date))?;
            Ok(Some((date, serde_json::from_str(&text)?)))
        }
        None => Ok(None),
    }
}

fn carry_forward_one(
    conn: &Connection,
    key: &str,
    date: NaiveDate,
) -> Result<Option<Value>, StoreError> {
    if let Some(existing) = get_doc(conn, key, date)? {
        return Ok(Some(existing));
    }
    let Some((source_date, doc)) = most_recent_before(conn, key, date)? else {
        return Ok(None);
    };
    conn.execute(
        "INSERT OR REPLACE INTO rate_store (key, effective_date, value)
         VALUES (?1, ?2, ?3)",
        params![key, date.to_string(), serde_json::to_string(&doc)?],
    )?;
    info!(key, from = %source_date, to = %date, "carried document forward");
    Ok(Some(doc))
}

fn keys_like(conn: &Connection, prefix: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT key FROM rate_store WHERE key LIKE ?1 ORDER BY key",
    )?;
    let rows = stmt.query_map(params![format!("{prefix}%")], |row| row.get(0))?;
    let mut keys = Vec::new();
    for row in rows {
        keys.push(row?);
    }
    Ok(keys)
}
