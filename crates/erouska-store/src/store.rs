//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use erouska_types::{Buid, ScanRecord};

use crate::error::{Error, Result};
use crate::models::{PeerSummary, StoredScanResult};
use crate::queries::{RecordQuery, to_millis};
use crate::schema;

const INSERT_RECORD: &str = "INSERT INTO scan_results (buid, timestamp_start, timestamp_end,
     max_rssi, med_rssi, avg_rssi, rssi_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// SQLite-based store for eRouska scan results.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Scan result operations ===

    /// Insert one finalized scan record, returning its row ID.
    pub fn insert_record(&self, record: &ScanRecord) -> Result<i64> {
        self.conn.execute(
            INSERT_RECORD,
            rusqlite::params![
                record.buid.to_hex(),
                to_millis(record.timestamp_start),
                to_millis(record.timestamp_end),
                record.max_rssi,
                record.med_rssi,
                record.avg_rssi,
                record.rssi_count,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Stored scan result {} for {}", id, record.buid);
        Ok(id)
    }

    /// Insert a batch of records atomically.
    pub fn insert_records(&self, records: &[ScanRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_RECORD)?;
            for record in records {
                stmt.execute(rusqlite::params![
                    record.buid.to_hex(),
                    to_millis(record.timestamp_start),
                    to_millis(record.timestamp_end),
                    record.max_rssi,
                    record.med_rssi,
                    record.avg_rssi,
                    record.rssi_count,
                ])?;
            }
        }
        tx.commit()?;

        info!("Stored {} scan results", records.len());
        Ok(records.len())
    }

    /// Query scan results with filters.
    pub fn query_records(&self, query: &RecordQuery) -> Result<Vec<StoredScanResult>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_ref.as_slice(), read_scan_result)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// All records whose window started at or after `since`, oldest first.
    pub fn records_since(&self, since: OffsetDateTime) -> Result<Vec<ScanRecord>> {
        let query = RecordQuery::new().since(since).oldest_first();
        Ok(self
            .query_records(&query)?
            .iter()
            .map(StoredScanResult::to_record)
            .collect())
    }

    /// Get the most recent record for a peer.
    pub fn latest_record(&self, buid: &Buid) -> Result<Option<StoredScanResult>> {
        let query = RecordQuery::new().buid(*buid).limit(1);
        let mut records = self.query_records(&query)?;
        Ok(records.pop())
    }

    /// Count records, optionally for a single peer.
    pub fn count_records(&self, buid: Option<&Buid>) -> Result<u64> {
        let count: i64 = match buid {
            Some(buid) => self.conn.query_row(
                "SELECT COUNT(*) FROM scan_results WHERE buid = ?",
                [buid.to_hex()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM scan_results", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Delete records whose window ended before `cutoff`.
    pub fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM scan_results WHERE timestamp_end < ?",
            [to_millis(cutoff)],
        )?;

        if deleted > 0 {
            info!("Pruned {} scan results older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Per-peer encounter totals for windows starting at or after `since`,
    /// most recently seen first.
    pub fn peer_summaries(&self, since: Option<OffsetDateTime>) -> Result<Vec<PeerSummary>> {
        let since = since.map(to_millis).unwrap_or(i64::MIN);
        let mut stmt = self.conn.prepare(
            "SELECT buid, COUNT(*), SUM(rssi_count), MAX(max_rssi),
                    MIN(timestamp_start), MAX(timestamp_end)
             FROM scan_results WHERE timestamp_start >= ?
             GROUP BY buid ORDER BY MAX(timestamp_end) DESC",
        )?;

        let summaries = stmt
            .query_map([since], |row| {
                Ok(PeerSummary {
                    buid: buid_column(row, 0)?,
                    windows: row.get::<_, i64>(1)? as u64,
                    samples: row.get::<_, i64>(2)? as u64,
                    max_rssi: row.get(3)?,
                    first_seen: timestamp_column(row, 4)?,
                    last_seen: timestamp_column(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(summaries)
    }
}

fn read_scan_result(row: &Row<'_>) -> rusqlite::Result<StoredScanResult> {
    Ok(StoredScanResult {
        id: row.get(0)?,
        buid: buid_column(row, 1)?,
        timestamp_start: timestamp_column(row, 2)?,
        timestamp_end: timestamp_column(row, 3)?,
        max_rssi: row.get(4)?,
        med_rssi: row.get(5)?,
        avg_rssi: row.get(6)?,
        rssi_count: row.get(7)?,
    })
}

fn buid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Buid> {
    let hex: String = row.get(idx)?;
    Buid::from_hex(&hex)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let millis: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    fn record(buid: Buid, start: OffsetDateTime, rssi: i16) -> ScanRecord {
        ScanRecord {
            buid,
            timestamp_start: start,
            timestamp_end: start + Duration::seconds(90),
            max_rssi: rssi + 5,
            med_rssi: rssi,
            avg_rssi: rssi - 1,
            rssi_count: 12,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_records(None).unwrap(), 0);
    }

    #[test]
    fn test_insert_and_query_record() {
        let store = Store::open_in_memory().unwrap();
        let buid = Buid::new([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23]);
        let original = record(buid, datetime!(2020-04-20 10:15:30.250 UTC), -70);

        let id = store.insert_record(&original).unwrap();
        assert!(id > 0);

        let stored = store.query_records(&RecordQuery::new()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        // millisecond precision survives
        assert_eq!(stored[0].to_record(), original);
    }

    #[test]
    fn test_insert_records_and_count_per_peer() {
        let store = Store::open_in_memory().unwrap();
        let a = Buid::new([0xaa; 10]);
        let b = Buid::new([0xbb; 10]);
        let start = datetime!(2020-04-20 10:00 UTC);

        let inserted = store
            .insert_records(&[
                record(a, start, -60),
                record(b, start, -80),
                record(a, start + Duration::minutes(2), -65),
            ])
            .unwrap();
        assert_eq!(inserted, 3);

        assert_eq!(store.count_records(None).unwrap(), 3);
        assert_eq!(store.count_records(Some(&a)).unwrap(), 2);
        assert_eq!(store.count_records(Some(&b)).unwrap(), 1);
    }

    #[test]
    fn test_latest_record() {
        let store = Store::open_in_memory().unwrap();
        let buid = Buid::new([7; 10]);
        let start = datetime!(2020-04-20 10:00 UTC);
        store.insert_record(&record(buid, start, -60)).unwrap();
        store
            .insert_record(&record(buid, start + Duration::minutes(2), -75))
            .unwrap();

        let latest = store.latest_record(&buid).unwrap().unwrap();
        assert_eq!(latest.med_rssi, -75);
        assert!(store.latest_record(&Buid::new([8; 10])).unwrap().is_none());
    }

    #[test]
    fn test_records_since_is_chronological() {
        let store = Store::open_in_memory().unwrap();
        let start = datetime!(2020-04-20 10:00 UTC);
        for minute in [4, 0, 2] {
            store
                .insert_record(&record(Buid::new([minute as u8 + 1; 10]), start + Duration::minutes(minute), -70))
                .unwrap();
        }

        let records = store.records_since(start + Duration::minutes(1)).unwrap();
        let starts: Vec<_> = records.iter().map(|r| r.timestamp_start).collect();
        assert_eq!(
            starts,
            vec![start + Duration::minutes(2), start + Duration::minutes(4)]
        );
    }

    #[test]
    fn test_delete_older_than() {
        let store = Store::open_in_memory().unwrap();
        let buid = Buid::new([3; 10]);
        let old = datetime!(2020-04-01 10:00 UTC);
        let recent = datetime!(2020-04-20 10:00 UTC);
        store.insert_record(&record(buid, old, -70)).unwrap();
        store.insert_record(&record(buid, recent, -70)).unwrap();

        let deleted = store
            .delete_older_than(recent - Duration::days(14))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count_records(None).unwrap(), 1);

        // nothing left to prune
        assert_eq!(store.delete_older_than(recent - Duration::days(14)).unwrap(), 0);
    }

    #[test]
    fn test_peer_summaries() {
        let store = Store::open_in_memory().unwrap();
        let a = Buid::new([0xaa; 10]);
        let b = Buid::new([0xbb; 10]);
        let start = datetime!(2020-04-20 10:00 UTC);
        store.insert_record(&record(a, start, -60)).unwrap();
        store.insert_record(&record(a, start + Duration::minutes(2), -50)).unwrap();
        store.insert_record(&record(b, start + Duration::minutes(4), -80)).unwrap();

        let summaries = store.peer_summaries(None).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].buid, b);

        let a_summary = &summaries[1];
        assert_eq!(a_summary.windows, 2);
        assert_eq!(a_summary.samples, 24);
        assert_eq!(a_summary.max_rssi, -45);
        assert_eq!(a_summary.first_seen, start);
        assert_eq!(
            a_summary.last_seen,
            start + Duration::minutes(2) + Duration::seconds(90)
        );

        let recent = store
            .peer_summaries(Some(start + Duration::minutes(3)))
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_open_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .insert_record(&record(Buid::new([1; 10]), datetime!(2020-04-20 10:00 UTC), -70))
                .unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count_records(None).unwrap(), 1);
    }

    #[test]
    fn test_stored_result_serializes_buid_as_hex() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_record(&record(Buid::new([0xab; 10]), datetime!(2020-04-20 10:00 UTC), -70))
            .unwrap();
        let stored = store.query_records(&RecordQuery::new()).unwrap();

        let json = serde_json::to_value(&stored[0]).unwrap();
        assert_eq!(json["buid"], "abababababababababab");
        assert_eq!(json["timestamp_start"], "2020-04-20T10:00:00Z");
    }
}
