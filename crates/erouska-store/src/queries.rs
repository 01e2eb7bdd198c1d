//! Query builder for stored scan results.
//!
//! # Example
//!
//! ```
//! use erouska_store::{RecordQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let last_upload = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // Everything recorded since the last upload, oldest first
//! let query = RecordQuery::new().since(last_upload).oldest_first();
//! let records = store.query_records(&query)?;
//! # Ok::<(), erouska_store::Error>(())
//! ```

use time::OffsetDateTime;

use erouska_types::Buid;

/// Convert a timestamp to the stored representation (Unix milliseconds).
pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Fluent query builder for scan results.
///
/// Use this to construct queries for
/// [`Store::query_records`](crate::Store::query_records). Time filters
/// apply to the start of the window.
///
/// By default, queries return results ordered by `timestamp_start`
/// descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Filter by peer.
    pub buid: Option<Buid>,
    /// Filter windows starting at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter windows starting at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp_start descending (newest first).
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query: all peers, all times, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by peer.
    pub fn buid(mut self, buid: Buid) -> Self {
        self.buid = Some(buid);
        self
    }

    /// Filter to windows starting at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to windows starting at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(buid) = self.buid {
            conditions.push("buid = ?");
            params.push(Box::new(buid.to_hex()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp_start >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp_start <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, buid, timestamp_start, timestamp_end, max_rssi, med_rssi, \
             avg_rssi, rssi_count FROM scan_results {} ORDER BY timestamp_start {}, id {}",
            where_clause, order, order
        );

        // SQLite requires LIMIT before OFFSET
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
