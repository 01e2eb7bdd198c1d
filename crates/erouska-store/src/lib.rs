//! Local persistence for eRouska scan results.
//!
//! This crate provides SQLite-based storage for the per-peer records the
//! scanner produces at the end of each window.
//!
//! # Features
//!
//! - Store finalized scan records, singly or in a batch
//! - Query by peer and time range, with pagination
//! - Per-peer encounter summaries
//! - Prune records past the retention period
//!
//! # Example
//!
//! ```no_run
//! use erouska_store::{RecordQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! // Ten most recent windows
//! let query = RecordQuery::new().limit(10);
//! for result in store.query_records(&query)? {
//!     println!("{} {} dBm", result.buid, result.med_rssi);
//! }
//! # Ok::<(), erouska_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{PeerSummary, StoredScanResult};
pub use queries::RecordQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/erouska/data.db`
/// - macOS: `~/Library/Application Support/erouska/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\erouska\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("erouska")
        .join("data.db")
}
