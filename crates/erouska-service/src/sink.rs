//! Record sink backed by the SQLite store.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use erouska_core::{RecordSink, ScanRecord};
use erouska_store::Store;

/// Persists finalized scan records and prunes old ones.
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<Mutex<Store>>,
    retention: time::Duration,
}

impl std::fmt::Debug for StoreSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSink")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl StoreSink {
    /// Create a sink keeping records for `retention`.
    pub fn new(store: Store, retention: time::Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            retention,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    /// Delete records that ended before the retention period.
    pub async fn prune(&self) -> Result<usize, erouska_store::Error> {
        let Some(cutoff) = OffsetDateTime::now_utc().checked_sub(self.retention) else {
            return Ok(0);
        };
        let store = self.store.lock().await;
        let deleted = store.delete_older_than(cutoff)?;
        debug!("Retention pass removed {} records", deleted);
        Ok(deleted)
    }
}

#[async_trait]
impl RecordSink for StoreSink {
    async fn persist(&self, record: &ScanRecord) -> erouska_core::Result<()> {
        let store = self.store.lock().await;
        store
            .insert_record(record)
            .map(|_| ())
            .map_err(erouska_core::Error::persistence)
    }
}
