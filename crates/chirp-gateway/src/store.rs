use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use chirp_db::Database;

use crate::error::RelayError;

pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Async face of the blocking [`Database`].
///
/// Every call runs on the blocking pool and is bounded by `timeout`. A call
/// that times out keeps running on its worker thread, but the caller stops
/// waiting and the event is treated as failed.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    timeout: Duration,
}

impl Store {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub async fn call<F, T>(&self, op: &'static str, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(RelayError::Persistence { op, reason }),
            Ok(Err(source)) => {
                error!("spawn_blocking join error during {}: {}", op, source);
                Err(RelayError::Worker { op, source })
            }
            Err(_) => Err(RelayError::Timeout {
                op,
                after: self.timeout,
            }),
        }
    }
}
