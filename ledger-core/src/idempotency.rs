//! Keyed idempotent execution with TTL
//!
//! Two layers close the duplicate-delivery window:
//!
//! 1. A persisted result record: replays within the TTL return the cached
//!    result without re-running the operation.
//! 2. An in-process per-key mutex: two deliveries racing on the same key
//!    serialize, so the second sees the first's cached record instead of
//!    executing concurrently.

use crate::{storage::Storage, types::IdempotencyRecord, Error};
use chrono::Utc;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Idempotency store backed by the ledger's RocksDB
#[derive(Clone)]
pub struct IdempotencyStore {
    storage: Arc<Storage>,
    inflight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IdempotencyStore {
    /// Create store sharing the ledger's storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Run `op` at most once per `key` within `ttl`
    ///
    /// On a replay the cached result is deserialized and returned. Failed
    /// operations are not cached, so a retry after an error re-executes.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        op: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let guard = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let held = guard.lock().await;

        let outcome = async {
            let now = Utc::now();
            if let Some(record) = self.storage.get_idempotency(key).map_err(E::from)? {
                if record.is_live(now) {
                    tracing::debug!(key, "Idempotent replay served from cache");
                    let cached: T = serde_json::from_str(&record.result)
                        .map_err(|e| E::from(Error::from(e)))?;
                    return Ok(cached);
                }
                self.storage.delete_idempotency(key).map_err(E::from)?;
            }

            let value = op().await?;

            let result = serde_json::to_string(&value).map_err(|e| E::from(Error::from(e)))?;
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| E::from(Error::Validation(format!("Invalid TTL: {}", e))))?;
            self.storage
                .put_idempotency(&IdempotencyRecord {
                    key: key.to_string(),
                    result,
                    created_at: now,
                    expires_at: now + ttl,
                })
                .map_err(E::from)?;

            Ok(value)
        }
        .await;

        // Drop the per-key entry on every exit, or failing keys leak an
        // entry apiece
        drop(held);
        self.inflight.remove(key);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn store() -> (IdempotencyStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (IdempotencyStore::new(storage), temp)
    }

    #[tokio::test]
    async fn test_replay_returns_cached_result() {
        let (store, _temp) = store();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result: Result<u32, Error> = store
                .execute("op:1", Duration::from_secs(60), || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(result.unwrap(), 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (store, _temp) = store();
        let calls = AtomicU32::new(0);

        let first: Result<u32, Error> = store
            .execute("op:2", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Validation("boom".to_string()))
            })
            .await;
        assert!(first.is_err());

        let second: Result<u32, Error> = store
            .execute("op:2", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_clears_inflight_entry() {
        let (store, _temp) = store();

        let result: Result<u32, Error> = store
            .execute("op:err", Duration::from_secs(60), || async {
                Err(Error::Validation("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(store.inflight.is_empty());

        let result: Result<u32, Error> = store
            .execute("op:ok", Duration::from_secs(60), || async { Ok(1) })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert!(store.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_expired_record_reexecutes() {
        let (store, _temp) = store();
        let calls = AtomicU32::new(0);

        let run = || async {
            let result: Result<u32, Error> = store
                .execute("op:3", Duration::from_millis(10), || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            result.unwrap()
        };

        assert_eq!(run().await, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(run().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_runs_once() {
        let (store, _temp) = store();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let result: Result<u32, Error> = store
                    .execute("op:4", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(42)
                    })
                    .await;
                result.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
