// src/services/core/infrastructure/persistence_gateway.rs
// Writes from the ingestion edge go through here: an in-memory dedup
// ledger suppresses re-delivered origin events, then the store's retrying
// transaction wrapper persists the unit of work.

use rusqlite::Transaction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::store::Store;
use crate::utils::time::now_ms;
use crate::utils::{LeadFlowError, LeadFlowResult};

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Store,
    seen: Arc<Mutex<HashMap<String, i64>>>,
    window_ms: i64,
    cleanup_threshold: usize,
}

impl PersistenceGateway {
    pub fn new(store: Store, window_secs: i64, cleanup_threshold: usize) -> Self {
        Self {
            store,
            seen: Arc::new(Mutex::new(HashMap::new())),
            window_ms: window_secs * 1000,
            cleanup_threshold,
        }
    }

    /// Record `source_key` and report whether it is fresh. A repeat within
    /// the suppression window returns false; after the window the key is
    /// treated as a new event again. The ledger is pruned once it grows
    /// past the cleanup threshold.
    pub fn check_and_mark(&self, source_key: &str) -> LeadFlowResult<bool> {
        let now = now_ms();
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| LeadFlowError::storage_unavailable("dedup ledger mutex poisoned"))?;

        if let Some(first_seen) = seen.get(source_key) {
            if now - first_seen < self.window_ms {
                log::debug!("duplicate event suppressed: {}", source_key);
                return Ok(false);
            }
        }
        seen.insert(source_key.to_string(), now);

        if seen.len() > self.cleanup_threshold {
            let window = self.window_ms;
            seen.retain(|_, first_seen| now - *first_seen < window);
            log::debug!("dedup ledger pruned to {} entries", seen.len());
        }
        Ok(true)
    }

    /// Persist a unit of work through the store's retrying transaction.
    pub async fn run<T, F>(&self, op: F) -> LeadFlowResult<T>
    where
        F: FnMut(&Transaction<'_>) -> LeadFlowResult<T>,
    {
        self.store.with_transaction(op).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
