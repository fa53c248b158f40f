use std::collections::BTreeSet;
use std::sync::Arc;

use forecast_store::{StateKey, StateStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistReport {
    pub saved: Vec<String>,
    pub failed: Vec<String>,
}

impl PersistReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes state copies off the async runtime and remembers which keys
/// failed so the next pass can retry them.
pub struct StateKeeper {
    store: Arc<dyn StateStore>,
    failed: Mutex<BTreeSet<StateKey>>,
}

impl StateKeeper {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            failed: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Keys whose last write failed.
    pub fn failed_keys(&self) -> BTreeSet<StateKey> {
        self.failed.lock().clone()
    }

    /// Marks keys that could not even be snapshotted.
    pub fn mark_failed(&self, keys: impl IntoIterator<Item = StateKey>) {
        self.failed.lock().extend(keys);
    }

    pub async fn persist(&self, items: Vec<(StateKey, Value)>) -> PersistReport {
        if items.is_empty() {
            return PersistReport::default();
        }

        let keys: Vec<StateKey> = items.iter().map(|(k, _)| *k).collect();
        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            items
                .into_iter()
                .map(|(key, value)| (key, store.save_value(key, value)))
                .collect::<Vec<_>>()
        })
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                error!("❌ State writer task failed: {}", e);
                self.mark_failed(keys.iter().copied());
                return PersistReport {
                    saved: Vec::new(),
                    failed: keys.iter().map(StateKey::name).collect(),
                };
            }
        };

        let mut report = PersistReport::default();
        let mut failed = self.failed.lock();
        for (key, result) in results {
            match result {
                Ok(()) => {
                    failed.remove(&key);
                    report.saved.push(key.name());
                }
                Err(e) => {
                    error!("❌ Failed to save {}: {} (will retry)", key, e);
                    failed.insert(key);
                    report.failed.push(key.name());
                }
            }
        }

        if report.is_clean() {
            debug!("💾 Persisted {} state files", report.saved.len());
        } else {
            info!(
                "💾 Persisted {} state files, {} pending retry",
                report.saved.len(),
                failed.len()
            );
        }
        report
    }

    pub fn load(&self, key: StateKey) -> forecast_store::Result<Option<Value>> {
        self.store.load_value(key)
    }
}
