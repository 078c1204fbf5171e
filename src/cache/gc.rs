//! Erases every transfer-state key once caching is switched off.

use metrics::counter;
use tracing::{debug, error, warn};
use tokio::sync::mpsc::UnboundedSender;

use super::error::CacheError;
use super::keys::{ACTIVATION_KEY, LAST_ID_KEY, LEDGER_KEY};
use super::store::{StateStore, StateStoreExt};

const METRIC_GC_REMOVED: &str = "transfer_cache_gc_removed_total";

/// Outcome of one collection pass.
#[derive(Debug, Default)]
pub struct GarbageCollection {
    pub removed_keys: Vec<String>,
    pub failures: Vec<CacheError>,
}

impl GarbageCollection {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn remove(&mut self, store: &dyn StateStore, key: &str) {
        let existed = store.has(key);
        match store.remove(key) {
            Ok(()) if existed => self.removed_keys.push(key.to_string()),
            Ok(()) => {}
            Err(err) => self.failures.push(err.into()),
        }
    }
}

/// Remove the last id, every snapshot named by the ledger, the ledger itself
/// and the activation flag.
///
/// Absent keys are not an error. A failed removal does not stop the pass;
/// every failure is collected in the result.
pub fn collect_garbage(store: &dyn StateStore) -> GarbageCollection {
    let mut outcome = GarbageCollection::default();

    if store.has_key(&LAST_ID_KEY) {
        if let Err(err) = store.read(&LAST_ID_KEY) {
            outcome.failures.push(err);
        }
        outcome.remove(store, LAST_ID_KEY.name());
    }

    if store.has_key(&LEDGER_KEY) {
        match store.read(&LEDGER_KEY) {
            Ok(entries) => {
                for entry in entries.unwrap_or_default() {
                    outcome.remove(store, entry.snapshot_key().name());
                }
            }
            Err(err) => outcome.failures.push(err),
        }
        outcome.remove(store, LEDGER_KEY.name());
    }

    if store.has_key(&ACTIVATION_KEY) {
        outcome.remove(store, ACTIVATION_KEY.name());
    }

    counter!(METRIC_GC_REMOVED).increment(outcome.removed_keys.len() as u64);
    debug!(
        removed = outcome.removed_keys.len(),
        failures = outcome.failures.len(),
        "transfer state collected"
    );
    outcome
}

/// Destination for failures that happen outside any single request.
#[derive(Debug, Clone, Default)]
pub struct UnhandledFailures {
    sender: Option<UnboundedSender<CacheError>>,
}

impl UnhandledFailures {
    pub fn new(sender: UnboundedSender<CacheError>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Log `failure` and forward it to the channel, if one is attached.
    ///
    /// Returns `false` when the channel's receiver is gone.
    pub fn report(&self, failure: CacheError) -> bool {
        error!(error = %failure, "unhandled transfer-cache failure");
        let Some(sender) = &self.sender else {
            return true;
        };
        match sender.send(failure) {
            Ok(()) => true,
            Err(_) => {
                warn!("unhandled-failure receiver dropped, failure only logged");
                false
            }
        }
    }
}
