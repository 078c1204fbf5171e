//! Sequence ledger and store-key resolution.
//!
//! The producer binds every distinct fingerprint to the sequence id under which
//! it was first dispatched. The consumer replays the same render in the same
//! order, so looking a fingerprint up in the ledger yields the id the producer
//! stored the snapshot under.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::CacheError;
use super::keys::{LAST_ID_KEY, LEDGER_KEY, RequestKeyBuilder, StateKey, snapshot_state_key};
use super::lock::mutex_lock;
use super::request::TransferRequest;
use super::response::CachedSnapshot;
use super::store::{StateStore, StateStoreExt};

const SOURCE: &str = "cache::ledger";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    #[serde(rename = "reqKey")]
    pub fingerprint: String,
}

impl LedgerEntry {
    pub fn snapshot_key(&self) -> StateKey<CachedSnapshot> {
        snapshot_state_key(&self.fingerprint, self.id)
    }
}

/// Ledger view over a shared state store.
pub struct SequenceLedger<'a> {
    store: &'a dyn StateStore,
}

impl<'a> SequenceLedger<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Record `fingerprint` under `id` and advance the last id.
    ///
    /// The first occurrence of a fingerprint wins; a second one is rejected
    /// and leaves the ledger untouched.
    pub fn append(&self, fingerprint: &str, id: u64) -> Result<(), CacheError> {
        let mut entries = self.get_all(false)?;
        if entries.iter().any(|entry| entry.fingerprint == fingerprint) {
            return Err(CacheError::DuplicateFingerprint {
                fingerprint: fingerprint.to_string(),
            });
        }

        self.store.write(&LAST_ID_KEY, &id)?;
        entries.push(LedgerEntry {
            id,
            fingerprint: fingerprint.to_string(),
        });
        self.store.write(&LEDGER_KEY, &entries)
    }

    pub fn lookup(&self, fingerprint: &str) -> Result<Option<LedgerEntry>, CacheError> {
        Ok(self
            .get_all(true)?
            .into_iter()
            .find(|entry| entry.fingerprint == fingerprint))
    }

    /// Last id recorded by the producer; `0` when absent and not `required`.
    pub fn last_id(&self, required: bool) -> Result<u64, CacheError> {
        match self.store.read(&LAST_ID_KEY)? {
            Some(id) => Ok(id),
            None if required => Err(CacheError::MissingLastId),
            None => Ok(0),
        }
    }

    /// All entries in dispatch order; empty when absent and not `required`.
    pub fn get_all(&self, required: bool) -> Result<Vec<LedgerEntry>, CacheError> {
        match self.store.read(&LEDGER_KEY)? {
            Some(entries) => Ok(entries),
            None if required => Err(CacheError::MissingLedger),
            None => Ok(Vec::new()),
        }
    }
}

/// Hands out sequence ids and turns requests into snapshot keys.
///
/// One instance lives for one render pass. The id counter and the ledger
/// read-modify-write share a lock, so ids follow call order.
pub struct KeyResolver {
    store: Arc<dyn StateStore>,
    builder: RequestKeyBuilder,
    last_dispatched: Mutex<u64>,
}

impl KeyResolver {
    pub fn new(store: Arc<dyn StateStore>, builder: RequestKeyBuilder) -> Self {
        Self {
            store,
            builder,
            last_dispatched: Mutex::new(0),
        }
    }

    /// Ids handed out so far in this render pass.
    pub fn dispatched(&self) -> u64 {
        *mutex_lock(&self.last_dispatched, SOURCE, "dispatched")
    }

    /// Producer side: claim the next id and record the request in the ledger.
    pub fn producer_key(
        &self,
        request: &TransferRequest,
    ) -> Result<StateKey<CachedSnapshot>, CacheError> {
        let mut counter = mutex_lock(&self.last_dispatched, SOURCE, "producer_key");
        *counter += 1;
        let id = *counter;

        let fingerprint = self.builder.fingerprint(request)?;
        SequenceLedger::new(self.store.as_ref()).append(&fingerprint, id)?;

        debug!(id, fingerprint = %fingerprint, "request recorded in ledger");
        Ok(snapshot_state_key(&fingerprint, id))
    }

    /// Consumer side: claim the next id and find the producer's slot.
    ///
    /// The id recorded in the ledger is authoritative; the consumer's own
    /// counter only detects requests beyond what the producer dispatched.
    pub fn consumer_key(
        &self,
        request: &TransferRequest,
    ) -> Result<StateKey<CachedSnapshot>, CacheError> {
        let mut counter = mutex_lock(&self.last_dispatched, SOURCE, "consumer_key");
        *counter += 1;
        let id = *counter;

        let fingerprint = self.builder.fingerprint(request)?;
        let ledger = SequenceLedger::new(self.store.as_ref());
        let entry = ledger
            .lookup(&fingerprint)?
            .ok_or_else(|| CacheError::RequestNotInLedger {
                fingerprint: fingerprint.clone(),
            })?;

        let last_id = ledger.last_id(true)?;
        if last_id == 0 || id > last_id {
            return Err(CacheError::SequenceOverrun { id, last_id });
        }

        debug!(id, ledger_id = entry.id, fingerprint = %fingerprint, "request resolved from ledger");
        Ok(entry.snapshot_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::snapshot_key;
    use crate::cache::store::MemoryStateStore;

    #[test]
    fn append_records_entry_and_last_id() {
        let store = MemoryStateStore::new();
        let ledger = SequenceLedger::new(&store);

        ledger.append("fp-a", 1).expect("first append");
        ledger.append("fp-b", 3).expect("second append");

        assert_eq!(ledger.last_id(true).expect("last id"), 3);
        assert_eq!(
            ledger.get_all(true).expect("ledger"),
            vec![
                LedgerEntry {
                    id: 1,
                    fingerprint: "fp-a".to_string()
                },
                LedgerEntry {
                    id: 3,
                    fingerprint: "fp-b".to_string()
                },
            ]
        );
    }

    #[test]
    fn duplicate_append_is_rejected_without_changes() {
        let store = MemoryStateStore::new();
        let ledger = SequenceLedger::new(&store);
        ledger.append("fp-a", 1).expect("first append");
        let before = store.to_payload();

        let err = ledger.append("fp-a", 2).expect_err("duplicate");
        assert!(matches!(err, CacheError::DuplicateFingerprint { ref fingerprint } if fingerprint == "fp-a"));
        assert_eq!(store.to_payload(), before);
    }

    #[test]
    fn absent_state_is_fatal_only_when_required() {
        let store = MemoryStateStore::new();
        let ledger = SequenceLedger::new(&store);

        assert_eq!(ledger.last_id(false).expect("optional"), 0);
        assert!(ledger.get_all(false).expect("optional").is_empty());
        assert!(matches!(ledger.last_id(true), Err(CacheError::MissingLastId)));
        assert!(matches!(ledger.get_all(true), Err(CacheError::MissingLedger)));
        assert!(matches!(ledger.lookup("fp"), Err(CacheError::MissingLedger)));
    }

    #[test]
    fn entries_serialize_with_req_key() {
        let entry = LedgerEntry {
            id: 1,
            fingerprint: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&entry).expect("serializes"),
            serde_json::json!({"id": 1, "reqKey": "abc"})
        );
    }

    #[test]
    fn producer_keys_follow_dispatch_order() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let resolver = KeyResolver::new(store.clone(), RequestKeyBuilder::default());
        let builder = RequestKeyBuilder::default();

        let a = TransferRequest::get("/a");
        let b = TransferRequest::get("/b");
        let key_a = resolver.producer_key(&a).expect("key a");
        let key_b = resolver.producer_key(&b).expect("key b");

        let fp_a = builder.fingerprint(&a).expect("fingerprint");
        let fp_b = builder.fingerprint(&b).expect("fingerprint");
        assert_eq!(key_a.name(), snapshot_key(&fp_a, 1));
        assert_eq!(key_b.name(), snapshot_key(&fp_b, 2));
        assert_eq!(resolver.dispatched(), 2);
    }

    #[test]
    fn repeated_request_consumes_an_id_but_keeps_the_first_slot() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let resolver = KeyResolver::new(store.clone(), RequestKeyBuilder::default());
        let a = TransferRequest::get("/a");
        let b = TransferRequest::get("/b");

        resolver.producer_key(&a).expect("first a");
        assert!(matches!(
            resolver.producer_key(&a),
            Err(CacheError::DuplicateFingerprint { .. })
        ));
        resolver.producer_key(&b).expect("b");

        let ledger = SequenceLedger::new(store.as_ref());
        let ids: Vec<u64> = ledger
            .get_all(true)
            .expect("ledger")
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(ledger.last_id(true).expect("last id"), 3);
    }

    #[test]
    fn consumer_resolves_to_the_ledger_id() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let builder = RequestKeyBuilder::default();
        let a = TransferRequest::get("/a");
        let b = TransferRequest::get("/b");
        let fp_a = builder.fingerprint(&a).expect("fingerprint");
        let fp_b = builder.fingerprint(&b).expect("fingerprint");
        let ledger = SequenceLedger::new(store.as_ref());
        ledger.append(&fp_a, 1).expect("append");
        ledger.append(&fp_b, 3).expect("append");

        let resolver = KeyResolver::new(store.clone(), builder);
        let first = resolver.consumer_key(&a).expect("first a");
        let second = resolver.consumer_key(&a).expect("second a");
        let third = resolver.consumer_key(&b).expect("b");

        assert_eq!(first, second);
        assert_eq!(first.name(), snapshot_key(&fp_a, 1));
        assert_eq!(third.name(), snapshot_key(&fp_b, 3));
    }

    #[test]
    fn consumer_rejects_unknown_requests_and_overruns() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let builder = RequestKeyBuilder::default();
        let a = TransferRequest::get("/a");
        let fp_a = builder.fingerprint(&a).expect("fingerprint");
        SequenceLedger::new(store.as_ref())
            .append(&fp_a, 1)
            .expect("append");

        let resolver = KeyResolver::new(store.clone(), builder);
        assert!(matches!(
            resolver.consumer_key(&TransferRequest::get("/unknown")),
            Err(CacheError::RequestNotInLedger { .. })
        ));
        assert!(matches!(
            resolver.consumer_key(&a),
            Err(CacheError::SequenceOverrun { id: 2, last_id: 1 })
        ));
    }
}
