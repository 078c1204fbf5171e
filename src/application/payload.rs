//! Inspect, purge and record handoff payloads.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{
    ACTIVATION_KEY, CacheConfig, CachedSnapshot, InterceptError, LAST_ID_KEY, LEDGER_KEY,
    MemoryStateStore, Platform, SequenceLedger, StateStoreExt, TransferCacheInterceptor,
    TransferRequest, Transport, collect_garbage,
};

use super::error::AppError;

/// What a handoff payload carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadSummary {
    pub activated: bool,
    pub last_id: Option<u64>,
    pub entries: Vec<EntrySummary>,
    /// Keys that belong to no ledger entry.
    pub other_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub id: u64,
    pub fingerprint: String,
    pub snapshot_key: String,
    /// Status of the stored snapshot; `None` when nothing was stored.
    pub status: Option<u16>,
}

pub fn inspect(store: &MemoryStateStore) -> Result<PayloadSummary, AppError> {
    let ledger = SequenceLedger::new(store);
    let activated = store.read(&ACTIVATION_KEY)?.unwrap_or(false);
    let last_id = store.read(&LAST_ID_KEY)?;

    let mut known: BTreeSet<String> = [ACTIVATION_KEY.name(), LAST_ID_KEY.name(), LEDGER_KEY.name()]
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut entries = Vec::new();
    for entry in ledger.get_all(false)? {
        let key = entry.snapshot_key();
        let snapshot: Option<CachedSnapshot> = store.read(&key)?;
        known.insert(key.name().to_string());
        entries.push(EntrySummary {
            id: entry.id,
            snapshot_key: key.name().to_string(),
            status: snapshot.map(|snapshot| snapshot.status),
            fingerprint: entry.fingerprint,
        });
    }

    let other_keys = store
        .keys()
        .into_iter()
        .filter(|key| !known.contains(key))
        .collect();

    Ok(PayloadSummary {
        activated,
        last_id,
        entries,
        other_keys,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub failures: Vec<String>,
}

/// Erase the transfer state from `store`, keeping unrelated keys.
pub fn purge(store: &MemoryStateStore) -> PurgeReport {
    let outcome = collect_garbage(store);
    for failure in &outcome.failures {
        warn!(error = %failure, "purge left a failure behind");
    }
    PurgeReport {
        removed: outcome.removed_keys,
        failures: outcome
            .failures
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedRequest {
    pub url: String,
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run a producer pass over GET `urls` in order.
///
/// Failed requests are reported per URL and do not stop the pass.
pub async fn record(
    urls: &[String],
    config: &CacheConfig,
    transport: &dyn Transport,
) -> Result<(Arc<MemoryStateStore>, Vec<RecordedRequest>), AppError> {
    let store = Arc::new(MemoryStateStore::new());
    let interceptor = TransferCacheInterceptor::new(Platform::Producer, config, store.clone())?;

    let mut recorded = Vec::with_capacity(urls.len());
    for url in urls {
        let outcome = interceptor
            .send(TransferRequest::get(url.as_str()), transport)
            .await;
        let request = match outcome {
            Ok(response) => RecordedRequest {
                url: url.clone(),
                status: Some(response.status.as_u16()),
                error: None,
            },
            Err(InterceptError::Http(failure)) => RecordedRequest {
                url: url.clone(),
                status: Some(failure.status),
                error: Some(failure.status_text),
            },
            Err(err) => RecordedRequest {
                url: url.clone(),
                status: None,
                error: Some(err.to_string()),
            },
        };
        recorded.push(request);
    }

    info!(requests = recorded.len(), keys = store.len(), "producer pass recorded");
    Ok((store, recorded))
}
