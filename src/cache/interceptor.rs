//! Per-request orchestration of the transfer cache.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::activation::{
    Activation, ActivationState, DeactivationReason, Platform, StabilitySignal,
};
use super::config::CacheConfig;
use super::error::{CacheError, InterceptError};
use super::gc::UnhandledFailures;
use super::keys::{RequestKeyBuilder, StateKey};
use super::ledger::KeyResolver;
use super::request::TransferRequest;
use super::response::{CachedSnapshot, HttpEvent, ResponseCache, TransferResponse};
use super::store::StateStore;
use super::transport::{Transport, TransportStream};

const METRIC_HIT: &str = "transfer_cache_hit_total";
const METRIC_MISS: &str = "transfer_cache_miss_total";
const METRIC_PASSTHROUGH: &str = "transfer_cache_passthrough_total";
const METRIC_SNAPSHOT_STORED: &str = "transfer_cache_snapshot_stored_total";

/// Events of an intercepted request.
pub type EventStream = BoxStream<'static, Result<HttpEvent, InterceptError>>;

/// Caches responses on the producer and replays them on the consumer.
///
/// Build one instance per render pass; the sequence counter it owns is only
/// meaningful within that pass.
pub struct TransferCacheInterceptor {
    activation: Arc<Activation>,
    resolver: KeyResolver,
    store: Arc<dyn StateStore>,
}

impl TransferCacheInterceptor {
    pub fn new(
        platform: Platform,
        config: &CacheConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, CacheError> {
        Self::with_failures(platform, config, store, UnhandledFailures::default())
    }

    /// Like [`new`](Self::new), forwarding garbage-collection failures to `failures`.
    pub fn with_failures(
        platform: Platform,
        config: &CacheConfig,
        store: Arc<dyn StateStore>,
        failures: UnhandledFailures,
    ) -> Result<Self, CacheError> {
        let activation = Activation::start(platform, config, Arc::clone(&store), failures)?;
        let builder = RequestKeyBuilder::new(config.override_header().map(str::to_string));

        Ok(Self {
            activation: Arc::new(activation),
            resolver: KeyResolver::new(Arc::clone(&store), builder),
            store,
        })
    }

    pub fn activation(&self) -> &Arc<Activation> {
        &self.activation
    }

    pub fn state(&self) -> ActivationState {
        self.activation.state()
    }

    /// Stop replaying once `signal` reports the application as stable.
    pub fn watch_stability<S>(&self, signal: S) -> JoinHandle<()>
    where
        S: StabilitySignal + 'static,
    {
        self.activation.watch_stability(signal)
    }

    /// Report the application as stable right away.
    pub fn mark_stable(&self) -> bool {
        self.activation
            .deactivate(DeactivationReason::ApplicationStable)
    }

    /// Route `request` through the cache, calling `next` when no snapshot applies.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub fn intercept(&self, request: TransferRequest, next: &dyn Transport) -> EventStream {
        let key = match self.activation.state() {
            ActivationState::Inactive => {
                counter!(METRIC_PASSTHROUGH).increment(1);
                return next
                    .handle(request)
                    .map(|item| item.map_err(InterceptError::Http))
                    .boxed();
            }
            ActivationState::Producing => self.resolver.producer_key(&request),
            ActivationState::Consuming => self.resolver.consumer_key(&request),
        };

        let key = match key {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "transfer cache protocol failure");
                return failed(err);
            }
        };

        if ResponseCache::new(self.store.as_ref()).has(&key) {
            counter!(METRIC_HIT).increment(1);
            debug!(key = key.name(), "serving cached snapshot");
            return self.replay(&key);
        }

        counter!(METRIC_MISS).increment(1);
        debug!(key = key.name(), "cache miss, calling transport");
        record(
            next.handle(request),
            Arc::clone(&self.activation),
            Arc::clone(&self.store),
            key,
        )
    }

    /// Intercept `request` and wait for its terminal value.
    pub async fn send(
        &self,
        request: TransferRequest,
        next: &dyn Transport,
    ) -> Result<TransferResponse, InterceptError> {
        let mut events = self.intercept(request, next);
        while let Some(event) = events.next().await {
            if let HttpEvent::Response(response) = event? {
                return Ok(response);
            }
        }
        Err(InterceptError::NoResponse)
    }

    fn replay(&self, key: &StateKey<CachedSnapshot>) -> EventStream {
        let snapshot = match ResponseCache::new(self.store.as_ref()).get(key) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return failed(CacheError::decode(key.name(), missing_value())),
            Err(err) => return failed(err),
        };

        let item = match snapshot.replay(key.name()) {
            Ok(Ok(response)) => Ok(HttpEvent::Response(response)),
            Ok(Err(failure)) => Err(InterceptError::Http(failure)),
            Err(err) => Err(InterceptError::Cache(err)),
        };
        stream::iter([item]).boxed()
    }
}

fn failed(err: CacheError) -> EventStream {
    stream::iter([Err(InterceptError::Cache(err))]).boxed()
}

fn missing_value() -> serde_json::Error {
    serde::de::Error::custom("snapshot removed while being read")
}

/// Forward `inner` unchanged, snapshotting its terminal value under `key`.
///
/// Nothing is written if the stream is dropped before it terminates, or if
/// caching was switched off while the transport was still running.
fn record(
    mut inner: TransportStream,
    activation: Arc<Activation>,
    store: Arc<dyn StateStore>,
    key: StateKey<CachedSnapshot>,
) -> EventStream {
    stream! {
        while let Some(item) = inner.next().await {
            let active = activation.state() != ActivationState::Inactive;
            match item {
                Ok(HttpEvent::Response(response)) => {
                    if active {
                        write_snapshot(store.as_ref(), &key, &CachedSnapshot::from_response(&response));
                    } else {
                        debug!(key = key.name(), "cache deactivated in flight, snapshot dropped");
                    }
                    yield Ok(HttpEvent::Response(response));
                }
                Ok(event) => yield Ok(event),
                Err(failure) => {
                    if !active {
                        debug!(key = key.name(), "cache deactivated in flight, failure not cached");
                    } else if failure.is_replayable() {
                        write_snapshot(store.as_ref(), &key, &CachedSnapshot::from_failure(&failure));
                    } else {
                        debug!(key = key.name(), status = failure.status, "failure without http status not cached");
                    }
                    yield Err(InterceptError::Http(failure));
                }
            }
        }
    }
    .boxed()
}

fn write_snapshot(store: &dyn StateStore, key: &StateKey<CachedSnapshot>, snapshot: &CachedSnapshot) {
    match ResponseCache::new(store).put(key, snapshot) {
        Ok(()) => {
            counter!(METRIC_SNAPSHOT_STORED).increment(1);
            debug!(key = key.name(), status = snapshot.status, "snapshot stored");
        }
        Err(err) => warn!(key = key.name(), error = %err, "failed to store snapshot"),
    }
}
