//! Transfer cache
//!
//! Replays the outbound HTTP responses of a server render pass (the
//! producer) in the matching client render pass (the consumer):
//!
//! - **Ledger**: the producer records each request fingerprint with the
//!   sequence id it was dispatched under
//! - **Snapshots**: terminal responses are stored under `hash(fp_id)`
//! - **Activation**: the consumer replays until the application is stable,
//!   then erases the transfer state and goes to the network
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! production_mode = true
//! override_header = "x-forwarded-host"
//! ```

mod activation;
mod config;
mod error;
mod gc;
mod hash;
mod interceptor;
mod keys;
mod ledger;
mod lock;
mod request;
mod response;
mod store;
mod transport;

pub use activation::{
    Activation, ActivationState, DeactivationReason, Platform, StabilitySignal,
};
pub use config::CacheConfig;
pub use error::{CacheError, InterceptError, StoreError};
pub use gc::{GarbageCollection, UnhandledFailures, collect_garbage};
pub use hash::{hash, snapshot_key};
pub use interceptor::{EventStream, TransferCacheInterceptor};
pub use keys::{
    ACTIVATION_KEY, LAST_ID_KEY, LEDGER_KEY, RequestKeyBuilder, StateKey, snapshot_state_key,
};
pub use ledger::{KeyResolver, LedgerEntry, SequenceLedger};
pub use request::{ResponseType, TransferRequest};
pub use response::{
    CachedSnapshot, HttpErrorResponse, HttpEvent, ResponseCache, TransferResponse, headers_to_map,
};
pub use store::{MemoryStateStore, StateStore, StateStoreExt};
pub use transport::{ReqwestTransport, Transport, TransportStream};
