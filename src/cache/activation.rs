//! Decides whether caching is in effect for the current render pass.
//!
//! ```text
//! producer:  Producing                      (no exit)
//! consumer:  Consuming --dev mode------> Inactive
//!            Consuming --app stable----> Inactive
//!            (flag absent or false) ---> Inactive
//! ```
//!
//! Entering `Inactive` erases the transfer state exactly once.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::gc::{UnhandledFailures, collect_garbage};
use super::keys::ACTIVATION_KEY;
use super::lock::mutex_lock;
use super::store::{StateStore, StateStoreExt};

const SOURCE: &str = "cache::activation";

/// Which side of the handoff this render pass runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Renders first and fills the store.
    Producer,
    /// Re-renders from the handed-over store.
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Producing,
    Consuming,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationReason {
    /// Caching was forced off by configuration.
    DevelopmentMode,
    /// The consumer finished its initial render.
    ApplicationStable,
    /// The producer did not hand over an active flag.
    NotActivated,
}

/// Source of the "initial render settled" signal.
#[async_trait]
pub trait StabilitySignal: Send {
    /// Next observed value, `None` once the source is closed.
    async fn next_state(&mut self) -> Option<bool>;
}

#[async_trait]
impl StabilitySignal for watch::Receiver<bool> {
    async fn next_state(&mut self) -> Option<bool> {
        self.wait_for(|stable| *stable).await.ok().map(|stable| *stable)
    }
}

#[async_trait]
impl StabilitySignal for BoxStream<'static, bool> {
    async fn next_state(&mut self) -> Option<bool> {
        self.next().await
    }
}

pub struct Activation {
    platform: Platform,
    state: Mutex<ActivationState>,
    store: Arc<dyn StateStore>,
    failures: UnhandledFailures,
}

impl Activation {
    /// Compute the initial state for `platform`.
    ///
    /// The producer publishes the activation flag for the consumer; the
    /// consumer reads it back and switches off immediately in development mode.
    pub fn start(
        platform: Platform,
        config: &CacheConfig,
        store: Arc<dyn StateStore>,
        failures: UnhandledFailures,
    ) -> Result<Self, CacheError> {
        if !config.production_mode {
            warn!(
                "transfer cache is in development mode; enable production mode with server-side rendering"
            );
        }

        let initial = match platform {
            Platform::Producer => {
                store.write(&ACTIVATION_KEY, &true)?;
                ActivationState::Producing
            }
            Platform::Consumer => match store.read(&ACTIVATION_KEY)? {
                Some(true) => ActivationState::Consuming,
                _ => ActivationState::Inactive,
            },
        };

        let activation = Self {
            platform,
            state: Mutex::new(initial),
            store,
            failures,
        };
        info!(platform = ?platform, state = ?initial, "transfer cache started");

        match initial {
            ActivationState::Inactive => activation.collect(DeactivationReason::NotActivated),
            ActivationState::Consuming if !config.production_mode => {
                activation.deactivate(DeactivationReason::DevelopmentMode);
            }
            _ => {}
        }

        Ok(activation)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn state(&self) -> ActivationState {
        *mutex_lock(&self.state, SOURCE, "state")
    }

    pub fn is_active(&self) -> bool {
        self.state() != ActivationState::Inactive
    }

    /// Move `Consuming` to `Inactive`.
    ///
    /// Returns `false` when no transition happened: the producer never
    /// deactivates and `Inactive` is final.
    pub fn deactivate(&self, reason: DeactivationReason) -> bool {
        {
            let mut state = mutex_lock(&self.state, SOURCE, "deactivate");
            if *state != ActivationState::Consuming {
                return false;
            }
            *state = ActivationState::Inactive;
        }

        info!(reason = ?reason, "transfer cache deactivated");
        self.collect(reason);
        true
    }

    /// Deactivate once `signal` reports the application as stable.
    pub fn watch_stability<S>(self: &Arc<Self>, mut signal: S) -> JoinHandle<()>
    where
        S: StabilitySignal + 'static,
    {
        let activation = Arc::clone(self);
        tokio::spawn(async move {
            while activation.state() == ActivationState::Consuming {
                match signal.next_state().await {
                    Some(true) => {
                        activation.deactivate(DeactivationReason::ApplicationStable);
                        break;
                    }
                    Some(false) => continue,
                    None => break,
                }
            }
        })
    }

    fn collect(&self, reason: DeactivationReason) {
        let outcome = collect_garbage(self.store.as_ref());
        info!(
            reason = ?reason,
            removed = outcome.removed_keys.len(),
            "transfer state erased"
        );
        for failure in outcome.failures {
            self.failures.report(failure);
        }
    }
}
