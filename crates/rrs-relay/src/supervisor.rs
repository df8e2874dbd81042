//! Subscription supervision.
//!
//! The ledger event subscription silently dies from time to time. A liveness
//! probe runs on a fixed period and, when the subscription is gone, cancels
//! and re-creates it. A second, slower task logs the remaining transaction
//! quota. Both run as [`PeriodicTask`]s, which restart their body if it
//! panics.
//!
//! ## State Machine
//!
//! ```text
//!            probe: not alive
//!   Active ─────────────────────> Resubscribing
//!     ^                                 │
//!     └──── cancel + subscribe ok ──────┘
//! ```
//!
//! A failed resubscribe leaves the state at `Resubscribing`; the next tick
//! tries again. There is no terminal state.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::Result;

/// The ledger event subscription being supervised.
#[async_trait]
pub trait EventSubscription: Send + Sync {
    /// Create the subscription.
    async fn subscribe(&self) -> Result<()>;

    /// Tear the subscription down.
    async fn cancel(&self) -> Result<()>;

    /// Whether events are still flowing.
    async fn is_alive(&self) -> bool;
}

/// Source of the remaining transaction quota, for observability.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    async fn remaining_quota(&self) -> Result<u64>;
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Resubscribing,
}

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Period of the liveness probe.
    pub liveness_interval: Duration,
    /// Period of the quota log.
    pub quota_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_secs(15),
            quota_interval: Duration::from_secs(60),
        }
    }
}

/// Keeps an [`EventSubscription`] alive.
pub struct SubscriptionSupervisor {
    subscription: Arc<dyn EventSubscription>,
    config: SupervisorConfig,
    state: watch::Sender<SubscriptionState>,
    last_error: Mutex<Option<String>>,
}

impl SubscriptionSupervisor {
    /// Create a supervisor. The subscription is assumed active.
    pub fn new(subscription: Arc<dyn EventSubscription>, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Active);
        Self {
            subscription,
            config,
            state,
            last_error: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// The error of the last failed resubscribe, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// One liveness check, resubscribing if needed. Returns the new state.
    pub async fn probe(&self) -> SubscriptionState {
        if self.subscription.is_alive().await {
            self.state.send_replace(SubscriptionState::Active);
            return SubscriptionState::Active;
        }

        if self.state() == SubscriptionState::Active {
            warn!("event subscription is dead, resubscribing");
        }
        self.state.send_replace(SubscriptionState::Resubscribing);

        if let Err(e) = self.subscription.cancel().await {
            warn!(error = %e, "cancelling dead subscription failed");
        }
        match self.subscription.subscribe().await {
            Ok(()) => {
                info!("event subscription restored");
                self.set_last_error(None);
                self.state.send_replace(SubscriptionState::Active);
                SubscriptionState::Active
            }
            Err(e) => {
                error!(error = %e, "resubscribe failed");
                self.set_last_error(Some(e.to_string()));
                SubscriptionState::Resubscribing
            }
        }
    }

    /// Start the liveness probe and, if given, the quota log.
    pub fn spawn(self: &Arc<Self>, quota: Option<Arc<dyn QuotaSource>>) -> SupervisorHandle {
        let supervisor = Arc::clone(self);
        let liveness = PeriodicTask::spawn("liveness-probe", self.config.liveness_interval, move || {
            let supervisor = Arc::clone(&supervisor);
            async move {
                supervisor.probe().await;
            }
        });

        let quota_log = quota.map(|source| {
            PeriodicTask::spawn("quota-log", self.config.quota_interval, move || {
                let source = Arc::clone(&source);
                async move {
                    match source.remaining_quota().await {
                        Ok(remaining) => info!(remaining, "subscription quota"),
                        Err(e) => warn!(error = %e, "could not read subscription quota"),
                    }
                }
            })
        });

        SupervisorHandle {
            tasks: std::iter::once(liveness).chain(quota_log).collect(),
        }
    }
}

/// Running supervisor tasks.
pub struct SupervisorHandle {
    tasks: Vec<PeriodicTask>,
}

impl SupervisorHandle {
    /// Stop every task and wait for it to finish.
    pub async fn shutdown(self) {
        for task in self.tasks {
            task.shutdown().await;
        }
    }
}

/// A tick function run on a fixed period, restarted if it panics.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    restarts: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`. The first tick runs one period from now.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let restarts = Arc::new(AtomicU32::new(0));
        let tick = Arc::new(tick);

        let restart_count = Arc::clone(&restarts);
        let handle = tokio::spawn(async move {
            loop {
                let tick = Arc::clone(&tick);
                let mut stop = shutdown_rx.clone();
                let worker = tokio::spawn(async move {
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => tick().await,
                            _ = stop.changed() => return,
                        }
                    }
                });

                match worker.await {
                    Err(e) if e.is_panic() && !*shutdown_rx.borrow() => {
                        let n = restart_count.fetch_add(1, Ordering::SeqCst) + 1;
                        error!(task = name, restarts = n, "periodic task panicked, restarting");
                    }
                    _ => return,
                }
            }
        });

        Self {
            name,
            shutdown,
            restarts,
            handle,
        }
    }

    /// Task name, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// How many times the body was restarted after a panic.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Stop the task and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "periodic task ended abnormally");
        }
    }
}
