//! Per-entity fetch, poll and retry state machine
//!
//! Each `EntitySync` owns one driver task. The task runs fetch cycles one at
//! a time: it enters `Loading`, awaits the source, applies the outcome, then
//! waits for the next poll tick or an out-of-band trigger. Triggers that
//! arrive while a fetch is in flight are folded into a single follow-up
//! cycle, so the same entity is never fetched twice concurrently.
//!
//! ```text
//! EntitySync::with_options
//!     ↓ spawns
//! Driver task ──fetch──▶ PriceSource
//!     ↑   │
//!     │   └─▶ watch / broadcast ──▶ view
//!     │
//! poll timer, RefreshCoordinator, retry_now / refresh_now
//! ```

use crate::{
    constants::{
        DETAIL_POLL_INTERVAL_MS, EVENT_CHANNEL_CAPACITY, POLL_INTERVAL_ENV, TILE_POLL_INTERVAL_MS,
    },
    coordinator::{RefreshCoordinator, Subscription},
    error::SyncError,
    metrics::{FetchMetrics, MetricsCollector},
    source::PriceSource,
    types::{EntityKey, EntitySyncState, FetchTrigger, PriceSnapshot, SyncEvent},
};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// When an instance refetches on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSchedule {
    /// Refetch this long after each cycle resolves
    Every(Duration),
    /// Fetch once; only manual refresh, retry or `refresh_now` refetch
    Once,
}

/// Which source call a cycle makes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// `PriceSource::fetch_snapshot`
    Snapshot,
    /// `PriceSource::fetch_details`
    Details,
}

/// Configuration of one sync instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Polling cadence
    pub schedule: PollSchedule,
    /// Source call per cycle
    pub kind: FetchKind,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::tile()
    }
}

impl SyncOptions {
    /// Tile defaults: snapshot every 30 seconds
    pub fn tile() -> Self {
        Self {
            schedule: PollSchedule::Every(Duration::from_millis(TILE_POLL_INTERVAL_MS)),
            kind: FetchKind::Snapshot,
        }
    }

    /// Detail view defaults: one details fetch
    pub fn detail() -> Self {
        Self {
            schedule: PollSchedule::Once,
            kind: FetchKind::Details,
        }
    }

    /// Detail view that keeps polling at the detail cadence
    pub fn polling_detail() -> Self {
        Self {
            schedule: PollSchedule::Every(Duration::from_millis(DETAIL_POLL_INTERVAL_MS)),
            kind: FetchKind::Details,
        }
    }

    /// Snapshot polling every `poll_interval_ms`
    pub fn every_ms(poll_interval_ms: u64) -> Result<Self, SyncError> {
        let options = Self {
            schedule: PollSchedule::Every(Duration::from_millis(poll_interval_ms)),
            kind: FetchKind::Snapshot,
        };
        options.validate()?;
        Ok(options)
    }

    /// Tile defaults with the poll interval overridable through
    /// `METAL_SYNC_POLL_INTERVAL_MS`
    pub fn from_env() -> Self {
        let mut options = Self::tile();
        if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    options.schedule = PollSchedule::Every(Duration::from_millis(ms));
                }
                _ => tracing::warn!(
                    variable = POLL_INTERVAL_ENV,
                    value = %raw,
                    "Ignoring invalid poll interval override"
                ),
            }
        }
        options
    }

    /// Rejects a zero poll interval
    pub fn validate(&self) -> Result<(), SyncError> {
        match self.schedule {
            PollSchedule::Every(interval) if interval.is_zero() => {
                Err(SyncError::InvalidPollInterval)
            }
            _ => Ok(()),
        }
    }
}

/// State shared between the handle and its driver task
///
/// `destroyed` doubles as the lock every state write happens under, so once
/// `destroy` returns no late fetch result can land.
struct Shared {
    state_tx: watch::Sender<EntitySyncState>,
    destroyed: Mutex<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.destroyed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the state channel unless the instance is destroyed
    fn apply<R>(&self, f: impl FnOnce(&watch::Sender<EntitySyncState>) -> R) -> Option<R> {
        let destroyed = self.lock();
        if *destroyed {
            return None;
        }
        Some(f(&self.state_tx))
    }
}

/// Live price state for one tracked entity
///
/// Created when a tile or detail view mounts, destroyed when it unmounts
/// (explicitly or by dropping the handle).
///
/// # Example
/// ```no_run
/// use metal_price_sync::{EntitySync, Metal, SimulatedMetalSource};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sync = EntitySync::create(Metal::Gold, 30_000, Arc::new(SimulatedMetalSource::new()))?;
/// let mut updates = sync.watch();
/// updates.changed().await?;
/// println!("{:?}", sync.state().status);
/// # Ok(())
/// # }
/// ```
pub struct EntitySync<K: EntityKey> {
    key: K,
    options: SyncOptions,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<EntitySyncState>,
    triggers: mpsc::UnboundedSender<FetchTrigger>,
    events: broadcast::Sender<SyncEvent<K>>,
    cancel: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
    metrics: Arc<MetricsCollector>,
}

impl<K: EntityKey> EntitySync<K> {
    /// Starts syncing `key` every `poll_interval_ms` on the global coordinator
    ///
    /// # Errors
    /// `SyncError::InvalidPollInterval` when `poll_interval_ms` is zero
    ///
    /// # Panics
    /// When called outside a tokio runtime
    pub fn create(
        key: K,
        poll_interval_ms: u64,
        source: Arc<dyn PriceSource<K>>,
    ) -> Result<Self, SyncError> {
        let options = SyncOptions::every_ms(poll_interval_ms)?;
        Self::with_options(key, source, RefreshCoordinator::global(), options)
    }

    /// Starts syncing `key` with explicit options and coordinator
    ///
    /// The initial fetch is issued right away; `state()` reports `Loading`
    /// until it resolves.
    ///
    /// # Panics
    /// When called outside a tokio runtime
    pub fn with_options(
        key: K,
        source: Arc<dyn PriceSource<K>>,
        coordinator: RefreshCoordinator,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        options.validate()?;

        let (state_tx, state_rx) = watch::channel(EntitySyncState::default());
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            state_tx,
            destroyed: Mutex::new(false),
        });
        let cancel = CancellationToken::new();
        let metrics = Arc::new(MetricsCollector::new(&key.to_string()));

        let refresh_tx = trigger_tx.clone();
        let subscription = coordinator.subscribe(move |generation| {
            let _ = refresh_tx.send(FetchTrigger::ManualRefresh { generation });
        });

        let driver = Driver {
            key: key.clone(),
            options,
            source,
            shared: shared.clone(),
            events: events.clone(),
            cancel: cancel.clone(),
            metrics: metrics.clone(),
            observed_generation: coordinator.generation(),
        };
        tokio::spawn(driver.run(trigger_rx));

        Ok(Self {
            key,
            options,
            shared,
            state_rx,
            triggers: trigger_tx,
            events,
            cancel,
            subscription: Mutex::new(Some(subscription)),
            metrics,
        })
    }

    /// The entity this instance tracks
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The options this instance was created with
    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// Current state; never waits on a fetch
    pub fn state(&self) -> EntitySyncState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<EntitySyncState> {
        self.state_rx.clone()
    }

    /// Receiver for transition events
    pub fn events(&self) -> broadcast::Receiver<SyncEvent<K>> {
        self.events.subscribe()
    }

    /// Refetches if the last fetch failed
    ///
    /// # Returns
    /// True if a retry was queued; false when the instance is not `Failed`
    /// or has been destroyed
    pub fn retry_now(&self) -> bool {
        if !self.state().is_failed() {
            return false;
        }
        self.send(FetchTrigger::Retry)
    }

    /// Refetches regardless of the current status
    ///
    /// # Returns
    /// False if the instance has been destroyed
    pub fn refresh_now(&self) -> bool {
        self.send(FetchTrigger::Explicit)
    }

    fn send(&self, trigger: FetchTrigger) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.triggers.send(trigger).is_ok()
    }

    /// True once `destroy` has run
    pub fn is_destroyed(&self) -> bool {
        *self.shared.lock()
    }

    /// Stops the instance
    ///
    /// Disarms the poll timer, leaves the refresh coordinator and discards
    /// the result of any fetch still in flight. The fetch itself is not
    /// interrupted. Calling this more than once is a no-op.
    pub fn destroy(&self) {
        {
            let mut destroyed = self.shared.lock();
            if *destroyed {
                return;
            }
            *destroyed = true;
        }

        self.cancel.cancel();
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }

        tracing::info!(entity = %self.key, "Entity sync destroyed");
    }

    /// Fetch metrics for this instance
    pub async fn metrics(&self) -> FetchMetrics {
        self.metrics.get_metrics().await
    }
}

impl<K: EntityKey> Drop for EntitySync<K> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owns one instance's fetch loop
struct Driver<K: EntityKey> {
    key: K,
    options: SyncOptions,
    source: Arc<dyn PriceSource<K>>,
    shared: Arc<Shared>,
    events: broadcast::Sender<SyncEvent<K>>,
    cancel: CancellationToken,
    metrics: Arc<MetricsCollector>,
    observed_generation: u64,
}

impl<K: EntityKey> Driver<K> {
    async fn run(mut self, mut triggers: mpsc::UnboundedReceiver<FetchTrigger>) {
        tracing::info!(
            entity = %self.key,
            schedule = ?self.options.schedule,
            kind = ?self.options.kind,
            source = self.source.source_name(),
            generation = self.observed_generation,
            "Starting entity sync"
        );

        let mut next = Some(FetchTrigger::Initial);
        while let Some(trigger) = next.take() {
            if !self.run_cycle(trigger).await {
                break;
            }
            next = match self.drain_pending(&mut triggers).await {
                Some(trigger) => Some(trigger),
                None => self.wait_for_trigger(&mut triggers).await,
            };
        }

        tracing::debug!(entity = %self.key, "Entity sync driver stopped");
    }

    /// Filters triggers; a refresh only counts if its generation is newer
    /// than the last one acted on
    fn accept(&mut self, trigger: FetchTrigger) -> Option<FetchTrigger> {
        if let FetchTrigger::ManualRefresh { generation } = trigger {
            if generation <= self.observed_generation {
                return None;
            }
            self.observed_generation = generation;
        }
        Some(trigger)
    }

    /// Collapses triggers that queued up during the last fetch into one
    async fn drain_pending(
        &mut self,
        triggers: &mut mpsc::UnboundedReceiver<FetchTrigger>,
    ) -> Option<FetchTrigger> {
        let mut follow_up = None;
        while let Ok(trigger) = triggers.try_recv() {
            let Some(trigger) = self.accept(trigger) else {
                continue;
            };
            if follow_up.is_some() {
                self.metrics.record_coalesced().await;
                tracing::debug!(entity = %self.key, ?trigger, "Coalesced fetch trigger");
            } else {
                follow_up = Some(trigger);
            }
        }
        follow_up
    }

    /// Arms the poll timer from now and waits for whatever fires first
    async fn wait_for_trigger(
        &mut self,
        triggers: &mut mpsc::UnboundedReceiver<FetchTrigger>,
    ) -> Option<FetchTrigger> {
        let cancel = self.cancel.clone();
        let schedule = self.options.schedule;
        let tick = async move {
            match schedule {
                PollSchedule::Every(interval) => tokio::time::sleep(interval).await,
                PollSchedule::Once => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(tick);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        if let Some(trigger) = self.accept(trigger) {
                            return Some(trigger);
                        }
                    }
                    None => return None,
                },
                _ = &mut tick => return Some(FetchTrigger::Poll),
            }
        }
    }

    /// Runs one fetch cycle
    ///
    /// # Returns
    /// False if the instance was destroyed before the cycle could apply
    async fn run_cycle(&mut self, trigger: FetchTrigger) -> bool {
        let started = self.shared.apply(|state_tx| {
            state_tx.send_if_modified(EntitySyncState::begin_loading);
            self.emit(SyncEvent::FetchStarted {
                id: Uuid::new_v4(),
                entity: self.key.clone(),
                trigger,
                timestamp: Utc::now(),
            });
        });
        if started.is_none() {
            return false;
        }
        tracing::debug!(entity = %self.key, ?trigger, "Fetch cycle started");

        let start = Instant::now();
        let outcome = match self.options.kind {
            FetchKind::Snapshot => self.source.fetch_snapshot(&self.key).await,
            FetchKind::Details => self.source.fetch_details(&self.key).await,
        }
        .and_then(PriceSnapshot::validate);
        let elapsed = start.elapsed();
        let success = outcome.is_ok();

        let applied = match outcome {
            Ok(snapshot) => self.shared.apply(|state_tx| {
                let new_price = snapshot.current;
                let change_percent = snapshot.change_percent;
                let mut old_price = None;
                state_tx.send_modify(|state| {
                    old_price = state.last_result.as_ref().map(|last| last.current);
                    state.complete(snapshot);
                });
                tracing::debug!(
                    entity = %self.key,
                    price = new_price,
                    change_percent,
                    latency_ms = elapsed.as_millis() as u64,
                    "Fetch succeeded"
                );
                self.emit(SyncEvent::SnapshotUpdated {
                    id: Uuid::new_v4(),
                    entity: self.key.clone(),
                    old_price,
                    new_price,
                    change_percent,
                    timestamp: Utc::now(),
                });
            }),
            Err(err) => self.shared.apply(|state_tx| {
                let message = err.to_string();
                state_tx.send_modify(|state| state.fail(message.clone()));
                tracing::warn!(
                    entity = %self.key,
                    error = %err,
                    latency_ms = elapsed.as_millis() as u64,
                    "Fetch failed"
                );
                self.emit(SyncEvent::FetchFailed {
                    id: Uuid::new_v4(),
                    entity: self.key.clone(),
                    error_message: message,
                    timestamp: Utc::now(),
                });
            }),
        };

        if applied.is_none() {
            self.metrics.record_discarded().await;
            tracing::debug!(
                entity = %self.key,
                success,
                "Discarding fetch result of destroyed instance"
            );
            return false;
        }

        self.metrics.record_request(elapsed, success).await;
        true
    }

    fn emit(&self, event: SyncEvent<K>) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}
