//! Process-wide "refresh everything" signal
//!
//! The coordinator owns a generation counter. Each `trigger_refresh` bumps it
//! by one and calls every registered listener with the new value, so sync
//! instances never need to know about each other.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

static GLOBAL_COORDINATOR: OnceLock<RefreshCoordinator> = OnceLock::new();

/// Callback invoked with the new generation on every refresh
pub type RefreshListener = Arc<dyn Fn(u64) + Send + Sync>;

struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, RefreshListener>,
}

struct Shared {
    generation: AtomicU64,
    registry: Mutex<Registry>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broadcast point for manual refreshes
///
/// Cloning is cheap and every clone shares the same counter and listeners.
///
/// # Example
/// ```
/// use metal_price_sync::RefreshCoordinator;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let coordinator = RefreshCoordinator::new();
/// let seen = Arc::new(AtomicU64::new(0));
/// let observed = seen.clone();
/// let _subscription = coordinator.subscribe(move |generation| {
///     observed.store(generation, Ordering::SeqCst);
/// });
///
/// assert_eq!(coordinator.trigger_refresh(), 1);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    /// Returns the process-wide coordinator
    pub fn global() -> Self {
        GLOBAL_COORDINATOR.get_or_init(Self::new).clone()
    }

    /// Creates an independent coordinator starting at generation 0
    ///
    /// This is primarily for testing. Use `global()` in production code.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                registry: Mutex::new(Registry {
                    next_id: 0,
                    listeners: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Returns the current generation
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Returns the number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.shared.registry().listeners.len()
    }

    /// Bumps the generation by one and notifies every current listener
    ///
    /// Listeners run synchronously on the calling thread, outside the
    /// registry lock, so they may subscribe, unsubscribe or trigger again.
    ///
    /// # Returns
    /// The new generation
    pub fn trigger_refresh(&self) -> u64 {
        let (generation, listeners) = {
            let registry = self.shared.registry();
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let listeners: Vec<RefreshListener> = registry.listeners.values().cloned().collect();
            (generation, listeners)
        };

        tracing::info!(
            generation,
            listeners = listeners.len(),
            "Manual refresh triggered"
        );

        for listener in listeners {
            listener(generation);
        }

        generation
    }

    /// Registers a listener for future refreshes
    ///
    /// The listener is not called for the current generation. Dropping the
    /// returned subscription unregisters it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));

        tracing::trace!(subscription = id, "Refresh listener subscribed");

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            active: true,
        }
    }
}

/// Registration of one refresh listener
///
/// Unsubscribes on drop. Outliving the coordinator is harmless.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
    active: bool,
}

impl Subscription {
    /// Removes the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(shared) = self.shared.upgrade() {
            shared.registry().listeners.remove(&self.id);
            tracing::trace!(subscription = self.id, "Refresh listener unsubscribed");
        }
    }

    /// True until `unsubscribe` runs
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(coordinator: &RefreshCoordinator) -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = coordinator.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (subscription, count)
    }

    #[test]
    fn test_every_listener_notified_once_per_trigger() {
        let coordinator = RefreshCoordinator::new();
        let listeners: Vec<_> = (0..4).map(|_| counting(&coordinator)).collect();

        for _ in 0..7 {
            coordinator.trigger_refresh();
        }

        let total: usize = listeners
            .iter()
            .map(|(_, count)| count.load(Ordering::SeqCst))
            .sum();
        assert_eq!(total, 7 * 4);
        assert!(listeners
            .iter()
            .all(|(_, count)| count.load(Ordering::SeqCst) == 7));
        assert_eq!(coordinator.generation(), 7);
    }

    #[test]
    fn test_subscribe_does_not_invoke_listener() {
        let coordinator = RefreshCoordinator::new();
        coordinator.trigger_refresh();
        let (_subscription, count) = counting(&coordinator);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_receives_new_generation() {
        let coordinator = RefreshCoordinator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = coordinator.subscribe(move |generation| {
            sink.lock().unwrap().push(generation);
        });

        coordinator.trigger_refresh();
        coordinator.trigger_refresh();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let coordinator = RefreshCoordinator::new();
        let (mut subscription, count) = counting(&coordinator);
        let (_other, _) = counting(&coordinator);
        assert_eq!(coordinator.listener_count(), 2);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        assert_eq!(coordinator.listener_count(), 1);

        coordinator.trigger_refresh();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let coordinator = RefreshCoordinator::new();
        {
            let (_subscription, _) = counting(&coordinator);
            assert_eq!(coordinator.listener_count(), 1);
        }
        assert_eq!(coordinator.listener_count(), 0);
    }

    #[test]
    fn test_clones_share_generation() {
        let coordinator = RefreshCoordinator::new();
        let clone = coordinator.clone();
        let (_subscription, count) = counting(&clone);

        coordinator.trigger_refresh();
        assert_eq!(clone.generation(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_reentrantly() {
        let coordinator = RefreshCoordinator::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let subscription = coordinator.subscribe(move |_| {
            if let Some(mut subscription) = inner.lock().unwrap().take() {
                subscription.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(subscription);

        coordinator.trigger_refresh();
        assert_eq!(coordinator.listener_count(), 0);
    }
}
