//! Board of live price tiles
//!
//! The board is what a home screen holds: one `EntitySync` per mounted
//! entity, a shared refresh coordinator for pull-to-refresh, and the entry
//! point for opening a detail view on a tile.

use crate::{
    coordinator::RefreshCoordinator,
    error::SyncError,
    source::PriceSource,
    sources::SimulatedMetalSource,
    sync::{EntitySync, SyncOptions},
    types::{ComponentHealth, EntityKey, EntitySyncState, HealthStatus, Metal},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Mounted tiles in mount order
struct Tiles<K: EntityKey> {
    order: Vec<K>,
    syncs: HashMap<K, EntitySync<K>>,
}

/// A dynamic set of independently polling tiles
///
/// # Example
/// ```no_run
/// use metal_price_sync::{Metal, PriceBoard};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let board = PriceBoard::metals().await?;
///
/// // pull-to-refresh
/// board.refresh_all();
///
/// for (metal, state) in board.states().await {
///     println!("{}: {:?}", metal, state.status);
/// }
///
/// let detail = board.open_detail(&Metal::Gold).await?;
/// println!("{:?}", detail.state());
/// # Ok(())
/// # }
/// ```
pub struct PriceBoard<K: EntityKey> {
    source: Arc<dyn PriceSource<K>>,
    coordinator: RefreshCoordinator,
    options: SyncOptions,
    tiles: RwLock<Tiles<K>>,
}

impl PriceBoard<Metal> {
    /// Board over the simulated metals backend with every metal mounted
    ///
    /// Uses the global refresh coordinator and `SyncOptions::from_env`.
    pub async fn metals() -> Result<Self, SyncError> {
        let board = Self::new(
            Arc::new(SimulatedMetalSource::new()),
            RefreshCoordinator::global(),
            SyncOptions::from_env(),
        )?;
        for metal in Metal::all() {
            board.mount(*metal).await?;
        }
        Ok(board)
    }
}

impl<K: EntityKey> PriceBoard<K> {
    /// Creates an empty board
    ///
    /// # Errors
    /// `SyncError::InvalidPollInterval` when `options` polls every zero ms
    pub fn new(
        source: Arc<dyn PriceSource<K>>,
        coordinator: RefreshCoordinator,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        options.validate()?;
        Ok(Self {
            source,
            coordinator,
            options,
            tiles: RwLock::new(Tiles {
                order: Vec::new(),
                syncs: HashMap::new(),
            }),
        })
    }

    /// The coordinator every tile listens to
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Name of the backing source
    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    /// Mounts a tile for `key` and starts its initial fetch
    ///
    /// # Returns
    /// False if a tile for `key` is already mounted
    pub async fn mount(&self, key: K) -> Result<bool, SyncError> {
        let mut tiles = self.tiles.write().await;
        if tiles.syncs.contains_key(&key) {
            return Ok(false);
        }

        let sync = EntitySync::with_options(
            key.clone(),
            self.source.clone(),
            self.coordinator.clone(),
            self.options,
        )?;
        tiles.order.push(key.clone());
        tiles.syncs.insert(key.clone(), sync);

        tracing::debug!(entity = %key, tiles = tiles.order.len(), "Tile mounted");
        Ok(true)
    }

    /// Unmounts and destroys the tile for `key`
    ///
    /// # Returns
    /// False if no tile was mounted for `key`
    pub async fn unmount(&self, key: &K) -> bool {
        let mut tiles = self.tiles.write().await;
        let Some(sync) = tiles.syncs.remove(key) else {
            return false;
        };
        tiles.order.retain(|mounted| mounted != key);
        sync.destroy();

        tracing::debug!(entity = %key, tiles = tiles.order.len(), "Tile unmounted");
        true
    }

    /// Keys of mounted tiles in mount order
    pub async fn mounted(&self) -> Vec<K> {
        self.tiles.read().await.order.clone()
    }

    /// Current state of one tile
    pub async fn state(&self, key: &K) -> Option<EntitySyncState> {
        self.tiles.read().await.syncs.get(key).map(EntitySync::state)
    }

    /// Current state of every tile in mount order
    pub async fn states(&self) -> Vec<(K, EntitySyncState)> {
        let tiles = self.tiles.read().await;
        tiles
            .order
            .iter()
            .filter_map(|key| {
                tiles
                    .syncs
                    .get(key)
                    .map(|sync| (key.clone(), sync.state()))
            })
            .collect()
    }

    /// Change notifications for one tile
    pub async fn watch(&self, key: &K) -> Option<watch::Receiver<EntitySyncState>> {
        self.tiles.read().await.syncs.get(key).map(EntitySync::watch)
    }

    /// Asks every tile to refetch now
    ///
    /// # Returns
    /// The new refresh generation
    pub fn refresh_all(&self) -> u64 {
        self.coordinator.trigger_refresh()
    }

    /// Retries a failed tile
    ///
    /// # Returns
    /// True if a retry was queued; false when the tile is not failed
    pub async fn retry(&self, key: &K) -> Result<bool, SyncError> {
        let tiles = self.tiles.read().await;
        let sync = tiles
            .syncs
            .get(key)
            .ok_or_else(|| SyncError::not_mounted(key))?;
        Ok(sync.retry_now())
    }

    /// Opens a detail view for a tile
    ///
    /// Only tiles showing fresh data can be opened, as a tile that is
    /// loading or failed is not selectable. The detail view fetches details
    /// once and refetches on manual refresh.
    pub async fn open_detail(&self, key: &K) -> Result<EntitySync<K>, SyncError> {
        let tiles = self.tiles.read().await;
        let sync = tiles
            .syncs
            .get(key)
            .ok_or_else(|| SyncError::not_mounted(key))?;
        if !sync.state().is_ready() {
            return Err(SyncError::not_selectable(key));
        }

        tracing::debug!(entity = %key, "Opening detail view");
        EntitySync::with_options(
            key.clone(),
            self.source.clone(),
            self.coordinator.clone(),
            SyncOptions::detail(),
        )
    }

    /// Destroys every tile
    pub async fn shutdown(&self) {
        let mut tiles = self.tiles.write().await;
        tiles.order.clear();
        for (_, sync) in tiles.syncs.drain() {
            sync.destroy();
        }
        tracing::info!("Price board shut down");
    }

    /// Perform a health check on the board
    ///
    /// # Returns
    /// ComponentHealth summarizing how many tiles show fresh data
    pub async fn health_check(&self) -> ComponentHealth {
        let states = self.states().await;
        let mut details = HashMap::new();

        let ready = states.iter().filter(|(_, state)| state.is_ready()).count();
        let with_data = states
            .iter()
            .filter(|(_, state)| state.last_result.is_some())
            .count();
        let failed: Vec<String> = states
            .iter()
            .filter(|(_, state)| state.is_failed())
            .map(|(key, _)| key.to_string())
            .collect();
        let loading: Vec<String> = states
            .iter()
            .filter(|(_, state)| state.is_loading())
            .map(|(key, _)| key.to_string())
            .collect();

        details.insert("mounted_tiles".to_string(), serde_json::json!(states.len()));
        details.insert("ready_tiles".to_string(), serde_json::json!(ready));
        details.insert("failed_tiles".to_string(), serde_json::json!(failed));
        details.insert("loading_tiles".to_string(), serde_json::json!(loading));
        details.insert(
            "source_name".to_string(),
            serde_json::json!(self.source_name()),
        );
        details.insert(
            "refresh_generation".to_string(),
            serde_json::json!(self.coordinator.generation()),
        );

        let status = if !states.is_empty() && ready == states.len() {
            HealthStatus::Healthy
        } else if with_data > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        let message = match status {
            HealthStatus::Healthy => "Every tile shows fresh data".to_string(),
            HealthStatus::Degraded => format!(
                "{} of {} tiles show fresh data ({} failed)",
                ready,
                states.len(),
                failed.len()
            ),
            HealthStatus::Unhealthy if states.is_empty() => "No tiles mounted".to_string(),
            HealthStatus::Unhealthy => "No tile has price data".to_string(),
        };

        ComponentHealth {
            name: "price_board".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::source::mock::MockSource;
    use crate::sources::SimulatedSourceConfig;
    use crate::types::SyncStatus;

    fn board(source: &Arc<MockSource>) -> PriceBoard<String> {
        PriceBoard::<String>::new(source.clone(), RefreshCoordinator::new(), SyncOptions::tile())
            .unwrap()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for<K: EntityKey>(
        board: &PriceBoard<K>,
        key: &K,
        predicate: impl FnMut(&EntitySyncState) -> bool,
    ) -> EntitySyncState {
        let mut rx = board.watch(key).await.unwrap();
        let state = rx.wait_for(predicate).await.unwrap().clone();
        state
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_tracks_order_and_rejects_duplicates() {
        let source = Arc::new(MockSource::new());
        let board = board(&source);

        assert!(board.mount(key("gold")).await.unwrap());
        assert!(board.mount(key("silver")).await.unwrap());
        assert!(!board.mount(key("gold")).await.unwrap());

        assert_eq!(board.mounted().await, vec![key("gold"), key("silver")]);
        assert_eq!(board.coordinator().listener_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_destroys_tile() {
        let source = Arc::new(MockSource::new());
        source.set_price("gold", 2400.0, 2390.0);
        let board = board(&source);
        board.mount(key("gold")).await.unwrap();
        wait_for(&board, &key("gold"), EntitySyncState::is_ready).await;

        assert!(board.unmount(&key("gold")).await);
        assert!(!board.unmount(&key("gold")).await);
        assert_eq!(board.coordinator().listener_count(), 0);
        assert!(board.state(&key("gold")).await.is_none());

        board.refresh_all();
        settle().await;
        assert_eq!(source.calls_for("gold"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_refetches_every_tile() {
        let source = Arc::new(MockSource::new());
        let board = board(&source);
        for (name, price) in [("gold", 2400.0), ("silver", 30.0), ("platinum", 980.0)] {
            source.set_price(name, price, price - 1.0);
            board.mount(key(name)).await.unwrap();
        }
        for name in ["gold", "silver", "platinum"] {
            wait_for(&board, &key(name), EntitySyncState::is_ready).await;
        }

        assert_eq!(board.refresh_all(), 1);
        settle().await;
        for name in ["gold", "silver", "platinum"] {
            assert_eq!(source.calls_for(name), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_tile() {
        let source = Arc::new(MockSource::new());
        source.set_error("gold", FetchError::unavailable("Network error"));
        let board = board(&source);
        board.mount(key("gold")).await.unwrap();
        wait_for(&board, &key("gold"), EntitySyncState::is_failed).await;

        source.set_price("gold", 2400.0, 2390.0);
        assert!(board.retry(&key("gold")).await.unwrap());
        wait_for(&board, &key("gold"), EntitySyncState::is_ready).await;

        assert_eq!(
            board.retry(&key("copper")).await,
            Err(SyncError::not_mounted("copper"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_detail_requires_ready_tile() {
        let source = Arc::new(MockSource::new());
        source.set_error("silver", FetchError::unavailable("Network error"));
        source.set_price("gold", 2400.0, 2390.0);
        let board = board(&source);
        board.mount(key("gold")).await.unwrap();
        board.mount(key("silver")).await.unwrap();
        wait_for(&board, &key("gold"), EntitySyncState::is_ready).await;
        wait_for(&board, &key("silver"), EntitySyncState::is_failed).await;

        assert!(matches!(
            board.open_detail(&key("palladium")).await,
            Err(SyncError::NotMounted { .. })
        ));
        assert!(matches!(
            board.open_detail(&key("silver")).await,
            Err(SyncError::NotSelectable { .. })
        ));

        let detail = board.open_detail(&key("gold")).await.unwrap();
        assert_eq!(detail.options(), SyncOptions::detail());
        let mut rx = detail.watch();
        rx.wait_for(EntitySyncState::is_ready).await.unwrap();
        assert_eq!(source.calls_for("gold"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_view_carries_details() {
        let source = Arc::new(SimulatedMetalSource::with_config(SimulatedSourceConfig {
            failure_rate: 0.0,
            seed: Some(11),
            ..SimulatedSourceConfig::default()
        }));
        let board =
            PriceBoard::<Metal>::new(source, RefreshCoordinator::new(), SyncOptions::tile())
                .unwrap();
        board.mount(Metal::Gold).await.unwrap();
        let tile = wait_for(&board, &Metal::Gold, EntitySyncState::is_ready).await;
        assert!(tile.last_result.unwrap().details.is_none());

        let detail = board.open_detail(&Metal::Gold).await.unwrap();
        let mut rx = detail.watch();
        let state = rx.wait_for(EntitySyncState::is_ready).await.unwrap().clone();
        let SyncStatus::Ready(snapshot) = state.status else {
            panic!("expected ready detail");
        };
        assert_eq!(snapshot.symbol, "XAU");
        assert_eq!(snapshot.details.unwrap().exchange, "MOCK-COMEX");
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_statuses() {
        let source = Arc::new(MockSource::new());
        let board = board(&source);
        assert_eq!(board.health_check().await.status, HealthStatus::Unhealthy);

        source.set_price("gold", 2400.0, 2390.0);
        board.mount(key("gold")).await.unwrap();
        wait_for(&board, &key("gold"), EntitySyncState::is_ready).await;
        let health = board.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details["ready_tiles"], serde_json::json!(1));

        source.set_error("gold", FetchError::unavailable("Network error"));
        board.refresh_all();
        wait_for(&board, &key("gold"), EntitySyncState::is_failed).await;
        let health = board.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.details["failed_tiles"], serde_json::json!(["gold"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_destroys_all_tiles() {
        let source = Arc::new(MockSource::new());
        let board = board(&source);
        board.mount(key("gold")).await.unwrap();
        board.mount(key("silver")).await.unwrap();

        board.shutdown().await;
        assert!(board.mounted().await.is_empty());
        assert_eq!(board.coordinator().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metals_board_mounts_every_metal() {
        let board = PriceBoard::metals().await.unwrap();
        assert_eq!(board.mounted().await, Metal::all().to_vec());
        assert_eq!(board.source_name(), "simulated");
        board.shutdown().await;
    }
}
