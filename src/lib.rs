//! # Metal Price Sync
//!
//! Keeps live prices for a set of tracked instruments (precious metals by
//! default) in sync with a data source. Every mounted tile or detail view
//! owns an `EntitySync` that polls its entity, retries after failures and
//! reacts to a process-wide "refresh all" signal.
//!
//! ## Usage
//!
//! ```no_run
//! use metal_price_sync::{Metal, PriceBoard, SyncStatus};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Mount a tile per metal over the simulated backend
//! let board = PriceBoard::metals().await?;
//!
//! // Pull-to-refresh
//! board.refresh_all();
//!
//! for (metal, state) in board.states().await {
//!     match state.status {
//!         SyncStatus::Ready(snapshot) => println!("{}: ${:.2}", metal, snapshot.current),
//!         SyncStatus::Loading => println!("{}: loading", metal),
//!         SyncStatus::Failed(error) => println!("{}: {} (tap to retry)", metal, error),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! PriceBoard (one per screen)
//!     ↓ mounts
//! EntitySync (one per tile / detail view)
//!     ↓ fetch every poll interval, on retry, on refresh
//! PriceSource (SimulatedMetalSource, FnSource, ...)
//!
//! RefreshCoordinator ──generation++──▶ every live EntitySync
//! ```
//!
//! ## Error Handling
//!
//! Fetch failures never escape an `EntitySync`; they become
//! `SyncStatus::Failed` carrying the error text while the last good snapshot
//! stays available in `EntitySyncState::last_result`.
//!
//! ```no_run
//! use metal_price_sync::{EntitySync, Metal, SimulatedMetalSource};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sync = EntitySync::create(Metal::Silver, 30_000, Arc::new(SimulatedMetalSource::new()))?;
//! let mut updates = sync.watch();
//! updates.changed().await?;
//!
//! let state = sync.state();
//! if let Some(error) = state.error() {
//!     println!("failed: {}", error);
//!     if let Some(stale) = &state.last_result {
//!         println!("last known: ${:.2}", stale.current);
//!     }
//!     sync.retry_now();
//! }
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod source;
pub mod sources;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use board::PriceBoard;
pub use coordinator::{RefreshCoordinator, Subscription};
pub use error::{FetchError, SyncError};
pub use metrics::FetchMetrics;
pub use source::{FnSource, PriceSource};
pub use sources::{SimulatedMetalSource, SimulatedSourceConfig};
pub use sync::{EntitySync, FetchKind, PollSchedule, SyncOptions};
pub use types::{
    ComponentHealth, EntityKey, EntitySyncState, FetchTrigger, HealthStatus, Metal,
    PriceSnapshot, SnapshotDetails, SyncEvent, SyncStatus,
};
