//! Constants for the metal price sync engine
//!
//! Polling cadences and the simulated backend's behavior are centralized here.
//! The only runtime knob is the poll interval override read by
//! `SyncOptions::from_env`.

use std::time::Duration;

/// How often a mounted tile polls its source (in milliseconds)
pub const TILE_POLL_INTERVAL_MS: u64 = 30_000;

/// How often a detail view polls when it is configured to poll at all
/// (in milliseconds). Detail views are one-shot by default.
pub const DETAIL_POLL_INTERVAL_MS: u64 = 60_000;

/// How long a pull-to-refresh spinner stays visible (in milliseconds).
///
/// Presentation only: refresh notification itself is synchronous.
pub const REFRESH_SPINNER_MS: u64 = 800;

/// Environment variable overriding the tile poll interval (milliseconds)
pub const POLL_INTERVAL_ENV: &str = "METAL_SYNC_POLL_INTERVAL_MS";

/// Capacity of each instance's transition event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Minimum simulated latency of the mock backend
pub const SIMULATED_LATENCY_MIN: Duration = Duration::from_millis(200);

/// Maximum simulated latency of the mock backend
pub const SIMULATED_LATENCY_MAX: Duration = Duration::from_millis(1200);

/// Probability that a simulated fetch fails
pub const SIMULATED_FAILURE_RATE: f64 = 0.10;

/// Relative price jitter applied by the simulated backend (±0.5%)
pub const SIMULATED_JITTER: f64 = 0.01;

/// Maximum relative distance of the simulated day high/low from the current price
pub const SIMULATED_DAY_RANGE: f64 = 0.01;

/// Exchange reported by simulated detail snapshots
pub const SIMULATED_EXCHANGE: &str = "MOCK-COMEX";

/// Name reported by the simulated source
pub const SIMULATED_SOURCE_NAME: &str = "simulated";
