//! Simulated metals backend
//!
//! Stands in for a real quote service: each fetch sleeps for a random
//! latency, fails with a configurable probability and otherwise returns a
//! jittered price around the metal's reference price.

use crate::{
    constants::{
        SIMULATED_DAY_RANGE, SIMULATED_EXCHANGE, SIMULATED_FAILURE_RATE, SIMULATED_JITTER,
        SIMULATED_LATENCY_MAX, SIMULATED_LATENCY_MIN, SIMULATED_SOURCE_NAME,
    },
    error::FetchError,
    source::PriceSource,
    types::{Metal, PriceSnapshot, SnapshotDetails},
};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Behavior of the simulated backend
#[derive(Debug, Clone)]
pub struct SimulatedSourceConfig {
    /// Lower bound of the simulated latency
    pub latency_min: Duration,
    /// Upper bound of the simulated latency
    pub latency_max: Duration,
    /// Probability (0.0 to 1.0) that a fetch fails
    pub failure_rate: f64,
    /// Total relative jitter span; prices land within ±jitter/2
    pub jitter: f64,
    /// Maximum relative distance of day high/low from the current price
    pub day_range: f64,
    /// Seed for reproducible draws
    pub seed: Option<u64>,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            latency_min: SIMULATED_LATENCY_MIN,
            latency_max: SIMULATED_LATENCY_MAX,
            failure_rate: SIMULATED_FAILURE_RATE,
            jitter: SIMULATED_JITTER,
            day_range: SIMULATED_DAY_RANGE,
            seed: None,
        }
    }
}

/// Random values for one fetch, drawn up front so the RNG lock is never
/// held across the latency sleep
struct Draw {
    latency: Duration,
    fails: bool,
    open: f64,
    previous_close: f64,
    current: f64,
    high: f64,
    low: f64,
    volume: u64,
}

/// Simulated metals price source
pub struct SimulatedMetalSource {
    config: SimulatedSourceConfig,
    rng: Mutex<fastrand::Rng>,
}

impl SimulatedMetalSource {
    /// Creates a simulated source with default behavior
    pub fn new() -> Self {
        Self::with_config(SimulatedSourceConfig::default())
    }

    /// Creates a simulated source with custom behavior
    pub fn with_config(config: SimulatedSourceConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    fn draw(&self, metal: Metal) -> Draw {
        let mut guard = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let rng = &mut *guard;
        let spread = self.config.jitter;

        let span = self
            .config
            .latency_max
            .saturating_sub(self.config.latency_min);
        let latency = self.config.latency_min + span.mul_f64(rng.f64());
        let fails = rng.f64() < self.config.failure_rate;

        let base = metal.base_price();
        let open = jitter(rng, base, spread);
        let previous_close = jitter(rng, base, spread);
        let current = jitter(rng, base, spread);
        let high = current * (1.0 + rng.f64() * self.config.day_range);
        let low = current * (1.0 - rng.f64() * self.config.day_range);
        let volume = rng.u64(1_000..100_000);

        Draw {
            latency,
            fails,
            open,
            previous_close,
            current,
            high,
            low,
            volume,
        }
    }

    async fn observe(&self, metal: Metal, with_details: bool) -> Result<PriceSnapshot, FetchError> {
        let draw = self.draw(metal);
        tokio::time::sleep(draw.latency).await;

        if draw.fails {
            tracing::debug!(metal = metal.name(), "Simulated fetch failure");
            return Err(FetchError::unavailable(format!(
                "Network error while fetching {} price",
                metal
            )));
        }

        let snapshot =
            PriceSnapshot::new(metal.symbol(), draw.current, draw.previous_close, draw.open);
        if !with_details {
            return Ok(snapshot);
        }

        Ok(snapshot.with_details(SnapshotDetails {
            day_high: draw.high,
            day_low: draw.low,
            volume: draw.volume,
            exchange: SIMULATED_EXCHANGE.to_string(),
        }))
    }
}

fn jitter(rng: &mut fastrand::Rng, price: f64, spread: f64) -> f64 {
    price * (1.0 + (rng.f64() - 0.5) * spread)
}

impl Default for SimulatedMetalSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource<Metal> for SimulatedMetalSource {
    async fn fetch_snapshot(&self, key: &Metal) -> Result<PriceSnapshot, FetchError> {
        self.observe(*key, false).await
    }

    async fn fetch_details(&self, key: &Metal) -> Result<PriceSnapshot, FetchError> {
        self.observe(*key, true).await
    }

    fn source_name(&self) -> &'static str {
        SIMULATED_SOURCE_NAME
    }
}

#[async_trait]
impl PriceSource<String> for SimulatedMetalSource {
    async fn fetch_snapshot(&self, key: &String) -> Result<PriceSnapshot, FetchError> {
        let metal: Metal = key.parse()?;
        self.observe(metal, false).await
    }

    async fn fetch_details(&self, key: &String) -> Result<PriceSnapshot, FetchError> {
        let metal: Metal = key.parse()?;
        self.observe(metal, true).await
    }

    fn source_name(&self) -> &'static str {
        SIMULATED_SOURCE_NAME
    }
}
