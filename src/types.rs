//! Types for the metal price sync engine

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a tracked entity
///
/// Blanket-implemented for every type that is cheap enough to clone, hashable
/// and printable, so both `String` keys and the `Metal` enum work.
pub trait EntityKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Precious metals tracked by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    /// Gold
    Gold,
    /// Silver
    Silver,
    /// Platinum
    Platinum,
    /// Palladium
    Palladium,
}

impl Metal {
    /// Get the lowercase metal name
    pub fn name(&self) -> &'static str {
        match self {
            Metal::Gold => "gold",
            Metal::Silver => "silver",
            Metal::Platinum => "platinum",
            Metal::Palladium => "palladium",
        }
    }

    /// Get the ISO 4217 style ticker symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Metal::Gold => "XAU",
            Metal::Silver => "XAG",
            Metal::Platinum => "XPT",
            Metal::Palladium => "XPD",
        }
    }

    /// Get the reference price the simulated source jitters around (USD)
    pub fn base_price(&self) -> f64 {
        match self {
            Metal::Gold => 2400.0,
            Metal::Silver => 30.0,
            Metal::Platinum => 980.0,
            Metal::Palladium => 1300.0,
        }
    }

    /// Get all supported metals, in display order
    pub fn all() -> &'static [Metal] {
        &[Metal::Gold, Metal::Silver, Metal::Platinum, Metal::Palladium]
    }
}

impl Display for Metal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metal {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metal::all()
            .iter()
            .find(|metal| metal.name() == s)
            .copied()
            .ok_or_else(|| FetchError::unknown_entity(s))
    }
}

/// Extra fields returned by detail fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDetails {
    /// Intraday high
    pub day_high: f64,
    /// Intraday low
    pub day_low: f64,
    /// Traded volume
    pub volume: u64,
    /// Venue the quote came from
    pub exchange: String,
}

/// One price observation for an entity
///
/// Each successful fetch produces a new snapshot that replaces the previous
/// one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Ticker symbol
    pub symbol: String,

    /// Current price in USD
    pub current: f64,

    /// Previous session close in USD
    pub previous_close: f64,

    /// Session open in USD
    pub open: f64,

    /// `current - previous_close`
    pub change: f64,

    /// `change / previous_close * 100`
    pub change_percent: f64,

    /// When the price was observed
    pub last_updated: DateTime<Utc>,

    /// Present on detail fetches only
    pub details: Option<SnapshotDetails>,
}

impl PriceSnapshot {
    /// Create a snapshot observed now, deriving the change fields
    pub fn new(symbol: impl Into<String>, current: f64, previous_close: f64, open: f64) -> Self {
        Self::observed_at(symbol, current, previous_close, open, Utc::now())
    }

    /// Create a snapshot with an explicit observation time
    pub fn observed_at(
        symbol: impl Into<String>,
        current: f64,
        previous_close: f64,
        open: f64,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let change = current - previous_close;
        Self {
            symbol: symbol.into(),
            current,
            previous_close,
            open,
            change,
            change_percent: change / previous_close * 100.0,
            last_updated,
            details: None,
        }
    }

    /// Attach detail fields
    pub fn with_details(mut self, details: SnapshotDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// True when the price moved up (or not at all) since the previous close
    pub fn is_up(&self) -> bool {
        self.change >= 0.0
    }

    /// Reject snapshots that cannot be displayed meaningfully
    pub fn validate(self) -> Result<Self, FetchError> {
        let fields = [
            ("current", self.current),
            ("previous_close", self.previous_close),
            ("open", self.open),
            ("change", self.change),
            ("change_percent", self.change_percent),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, value)| !value.is_finite()) {
            return Err(FetchError::malformed(format!(
                "{} {} is not finite ({})",
                self.symbol, name, value
            )));
        }
        if self.previous_close <= 0.0 {
            return Err(FetchError::malformed(format!(
                "{} previous_close must be positive ({})",
                self.symbol, self.previous_close
            )));
        }
        Ok(self)
    }
}

/// Fetch status of one sync instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum SyncStatus {
    /// A fetch is pending
    Loading,
    /// The latest fetch succeeded
    Ready(PriceSnapshot),
    /// The latest fetch failed with this message
    Failed(String),
}

impl SyncStatus {
    /// Short lowercase label for logs
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Loading => "loading",
            SyncStatus::Ready(_) => "ready",
            SyncStatus::Failed(_) => "failed",
        }
    }
}

/// Observable state of one sync instance
///
/// `last_result` survives `Loading` and `Failed` so views can keep showing
/// the last good price while a refetch is pending or after it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySyncState {
    /// Current status
    pub status: SyncStatus,
    /// Most recent successful snapshot
    pub last_result: Option<PriceSnapshot>,
}

impl Default for EntitySyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Loading,
            last_result: None,
        }
    }
}

impl EntitySyncState {
    /// True while a fetch is pending
    pub fn is_loading(&self) -> bool {
        matches!(self.status, SyncStatus::Loading)
    }

    /// True when the latest fetch succeeded
    pub fn is_ready(&self) -> bool {
        matches!(self.status, SyncStatus::Ready(_))
    }

    /// True when the latest fetch failed
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SyncStatus::Failed(_))
    }

    /// Error message of a failed fetch
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            SyncStatus::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Enter `Loading`. Returns false if already loading.
    pub(crate) fn begin_loading(&mut self) -> bool {
        if self.is_loading() {
            return false;
        }
        self.status = SyncStatus::Loading;
        true
    }

    /// Enter `Ready` and remember the snapshot
    pub(crate) fn complete(&mut self, snapshot: PriceSnapshot) {
        self.last_result = Some(snapshot.clone());
        self.status = SyncStatus::Ready(snapshot);
    }

    /// Enter `Failed`, keeping `last_result`
    pub(crate) fn fail(&mut self, message: String) {
        self.status = SyncStatus::Failed(message);
    }
}

/// What started a fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTrigger {
    /// First fetch after creation
    Initial,
    /// Poll timer fired
    Poll,
    /// Refresh coordinator moved to this generation
    ManualRefresh { generation: u64 },
    /// `retry_now` on a failed instance
    Retry,
    /// `refresh_now` on the instance itself
    Explicit,
}

/// Transition events emitted by a sync instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent<K> {
    /// A fetch cycle started
    FetchStarted {
        id: Uuid,
        entity: K,
        trigger: FetchTrigger,
        timestamp: DateTime<Utc>,
    },

    /// A fetch succeeded and replaced the snapshot
    SnapshotUpdated {
        id: Uuid,
        entity: K,
        old_price: Option<f64>,
        new_price: f64,
        change_percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A fetch failed
    FetchFailed {
        id: Uuid,
        entity: K,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl<K> SyncEvent<K> {
    /// Get the event ID
    pub fn id(&self) -> Uuid {
        match self {
            SyncEvent::FetchStarted { id, .. } => *id,
            SyncEvent::SnapshotUpdated { id, .. } => *id,
            SyncEvent::FetchFailed { id, .. } => *id,
        }
    }

    /// Get the entity the event belongs to
    pub fn entity(&self) -> &K {
        match self {
            SyncEvent::FetchStarted { entity, .. } => entity,
            SyncEvent::SnapshotUpdated { entity, .. } => entity,
            SyncEvent::FetchFailed { entity, .. } => entity,
        }
    }

    /// Get the event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::FetchStarted { .. } => "FETCH_STARTED",
            SyncEvent::SnapshotUpdated { .. } => "SNAPSHOT_UPDATED",
            SyncEvent::FetchFailed { .. } => "FETCH_FAILED",
        }
    }
}

impl<K: Display> Display for SyncEvent<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::FetchStarted {
                entity, trigger, ..
            } => write!(f, "Fetch started for {} ({:?})", entity, trigger),
            SyncEvent::SnapshotUpdated {
                entity,
                new_price,
                change_percent,
                ..
            } => write!(
                f,
                "Price updated: {} = ${:.2} ({:+.2}%)",
                entity, new_price, change_percent
            ),
            SyncEvent::FetchFailed {
                entity,
                error_message,
                ..
            } => write!(f, "Price fetch failed for {}: {}", entity, error_message),
        }
    }
}

/// Overall board health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Every tile shows fresh data
    Healthy,
    /// Some tiles are loading or failed
    Degraded,
    /// No tile has data
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
