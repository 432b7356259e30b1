//! Source abstraction for fetching entity snapshots

use crate::{
    error::FetchError,
    types::{EntityKey, PriceSnapshot},
};
use async_trait::async_trait;
use std::future::Future;

/// Trait for price sources
///
/// Implementations fetch one entity's snapshot per call. Every error is
/// handled identically by `EntitySync`, so sources should pick the variant
/// that describes the failure best and put the user-facing text in it.
#[async_trait]
pub trait PriceSource<K: EntityKey>: Send + Sync {
    /// Fetches the current snapshot for one entity
    ///
    /// # Arguments
    /// * `key` - The entity to fetch
    ///
    /// # Returns
    /// A fresh snapshot or an error if the fetch fails
    async fn fetch_snapshot(&self, key: &K) -> Result<PriceSnapshot, FetchError>;

    /// Fetches a snapshot with detail fields for a detail view
    ///
    /// Sources without extra detail data fall back to `fetch_snapshot`.
    async fn fetch_details(&self, key: &K) -> Result<PriceSnapshot, FetchError> {
        self.fetch_snapshot(key).await
    }

    /// Returns the name of this source
    fn source_name(&self) -> &'static str;
}

/// Adapts an async closure into a `PriceSource`
///
/// ```no_run
/// use metal_price_sync::{FetchError, PriceSnapshot, source::FnSource};
///
/// let source = FnSource::new(|key: String| async move {
///     if key == "gold" {
///         Ok(PriceSnapshot::new("XAU", 2400.0, 2390.0, 2395.0))
///     } else {
///         Err(FetchError::unknown_entity(key))
///     }
/// });
/// ```
pub struct FnSource<F> {
    fetch: F,
    name: &'static str,
}

impl<F> FnSource<F> {
    /// Wraps `fetch`, reported as the "fn" source
    pub fn new(fetch: F) -> Self {
        Self::named("fn", fetch)
    }

    /// Wraps `fetch` under a custom source name
    pub fn named(name: &'static str, fetch: F) -> Self {
        Self { fetch, name }
    }
}

#[async_trait]
impl<K, F, Fut> PriceSource<K> for FnSource<F>
where
    K: EntityKey,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PriceSnapshot, FetchError>> + Send,
{
    async fn fetch_snapshot(&self, key: &K) -> Result<PriceSnapshot, FetchError> {
        (self.fetch)(key.clone()).await
    }

    fn source_name(&self) -> &'static str {
        self.name
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_source_forwards_key() {
        let source = FnSource::new(|key: String| async move {
            if key == "gold" {
                Ok(PriceSnapshot::new("XAU", 2400.0, 2390.0, 2395.0))
            } else {
                Err(FetchError::unknown_entity(key))
            }
        });

        let snapshot = source.fetch_snapshot(&"gold".to_string()).await.unwrap();
        assert_eq!(snapshot.symbol, "XAU");

        let err = source.fetch_snapshot(&"lead".to_string()).await.unwrap_err();
        assert_eq!(err, FetchError::unknown_entity("lead"));

        // default details fall back to the snapshot path
        let details = source.fetch_details(&"gold".to_string()).await.unwrap();
        assert!(details.details.is_none());
        assert_eq!(PriceSource::<String>::source_name(&source), "fn");
    }
}
