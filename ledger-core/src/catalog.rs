//! Asset catalog
//!
//! Resolves asset ids to tickers and back. Production deployments back
//! this with the platform's instrument service; tests and single-node
//! setups use the static in-memory catalog.

use dashmap::DashMap;
use uuid::Uuid;

use crate::types::Ticker;

/// Resolved asset metadata
#[derive(Debug, Clone)]
pub struct AssetInfo {
    /// Asset ID
    pub asset_id: Uuid,
    /// Ticker symbol
    pub ticker: Ticker,
}

/// Lookup interface for asset metadata
pub trait AssetCatalog: Send + Sync {
    /// Resolve by asset id
    fn resolve(&self, asset_id: Uuid) -> crate::Result<AssetInfo>;

    /// Resolve by ticker
    fn resolve_ticker(&self, ticker: &Ticker) -> crate::Result<AssetInfo>;
}

/// In-memory catalog seeded at startup
#[derive(Debug, Default)]
pub struct StaticAssetCatalog {
    by_id: DashMap<Uuid, AssetInfo>,
    by_ticker: DashMap<Ticker, Uuid>,
}

impl StaticAssetCatalog {
    /// Create empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset
    pub fn insert(&self, asset_id: Uuid, ticker: Ticker) {
        self.by_ticker.insert(ticker.clone(), asset_id);
        self.by_id.insert(asset_id, AssetInfo { asset_id, ticker });
    }
}

impl AssetCatalog for StaticAssetCatalog {
    fn resolve(&self, asset_id: Uuid) -> crate::Result<AssetInfo> {
        self.by_id
            .get(&asset_id)
            .map(|info| info.clone())
            .ok_or_else(|| crate::Error::AssetNotFound(asset_id.to_string()))
    }

    fn resolve_ticker(&self, ticker: &Ticker) -> crate::Result<AssetInfo> {
        let asset_id = self
            .by_ticker
            .get(ticker)
            .map(|id| *id)
            .ok_or_else(|| crate::Error::AssetNotFound(ticker.to_string()))?;
        self.resolve(asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_both_directions() {
        let catalog = StaticAssetCatalog::new();
        let id = Uuid::new_v4();
        catalog.insert(id, Ticker::new("BTC"));

        assert_eq!(catalog.resolve(id).unwrap().ticker, Ticker::new("BTC"));
        assert_eq!(
            catalog.resolve_ticker(&Ticker::new("BTC")).unwrap().asset_id,
            id
        );
        assert!(matches!(
            catalog.resolve(Uuid::new_v4()),
            Err(crate::Error::AssetNotFound(_))
        ));
    }
}
