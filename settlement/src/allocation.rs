//! Allocation plan lookup

use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::Allocation;
use crate::{Error, Result};

/// Source of allocation plans, keyed by subscription
pub trait AllocationProvider: Send + Sync {
    /// Plan for a subscription
    fn allocations(&self, subscription_id: Uuid) -> Result<Vec<Allocation>>;
}

/// In-memory provider seeded at startup
#[derive(Debug, Default)]
pub struct StaticAllocationProvider {
    plans: DashMap<Uuid, Vec<Allocation>>,
}

impl StaticAllocationProvider {
    /// Create empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plan
    pub fn insert(&self, subscription_id: Uuid, allocations: Vec<Allocation>) {
        self.plans.insert(subscription_id, allocations);
    }
}

impl AllocationProvider for StaticAllocationProvider {
    fn allocations(&self, subscription_id: Uuid) -> Result<Vec<Allocation>> {
        self.plans
            .get(&subscription_id)
            .map(|p| p.clone())
            .ok_or(Error::AllocationNotFound(subscription_id))
    }
}

/// Reject malformed plans before any order is placed
///
/// Each line must be in (0, 100]; the plan total must not exceed 100.
pub fn validate_allocations(allocations: &[Allocation]) -> Result<()> {
    if allocations.is_empty() {
        return Err(Error::Validation("Allocation plan is empty".to_string()));
    }

    let hundred = Decimal::from(100);
    let mut total = Decimal::ZERO;
    for allocation in allocations {
        if allocation.percent <= Decimal::ZERO || allocation.percent > hundred {
            return Err(Error::Validation(format!(
                "Allocation percent out of range for {}: {}",
                allocation.ticker, allocation.percent
            )));
        }
        total += allocation.percent;
    }

    if total > hundred {
        return Err(Error::Validation(format!(
            "Allocation plan sums to {}%",
            total
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Ticker;
    use rust_decimal_macros::dec;

    fn allocation(ticker: &str, percent: Decimal) -> Allocation {
        Allocation {
            asset_id: Uuid::new_v4(),
            ticker: Ticker::new(ticker),
            percent,
        }
    }

    #[test]
    fn test_validate_allocations() {
        assert!(validate_allocations(&[
            allocation("BTC", dec!(60)),
            allocation("ETH", dec!(40)),
        ])
        .is_ok());

        // Under 100% is allowed (the remainder stays in reserve)
        assert!(validate_allocations(&[allocation("BTC", dec!(50))]).is_ok());

        assert!(validate_allocations(&[]).is_err());
        assert!(validate_allocations(&[allocation("BTC", dec!(0))]).is_err());
        assert!(validate_allocations(&[allocation("BTC", dec!(101))]).is_err());
        assert!(validate_allocations(&[
            allocation("BTC", dec!(70)),
            allocation("ETH", dec!(40)),
        ])
        .is_err());
    }

    #[test]
    fn test_provider_lookup() {
        let provider = StaticAllocationProvider::new();
        let subscription = Uuid::new_v4();
        provider.insert(subscription, vec![allocation("BTC", dec!(100))]);

        assert_eq!(provider.allocations(subscription).unwrap().len(), 1);
        assert!(matches!(
            provider.allocations(Uuid::new_v4()),
            Err(Error::AllocationNotFound(_))
        ));
    }
}
