use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::MarketOracle;
use crate::error::{JobMeshError, Result};

/// Per-slice price state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingState {
    /// Current per-slice offer in compute credits (never negative)
    pub offer: Decimal,
    /// Market reference price at the last oracle poll
    pub market_reference: Option<Decimal>,
    /// Bumped on every offer change
    pub revision: u64,
}

/// Tracks the job's per-slice offer
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    state: PricingState,
    /// Offer was given by the caller rather than taken from the market
    explicit: bool,
    /// Set once the job is accepted; only `reprice` changes the offer afterwards
    locked: bool,
}

impl PricingPolicy {
    /// Caller-supplied offer
    pub fn explicit(offer: Decimal) -> Result<Self> {
        validate_offer(offer)?;
        Ok(Self {
            state: PricingState {
                offer,
                market_reference: None,
                revision: 0,
            },
            explicit: true,
            locked: false,
        })
    }

    /// Offer follows the market until the job is accepted
    pub fn market() -> Self {
        Self {
            state: PricingState {
                offer: Decimal::ZERO,
                market_reference: None,
                revision: 0,
            },
            explicit: false,
            locked: false,
        }
    }

    pub fn current_offer(&self) -> Decimal {
        self.state.offer
    }

    pub fn state(&self) -> &PricingState {
        &self.state
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Zero offers (private compute groups) skip funding checks entirely
    pub fn is_free(&self) -> bool {
        self.state.offer.is_zero()
    }

    /// Poll the oracle. Without an explicit override and before acceptance,
    /// the quote becomes the active offer.
    pub async fn quote_market(&mut self, oracle: &dyn MarketOracle) -> Result<Decimal> {
        let quote = oracle.market_value().await?;
        validate_offer(quote).map_err(|_| {
            JobMeshError::collaborator("market oracle", format!("negative quote {}", quote))
        })?;
        self.state.market_reference = Some(quote);

        if !self.explicit && !self.locked && self.state.offer != quote {
            self.state.offer = quote;
            self.state.revision += 1;
            debug!(offer = %quote, revision = self.state.revision, "offer follows market");
        }
        Ok(quote)
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Explicit re-price; the only way to change a locked offer
    pub fn reprice(&mut self, offer: Decimal) -> Result<Decimal> {
        validate_offer(offer)?;
        let previous = self.state.offer;
        self.state.offer = offer;
        self.state.revision += 1;
        self.explicit = true;
        info!(
            from = %previous,
            to = %offer,
            revision = self.state.revision,
            "slice offer repriced"
        );
        Ok(previous)
    }
}

fn validate_offer(offer: Decimal) -> Result<()> {
    if offer.is_sign_negative() && !offer.is_zero() {
        return Err(JobMeshError::InvalidInput(format!(
            "slice payment offer must be >= 0, got {}",
            offer
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::MockMarketOracle;
    use rust_decimal_macros::dec;

    fn oracle(price: Decimal) -> MockMarketOracle {
        let mut oracle = MockMarketOracle::new();
        oracle.expect_market_value().returning(move || Ok(price));
        oracle
    }

    #[test]
    fn test_negative_offer_rejected() {
        assert!(PricingPolicy::explicit(dec!(-1)).is_err());
        assert!(PricingPolicy::explicit(dec!(0)).unwrap().is_free());
    }

    #[tokio::test]
    async fn test_market_quote_becomes_offer_without_override() {
        let mut policy = PricingPolicy::market();
        policy.quote_market(&oracle(dec!(0.25))).await.unwrap();
        assert_eq!(policy.current_offer(), dec!(0.25));
        assert_eq!(policy.state().revision, 1);
    }

    #[tokio::test]
    async fn test_explicit_offer_ignores_market() {
        let mut policy = PricingPolicy::explicit(dec!(123.456)).unwrap();
        policy.quote_market(&oracle(dec!(0.25))).await.unwrap();
        assert_eq!(policy.current_offer(), dec!(123.456));
        assert_eq!(policy.state().market_reference, Some(dec!(0.25)));
        assert_eq!(policy.state().revision, 0);
    }

    #[tokio::test]
    async fn test_locked_offer_only_changes_via_reprice() {
        let mut policy = PricingPolicy::market();
        policy.quote_market(&oracle(dec!(1))).await.unwrap();
        policy.lock();
        policy.quote_market(&oracle(dec!(2))).await.unwrap();
        assert_eq!(policy.current_offer(), dec!(1));

        let previous = policy.reprice(dec!(3)).unwrap();
        assert_eq!(previous, dec!(1));
        assert_eq!(policy.current_offer(), dec!(3));
        assert_eq!(policy.state().revision, 2);
        assert!(policy.reprice(dec!(-3)).is_err());
    }

    #[tokio::test]
    async fn test_negative_quote_is_collaborator_error() {
        let mut policy = PricingPolicy::market();
        let err = policy.quote_market(&oracle(dec!(-1))).await.unwrap_err();
        assert!(matches!(err, JobMeshError::Collaborator { .. }));
        assert_eq!(policy.current_offer(), Decimal::ZERO);
    }
}
