use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Balance against outstanding slice cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingState {
    pub balance: Decimal,
    /// remaining_slices × current_offer at the last evaluation
    pub required: Decimal,
}

/// Outcome of a pre-dispatch funding check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingCheck {
    /// Dispatch may proceed
    Funded,
    /// Dispatch may proceed again after a shortfall
    Resumed,
    /// Dispatch is paused. `newly_paused` is true only on the transition.
    Shortfall {
        required: Decimal,
        balance: Decimal,
        newly_paused: bool,
    },
}

impl FundingCheck {
    pub fn allows_dispatch(&self) -> bool {
        !matches!(self, FundingCheck::Shortfall { .. })
    }
}

/// Gates new dispatch on the payer's balance
#[derive(Debug, Clone)]
pub struct FundingMonitor {
    bank_account: String,
    state: FundingState,
    paused: bool,
    shortfalls: u64,
}

impl FundingMonitor {
    pub fn new(bank_account: impl Into<String>, balance: Decimal) -> Self {
        Self {
            bank_account: bank_account.into(),
            state: FundingState {
                balance,
                required: Decimal::ZERO,
            },
            paused: false,
            shortfalls: 0,
        }
    }

    pub fn bank_account(&self) -> &str {
        &self.bank_account
    }

    pub fn state(&self) -> &FundingState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of funded → paused transitions so far
    pub fn shortfall_count(&self) -> u64 {
        self.shortfalls
    }

    pub fn set_balance(&mut self, balance: Decimal) {
        self.state.balance = balance;
    }

    /// Local bookkeeping for a charge already taken by the payment account
    pub fn record_payment(&mut self, amount: Decimal) {
        self.state.balance = self
            .state
            .balance
            .checked_sub(amount)
            .map_or(Decimal::ZERO, |b| b.max(Decimal::ZERO));
    }

    /// required = remaining × offer; pause when required > balance.
    /// A zero offer never pauses. A required amount too large to represent
    /// is reported as `Decimal::MAX` and always pauses.
    pub fn evaluate(&mut self, remaining: usize, offer: Decimal) -> FundingCheck {
        let exact = offer.checked_mul(Decimal::from(remaining));
        if exact.is_none() {
            warn!(%offer, remaining, "required funds overflow");
        }
        let required = exact.unwrap_or(Decimal::MAX);
        self.state.required = required;

        let covered = exact.is_some_and(|r| r <= self.state.balance);
        if offer.is_zero() || covered {
            if self.paused {
                self.paused = false;
                info!(
                    account = %self.bank_account,
                    balance = %self.state.balance,
                    %required,
                    "funding restored, resuming dispatch"
                );
                return FundingCheck::Resumed;
            }
            return FundingCheck::Funded;
        }

        let newly_paused = !self.paused;
        if newly_paused {
            self.paused = true;
            self.shortfalls += 1;
            warn!(
                account = %self.bank_account,
                balance = %self.state.balance,
                %required,
                remaining,
                "insufficient funds, pausing dispatch"
            );
        }
        FundingCheck::Shortfall {
            required,
            balance: self.state.balance,
            newly_paused,
        }
    }
}
