//! Per-slice pricing and funding enforcement

pub mod funding;
pub mod policy;

pub use funding::{FundingCheck, FundingMonitor, FundingState};
pub use policy::{PricingPolicy, PricingState};
