//! Seams to the systems the engine calls into but does not own

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::path::Path;

use crate::domain::{JobId, JobManifest};
use crate::error::Result;

/// Supplies the signing identity jobs are owned by
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> String;
}

/// Account compute credits are withdrawn from
#[async_trait]
pub trait PaymentAccount: Send + Sync {
    fn account_id(&self) -> &str;

    async fn balance(&self) -> Result<Decimal>;

    /// Withdraw `amount` for one completed slice
    async fn charge(&self, amount: Decimal) -> Result<()>;
}

/// Accepts job submissions and assigns job ids
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn submit(&self, manifest: &JobManifest) -> Result<JobId>;
}

/// Current market reference price per slice
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn market_value(&self) -> Result<Decimal>;
}

/// Uploads files and directories so executors can read them
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Returns the location executors will see the file under
    async fn stage(&self, path: &Path) -> Result<String>;
}

/// Fetches named packages for executors
#[async_trait]
pub trait PackageResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<()>;
}
