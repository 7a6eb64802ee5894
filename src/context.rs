//! Process-wide compute context: identity, payment source and collaborators.
//!
//! Built once at startup and shared read-only by every job.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::backend::{
    DispatchBackend, FileStager, FixedMarketOracle, IdentityProvider, LocalBackend,
    LocalFileStager, MarketOracle, PackageResolver, PaymentAccount, StaticPackageResolver,
};
use crate::config::{AppConfig, DispatchConfig, FundingConfig};
use crate::dispatch::ExecutorPool;
use crate::error::{JobMeshError, Result};

pub struct ComputeContext {
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) payment: Arc<dyn PaymentAccount>,
    pub(crate) backend: Arc<dyn DispatchBackend>,
    pub(crate) oracle: Arc<dyn MarketOracle>,
    pub(crate) executors: Arc<dyn ExecutorPool>,
    pub(crate) stager: Arc<dyn FileStager>,
    pub(crate) resolver: Arc<dyn PackageResolver>,
    pub(crate) dispatch: DispatchConfig,
    pub(crate) funding: FundingConfig,
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("identity", &self.identity.identity())
            .field("payment_account", &self.payment.account_id())
            .field("dispatch", &self.dispatch)
            .field("funding", &self.funding)
            .finish_non_exhaustive()
    }
}

impl ComputeContext {
    pub fn builder() -> ComputeContextBuilder {
        ComputeContextBuilder::default()
    }

    pub fn identity(&self) -> String {
        self.identity.identity()
    }

    pub fn payment_account(&self) -> &str {
        self.payment.account_id()
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// Current market reference price per slice
    pub async fn market_value(&self) -> Result<Decimal> {
        self.oracle.market_value().await
    }
}

#[derive(Default)]
pub struct ComputeContextBuilder {
    identity: Option<Arc<dyn IdentityProvider>>,
    payment: Option<Arc<dyn PaymentAccount>>,
    backend: Option<Arc<dyn DispatchBackend>>,
    oracle: Option<Arc<dyn MarketOracle>>,
    executors: Option<Arc<dyn ExecutorPool>>,
    stager: Option<Arc<dyn FileStager>>,
    resolver: Option<Arc<dyn PackageResolver>>,
    dispatch: DispatchConfig,
    funding: FundingConfig,
    reference_price: Option<Decimal>,
}

impl ComputeContextBuilder {
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn payment(mut self, payment: Arc<dyn PaymentAccount>) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DispatchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn MarketOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn executors(mut self, executors: Arc<dyn ExecutorPool>) -> Self {
        self.executors = Some(executors);
        self
    }

    pub fn stager(mut self, stager: Arc<dyn FileStager>) -> Self {
        self.stager = Some(stager);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PackageResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn funding_config(mut self, config: FundingConfig) -> Self {
        self.funding = config;
        self
    }

    /// Take dispatch, funding and market settings from loaded configuration
    pub fn app_config(mut self, config: &AppConfig) -> Self {
        self.dispatch = config.dispatch.clone();
        self.funding = config.funding.clone();
        self.reference_price = Some(config.market.reference_price);
        self
    }

    pub fn build(self) -> Result<Arc<ComputeContext>> {
        let identity = self
            .identity
            .ok_or_else(|| JobMeshError::InvalidInput("compute context needs an identity".into()))?;
        let payment = self.payment.ok_or_else(|| {
            JobMeshError::InvalidInput("compute context needs a payment account".into())
        })?;
        let executors = self.executors.ok_or_else(|| {
            JobMeshError::InvalidInput("compute context needs an executor pool".into())
        })?;
        let reference_price = self
            .reference_price
            .unwrap_or_else(|| crate::config::MarketConfig::default().reference_price);

        Ok(Arc::new(ComputeContext {
            identity,
            payment,
            backend: self.backend.unwrap_or_else(|| Arc::new(LocalBackend::new())),
            oracle: self
                .oracle
                .unwrap_or_else(|| Arc::new(FixedMarketOracle(reference_price))),
            executors,
            stager: self.stager.unwrap_or_else(|| Arc::new(LocalFileStager)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(StaticPackageResolver::permissive())),
            dispatch: self.dispatch,
            funding: self.funding,
        }))
    }
}
