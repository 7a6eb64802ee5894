//! In-process collaborators for local runs and tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::{
    DispatchBackend, FileStager, IdentityProvider, MarketOracle, PackageResolver, PaymentAccount,
};
use crate::domain::{JobId, JobManifest};
use crate::error::{JobMeshError, Result};

/// Fixed identity string
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn identity(&self) -> String {
        self.0.clone()
    }
}

/// Balance held in memory. Clones share the same balance.
#[derive(Debug, Clone)]
pub struct InMemoryAccount {
    id: String,
    balance: Arc<RwLock<Decimal>>,
}

impl InMemoryAccount {
    pub fn new(id: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance: Arc::new(RwLock::new(balance)),
        }
    }

    pub async fn deposit(&self, amount: Decimal) {
        let mut balance = self.balance.write().await;
        *balance = balance.checked_add(amount).unwrap_or(Decimal::MAX);
        info!(account = %self.id, %amount, balance = %*balance, "deposit");
    }
}

#[async_trait]
impl PaymentAccount for InMemoryAccount {
    fn account_id(&self) -> &str {
        &self.id
    }

    async fn balance(&self) -> Result<Decimal> {
        Ok(*self.balance.read().await)
    }

    async fn charge(&self, amount: Decimal) -> Result<()> {
        let mut balance = self.balance.write().await;
        if amount > *balance {
            return Err(JobMeshError::collaborator(
                "payment account",
                format!("insufficient balance {} for charge {}", *balance, amount),
            ));
        }
        *balance -= amount;
        Ok(())
    }
}

/// Accepts every well-formed job and hands out v4 uuids
#[derive(Debug, Default)]
pub struct LocalBackend {
    reject_all: AtomicBool,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent submission (maintenance mode)
    pub fn set_rejecting(&self, rejecting: bool) {
        self.reject_all.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl DispatchBackend for LocalBackend {
    async fn submit(&self, manifest: &JobManifest) -> Result<JobId> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(JobMeshError::Submission(
                "backend is not accepting jobs".into(),
            ));
        }
        if let Some(group) = manifest.compute_groups.iter().find(|g| g.needs_secret()) {
            return Err(JobMeshError::Submission(format!(
                "compute group '{}' requires a join secret",
                group.join_key
            )));
        }

        let id = JobId::new(Uuid::new_v4().to_string());
        debug!(
            job_id = %id,
            slices = manifest.slice_count,
            offer = %manifest.slice_payment_offer,
            global = manifest.targets_global_network(),
            "job accepted"
        );
        Ok(id)
    }
}

/// Oracle that always quotes the same price
#[derive(Debug, Clone)]
pub struct FixedMarketOracle(pub Decimal);

#[async_trait]
impl MarketOracle for FixedMarketOracle {
    async fn market_value(&self) -> Result<Decimal> {
        Ok(self.0)
    }
}

/// Stages files in place: executors share the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalFileStager;

#[async_trait]
impl FileStager for LocalFileStager {
    async fn stage(&self, path: &Path) -> Result<String> {
        let canonical = tokio::fs::canonicalize(path).await?;
        Ok(canonical.to_string_lossy().into_owned())
    }
}

/// Resolves packages from a fixed catalogue
#[derive(Debug, Default, Clone)]
pub struct StaticPackageResolver {
    available: Option<HashSet<String>>,
}

impl StaticPackageResolver {
    /// Every package name resolves
    pub fn permissive() -> Self {
        Self { available: None }
    }

    pub fn with_packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: Some(packages.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl PackageResolver for StaticPackageResolver {
    async fn resolve(&self, name: &str) -> Result<()> {
        match &self.available {
            Some(set) if !set.contains(name) => Err(JobMeshError::collaborator(
                "package resolver",
                format!("unknown package '{}'", name),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComputeGroup, PublicInfo, WorkDescriptor};
    use rust_decimal_macros::dec;

    fn manifest(groups: Vec<ComputeGroup>) -> JobManifest {
        JobManifest {
            owner: "id".into(),
            payment_account: "bank".into(),
            public: PublicInfo::new("t"),
            work: WorkDescriptor::new("f"),
            slice_count: 1,
            slice_payment_offer: dec!(1),
            compute_groups: groups,
            requirements: vec![],
            staged_files: vec![],
        }
    }

    #[tokio::test]
    async fn test_account_charge_and_deposit() {
        let account = InMemoryAccount::new("bank", dec!(4));
        assert!(account.charge(dec!(5)).await.is_err());
        account.deposit(dec!(6)).await;
        account.charge(dec!(5)).await.unwrap();
        assert_eq!(account.balance().await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_backend_requires_private_group_secrets() {
        let backend = LocalBackend::new();
        let err = backend
            .submit(&manifest(vec![ComputeGroup::new("tensparrows")]))
            .await
            .unwrap_err();
        assert!(matches!(err, JobMeshError::Submission(_)));

        let ok = backend
            .submit(&manifest(vec![
                ComputeGroup::new("public"),
                ComputeGroup::new("tensparrows").with_secret("s"),
            ]))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_backend_rejecting() {
        let backend = LocalBackend::new();
        backend.set_rejecting(true);
        assert!(backend.submit(&manifest(vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticPackageResolver::with_packages(["numpy", "scipy"]);
        assert!(resolver.resolve("numpy").await.is_ok());
        assert!(resolver.resolve("torch").await.is_err());
        assert!(StaticPackageResolver::permissive().resolve("torch").await.is_ok());
    }
}
