use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Publicly visible job information provided by the author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInfo {
    pub name: String,
    pub description: String,
    pub link: String,
}

impl PublicInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }
}

/// Compute-group join secret. Never printed; wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct JoinSecret(String);

impl JoinSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for handing to the dispatch backend only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JoinSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JoinSecret(***)")
    }
}

/// Key of the open group that needs no secret
pub const PUBLIC_GROUP_KEY: &str = "public";

/// Admission credentials for a compute group
#[derive(Debug, Clone)]
pub struct ComputeGroup {
    pub join_key: String,
    pub join_secret: Option<JoinSecret>,
}

impl ComputeGroup {
    pub fn new(join_key: impl Into<String>) -> Self {
        Self {
            join_key: join_key.into(),
            join_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.join_secret = Some(JoinSecret::new(secret));
        self
    }

    pub fn is_public(&self) -> bool {
        self.join_key == PUBLIC_GROUP_KEY
    }

    /// Private groups need a secret before the job can be submitted
    pub fn needs_secret(&self) -> bool {
        !self.is_public() && self.join_secret.is_none()
    }
}

/// Reference to the work function executors run. The engine never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    pub function: String,
}

impl WorkDescriptor {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
        }
    }
}

/// A file or directory made available to executors at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Handle returned by the file stager
    pub location: String,
}

/// Everything the dispatch backend sees at submission time
#[derive(Debug, Clone)]
pub struct JobManifest {
    pub owner: String,
    pub payment_account: String,
    pub public: PublicInfo,
    pub work: WorkDescriptor,
    pub slice_count: usize,
    pub slice_payment_offer: Decimal,
    /// Empty means the global network
    pub compute_groups: Vec<ComputeGroup>,
    pub requirements: Vec<String>,
    pub staged_files: Vec<StagedFile>,
}

impl JobManifest {
    pub fn targets_global_network(&self) -> bool {
        self.compute_groups.is_empty()
    }
}
