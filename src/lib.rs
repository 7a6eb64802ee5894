pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod events;
pub mod job;
pub mod pricing;

pub use backend::{
    DispatchBackend, FileStager, IdentityProvider, InMemoryAccount, LocalBackend, MarketOracle,
    PackageResolver, PaymentAccount, StaticIdentity,
};
pub use config::{AppConfig, DispatchConfig, FailurePolicy, FundingConfig};
pub use context::{ComputeContext, ComputeContextBuilder};
pub use dispatch::{
    ExecutorPool, JobSnapshot, LocalExecutorPool, PartialResults, SliceAssignment, SliceReporter,
    WaitOutcome, WorkContext,
};
pub use domain::{
    ComputeGroup, EventKind, JobEvent, JobId, JobState, Progress, PublicInfo, SliceStatus,
    WorkDescriptor,
};
pub use error::{JobMeshError, Result};
pub use job::{Job, JobFiles, JobHandle};
