//! External collaborators: identity, payment, submission, market price,
//! file staging and package resolution.

pub mod memory;
pub mod traits;

pub use memory::{
    FixedMarketOracle, InMemoryAccount, LocalBackend, LocalFileStager, StaticIdentity,
    StaticPackageResolver,
};
pub use traits::{
    DispatchBackend, FileStager, IdentityProvider, MarketOracle, PackageResolver, PaymentAccount,
};
