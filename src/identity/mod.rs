//! Local users, linked identities and reconciliation of federated logins.

pub mod reconciler;
pub mod store;
pub mod types;

pub use reconciler::IdentityReconciler;
pub use store::{MemoryUserDirectory, RedbUserDirectory, UserDirectory};
pub use types::{AuthIdentity, LocalUser, ReconcileOutcome, PROVIDER_TYPE};
