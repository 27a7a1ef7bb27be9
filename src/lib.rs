//! Federated SAML single sign-on.
//!
//! Keeps one validated set of federation preferences per process, builds
//! login requests in the redirect or post binding, verifies callbacks and
//! reconciles the asserted identity with local users. Stored configuration
//! that turns out to be corrupt at boot is discarded so local login keeps
//! working.

pub mod config;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod preferences;
pub mod protocol;
pub mod recovery;
pub mod service;
pub mod settings;

pub use config::AgentConfig;
pub use error::{SsoError, SsoResult};
pub use preferences::{Binding, FederationPreferences, PreferencesPatch};
pub use protocol::{CallbackRequest, LoginContext, LoginRequest};
pub use recovery::BootOutcome;
pub use service::{FederationService, LoginOutcome};
