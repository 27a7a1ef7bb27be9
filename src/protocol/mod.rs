//! SAML protocol layer: descriptors, activation state, login requests and
//! callback processing.

pub mod descriptor;
pub mod request;
pub mod response;
pub mod state;
pub mod verifier;

pub use descriptor::{Descriptors, ServiceProviderDescriptor};
pub use request::{LoginContext, LoginRequest, LoginRequestBuilder};
pub use response::{MappedAttributes, ParsedLogin, ResponseProcessor};
pub use state::{ProtocolLayer, ProtocolState};
pub use verifier::{
    AssertionVerifier, CallbackRequest, SamaelVerifier, VerifiedAssertion, VerifierError,
};
