//! Federation metadata: validation of IdP EntityDescriptors and fetching by URL.

pub mod resolver;
pub mod validate;

pub use resolver::{MetadataResolver, ResolvedMetadata};
pub use validate::{validate_metadata, IdentityProviderDescriptor};
