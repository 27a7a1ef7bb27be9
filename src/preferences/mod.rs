//! Federation preferences: types, partial-update merging and the in-memory
//! store synchronized with the settings row.

pub mod patch;
pub mod store;
pub mod types;

pub use patch::{ClaimMappingPatch, MetadataSource, PreferencesPatch};
pub use store::PreferenceStore;
pub use types::{
    Binding, ClaimMapping, FederationPreferences, LoginAffordance, SETTINGS_KEY,
};
