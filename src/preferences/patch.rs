//! Partial preference updates and their merge rules.
//!
//! Field-level precedence: a supplied value replaces the current one, an absent
//! value keeps it. Blank strings count as absent; anything else is kept
//! verbatim, surrounding whitespace included. The metadata source is resolved
//! separately by [`PreferencesPatch::metadata_source`] because a URL overrides a
//! literal document supplied in the same patch.

use serde::{Deserialize, Serialize};

use super::types::{Binding, ClaimMapping, FederationPreferences, LoginAffordance};

/// Per-claim overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMappingPatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_principal_name: Option<String>,
}

impl ClaimMappingPatch {
    fn apply_to(&self, claims: &mut ClaimMapping) {
        if let Some(v) = supplied(&self.email) {
            claims.email = v.to_string();
        }
        if let Some(v) = supplied(&self.first_name) {
            claims.first_name = v.to_string();
        }
        if let Some(v) = supplied(&self.last_name) {
            claims.last_name = v.to_string();
        }
        if let Some(v) = supplied(&self.user_principal_name) {
            claims.user_principal_name = v.to_string();
        }
    }
}

/// Where new metadata comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    /// Fetch from this URL and adopt the validated document.
    Url(String),
    /// Use this literal document.
    Inline(String),
}

/// Partial update to [`FederationPreferences`], as sent by an admin or read
/// back from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub claims: Option<ClaimMappingPatch>,
    pub metadata: Option<String>,
    pub metadata_url: Option<String>,
    pub ssl_verification: Option<bool>,
    pub login_binding: Option<Binding>,
    pub acs_binding: Option<Binding>,
    pub want_assertions_signed: Option<bool>,
    pub want_messages_signed: Option<bool>,
    pub relay_state: Option<String>,
    pub login_enabled: Option<bool>,
    pub login_label: Option<String>,
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl PreferencesPatch {
    /// Check admin input before anything is fetched or merged.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = supplied(&self.metadata_url) {
            let url = url.trim();
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(format!("metadataUrl '{}' must be an HTTP(S) URL", url));
            }
        }
        if let Some(ref claims) = self.claims {
            for (name, value) in [
                ("email", &claims.email),
                ("firstName", &claims.first_name),
                ("lastName", &claims.last_name),
                ("userPrincipalName", &claims.user_principal_name),
            ] {
                if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                    return Err(format!("claim '{}' must not be empty", name));
                }
            }
        }
        if self.login_label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err("loginLabel must not be empty".to_string());
        }
        Ok(())
    }

    /// Metadata source this patch asks for. The URL wins over a literal document.
    pub fn metadata_source(&self) -> Option<MetadataSource> {
        if let Some(url) = supplied(&self.metadata_url) {
            return Some(MetadataSource::Url(url.to_string()));
        }
        supplied(&self.metadata).map(|xml| MetadataSource::Inline(xml.to_string()))
    }

    /// Whether the patch touches protocol settings (anything beyond the login affordance).
    pub fn touches_protocol(&self) -> bool {
        self.claims.is_some()
            || self.metadata_source().is_some()
            || self.ssl_verification.is_some()
            || self.login_binding.is_some()
            || self.acs_binding.is_some()
            || self.want_assertions_signed.is_some()
            || self.want_messages_signed.is_some()
            || self.relay_state.is_some()
    }

    /// Merge every field except the metadata source into `prefs`.
    pub fn apply_to(&self, prefs: &mut FederationPreferences) {
        if let Some(ref claims) = self.claims {
            claims.apply_to(&mut prefs.claims);
        }
        if let Some(verify) = self.ssl_verification {
            prefs.ssl_verification = verify;
        }
        if let Some(binding) = self.login_binding {
            prefs.login_binding = binding;
        }
        if let Some(binding) = self.acs_binding {
            prefs.acs_binding = binding;
        }
        if let Some(signed) = self.want_assertions_signed {
            prefs.want_assertions_signed = signed;
        }
        if let Some(signed) = self.want_messages_signed {
            prefs.want_messages_signed = signed;
        }
        if let Some(state) = supplied(&self.relay_state) {
            prefs.relay_state = Some(state.to_string());
        }
    }

    /// Merge the login affordance fields.
    pub fn apply_login_to(&self, login: &mut LoginAffordance) {
        if let Some(enabled) = self.login_enabled {
            login.enabled = enabled;
        }
        if let Some(label) = supplied(&self.login_label) {
            login.label = label.to_string();
        }
    }
}
