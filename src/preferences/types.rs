//! Federation preference types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed settings key the preferences row is persisted under.
pub const SETTINGS_KEY: &str = "features.saml";

/// Default claim URIs (WS-Federation identity claims namespace).
pub const CLAIM_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
pub const CLAIM_FIRST_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
pub const CLAIM_LAST_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
pub const CLAIM_USER_PRINCIPAL_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";

fn default_login_label() -> String {
    "Log in with SSO".to_string()
}

fn default_true() -> bool {
    true
}

/// Wire binding for a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    /// HTTP-Redirect: message in the URL query string.
    #[default]
    Redirect,
    /// HTTP-POST: message in an auto-submitted form.
    Post,
}

impl Binding {
    /// SAML binding URN.
    pub fn as_urn(&self) -> &'static str {
        match self {
            Binding::Redirect => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
            Binding::Post => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST",
        }
    }

    /// Parse a binding URN.
    pub fn from_urn(urn: &str) -> Option<Self> {
        match urn {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" => Some(Binding::Redirect),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" => Some(Binding::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Redirect => write!(f, "redirect"),
            Binding::Post => write!(f, "post"),
        }
    }
}

impl FromStr for Binding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redirect" => Ok(Binding::Redirect),
            "post" => Ok(Binding::Post),
            other => Err(format!("Unknown binding '{}' (expected redirect or post)", other)),
        }
    }
}

/// Claim-name to claim-URI mapping. All four claims are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMapping {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_principal_name: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            email: CLAIM_EMAIL.to_string(),
            first_name: CLAIM_FIRST_NAME.to_string(),
            last_name: CLAIM_LAST_NAME.to_string(),
            user_principal_name: CLAIM_USER_PRINCIPAL_NAME.to_string(),
        }
    }
}

impl ClaimMapping {
    /// Claim names paired with their URIs, in the stable reporting order.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("email", self.email.as_str()),
            ("firstName", self.first_name.as_str()),
            ("lastName", self.last_name.as_str()),
            ("userPrincipalName", self.user_principal_name.as_str()),
        ]
    }
}

/// Federation preferences as persisted under [`SETTINGS_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationPreferences {
    /// Claim mapping used when extracting attributes.
    #[serde(default)]
    pub claims: ClaimMapping,

    /// IdP metadata XML. Holds the fetched document when `metadata_url` is set.
    #[serde(default)]
    pub metadata: Option<String>,

    /// IdP metadata URL.
    #[serde(default)]
    pub metadata_url: Option<String>,

    /// Verify TLS certificates when fetching metadata (disable only outside production).
    #[serde(default = "default_true")]
    pub ssl_verification: bool,

    /// Binding used for outbound login requests.
    #[serde(default)]
    pub login_binding: Binding,

    /// Binding the IdP should use when posting back to the ACS.
    #[serde(default = "default_acs_binding")]
    pub acs_binding: Binding,

    /// Require the assertion to carry a signature.
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,

    /// Require the response envelope to carry a signature.
    #[serde(default)]
    pub want_messages_signed: bool,

    /// Relay state used when the caller supplies none.
    #[serde(default)]
    pub relay_state: Option<String>,

    /// Whether the federated login affordance is shown.
    #[serde(default)]
    pub login_enabled: bool,

    /// Label of the federated login affordance.
    #[serde(default = "default_login_label")]
    pub login_label: String,
}

fn default_acs_binding() -> Binding {
    Binding::Post
}

impl Default for FederationPreferences {
    fn default() -> Self {
        Self {
            claims: ClaimMapping::default(),
            metadata: None,
            metadata_url: None,
            ssl_verification: true,
            login_binding: Binding::Redirect,
            acs_binding: default_acs_binding(),
            want_assertions_signed: true,
            want_messages_signed: false,
            relay_state: None,
            login_enabled: false,
            login_label: default_login_label(),
        }
    }
}

impl FederationPreferences {
    /// Whether any metadata source is configured.
    pub fn has_metadata(&self) -> bool {
        self.metadata.as_deref().is_some_and(|m| !m.trim().is_empty())
    }
}

/// Login affordance, tracked apart from the validated protocol preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAffordance {
    pub enabled: bool,
    pub label: String,
}

impl Default for LoginAffordance {
    fn default() -> Self {
        Self {
            enabled: false,
            label: default_login_label(),
        }
    }
}
