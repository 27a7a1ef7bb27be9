//! Local user and linked-identity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider type recorded on identities linked through federated login.
pub const PROVIDER_TYPE: &str = "saml";

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    /// Server-assigned UUID.
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalUser {
    /// Create a user with a fresh ID.
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A user with an empty first or last name still has to complete their profile.
    pub fn needs_onboarding(&self) -> bool {
        self.first_name.trim().is_empty() || self.last_name.trim().is_empty()
    }
}

/// Link between a local user and an external identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIdentity {
    pub user_id: String,
    pub provider_type: String,
    /// Identifier at the provider; the user principal name for federated login.
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}

impl AuthIdentity {
    /// Federated-login identity for `user_id`.
    pub fn federated(user_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            provider_type: PROVIDER_TYPE.to_string(),
            provider_id: provider_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Storage key: `provider_type:provider_id`.
    pub fn key(&self) -> String {
        identity_key(&self.provider_type, &self.provider_id)
    }

    pub fn matches(&self, provider_type: &str, provider_id: &str) -> bool {
        self.provider_type == provider_type && self.provider_id == provider_id
    }
}

pub(crate) fn identity_key(provider_type: &str, provider_id: &str) -> String {
    format!("{}:{}", provider_type, provider_id)
}

/// Result of reconciling asserted attributes with local users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// `None` when no local user could be matched or provisioned.
    pub user: Option<LocalUser>,
    pub onboarding_required: bool,
}

impl ReconcileOutcome {
    pub fn unauthenticated() -> Self {
        Self {
            user: None,
            onboarding_required: false,
        }
    }
}
