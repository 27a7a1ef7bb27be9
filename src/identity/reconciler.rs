//! Matching asserted attributes against local users.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::store::UserDirectory;
use super::types::{AuthIdentity, LocalUser, ReconcileOutcome, PROVIDER_TYPE};
use crate::error::SsoResult;
use crate::protocol::MappedAttributes;

/// Matches, updates or provisions local users from mapped attributes.
pub struct IdentityReconciler {
    directory: Arc<dyn UserDirectory>,
    jit_provisioning: bool,
}

impl IdentityReconciler {
    pub fn new(directory: Arc<dyn UserDirectory>, jit_provisioning: bool) -> Self {
        Self {
            directory,
            jit_provisioning,
        }
    }

    /// Resolve the local user for a login.
    ///
    /// 1. No email: no user.
    /// 2. A user with that email and a linked identity for the asserted UPN is
    ///    returned untouched.
    /// 3. A user with that email but no such identity gets its names refreshed
    ///    and the identity linked, replacing any earlier saml link. Both land
    ///    in one write.
    /// 4. Otherwise a user is created when JIT provisioning is on.
    pub fn reconcile(&self, attributes: &MappedAttributes) -> SsoResult<ReconcileOutcome> {
        let email = attributes.email.trim().to_lowercase();
        if email.is_empty() {
            debug!("Assertion carried no email, skipping reconciliation");
            return Ok(ReconcileOutcome::unauthenticated());
        }

        let Some(mut user) = self.directory.find_by_email(&email)? else {
            return self.provision(&email, attributes);
        };

        let linked = self
            .directory
            .identities_for(&user.id)?
            .iter()
            .any(|i| i.matches(PROVIDER_TYPE, &attributes.user_principal_name));

        if linked {
            debug!(user_id = %user.id, "Federated identity already linked");
            return Ok(ReconcileOutcome {
                user: Some(user),
                onboarding_required: false,
            });
        }

        if !attributes.first_name.trim().is_empty() {
            user.first_name = attributes.first_name.clone();
        }
        if !attributes.last_name.trim().is_empty() {
            user.last_name = attributes.last_name.clone();
        }
        user.updated_at = Utc::now();

        self.directory.update_and_link(
            &user,
            AuthIdentity::federated(&user.id, &attributes.user_principal_name),
        )?;

        let onboarding_required = user.needs_onboarding();
        info!(
            user_id = %user.id,
            upn = %attributes.user_principal_name,
            onboarding_required,
            "Linked federated identity to existing user"
        );

        Ok(ReconcileOutcome {
            user: Some(user),
            onboarding_required,
        })
    }

    fn provision(&self, email: &str, attributes: &MappedAttributes) -> SsoResult<ReconcileOutcome> {
        if !self.jit_provisioning {
            info!(email = %email, "No local user and JIT provisioning disabled");
            return Ok(ReconcileOutcome::unauthenticated());
        }

        let user = LocalUser::new(email, &attributes.first_name, &attributes.last_name);
        let identity = AuthIdentity::federated(&user.id, &attributes.user_principal_name);
        let user = self.directory.create_user(user, identity)?;

        info!(
            user_id = %user.id,
            upn = %attributes.user_principal_name,
            "Provisioned user on first federated login"
        );

        Ok(ReconcileOutcome {
            user: Some(user),
            onboarding_required: true,
        })
    }
}
