//! Federation service: the operations exposed to the admin UI, login routes
//! and the CLI.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::AgentConfig;
use crate::error::{SsoError, SsoResult};
use crate::identity::{IdentityReconciler, LocalUser, RedbUserDirectory, UserDirectory};
use crate::metadata::MetadataResolver;
use crate::preferences::{Binding, FederationPreferences, PreferenceStore, PreferencesPatch};
use crate::protocol::{
    AssertionVerifier, CallbackRequest, LoginRequest, LoginRequestBuilder, MappedAttributes,
    ProtocolLayer, ResponseProcessor, SamaelVerifier,
};
use crate::recovery::{BootOutcome, RecoveryController};
use crate::settings::{RedbSettingsStore, SettingsStore};

/// Result of a completed callback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    /// `None` when no local user matched and none was provisioned.
    pub authenticated_user: Option<LocalUser>,
    pub attributes: MappedAttributes,
    pub onboarding_required: bool,
}

/// Federated login for one instance.
pub struct FederationService {
    config: AgentConfig,
    layer: Arc<ProtocolLayer>,
    store: Arc<PreferenceStore>,
    requests: LoginRequestBuilder,
    responses: ResponseProcessor,
    reconciler: IdentityReconciler,
    recovery: RecoveryController,
}

impl FederationService {
    /// Wire the service from explicit collaborators.
    pub fn new(
        config: AgentConfig,
        settings: Arc<dyn SettingsStore>,
        directory: Arc<dyn UserDirectory>,
        verifier: Arc<dyn AssertionVerifier>,
    ) -> SsoResult<Self> {
        let resolver = MetadataResolver::new(config.metadata_fetch_timeout_secs)
            .map_err(|e| SsoError::Internal(format!("{:#}", e)))?;
        let layer = Arc::new(ProtocolLayer::new());
        let store = Arc::new(PreferenceStore::new(
            config.clone(),
            settings,
            resolver,
            Arc::clone(&layer),
        ));

        Ok(Self {
            requests: LoginRequestBuilder::new(Arc::clone(&layer)),
            responses: ResponseProcessor::new(Arc::clone(&layer), verifier),
            reconciler: IdentityReconciler::new(directory, config.jit_provisioning),
            recovery: RecoveryController::new(Arc::clone(&store), config.licensed),
            layer,
            store,
            config,
        })
    }

    /// Open the redb stores named in `config` and use the samael verifier.
    pub fn open(config: AgentConfig) -> Result<Self> {
        let settings = Arc::new(RedbSettingsStore::open(config.settings_path.clone())?);
        let directory = Arc::new(RedbUserDirectory::open(config.users_path.clone())?);
        let verifier = Arc::new(SamaelVerifier::new(config.clock_skew_secs));
        Ok(Self::new(config, settings, directory, verifier)?)
    }

    /// Load stored preferences and activate them when licensed and enabled.
    pub fn boot(&self) -> SsoResult<BootOutcome> {
        self.recovery.boot()
    }

    /// Current preferences, login affordance included.
    pub fn get_preferences(&self) -> SsoResult<FederationPreferences> {
        self.store.view()
    }

    /// Apply an admin update. Validation errors are returned as-is.
    #[instrument(skip(self, patch))]
    pub async fn set_preferences(&self, patch: PreferencesPatch) -> SsoResult<FederationPreferences> {
        self.store.set_preferences(patch).await
    }

    /// Build a login request for the browser.
    pub fn get_login_request_url(
        &self,
        relay_state: Option<&str>,
        binding: Option<Binding>,
    ) -> SsoResult<LoginRequest> {
        self.ensure_login_available()?;
        self.requests.build_request(relay_state, binding)
    }

    /// Verify a callback and resolve the local user.
    #[instrument(skip(self, request))]
    pub fn handle_login(&self, request: &CallbackRequest, binding: Binding) -> SsoResult<LoginOutcome> {
        self.ensure_login_available()?;

        let parsed = self.responses.parse(request, binding)?;
        let outcome = self.reconciler.reconcile(&parsed.attributes)?;

        info!(
            name_id = %parsed.name_id,
            authenticated = outcome.user.is_some(),
            onboarding_required = outcome.onboarding_required,
            "Federated login handled"
        );

        Ok(LoginOutcome {
            authenticated_user: outcome.user,
            attributes: parsed.attributes,
            onboarding_required: outcome.onboarding_required,
        })
    }

    /// SP metadata for registering this instance with the IdP. Requires an
    /// active protocol layer.
    pub fn sp_metadata(&self) -> SsoResult<String> {
        Ok(self.layer.descriptors()?.sp.metadata_xml())
    }

    fn ensure_login_available(&self) -> SsoResult<()> {
        if !self.config.licensed {
            return Err(SsoError::BadRequest(
                "Federated login is not licensed for this instance".to_string(),
            ));
        }
        if !self.store.login()?.enabled {
            return Err(SsoError::BadRequest("Federated login is disabled".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryUserDirectory;
    use crate::metadata::validate::fixtures::idp_metadata;
    use crate::protocol::verifier::fixtures::{full_claims, StubVerifier};
    use crate::protocol::LoginContext;
    use crate::settings::MemorySettingsStore;

    fn service(verifier: StubVerifier, jit_provisioning: bool) -> FederationService {
        let config = AgentConfig {
            base_url: "https://app.example.com".to_string(),
            licensed: true,
            jit_provisioning,
            ..Default::default()
        };
        FederationService::new(
            config,
            Arc::new(MemorySettingsStore::new()),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(verifier),
        )
        .unwrap()
    }

    async fn enabled(verifier: StubVerifier, jit_provisioning: bool) -> FederationService {
        let service = service(verifier, jit_provisioning);
        service
            .set_preferences(PreferencesPatch {
                metadata: Some(idp_metadata()),
                login_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        service
    }

    fn callback() -> CallbackRequest {
        CallbackRequest::from_encoded("", "SAMLResponse=PHJlc3BvbnNlLz4%3D&RelayState=%2F")
    }

    #[tokio::test]
    async fn test_login_request_binding_selection() {
        let service = enabled(StubVerifier::accepting(&full_claims()), false).await;

        let post = service
            .get_login_request_url(None, Some(Binding::Post))
            .unwrap();
        assert!(matches!(post.context, LoginContext::Post { .. }));

        let redirect = service
            .get_login_request_url(None, Some(Binding::Redirect))
            .unwrap();
        assert!(matches!(redirect.context, LoginContext::Redirect { .. }));

        service
            .set_preferences(PreferencesPatch {
                login_binding: Some(Binding::Post),
                ..Default::default()
            })
            .await
            .unwrap();
        let default = service.get_login_request_url(None, None).unwrap();
        assert_eq!(default.binding, Binding::Post);
    }

    #[tokio::test]
    async fn test_login_unavailable_until_enabled() {
        let service = service(StubVerifier::accepting(&full_claims()), false);
        assert!(matches!(
            service.get_login_request_url(None, None),
            Err(SsoError::BadRequest(_))
        ));
        assert!(matches!(
            service.sp_metadata(),
            Err(SsoError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_login_provisions_user() {
        let service = enabled(StubVerifier::accepting(&full_claims()), true).await;

        let outcome = service.handle_login(&callback(), Binding::Post).unwrap();

        let user = outcome.authenticated_user.unwrap();
        assert_eq!(user.email, "jane.doe@example.com");
        assert!(outcome.onboarding_required);
        assert_eq!(outcome.attributes.user_principal_name, "jdoe@example.com");

        let again = service.handle_login(&callback(), Binding::Post).unwrap();
        assert_eq!(again.authenticated_user.unwrap().id, user.id);
        assert!(!again.onboarding_required);
    }

    #[tokio::test]
    async fn test_handle_login_without_jit() {
        let service = enabled(StubVerifier::accepting(&full_claims()), false).await;
        let outcome = service.handle_login(&callback(), Binding::Post).unwrap();
        assert!(outcome.authenticated_user.is_none());
        assert!(!outcome.onboarding_required);
    }

    #[tokio::test]
    async fn test_handle_login_propagates_authentication_failure() {
        let service = enabled(StubVerifier::rejecting("bad signature"), true).await;
        let err = service.handle_login(&callback(), Binding::Post).unwrap_err();
        assert!(matches!(err, SsoError::AuthenticationFailed(_)));
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_sp_metadata_after_configuration() {
        let service = enabled(StubVerifier::accepting(&full_claims()), false).await;
        let xml = service.sp_metadata().unwrap();
        assert!(xml.contains("https://app.example.com/saml/acs"));
    }

    #[tokio::test]
    async fn test_boot_reflects_stored_preferences() {
        let settings = Arc::new(MemorySettingsStore::new());
        let config = AgentConfig {
            licensed: true,
            ..Default::default()
        };
        let first = FederationService::new(
            config.clone(),
            settings.clone(),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(StubVerifier::accepting(&full_claims())),
        )
        .unwrap();
        first
            .set_preferences(PreferencesPatch {
                metadata: Some(idp_metadata()),
                login_enabled: Some(true),
                login_label: Some("Corporate login".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let second = FederationService::new(
            config,
            settings,
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(StubVerifier::accepting(&full_claims())),
        )
        .unwrap();
        assert_eq!(second.boot().unwrap(), BootOutcome::Activated);
        assert_eq!(second.get_preferences().unwrap(), first.get_preferences().unwrap());
        assert!(second.get_login_request_url(None, None).is_ok());
    }
}
