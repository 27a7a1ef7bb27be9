//! In-memory federation preferences synchronized with the settings row.

use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::patch::{MetadataSource, PreferencesPatch};
use super::types::{FederationPreferences, LoginAffordance, SETTINGS_KEY};
use crate::config::AgentConfig;
use crate::error::{SsoError, SsoResult};
use crate::metadata::MetadataResolver;
use crate::protocol::{Descriptors, ProtocolLayer};
use crate::settings::{SettingRecord, SettingsStore, UndecodableSetting};

/// Owner of the process-wide federation preferences.
///
/// Protocol preferences and the login affordance are held apart: the
/// affordance can be read and toggled without trusting protocol state.
pub struct PreferenceStore {
    config: AgentConfig,
    prefs: RwLock<FederationPreferences>,
    login: RwLock<LoginAffordance>,
    settings: Arc<dyn SettingsStore>,
    resolver: MetadataResolver,
    layer: Arc<ProtocolLayer>,
}

impl PreferenceStore {
    pub fn new(
        config: AgentConfig,
        settings: Arc<dyn SettingsStore>,
        resolver: MetadataResolver,
        layer: Arc<ProtocolLayer>,
    ) -> Self {
        Self {
            config,
            prefs: RwLock::new(FederationPreferences::default()),
            login: RwLock::new(LoginAffordance::default()),
            settings,
            resolver,
            layer,
        }
    }

    /// Current preferences with the login affordance folded in.
    pub fn view(&self) -> SsoResult<FederationPreferences> {
        let mut view = self.protocol_prefs()?;
        let login = self.login()?;
        view.login_enabled = login.enabled;
        view.login_label = login.label;
        Ok(view)
    }

    /// Current login affordance.
    pub fn login(&self) -> SsoResult<LoginAffordance> {
        self.login
            .read()
            .map(|l| l.clone())
            .map_err(|_| SsoError::Internal("Login affordance lock poisoned".to_string()))
    }

    /// Read the persisted row into memory. Returns whether a row existed.
    ///
    /// With `apply == false` the stored values are adopted as-is, with no
    /// metadata validation and no protocol side effects. With `apply == true`
    /// the metadata is validated, descriptors are (re)built and the merged
    /// result is written back.
    pub fn load_from_persistence(&self, apply: bool) -> SsoResult<bool> {
        let record = self.settings.get(SETTINGS_KEY).map_err(|e| {
            match e.downcast_ref::<UndecodableSetting>() {
                Some(undecodable) => SsoError::InvalidPreferences(undecodable.to_string()),
                None => SsoError::Storage(e),
            }
        })?;
        let Some(record) = record else {
            debug!(key = SETTINGS_KEY, "No stored federation preferences");
            return Ok(false);
        };

        let stored: FederationPreferences = serde_json::from_str(&record.value)
            .map_err(|e| SsoError::InvalidPreferences(e.to_string()))?;

        if apply {
            let build = || Descriptors::build(&stored, &self.config);
            if self.layer.is_ready() {
                self.layer.rebuild(build)?;
            } else {
                self.layer.activate(build)?;
            }
        }

        self.commit(&stored)?;

        if apply {
            self.persist(&stored)?;
        }

        info!(
            apply,
            login_enabled = stored.login_enabled,
            has_metadata = stored.has_metadata(),
            "Loaded federation preferences"
        );
        Ok(true)
    }

    /// Apply an admin patch: validate, resolve metadata, rebuild descriptors
    /// and persist before the new values become visible.
    pub async fn set_preferences(&self, patch: PreferencesPatch) -> SsoResult<FederationPreferences> {
        patch.validate().map_err(SsoError::BadRequest)?;

        let mut next = self.view()?;
        patch.apply_to(&mut next);

        match patch.metadata_source() {
            Some(MetadataSource::Url(url)) => {
                let resolved = self
                    .resolver
                    .fetch_from_url(url.trim(), next.ssl_verification)
                    .await?;
                next.metadata = Some(resolved.xml);
                next.metadata_url = Some(url);
            }
            Some(MetadataSource::Inline(xml)) => {
                let resolved = self.resolver.resolve_inline(&xml)?;
                next.metadata = Some(resolved.xml);
                next.metadata_url = None;
            }
            None => {}
        }

        let mut login = LoginAffordance {
            enabled: next.login_enabled,
            label: next.login_label.clone(),
        };
        patch.apply_login_to(&mut login);
        next.login_enabled = login.enabled;
        next.login_label = login.label;

        if next.login_enabled && !next.has_metadata() {
            return Err(SsoError::BadRequest(
                "Cannot enable federated login without identity provider metadata".to_string(),
            ));
        }

        let descriptors = if next.has_metadata() {
            Some(Descriptors::build(&next, &self.config)?)
        } else {
            None
        };

        self.persist(&next)?;

        if let Some(descriptors) = descriptors {
            self.layer.rebuild(move || Ok(descriptors))?;
        }
        self.commit(&next)?;

        info!(
            login_enabled = next.login_enabled,
            metadata_url = next.metadata_url.as_deref().unwrap_or(""),
            "Federation preferences updated"
        );
        Ok(next)
    }

    /// Disable federated login, drop the in-memory preferences and delete the
    /// persisted row. Returns whether a row was deleted.
    pub fn reset(&self) -> SsoResult<bool> {
        self.commit(&FederationPreferences::default())?;
        self.layer.invalidate();
        let removed = self.settings.delete(SETTINGS_KEY)?;
        warn!(removed, key = SETTINGS_KEY, "Federation preferences reset");
        Ok(removed)
    }

    fn protocol_prefs(&self) -> SsoResult<FederationPreferences> {
        self.prefs
            .read()
            .map(|p| p.clone())
            .map_err(|_| SsoError::Internal("Preferences lock poisoned".to_string()))
    }

    fn commit(&self, view: &FederationPreferences) -> SsoResult<()> {
        {
            let mut prefs = self
                .prefs
                .write()
                .map_err(|_| SsoError::Internal("Preferences lock poisoned".to_string()))?;
            *prefs = view.clone();
        }
        let mut login = self
            .login
            .write()
            .map_err(|_| SsoError::Internal("Login affordance lock poisoned".to_string()))?;
        *login = LoginAffordance {
            enabled: view.login_enabled,
            label: view.login_label.clone(),
        };
        Ok(())
    }

    fn persist(&self, view: &FederationPreferences) -> SsoResult<()> {
        let value = serde_json::to_string(view)
            .map_err(|e| SsoError::Internal(format!("Failed to serialize preferences: {}", e)))?;
        self.settings
            .put(SettingRecord::new(SETTINGS_KEY, value, true))?;
        debug!(key = SETTINGS_KEY, "Persisted federation preferences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::validate::fixtures::{idp_metadata, post_only_metadata, IDP_ENTITY_ID};
    use crate::preferences::{Binding, ClaimMappingPatch};
    use crate::settings::MemorySettingsStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        store: PreferenceStore,
        settings: Arc<MemorySettingsStore>,
        layer: Arc<ProtocolLayer>,
    }

    fn harness() -> Harness {
        let settings = Arc::new(MemorySettingsStore::new());
        let layer = Arc::new(ProtocolLayer::new());
        let store = PreferenceStore::new(
            AgentConfig::default(),
            settings.clone(),
            MetadataResolver::new(5).unwrap(),
            layer.clone(),
        );
        Harness {
            store,
            settings,
            layer,
        }
    }

    fn stored(settings: &MemorySettingsStore) -> Option<FederationPreferences> {
        settings
            .get(SETTINGS_KEY)
            .unwrap()
            .map(|r| serde_json::from_str(&r.value).unwrap())
    }

    #[tokio::test]
    async fn test_set_inline_metadata_round_trips_through_view() {
        let h = harness();
        let patch = PreferencesPatch {
            metadata: Some(idp_metadata()),
            login_binding: Some(Binding::Post),
            claims: Some(ClaimMappingPatch {
                email: Some("mail".to_string()),
                ..Default::default()
            }),
            login_enabled: Some(true),
            login_label: Some("Company SSO".to_string()),
            ..Default::default()
        };

        let updated = h.store.set_preferences(patch).await.unwrap();
        let view = h.store.view().unwrap();

        assert_eq!(updated, view);
        assert_eq!(view.metadata, Some(idp_metadata()));
        assert_eq!(view.metadata_url, None);
        assert_eq!(view.login_binding, Binding::Post);
        assert_eq!(view.claims.email, "mail");
        assert!(view.login_enabled);
        assert_eq!(view.login_label, "Company SSO");

        assert_eq!(stored(&h.settings), Some(view));
        assert!(h.settings.get(SETTINGS_KEY).unwrap().unwrap().load_on_startup);
        assert!(h.layer.is_ready());
    }

    #[tokio::test]
    async fn test_metadata_url_wins_over_literal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/federation/metadata.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata()))
            .mount(&server)
            .await;

        let h = harness();
        let url = format!("{}/federation/metadata.xml", server.uri());
        let patch = PreferencesPatch {
            metadata: Some(post_only_metadata()),
            metadata_url: Some(url.clone()),
            ..Default::default()
        };

        let updated = h.store.set_preferences(patch).await.unwrap();

        assert_eq!(updated.metadata, Some(idp_metadata()));
        assert_eq!(updated.metadata_url.as_deref(), Some(url.as_str()));
        assert_eq!(stored(&h.settings).unwrap().metadata, updated.metadata);
    }

    #[tokio::test]
    async fn test_padded_values_are_returned_as_applied() {
        let h = harness();
        let metadata = format!("\n  {}\n", idp_metadata());
        let updated = h
            .store
            .set_preferences(PreferencesPatch {
                metadata: Some(metadata.clone()),
                relay_state: Some(" https://app.example.com/home ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let view = h.store.view().unwrap();
        assert_eq!(updated, view);
        assert_eq!(view.metadata, Some(metadata));
        assert_eq!(view.relay_state.as_deref(), Some(" https://app.example.com/home "));
        assert_eq!(stored(&h.settings), Some(view));
        assert!(h.layer.is_ready());
    }

    #[tokio::test]
    async fn test_invalid_metadata_leaves_state_untouched() {
        let h = harness();
        h.store
            .set_preferences(PreferencesPatch {
                metadata: Some(idp_metadata()),
                ..Default::default()
            })
            .await
            .unwrap();
        let before = h.store.view().unwrap();
        let descriptors = h.layer.descriptors().unwrap();

        let err = h
            .store
            .set_preferences(PreferencesPatch {
                metadata: Some("<EntityDescriptor>".to_string()),
                login_binding: Some(Binding::Post),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SsoError::InvalidMetadata(_)));
        assert_eq!(h.store.view().unwrap(), before);
        assert_eq!(stored(&h.settings), Some(before));
        assert!(Arc::ptr_eq(&h.layer.descriptors().unwrap(), &descriptors));
    }

    #[tokio::test]
    async fn test_enable_login_without_metadata_is_rejected() {
        let h = harness();
        let err = h
            .store
            .set_preferences(PreferencesPatch {
                login_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::BadRequest(_)));
        assert!(stored(&h.settings).is_none());

        let updated = h
            .store
            .set_preferences(PreferencesPatch {
                login_enabled: Some(false),
                login_label: Some("Later".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!updated.login_enabled);
        assert_eq!(h.store.login().unwrap().label, "Later");
    }

    #[tokio::test]
    async fn test_malformed_patch_is_bad_request() {
        let h = harness();
        let err = h
            .store
            .set_preferences(PreferencesPatch {
                metadata_url: Some("idp.example.com/metadata".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::BadRequest(_)));
    }

    #[test]
    fn test_load_absent_row_is_noop() {
        let h = harness();
        assert!(!h.store.load_from_persistence(true).unwrap());
        assert_eq!(h.store.view().unwrap(), FederationPreferences::default());
        assert!(!h.layer.is_ready());
    }

    #[test]
    fn test_passive_load_has_no_protocol_side_effects() {
        let h = harness();
        let prefs = FederationPreferences {
            metadata: Some("<not-metadata/>".to_string()),
            login_enabled: true,
            ..Default::default()
        };
        h.settings
            .put(SettingRecord::new(
                SETTINGS_KEY,
                serde_json::to_string(&prefs).unwrap(),
                true,
            ))
            .unwrap();

        assert!(h.store.load_from_persistence(false).unwrap());
        assert_eq!(h.store.view().unwrap(), prefs);
        assert!(h.store.login().unwrap().enabled);
        assert!(!h.layer.is_ready());

        let err = h.store.load_from_persistence(true).unwrap_err();
        assert!(matches!(err, SsoError::InvalidMetadata(_)));
    }

    #[test]
    fn test_applied_load_activates_and_writes_back() {
        let h = harness();
        h.settings
            .put(SettingRecord::new(
                SETTINGS_KEY,
                serde_json::json!({ "metadata": idp_metadata(), "loginEnabled": true }).to_string(),
                false,
            ))
            .unwrap();

        assert!(h.store.load_from_persistence(true).unwrap());
        assert_eq!(h.layer.descriptors().unwrap().idp.entity_id, IDP_ENTITY_ID);

        let record = h.settings.get(SETTINGS_KEY).unwrap().unwrap();
        assert!(record.load_on_startup);
        assert_eq!(stored(&h.settings), Some(h.store.view().unwrap()));
    }

    #[test]
    fn test_corrupt_json_is_invalid_preferences() {
        let h = harness();
        h.settings
            .put(SettingRecord::new(SETTINGS_KEY, "{not json".to_string(), true))
            .unwrap();
        let err = h.store.load_from_persistence(false).unwrap_err();
        assert!(matches!(err, SsoError::InvalidPreferences(_)));
    }

    #[tokio::test]
    async fn test_reset() {
        let h = harness();
        h.store
            .set_preferences(PreferencesPatch {
                metadata: Some(idp_metadata()),
                login_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(h.store.reset().unwrap());
        assert!(!h.store.login().unwrap().enabled);
        assert!(stored(&h.settings).is_none());
        assert!(!h.layer.is_ready());
    }
}
