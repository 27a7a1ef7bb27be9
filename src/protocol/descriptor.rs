//! Descriptors derived from federation preferences.

use quick_xml::escape::escape;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::error::{SsoError, SsoResult};
use crate::metadata::{validate_metadata, IdentityProviderDescriptor};
use crate::preferences::{Binding, ClaimMapping, FederationPreferences};

/// This instance acting as service provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceProviderDescriptor {
    pub entity_id: String,
    pub acs_url: String,
    pub acs_binding: Binding,
    pub want_assertions_signed: bool,
    pub want_messages_signed: bool,
}

impl ServiceProviderDescriptor {
    pub fn new(prefs: &FederationPreferences, config: &AgentConfig) -> Self {
        Self {
            entity_id: config.sp_entity_id(),
            acs_url: config.acs_url(),
            acs_binding: prefs.acs_binding,
            want_assertions_signed: prefs.want_assertions_signed,
            want_messages_signed: prefs.want_messages_signed,
        }
    }

    /// SP metadata document for registering this instance with the IdP.
    pub fn metadata_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
    <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="{want_signed}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified</md:NameIDFormat>
        <md:AssertionConsumerService Binding="{binding}" Location="{acs_url}" index="0" isDefault="true"/>
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            entity_id = escape(&self.entity_id),
            want_signed = self.want_assertions_signed,
            binding = self.acs_binding.as_urn(),
            acs_url = escape(&self.acs_url),
        )
    }
}

/// Everything a login or callback needs, captured from one preferences snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Descriptors {
    pub idp: IdentityProviderDescriptor,
    pub sp: ServiceProviderDescriptor,
    pub claims: ClaimMapping,
    /// Binding used when a login request names none.
    pub login_binding: Binding,
    /// Relay state used when a login request names none.
    pub relay_state: String,
}

impl Descriptors {
    /// Validate the stored metadata and derive both descriptors.
    pub fn build(prefs: &FederationPreferences, config: &AgentConfig) -> SsoResult<Self> {
        let metadata = prefs
            .metadata
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| SsoError::InvalidMetadata("no metadata configured".to_string()))?;

        let idp = validate_metadata(metadata)?;

        Ok(Self {
            idp,
            sp: ServiceProviderDescriptor::new(prefs, config),
            claims: prefs.claims.clone(),
            login_binding: prefs.login_binding,
            relay_state: prefs
                .relay_state
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map_or_else(|| config.base().to_string(), str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::validate::fixtures::{idp_metadata, IDP_ENTITY_ID};

    fn config() -> AgentConfig {
        AgentConfig {
            base_url: "https://app.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_descriptors() {
        let prefs = FederationPreferences {
            metadata: Some(idp_metadata()),
            ..Default::default()
        };
        let descriptors = Descriptors::build(&prefs, &config()).unwrap();

        assert_eq!(descriptors.idp.entity_id, IDP_ENTITY_ID);
        assert_eq!(descriptors.sp.acs_url, "https://app.example.com/saml/acs");
        assert_eq!(descriptors.relay_state, "https://app.example.com");
        assert_eq!(descriptors.login_binding, Binding::Redirect);
    }

    #[test]
    fn test_build_without_metadata() {
        let err = Descriptors::build(&FederationPreferences::default(), &config()).unwrap_err();
        assert!(matches!(err, SsoError::InvalidMetadata(_)));
    }

    #[test]
    fn test_sp_metadata_xml() {
        let sp = ServiceProviderDescriptor::new(&FederationPreferences::default(), &config());
        let xml = sp.metadata_xml();
        assert!(xml.contains(r#"entityID="https://app.example.com/saml/metadata""#));
        assert!(xml.contains(r#"Location="https://app.example.com/saml/acs""#));
        assert!(xml.contains("bindings:HTTP-POST"));
        assert!(xml.contains(r#"WantAssertionsSigned="true""#));
    }

    #[test]
    fn test_sp_metadata_escapes_attribute_values() {
        let config = AgentConfig {
            base_url: r#"https://app.example.com/?a=1&b="2""#.to_string(),
            ..Default::default()
        };
        let sp = ServiceProviderDescriptor::new(&FederationPreferences::default(), &config);
        let xml = sp.metadata_xml();

        assert!(xml.contains("a=1&amp;b=&quot;2&quot;"));
        assert!(!xml.contains(r#"b="2""#));
    }
}
