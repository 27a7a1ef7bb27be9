//! IdP metadata validation.
//!
//! Parses an EntityDescriptor with samael and reduces it to the parts the
//! service provider relies on. Signing certificates must parse as X.509.

use base64::{engine::general_purpose::STANDARD, Engine};
use samael::metadata::EntityDescriptor;
use serde::Serialize;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use crate::error::{SsoError, SsoResult};
use crate::preferences::Binding;

/// Identity provider view derived from validated metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityProviderDescriptor {
    /// IdP entity ID (expected assertion issuer).
    pub entity_id: String,
    /// SingleSignOnService location for HTTP-Redirect.
    pub redirect_sso_url: Option<String>,
    /// SingleSignOnService location for HTTP-POST.
    pub post_sso_url: Option<String>,
    /// Signing certificates, base64 DER.
    pub signing_certificates: Vec<String>,
    /// IdP asks for signed AuthnRequests.
    pub want_authn_requests_signed: bool,
}

impl IdentityProviderDescriptor {
    /// SSO endpoint for a binding.
    pub fn sso_url(&self, binding: Binding) -> Option<&str> {
        match binding {
            Binding::Redirect => self.redirect_sso_url.as_deref(),
            Binding::Post => self.post_sso_url.as_deref(),
        }
    }
}

/// Validate a metadata document and derive the IdP descriptor.
pub fn validate_metadata(xml: &str) -> SsoResult<IdentityProviderDescriptor> {
    let xml = xml.trim();
    if xml.is_empty() {
        return Err(SsoError::InvalidMetadata("metadata is empty".to_string()));
    }

    let entity: EntityDescriptor = xml
        .parse()
        .map_err(|e| SsoError::InvalidMetadata(format!("unparseable EntityDescriptor: {}", e)))?;

    let entity_id = entity
        .entity_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SsoError::InvalidMetadata("EntityDescriptor has no entityID".to_string()))?;

    let idp = entity
        .idp_sso_descriptors
        .as_ref()
        .and_then(|descriptors| descriptors.first())
        .ok_or_else(|| SsoError::InvalidMetadata("no IDPSSODescriptor present".to_string()))?;

    let mut redirect_sso_url = None;
    let mut post_sso_url = None;
    for endpoint in &idp.single_sign_on_services {
        match Binding::from_urn(&endpoint.binding) {
            Some(Binding::Redirect) if redirect_sso_url.is_none() => {
                redirect_sso_url = Some(endpoint.location.clone());
            }
            Some(Binding::Post) if post_sso_url.is_none() => {
                post_sso_url = Some(endpoint.location.clone());
            }
            _ => {}
        }
    }

    if redirect_sso_url.is_none() && post_sso_url.is_none() {
        return Err(SsoError::InvalidMetadata(
            "no SingleSignOnService with a redirect or post binding".to_string(),
        ));
    }

    let mut signing_certificates = Vec::new();
    for key in &idp.key_descriptors {
        if key.key_use.as_deref().is_some_and(|u| u != "signing") {
            continue;
        }
        let certificates = key
            .key_info
            .x509_data
            .as_ref()
            .map(|data| data.certificates.as_slice())
            .unwrap_or_default();
        for certificate in certificates {
            let normalized: String = certificate.chars().filter(|c| !c.is_whitespace()).collect();
            check_certificate(&normalized)?;
            signing_certificates.push(normalized);
        }
    }

    if signing_certificates.is_empty() {
        warn!(entity_id = %entity_id, "IdP metadata carries no signing certificate");
    }

    debug!(
        entity_id = %entity_id,
        redirect = redirect_sso_url.is_some(),
        post = post_sso_url.is_some(),
        certificates = signing_certificates.len(),
        "Validated IdP metadata"
    );

    Ok(IdentityProviderDescriptor {
        entity_id,
        redirect_sso_url,
        post_sso_url,
        signing_certificates,
        want_authn_requests_signed: idp.want_authn_requests_signed.unwrap_or(false),
    })
}

/// Check that a base64 DER certificate parses. Expired certificates are only logged.
fn check_certificate(encoded: &str) -> SsoResult<()> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| SsoError::InvalidMetadata(format!("signing certificate is not base64: {}", e)))?;

    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| SsoError::InvalidMetadata(format!("signing certificate is not X.509: {:?}", e)))?;

    if !cert.validity().is_valid() {
        warn!(
            subject = %cert.subject(),
            not_after = %cert.validity().not_after,
            "IdP signing certificate is outside its validity period"
        );
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_valid_metadata() {
        let idp = validate_metadata(&idp_metadata()).unwrap();
        assert_eq!(idp.entity_id, IDP_ENTITY_ID);
        assert_eq!(idp.sso_url(Binding::Redirect), Some(IDP_REDIRECT_URL));
        assert_eq!(idp.sso_url(Binding::Post), Some(IDP_POST_URL));
        assert_eq!(idp.signing_certificates, vec![IDP_CERT.to_string()]);
        assert!(!idp.want_authn_requests_signed);
    }

    #[test]
    fn test_post_only_metadata() {
        let idp = validate_metadata(&post_only_metadata()).unwrap();
        assert_eq!(idp.sso_url(Binding::Redirect), None);
        assert!(idp.signing_certificates.is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = validate_metadata("this is not xml").unwrap_err();
        assert!(matches!(err, SsoError::InvalidMetadata(_)));

        let err = validate_metadata("   ").unwrap_err();
        assert!(matches!(err, SsoError::InvalidMetadata(_)));
    }

    #[test]
    fn test_rejects_sp_only_metadata() {
        let xml = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://sp.example.com">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://sp.example.com/acs" index="0"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#;
        let err = validate_metadata(xml).unwrap_err();
        assert!(err.to_string().contains("IDPSSODescriptor"));
    }

    #[test]
    fn test_rejects_bad_certificate() {
        let err = validate_metadata(&metadata_with("bm90IGEgY2VydGlmaWNhdGU=")).unwrap_err();
        assert!(err.to_string().contains("X.509"));

        let err = validate_metadata(&metadata_with("%%%")).unwrap_err();
        assert!(err.to_string().contains("base64"));
    }
}
