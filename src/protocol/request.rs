//! Outbound AuthnRequest construction for the redirect and post bindings.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use quick_xml::escape::escape;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

use super::descriptor::Descriptors;
use super::state::ProtocolLayer;
use crate::error::{SsoError, SsoResult};
use crate::preferences::Binding;

/// Binding-specific payload handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoginContext {
    /// Send the browser to `url`.
    Redirect { url: String },
    /// Render `form`, which posts `saml_request` and `relay_state` to `action`.
    #[serde(rename_all = "camelCase")]
    Post {
        action: String,
        saml_request: String,
        relay_state: String,
        form: String,
    },
}

/// A login request ready to hand to the browser.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub binding: Binding,
    pub request_id: String,
    pub context: LoginContext,
}

/// Builds AuthnRequests from the active descriptors.
pub struct LoginRequestBuilder {
    layer: Arc<ProtocolLayer>,
}

impl LoginRequestBuilder {
    pub fn new(layer: Arc<ProtocolLayer>) -> Self {
        Self { layer }
    }

    /// Build a login request. `binding` defaults to the stored login binding and
    /// `relay_state` to the stored relay state or the instance base address.
    pub fn build_request(
        &self,
        relay_state: Option<&str>,
        binding: Option<Binding>,
    ) -> SsoResult<LoginRequest> {
        let descriptors = self.layer.descriptors()?;
        build_login_request(&descriptors, relay_state, binding)
    }
}

/// Build a login request against a specific descriptors snapshot.
pub fn build_login_request(
    descriptors: &Descriptors,
    relay_state: Option<&str>,
    binding: Option<Binding>,
) -> SsoResult<LoginRequest> {
    let binding = binding.unwrap_or(descriptors.login_binding);
    let relay_state = relay_state
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&descriptors.relay_state)
        .to_string();

    let destination = descriptors.idp.sso_url(binding).ok_or_else(|| {
        SsoError::BadRequest(format!(
            "Identity provider {} does not advertise a {} SSO endpoint",
            descriptors.idp.entity_id, binding
        ))
    })?;

    let request_id = format!("_{}", uuid::Uuid::new_v4().simple());
    let xml = authn_request_xml(descriptors, &request_id, destination);

    let context = match binding {
        Binding::Redirect => {
            let encoded = deflate_and_encode(&xml)?;
            let separator = if destination.contains('?') { '&' } else { '?' };
            let url = format!(
                "{}{}SAMLRequest={}&RelayState={}",
                destination,
                separator,
                urlencoding::encode(&encoded),
                urlencoding::encode(&relay_state)
            );
            LoginContext::Redirect { url }
        }
        Binding::Post => {
            let saml_request = BASE64.encode(xml.as_bytes());
            let form = auto_submit_form(destination, &saml_request, &relay_state);
            LoginContext::Post {
                action: destination.to_string(),
                saml_request,
                relay_state,
                form,
            }
        }
    };

    debug!(
        request_id = %request_id,
        binding = %binding,
        idp = %descriptors.idp.entity_id,
        "Created SAML AuthnRequest"
    );

    Ok(LoginRequest {
        binding,
        request_id,
        context,
    })
}

fn authn_request_xml(descriptors: &Descriptors, request_id: &str, destination: &str) -> String {
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{}" Version="2.0" IssueInstant="{}" Destination="{}" AssertionConsumerServiceURL="{}" ProtocolBinding="{}"><saml:Issuer>{}</saml:Issuer><samlp:NameIDPolicy AllowCreate="true"/></samlp:AuthnRequest>"#,
        request_id,
        issue_instant,
        escape(destination),
        escape(&descriptors.sp.acs_url),
        descriptors.sp.acs_binding.as_urn(),
        escape(&descriptors.sp.entity_id)
    )
}

fn auto_submit_form(action: &str, saml_request: &str, relay_state: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
<form method="post" action="{}">
<input type="hidden" name="SAMLRequest" value="{}"/>
<input type="hidden" name="RelayState" value="{}"/>
<noscript><button type="submit">Continue</button></noscript>
</form>
</body>
</html>"#,
        escape(action),
        escape(saml_request),
        escape(relay_state)
    )
}

/// Deflate and base64 encode for the redirect binding.
fn deflate_and_encode(xml: &str) -> SsoResult<String> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .and_then(|_| encoder.finish())
        .map(|compressed| BASE64.encode(compressed))
        .map_err(|e| SsoError::Internal(format!("Failed to deflate AuthnRequest: {}", e)))
}
