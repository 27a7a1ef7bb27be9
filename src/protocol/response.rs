//! Inbound assertion handling and claim mapping.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::state::ProtocolLayer;
use super::verifier::{AssertionVerifier, CallbackRequest, VerifiedAssertion};
use crate::error::{SsoError, SsoResult};
use crate::preferences::{Binding, ClaimMapping};

/// Canonical attributes of one login attempt. All four are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedAttributes {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_principal_name: String,
}

impl MappedAttributes {
    /// Map raw attributes through `claims`, failing with the names of every
    /// missing claim in the order email, firstName, lastName, userPrincipalName.
    pub fn from_claims(
        claims: &ClaimMapping,
        attributes: &HashMap<String, Vec<String>>,
    ) -> SsoResult<Self> {
        let mut found: [Option<String>; 4] = Default::default();
        let mut missing = Vec::new();

        for (slot, (name, uri)) in found.iter_mut().zip(claims.entries()) {
            *slot = first_value(attributes, uri);
            if slot.is_none() {
                missing.push(name);
            }
        }

        match found {
            [Some(email), Some(first_name), Some(last_name), Some(user_principal_name)] => {
                Ok(Self {
                    email,
                    first_name,
                    last_name,
                    user_principal_name,
                })
            }
            _ => Err(SsoError::AuthenticationFailed(format!(
                "Missing required claims: {}",
                missing.join(", ")
            ))),
        }
    }
}

fn first_value(attributes: &HashMap<String, Vec<String>>, uri: &str) -> Option<String> {
    attributes
        .get(uri.trim())?
        .iter()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parsed callback: mapped attributes plus the verified NameID.
#[derive(Debug, Clone)]
pub struct ParsedLogin {
    pub attributes: MappedAttributes,
    pub name_id: String,
    pub issuer: String,
}

/// Runs the verifier on callbacks and maps the result to canonical attributes.
pub struct ResponseProcessor {
    layer: Arc<ProtocolLayer>,
    verifier: Arc<dyn AssertionVerifier>,
}

impl ResponseProcessor {
    pub fn new(layer: Arc<ProtocolLayer>, verifier: Arc<dyn AssertionVerifier>) -> Self {
        Self { layer, verifier }
    }

    /// Verify the callback and map its claims. Every verifier failure comes
    /// back as `AuthenticationFailed`.
    pub fn parse(&self, request: &CallbackRequest, binding: Binding) -> SsoResult<ParsedLogin> {
        let descriptors = self.layer.descriptors()?;

        let encoded = request.saml_response(binding).ok_or_else(|| {
            SsoError::AuthenticationFailed(format!(
                "No SAMLResponse found in {} callback",
                binding
            ))
        })?;

        let verified: VerifiedAssertion = self
            .verifier
            .verify(encoded, binding, &descriptors)
            .map_err(|e| {
                warn!(binding = %binding, error = %e, "SAML response rejected");
                SsoError::AuthenticationFailed(e.to_string())
            })?;

        let attributes = MappedAttributes::from_claims(&descriptors.claims, &verified.attributes)
            .map_err(|e| {
                warn!(name_id = %verified.name_id, error = %e, "SAML claims incomplete");
                e
            })?;

        info!(
            name_id = %verified.name_id,
            idp = %verified.issuer,
            "SAML assertion validated"
        );

        Ok(ParsedLogin {
            attributes,
            name_id: verified.name_id,
            issuer: verified.issuer,
        })
    }
}
