//! Assertion verification seam.
//!
//! An [`AssertionVerifier`] turns an encoded SAMLResponse into a NameID and raw
//! attributes. Its errors are foreign to this crate and get normalized by the
//! response processor.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

use super::descriptor::Descriptors;
use crate::preferences::Binding;

/// Error type returned by verifiers. Bare strings convert into it.
pub type VerifierError = Box<dyn std::error::Error + Send + Sync>;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// What a verifier vouches for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedAssertion {
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub issuer: String,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Verifies and parses an encoded SAMLResponse against the active descriptors.
pub trait AssertionVerifier: Send + Sync {
    fn verify(
        &self,
        encoded_response: &str,
        binding: Binding,
        descriptors: &Descriptors,
    ) -> Result<VerifiedAssertion, VerifierError>;
}

/// Raw view of the callback HTTP request.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl CallbackRequest {
    /// Build from a raw query string and a urlencoded form body.
    pub fn from_encoded(query: &str, form: &str) -> Self {
        Self {
            query: parse_pairs(query),
            form: parse_pairs(form),
        }
    }

    /// The encoded SAMLResponse for `binding`: form field for post, query
    /// parameter for redirect.
    pub fn saml_response(&self, binding: Binding) -> Option<&str> {
        self.source(binding)
            .get("SAMLResponse")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn relay_state(&self, binding: Binding) -> Option<&str> {
        self.source(binding).get("RelayState").map(String::as_str)
    }

    fn source(&self, binding: Binding) -> &HashMap<String, String> {
        match binding {
            Binding::Post => &self.form,
            Binding::Redirect => &self.query,
        }
    }
}

fn parse_pairs(encoded: &str) -> HashMap<String, String> {
    encoded
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(value: &str) -> String {
    let value = value.replace('+', " ");
    urlencoding::decode(&value)
        .map(|v| v.into_owned())
        .unwrap_or(value)
}

/// Verifier backed by samael's response schema.
///
/// Enforces status, signature presence per the SP flags, issuer and the
/// assertion validity window. Cryptographic signature checking is left to the
/// XML security layer.
pub struct SamaelVerifier {
    clock_skew_secs: i64,
}

impl SamaelVerifier {
    pub fn new(clock_skew_secs: i64) -> Self {
        Self { clock_skew_secs }
    }

    fn decode(encoded: &str, binding: Binding) -> Result<String, VerifierError> {
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(cleaned)
            .map_err(|e| format!("Failed to decode SAML response: {}", e))?;

        let xml = match binding {
            Binding::Post => bytes,
            Binding::Redirect => {
                let mut inflated = Vec::new();
                flate2::read::DeflateDecoder::new(bytes.as_slice())
                    .read_to_end(&mut inflated)
                    .map_err(|e| format!("Failed to inflate SAML response: {}", e))?;
                inflated
            }
        };

        String::from_utf8(xml).map_err(|_| "SAML response is not valid UTF-8".into())
    }
}

impl AssertionVerifier for SamaelVerifier {
    fn verify(
        &self,
        encoded_response: &str,
        binding: Binding,
        descriptors: &Descriptors,
    ) -> Result<VerifiedAssertion, VerifierError> {
        let response_str = Self::decode(encoded_response, binding)?;

        debug!(binding = %binding, "Processing SAML response");

        let response: samael::schema::Response = response_str
            .parse()
            .map_err(|e| format!("Failed to parse SAML response: {}", e))?;

        if let Some(ref status) = response.status {
            let status_value = status.status_code.value.as_deref();
            if status_value != Some(STATUS_SUCCESS) {
                let message = status
                    .status_message
                    .as_ref()
                    .and_then(|m| m.value.clone())
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Err(format!("Identity provider rejected the login: {}", message).into());
            }
        }

        if descriptors.sp.want_messages_signed && response.signature.is_none() {
            return Err("SAML response is not signed".into());
        }

        let assertion = response
            .assertion
            .as_ref()
            .ok_or("SAML response contains no assertion")?;

        if descriptors.sp.want_assertions_signed && assertion.signature.is_none() {
            return Err("SAML assertion is not signed".into());
        }

        let issuer = assertion
            .issuer
            .value
            .clone()
            .ok_or("SAML assertion has no issuer")?;
        if issuer != descriptors.idp.entity_id {
            return Err(format!(
                "SAML assertion issuer {} does not match {}",
                issuer, descriptors.idp.entity_id
            )
            .into());
        }

        let now = Utc::now();
        let skew = Duration::seconds(self.clock_skew_secs);

        if let Some(ref conditions) = assertion.conditions {
            if let Some(not_before) = conditions.not_before {
                if now < not_before - skew {
                    return Err("SAML assertion not yet valid".into());
                }
            }
            if let Some(not_on_or_after) = conditions.not_on_or_after {
                if now >= not_on_or_after + skew {
                    return Err("SAML assertion has expired".into());
                }
            }
        }

        let name_id = assertion
            .subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .ok_or("SAML assertion missing NameID")?;

        let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(ref attr_statements) = assertion.attribute_statements {
            for attr_statement in attr_statements {
                for attr in &attr_statement.attributes {
                    if let Some(ref name) = attr.name {
                        let values: Vec<String> = attr
                            .values
                            .iter()
                            .filter_map(|v| v.value.clone())
                            .collect();
                        if !values.is_empty() {
                            attributes.entry(name.clone()).or_default().extend(values);
                        }
                    }
                }
            }
        }

        Ok(VerifiedAssertion {
            name_id: name_id.value.clone(),
            name_id_format: name_id.format.clone(),
            issuer,
            attributes,
        })
    }
}
