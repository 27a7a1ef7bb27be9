//! Metadata fetching by URL.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

use super::validate::{validate_metadata, IdentityProviderDescriptor};
use crate::error::{SsoError, SsoResult};

/// Metadata that passed validation, with the descriptor derived from it.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    pub xml: String,
    pub idp: IdentityProviderDescriptor,
}

/// Fetches IdP metadata and only hands back documents that validate.
pub struct MetadataResolver {
    /// Client that verifies TLS certificates.
    verifying: reqwest::Client,
    /// Client that accepts any certificate (non-production use).
    permissive: reqwest::Client,
}

impl MetadataResolver {
    /// Create a resolver whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let verifying = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let permissive = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            verifying,
            permissive,
        })
    }

    /// Validate a literal metadata document.
    pub fn resolve_inline(&self, xml: &str) -> SsoResult<ResolvedMetadata> {
        let idp = validate_metadata(xml)?;
        Ok(ResolvedMetadata {
            xml: xml.to_string(),
            idp,
        })
    }

    /// GET the metadata URL and validate the body.
    ///
    /// Transport failures, non-200 answers and documents that fail validation
    /// are all reported as `BadRequest` naming the URL.
    pub async fn fetch_from_url(&self, url: &str, ssl_verification: bool) -> SsoResult<ResolvedMetadata> {
        debug!(url = %url, ssl_verification, "Fetching IdP metadata");

        let client = if ssl_verification {
            &self.verifying
        } else {
            &self.permissive
        };

        let response = client.get(url).send().await.map_err(|e| {
            SsoError::BadRequest(format!("Failed to fetch metadata from {}: {}", url, e))
        })?;

        if response.status() != StatusCode::OK {
            return Err(SsoError::BadRequest(format!(
                "Metadata URL {} returned status {}",
                url,
                response.status()
            )));
        }

        let body = response.text().await.map_err(|e| {
            SsoError::BadRequest(format!("Failed to read metadata from {}: {}", url, e))
        })?;

        let idp = validate_metadata(&body).map_err(|e| {
            SsoError::BadRequest(format!("Metadata fetched from {} is invalid: {}", url, e))
        })?;

        info!(url = %url, entity_id = %idp.entity_id, "Fetched IdP metadata");

        Ok(ResolvedMetadata {
            xml: body,
            idp,
        })
    }
}
