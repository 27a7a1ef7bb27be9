//! Boot-time activation with self-healing.
//!
//! Stored preferences are untrusted. If they cannot be decoded or their
//! metadata fails validation at boot, federated login is disabled and the row
//! is deleted so local authentication keeps working. This is the only place
//! configuration is discarded without surfacing the error.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SsoResult;
use crate::preferences::PreferenceStore;

/// What happened during boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BootOutcome {
    /// Nothing stored, unlicensed, or login disabled; the protocol layer stays down.
    Dormant,
    /// Stored preferences validated and the protocol layer is ready.
    Activated,
    /// Stored preferences were corrupt and have been discarded.
    Recovered { reason: String },
}

pub struct RecoveryController {
    store: Arc<PreferenceStore>,
    licensed: bool,
}

impl RecoveryController {
    pub fn new(store: Arc<PreferenceStore>, licensed: bool) -> Self {
        Self { store, licensed }
    }

    /// Load and, when licensed and enabled, activate stored preferences.
    ///
    /// Corruption never fails boot; storage failures still do.
    pub fn boot(&self) -> SsoResult<BootOutcome> {
        match self.activate() {
            Ok(outcome) => {
                info!(outcome = ?outcome, "Federation boot complete");
                Ok(outcome)
            }
            Err(e) if e.is_corruption() => {
                warn!(
                    error = %e,
                    "Stored federation preferences are invalid, disabling federated login"
                );
                self.store.reset()?;
                Ok(BootOutcome::Recovered {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn activate(&self) -> SsoResult<BootOutcome> {
        if !self.store.load_from_persistence(false)? {
            return Ok(BootOutcome::Dormant);
        }
        if !self.licensed || !self.store.login()?.enabled {
            return Ok(BootOutcome::Dormant);
        }
        self.store.load_from_persistence(true)?;
        Ok(BootOutcome::Activated)
    }
}
