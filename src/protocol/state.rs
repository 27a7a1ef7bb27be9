//! Protocol layer lifecycle.
//!
//! The layer starts `Uninitialized` and becomes `Ready` once descriptors are
//! built. Activation is single-flight: concurrent first callers wait on the
//! activation guard and all observe the same descriptors. Readers never take the
//! guard; they clone the current `Arc` and keep using it even if a rebuild
//! swaps in newer descriptors meanwhile.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

use super::descriptor::Descriptors;
use crate::error::{SsoError, SsoResult};

/// Protocol layer state.
#[derive(Debug, Clone)]
pub enum ProtocolState {
    Uninitialized,
    Ready(Arc<Descriptors>),
}

/// Holder of the active descriptors.
pub struct ProtocolLayer {
    state: RwLock<ProtocolState>,
    /// Serializes activation and rebuilds.
    activation: Mutex<()>,
    /// Number of times descriptors were built.
    builds: AtomicUsize,
}

impl Default for ProtocolLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolLayer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ProtocolState::Uninitialized),
            activation: Mutex::new(()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Whether descriptors are available.
    pub fn is_ready(&self) -> bool {
        self.descriptors().is_ok()
    }

    /// Current descriptors, or `NotInitialized` before activation.
    pub fn descriptors(&self) -> SsoResult<Arc<Descriptors>> {
        let state = self
            .state
            .read()
            .map_err(|_| SsoError::Internal("Protocol state lock poisoned".to_string()))?;
        match &*state {
            ProtocolState::Ready(descriptors) => Ok(Arc::clone(descriptors)),
            ProtocolState::Uninitialized => Err(SsoError::NotInitialized(
                "federation descriptors have not been built",
            )),
        }
    }

    /// Build descriptors once. Callers arriving while another activation runs
    /// wait for it and reuse its result.
    pub fn activate<F>(&self, build: F) -> SsoResult<Arc<Descriptors>>
    where
        F: FnOnce() -> SsoResult<Descriptors>,
    {
        let _guard = self
            .activation
            .lock()
            .map_err(|_| SsoError::Internal("Protocol activation lock poisoned".to_string()))?;

        if let Ok(descriptors) = self.descriptors() {
            debug!("Protocol layer already active");
            return Ok(descriptors);
        }

        self.install(build()?)
    }

    /// Replace the descriptors unconditionally (after a preference change).
    /// On failure the previous state is kept.
    pub fn rebuild<F>(&self, build: F) -> SsoResult<Arc<Descriptors>>
    where
        F: FnOnce() -> SsoResult<Descriptors>,
    {
        let _guard = self
            .activation
            .lock()
            .map_err(|_| SsoError::Internal("Protocol activation lock poisoned".to_string()))?;

        self.install(build()?)
    }

    /// Drop the descriptors; dependent operations fail until reactivation.
    pub fn invalidate(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = ProtocolState::Uninitialized;
        }
        debug!("Protocol layer invalidated");
    }

    /// How many times descriptors have been built.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn install(&self, descriptors: Descriptors) -> SsoResult<Arc<Descriptors>> {
        let descriptors = Arc::new(descriptors);
        let mut state = self
            .state
            .write()
            .map_err(|_| SsoError::Internal("Protocol state lock poisoned".to_string()))?;
        *state = ProtocolState::Ready(Arc::clone(&descriptors));
        self.builds.fetch_add(1, Ordering::SeqCst);

        info!(
            idp = %descriptors.idp.entity_id,
            sp = %descriptors.sp.entity_id,
            "Federation descriptors ready"
        );
        Ok(descriptors)
    }
}
