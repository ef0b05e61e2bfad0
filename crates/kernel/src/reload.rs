//! Hot-reload state machine.
//!
//! ```text
//!            stage ok              activate
//!  Stable ────────────▶ Reloading ──────────▶ Stable
//!    ▲                      │
//!    │ activate             │ stage failed
//!    │                      ▼
//!    └────── Reloading ◀── Failed
//! ```
//!
//! The controller always holds exactly one fully-initialized current
//! instance. A failed load never touches it.

use std::sync::Arc;

use duet_core::error::ReloadError;
use tracing::{info, warn};

use crate::instance::{KernelInstance, LoadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Stable,
    Reloading,
    Failed,
}

impl std::fmt::Display for ReloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReloadState::Stable => "stable",
            ReloadState::Reloading => "reloading",
            ReloadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A freshly built instance waiting to become current.
///
/// Hand it back through [`ReloadController::activate`] to swap it in, or
/// [`ReloadController::abandon`] to drop it and keep the current one.
#[must_use = "a staged reload does nothing until activated"]
#[derive(Debug)]
pub struct StagedReload {
    instance: KernelInstance,
    previous: ReloadState,
}

impl StagedReload {
    pub fn instance(&self) -> &KernelInstance {
        &self.instance
    }
}

/// Owns the current kernel instance and swaps it on reload.
#[derive(Debug)]
pub struct ReloadController {
    current: Arc<KernelInstance>,
    state: ReloadState,
    generation: u64,
    options: LoadOptions,
    last_error: Option<ReloadError>,
}

impl ReloadController {
    /// Start with the empty instance, generation 0.
    pub fn new(options: LoadOptions) -> Self {
        Self {
            current: Arc::new(KernelInstance::empty()),
            state: ReloadState::Stable,
            generation: 0,
            options,
            last_error: None,
        }
    }

    /// Build an instance from `kernel_text` without making it current.
    ///
    /// On failure the controller moves to `Failed` and the current instance
    /// is left in place.
    pub fn stage(&mut self, kernel_text: &str) -> Result<StagedReload, ReloadError> {
        let previous = self.state;
        self.state = ReloadState::Reloading;

        match KernelInstance::load(kernel_text, &self.options) {
            Ok(instance) => Ok(StagedReload { instance, previous }),
            Err(e) => {
                warn!(generation = self.generation, error = %e, "Kernel reload failed, keeping previous instance");
                self.state = ReloadState::Failed;
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Make a staged instance current. Returns the new generation.
    pub fn activate(&mut self, staged: StagedReload) -> u64 {
        self.current = Arc::new(staged.instance);
        self.generation += 1;
        self.state = ReloadState::Stable;
        self.last_error = None;
        info!(
            generation = self.generation,
            bindings = self.current.bindings().len(),
            "Kernel reloaded"
        );
        self.generation
    }

    /// Drop a staged instance; the controller returns to the state it was in
    /// before staging.
    pub fn abandon(&mut self, staged: StagedReload) {
        self.state = staged.previous;
    }

    /// Stage and activate in one step.
    pub fn reload(&mut self, kernel_text: &str) -> Result<u64, ReloadError> {
        let staged = self.stage(kernel_text)?;
        Ok(self.activate(staged))
    }

    /// The instance callers should use right now.
    pub fn current(&self) -> Arc<KernelInstance> {
        Arc::clone(&self.current)
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// Number of successful reloads so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Why the most recent reload failed, cleared by the next success.
    pub fn last_error(&self) -> Option<&ReloadError> {
        self.last_error.as_ref()
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }
}
