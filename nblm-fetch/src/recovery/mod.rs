//! Authentication recovery state machine.
//!
//! ```text
//! Valid -> NeedsCsrfRefresh -> NeedsDiskReload -> NeedsInteractive -> Failed
//! ```
//!
//! Each auth-class failure escalates one step from the current state. A
//! layer that fails or is unavailable escalates again within the same
//! round, so one round ends either with fresh credentials installed or with
//! every remaining layer spent. A network failure inside a layer ends the
//! round without escalating, so the next auth failure retries that layer.
//! The whole round runs under one lock: a
//! caller that waited for it and finds the session generation changed
//! retries with the new credentials instead of recovering again.

pub mod csrf;
pub mod disk;
pub mod interactive;
pub mod layer;

pub use csrf::{CsrfRefreshLayer, derive_tokens};
pub use disk::DiskReloadLayer;
pub use interactive::{CommandLogin, HeadlessLogin, InteractiveLoginLayer};
pub use layer::{LayerAttempt, LayerOutcome, RecoveryBudget, RecoveryLayer};

use nblm_core::RecoveryState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::context::RecoveryContext;
use crate::error::LayerError;

// ============================================================================
// Recovery Outcome
// ============================================================================

/// Result of one recovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// This caller ran a layer that installed new credentials.
    Recovered {
        /// The layer that succeeded.
        layer: RecoveryState,
    },
    /// Credentials changed while this caller waited. Retry with them.
    Shared,
    /// A layer hit a network failure. The state is unchanged.
    Interrupted {
        /// The layer that was running.
        layer: RecoveryState,
        /// The transport error.
        reason: String,
    },
    /// No layer could recover.
    Exhausted {
        /// The last layer error, or why no layer ran.
        reason: String,
    },
}

// ============================================================================
// Auth Recovery Engine
// ============================================================================

/// Single-flight, layered credential recovery.
pub struct AuthRecoveryEngine {
    layers: Vec<Box<dyn RecoveryLayer>>,
    state: Mutex<RecoveryState>,
    layer_runs: AtomicUsize,
}

impl AuthRecoveryEngine {
    /// Creates an engine with the standard three layers.
    pub fn new() -> Self {
        Self::with_layers(vec![
            Box::new(CsrfRefreshLayer::new()),
            Box::new(DiskReloadLayer::new()),
            Box::new(InteractiveLoginLayer::new()),
        ])
    }

    /// Creates an engine with custom layers.
    pub fn with_layers(layers: Vec<Box<dyn RecoveryLayer>>) -> Self {
        Self {
            layers,
            state: Mutex::new(RecoveryState::Valid),
            layer_runs: AtomicUsize::new(0),
        }
    }

    /// Current state. Waits for a running recovery to finish.
    pub async fn state(&self) -> RecoveryState {
        *self.state.lock().await
    }

    /// Total layers run since creation.
    pub fn layer_runs(&self) -> usize {
        self.layer_runs.load(Ordering::Relaxed)
    }

    /// Resets to `Valid` after credentials were replaced from outside.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if *state != RecoveryState::Valid {
            info!(from = %*state, "Recovery state reset");
            *state = RecoveryState::Valid;
        }
    }

    /// Records that the server accepted the current credentials.
    ///
    /// Skipped while a recovery round holds the lock.
    pub fn mark_valid(&self) {
        if let Ok(mut state) = self.state.try_lock() {
            if *state != RecoveryState::Valid {
                debug!(from = %*state, "Credentials accepted");
                *state = RecoveryState::Valid;
            }
        }
    }

    fn layer_for(&self, state: RecoveryState) -> Option<&dyn RecoveryLayer> {
        self.layers
            .iter()
            .find(|layer| layer.state() == state)
            .map(|layer| &**layer)
    }

    /// Runs one recovery round for a call that failed with the session at
    /// `observed_generation`.
    #[instrument(skip(self, ctx, budget), fields(round = budget.rounds() + 1))]
    pub async fn recover(
        &self,
        ctx: &RecoveryContext,
        observed_generation: u64,
        budget: &mut RecoveryBudget,
    ) -> RecoveryOutcome {
        let mut state = self.state.lock().await;
        budget.start_round();

        if ctx.session.generation() != observed_generation {
            debug!("Credentials changed while waiting, reusing them");
            return RecoveryOutcome::Shared;
        }

        if *state == RecoveryState::Failed {
            return RecoveryOutcome::Exhausted {
                reason: "recovery already failed; waiting for new credentials".to_string(),
            };
        }

        let mut last_error = None;
        let mut next = state.escalate();
        while next.is_layer() {
            if budget.has_attempted(next) {
                next = next.escalate();
                continue;
            }
            let Some(layer) = self.layer_for(next) else {
                next = next.escalate();
                continue;
            };
            if budget.layers_exhausted() {
                return RecoveryOutcome::Exhausted {
                    reason: last_error
                        .unwrap_or_else(|| "recovery layer budget spent".to_string()),
                };
            }

            if !layer.is_available(ctx).await {
                info!(layer = %next, "Recovery layer not available, skipping");
                budget.record(LayerAttempt::skipped(next));
                next = next.escalate();
                continue;
            }

            info!(layer = %next, "Running recovery layer");
            self.layer_runs.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();

            match layer.recover(ctx).await {
                Ok(()) => {
                    let duration = start.elapsed();
                    info!(layer = %next, duration = ?duration, "Recovery layer succeeded");
                    budget.record(LayerAttempt::success(next, duration));
                    *state = next;
                    return RecoveryOutcome::Recovered { layer: next };
                }
                Err(LayerError::Transport(error)) => {
                    let duration = start.elapsed();
                    warn!(layer = %next, error = %error, duration = ?duration, "Recovery layer interrupted by network failure");
                    budget.record(LayerAttempt::failure(next, error.to_string(), duration));
                    return RecoveryOutcome::Interrupted {
                        layer: next,
                        reason: error.to_string(),
                    };
                }
                Err(error) => {
                    let duration = start.elapsed();
                    warn!(layer = %next, error = %error, duration = ?duration, "Recovery layer failed");
                    budget.record(LayerAttempt::failure(next, error.to_string(), duration));
                    last_error = Some(error.to_string());
                    next = next.escalate();
                }
            }
        }

        warn!("All recovery layers exhausted");
        *state = RecoveryState::Failed;
        RecoveryOutcome::Exhausted {
            reason: last_error.unwrap_or_else(|| "no recovery layer available".to_string()),
        }
    }
}

impl Default for AuthRecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthRecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRecoveryEngine")
            .field("layers", &self.layers.iter().map(|l| l.state()).collect::<Vec<_>>())
            .field("layer_runs", &self.layer_runs())
            .finish_non_exhaustive()
    }
}
