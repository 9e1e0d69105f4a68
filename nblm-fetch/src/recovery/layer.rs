//! Recovery layer trait and attempt records.
//!
//! A layer is one way of getting usable credentials back. Layers are tried
//! in escalation order: CSRF refresh, disk reload, interactive login.

use async_trait::async_trait;
use nblm_core::RecoveryState;
use std::fmt;
use std::time::Duration;

use crate::context::RecoveryContext;
use crate::error::LayerError;

// ============================================================================
// Recovery Layer Trait
// ============================================================================

/// One recovery action.
///
/// ## Implementing a Layer
///
/// ```ignore
/// struct ReloadLayer;
///
/// #[async_trait]
/// impl RecoveryLayer for ReloadLayer {
///     fn state(&self) -> RecoveryState {
///         RecoveryState::NeedsDiskReload
///     }
///
///     async fn recover(&self, ctx: &RecoveryContext) -> Result<(), LayerError> {
///         let credential = ctx.store.load().await?;
///         ctx.install_credential(credential, None, None).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RecoveryLayer: Send + Sync {
    /// The state this layer handles.
    fn state(&self) -> RecoveryState;

    /// Quick check that the layer can run at all. Not network-dependent.
    async fn is_available(&self, _ctx: &RecoveryContext) -> bool {
        true
    }

    /// Runs the layer. On success the new credential is already installed
    /// in the session.
    async fn recover(&self, ctx: &RecoveryContext) -> Result<(), LayerError>;
}

// ============================================================================
// Layer Attempt
// ============================================================================

/// What happened when a layer was considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOutcome {
    /// Credentials were installed.
    Succeeded,
    /// The layer ran and failed.
    Failed(String),
    /// The layer was not available.
    Skipped,
}

/// Record of a single layer attempt.
#[derive(Debug, Clone)]
pub struct LayerAttempt {
    /// The layer.
    pub layer: RecoveryState,
    /// Outcome.
    pub outcome: LayerOutcome,
    /// How long the layer ran.
    pub duration: Duration,
}

impl LayerAttempt {
    /// Creates a successful attempt record.
    pub fn success(layer: RecoveryState, duration: Duration) -> Self {
        Self {
            layer,
            outcome: LayerOutcome::Succeeded,
            duration,
        }
    }

    /// Creates a failed attempt record.
    pub fn failure(layer: RecoveryState, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            layer,
            outcome: LayerOutcome::Failed(error.into()),
            duration,
        }
    }

    /// Creates a skipped attempt record.
    pub fn skipped(layer: RecoveryState) -> Self {
        Self {
            layer,
            outcome: LayerOutcome::Skipped,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the layer actually ran.
    pub fn ran(&self) -> bool {
        !matches!(self.outcome, LayerOutcome::Skipped)
    }
}

impl fmt::Display for LayerAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            LayerOutcome::Succeeded => write!(f, "{}: succeeded", self.layer),
            LayerOutcome::Failed(error) => write!(f, "{}: {error}", self.layer),
            LayerOutcome::Skipped => write!(f, "{}: not available", self.layer),
        }
    }
}

// ============================================================================
// Recovery Budget
// ============================================================================

/// Per-call record of recovery work.
///
/// A call retries at most `max_layers` times after recovery and never runs
/// the same layer twice.
#[derive(Debug, Clone)]
pub struct RecoveryBudget {
    max_layers: usize,
    rounds: usize,
    attempts: Vec<LayerAttempt>,
}

impl RecoveryBudget {
    /// Creates a budget allowing `max_layers` recovery rounds.
    pub fn new(max_layers: usize) -> Self {
        Self {
            max_layers,
            rounds: 0,
            attempts: Vec::new(),
        }
    }

    /// Returns true once no further recovery round is allowed.
    pub fn is_spent(&self) -> bool {
        self.rounds >= self.max_layers
    }

    /// Returns true if `layers_run` has reached the limit.
    pub fn layers_exhausted(&self) -> bool {
        self.layers_run() >= self.max_layers
    }

    /// Number of recovery rounds started.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of layers that actually ran.
    pub fn layers_run(&self) -> usize {
        self.attempts.iter().filter(|a| a.ran()).count()
    }

    /// Returns true if the layer was already considered for this call.
    pub fn has_attempted(&self, layer: RecoveryState) -> bool {
        self.attempts.iter().any(|a| a.layer == layer)
    }

    /// Layers that ran, in order.
    pub fn layers_attempted(&self) -> Vec<RecoveryState> {
        self.attempts
            .iter()
            .filter(|a| a.ran())
            .map(|a| a.layer)
            .collect()
    }

    /// All attempt records, including skipped layers.
    pub fn attempts(&self) -> &[LayerAttempt] {
        &self.attempts
    }

    pub(crate) fn start_round(&mut self) {
        self.rounds += 1;
    }

    pub(crate) fn record(&mut self, attempt: LayerAttempt) {
        self.attempts.push(attempt);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_tracks_layers() {
        let mut budget = RecoveryBudget::new(2);
        assert!(!budget.is_spent());

        budget.start_round();
        budget.record(LayerAttempt::failure(
            RecoveryState::NeedsCsrfRefresh,
            "no token",
            Duration::from_millis(5),
        ));
        budget.record(LayerAttempt::skipped(RecoveryState::NeedsInteractive));

        assert_eq!(budget.layers_run(), 1);
        assert!(budget.has_attempted(RecoveryState::NeedsInteractive));
        assert_eq!(budget.layers_attempted(), vec![RecoveryState::NeedsCsrfRefresh]);
        assert!(!budget.is_spent());

        budget.start_round();
        assert!(budget.is_spent());
    }

    #[test]
    fn test_attempt_display() {
        let attempt = LayerAttempt::failure(
            RecoveryState::NeedsDiskReload,
            "stored credential is unchanged",
            Duration::ZERO,
        );
        assert_eq!(attempt.to_string(), "disk_reload: stored credential is unchanged");
        assert_eq!(
            LayerAttempt::skipped(RecoveryState::NeedsInteractive).to_string(),
            "interactive_login: not available"
        );
    }
}
