//! Recovery state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the credential recovery state machine currently stands.
///
/// A non-`Valid` state names the last layer that was applied. If the call
/// retried after that layer still fails, the machine escalates to
/// [`RecoveryState::escalate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    /// Credentials are believed good.
    #[default]
    Valid,
    /// Re-derive CSRF token and session id from the landing page.
    NeedsCsrfRefresh,
    /// Re-read the credential store for externally written credentials.
    NeedsDiskReload,
    /// Delegate to the headless login collaborator.
    NeedsInteractive,
    /// Every layer was tried. Manual re-authentication required.
    Failed,
}

impl RecoveryState {
    /// The recovery layers in escalation order.
    pub const LAYERS: [RecoveryState; 3] = [
        RecoveryState::NeedsCsrfRefresh,
        RecoveryState::NeedsDiskReload,
        RecoveryState::NeedsInteractive,
    ];

    /// The state that follows when this one did not help.
    pub fn escalate(self) -> Self {
        match self {
            Self::Valid => Self::NeedsCsrfRefresh,
            Self::NeedsCsrfRefresh => Self::NeedsDiskReload,
            Self::NeedsDiskReload => Self::NeedsInteractive,
            Self::NeedsInteractive | Self::Failed => Self::Failed,
        }
    }

    /// Returns true if this state names a recovery layer.
    pub fn is_layer(self) -> bool {
        Self::LAYERS.contains(&self)
    }

    /// Returns the display name for this state.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::NeedsCsrfRefresh => "csrf_refresh",
            Self::NeedsDiskReload => "disk_reload",
            Self::NeedsInteractive => "interactive_login",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
