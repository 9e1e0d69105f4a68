//! Headless re-login through an external collaborator.
//!
//! Browser automation is not done here. The collaborator reports pass or
//! fail and leaves fresh credentials in the store; this layer then loads
//! them.

use async_trait::async_trait;
use nblm_core::RecoveryState;
use nblm_store::ClientSettings;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::context::{CredentialSource, RecoveryContext};
use crate::error::{LayerError, RpcError};
use crate::host::process::ProcessRunner;

use super::csrf::{derive_tokens, persist};
use super::layer::RecoveryLayer;

// ============================================================================
// Headless Login Collaborator
// ============================================================================

/// Performs a non-interactive login using an established browser profile.
#[async_trait]
pub trait HeadlessLogin: Send + Sync {
    /// Quick check that the collaborator can run.
    async fn is_available(&self) -> bool {
        true
    }

    /// Logs in and writes fresh credentials to the store.
    async fn login(&self) -> Result<(), RpcError>;
}

/// Runs an external login command.
#[derive(Debug, Clone)]
pub struct CommandLogin {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    runner: ProcessRunner,
}

impl CommandLogin {
    /// Creates a login running `program args...` with a timeout.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            runner: ProcessRunner::new(),
        }
    }

    /// Creates a login from the configured command, or `None` if the
    /// command is empty.
    pub fn from_settings(settings: &ClientSettings) -> Option<Self> {
        let (program, args) = settings.login_command.split_first()?;
        Some(Self::new(
            program.clone(),
            args.to_vec(),
            settings.timeouts.login(),
        ))
    }
}

#[async_trait]
impl HeadlessLogin for CommandLogin {
    async fn is_available(&self) -> bool {
        self.runner.command_exists(&self.program)
    }

    #[instrument(skip(self), fields(program = %self.program))]
    async fn login(&self) -> Result<(), RpcError> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let output = self
            .runner
            .run_with_timeout(&self.program, &args, self.timeout)
            .await?
            .into_result()?;
        debug!(duration = ?output.duration, "Login command succeeded");
        Ok(())
    }
}

// ============================================================================
// Interactive Login Layer
// ============================================================================

/// Delegates to the headless login collaborator, then reloads the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractiveLoginLayer;

impl InteractiveLoginLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryLayer for InteractiveLoginLayer {
    fn state(&self) -> RecoveryState {
        RecoveryState::NeedsInteractive
    }

    async fn is_available(&self, ctx: &RecoveryContext) -> bool {
        match &ctx.login {
            Some(login) => login.is_available().await,
            None => false,
        }
    }

    async fn recover(&self, ctx: &RecoveryContext) -> Result<(), LayerError> {
        let login = ctx
            .login
            .as_ref()
            .ok_or_else(|| LayerError::Rejected("no login collaborator configured".to_string()))?;

        login
            .login()
            .await
            .map_err(|e| LayerError::Login(e.to_string()))?;

        let loaded = ctx.store.load().await?;
        if !loaded.has_cookies() {
            return Err(LayerError::Rejected(
                "login finished but the store has no cookies".to_string(),
            ));
        }

        let (credential, build_label) = if loaded.csrf_token.is_empty() {
            let derived = derive_tokens(ctx, &loaded).await?;
            persist(ctx, &derived.0).await;
            derived
        } else {
            (loaded, None)
        };

        ctx.install_credential(credential, build_label, Some(CredentialSource::Store))
            .await;
        Ok(())
    }
}
