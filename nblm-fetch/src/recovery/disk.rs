//! Reload from the credential store.
//!
//! Picks up credentials written by another process, typically the external
//! login tool. A file written after our last load is always accepted,
//! however fresh the in-memory copy looks.

use async_trait::async_trait;
use nblm_core::RecoveryState;
use tracing::debug;

use crate::context::{CredentialSource, RecoveryContext};
use crate::error::LayerError;

use super::csrf::{derive_tokens, persist};
use super::layer::RecoveryLayer;

/// Re-reads the credential store.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskReloadLayer;

impl DiskReloadLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryLayer for DiskReloadLayer {
    fn state(&self) -> RecoveryState {
        RecoveryState::NeedsDiskReload
    }

    async fn recover(&self, ctx: &RecoveryContext) -> Result<(), LayerError> {
        let external_change = ctx.store.has_external_change().await;
        let loaded = ctx.store.load().await?;

        if !loaded.has_cookies() {
            return Err(LayerError::Rejected(
                "stored credential has no cookies".to_string(),
            ));
        }

        let unchanged = ctx
            .session
            .snapshot()
            .await
            .is_some_and(|(_, session)| session.credential.same_material(&loaded));
        if unchanged && !external_change {
            return Err(LayerError::Rejected(
                "stored credential is unchanged".to_string(),
            ));
        }
        debug!(external_change, "Accepting stored credential");

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
