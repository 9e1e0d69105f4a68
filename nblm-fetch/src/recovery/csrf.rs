//! CSRF/session refresh from the landing page.
//!
//! The cheapest layer: the cookies are kept and only the short-lived CSRF
//! token and session id are re-derived.

use async_trait::async_trait;
use nblm_core::{Credential, RecoveryState};
use tracing::{debug, instrument, warn};

use crate::context::RecoveryContext;
use crate::error::LayerError;
use crate::host::page::{PageTokens, is_sign_in_redirect};

use super::layer::RecoveryLayer;

/// Re-derives CSRF token and session id, keeping cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfRefreshLayer;

impl CsrfRefreshLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryLayer for CsrfRefreshLayer {
    fn state(&self) -> RecoveryState {
        RecoveryState::NeedsCsrfRefresh
    }

    async fn is_available(&self, ctx: &RecoveryContext) -> bool {
        ctx.session
            .snapshot()
            .await
            .is_some_and(|(_, session)| session.credential.has_cookies())
    }

    async fn recover(&self, ctx: &RecoveryContext) -> Result<(), LayerError> {
        let (_, session) = ctx
            .session
            .snapshot()
            .await
            .ok_or_else(|| LayerError::Rejected("no credential in memory".to_string()))?;

        let (refreshed, build_label) = derive_tokens(ctx, &session.credential).await?;
        persist(ctx, &refreshed).await;
        ctx.install_credential(refreshed, build_label, None).await;
        Ok(())
    }
}

/// Fetches the landing page with the credential's cookies and returns the
/// credential with fresh tokens, plus the page's build label.
///
/// Fails if the fetch lands on the sign-in flow or the page carries no
/// CSRF token.
#[instrument(skip(ctx, credential))]
pub async fn derive_tokens(
    ctx: &RecoveryContext,
    credential: &Credential,
) -> Result<(Credential, Option<String>), LayerError> {
    let page = ctx
        .transport
        .fetch_page(
            &ctx.settings.landing_url(),
            &credential.cookie_header(),
            ctx.settings.page_fetch_timeout,
        )
        .await?;

    if is_sign_in_redirect(&page.final_url) {
        return Err(LayerError::Rejected(
            "cookies expired: landing page redirected to sign-in".to_string(),
        ));
    }
    if !(200..300).contains(&page.status) {
        return Err(LayerError::Rejected(format!(
            "landing page returned HTTP {}",
            page.status
        )));
    }

    let Some(tokens) = PageTokens::extract(&page.body) else {
        dump_page(ctx, &page.body).await;
        return Err(LayerError::Rejected(
            "CSRF token not found in landing page".to_string(),
        ));
    };

    debug!(
        has_session_id = tokens.session_id.is_some(),
        build_label = ?tokens.build_label,
        "Extracted page tokens"
    );
    let refreshed = credential.with_tokens(tokens.csrf_token, tokens.session_id.unwrap_or_default());
    Ok((refreshed, tokens.build_label))
}

/// Saves refreshed tokens. Failures are logged, not returned.
pub(crate) async fn persist(ctx: &RecoveryContext, credential: &Credential) {
    if let Err(e) = ctx.store.save(credential).await {
        warn!(error = %e, "Failed to persist refreshed credential");
    }
}

async fn dump_page(ctx: &RecoveryContext, body: &str) {
    let Some(path) = &ctx.settings.debug_dump_path else {
        return;
    };
    match tokio::fs::write(path, body).await {
        Ok(()) => warn!(path = %path.display(), "Wrote landing page for debugging"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write debug page"),
    }
}
