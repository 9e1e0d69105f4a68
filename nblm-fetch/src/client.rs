//! The RPC client.
//!
//! One call goes through: current credentials → encode → transport (with
//! bounded retries for transport failures) → decode and correlate. An
//! auth-class failure hands off to the [`AuthRecoveryEngine`] and the same
//! call is retried once per recovery round.

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use nblm_core::{Credential, CredentialValidator, RpcValue, parse_cookie_header};
use nblm_store::{ClientSettings, CredentialStore, FileCredentialStore};
use rand::Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{
    ANTI_XSSI_PREFIX, BatchCall, CallKey, FrameDecoder, RequestContext, RpcResponse, correlate,
    decode_response, encode_batch, encode_streaming, looks_like_login_page, result_items,
};
use crate::context::{CredentialSource, RecoveryContext, RecoverySettings, Session, SessionState};
use crate::error::{
    RPC_CODE_RESOURCE_EXHAUSTED, RPC_CODE_UNAUTHENTICATED, RpcError, TransportError,
};
use crate::host::http::{
    ReqwestTransport, StreamingResponse, Transport, TransportRequest, TransportResponse,
};
use crate::recovery::csrf::persist;
use crate::recovery::{
    AuthRecoveryEngine, CommandLogin, HeadlessLogin, RecoveryBudget, RecoveryOutcome,
    derive_tokens,
};
use crate::retry::RetryStrategy;

/// Step between consecutive `_reqid` values.
pub const REQUEST_ID_STEP: u64 = 100_000;

/// Name used in logs and errors for the streamed query.
pub const STREAM_QUERY_NAME: &str = "stream_query";

/// Bytes of a streamed body kept to recognise a sign-in page.
const LOGIN_SNIFF_BYTES: usize = 4096;

// ============================================================================
// Call Options
// ============================================================================

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// `source-path` hint.
    pub source_path: String,
    /// Whole-request timeout. `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// Safe to repeat after an ambiguous failure.
    pub idempotent: bool,
    /// The call cannot be undone.
    pub requires_confirmation: bool,
    /// The caller confirmed an irreversible call.
    pub confirmed: bool,
    /// Readable name for logs and errors.
    pub name: Option<String>,
    /// Recovery rounds this call may consume. `None` uses the configured limit.
    pub max_recovery_layers: Option<usize>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            source_path: "/".to_string(),
            timeout: None,
            idempotent: true,
            requires_confirmation: false,
            confirmed: false,
            name: None,
            max_recovery_layers: None,
        }
    }
}

impl CallOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source path.
    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the call as not safe to repeat.
    #[must_use]
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// Marks the call as irreversible. Implies non-idempotent.
    #[must_use]
    pub fn destructive(mut self) -> Self {
        self.requires_confirmation = true;
        self.idempotent = false;
        self
    }

    /// Confirms an irreversible call.
    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// Sets the readable name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the recovery round limit.
    #[must_use]
    pub fn with_max_recovery_layers(mut self, layers: usize) -> Self {
        self.max_recovery_layers = Some(layers);
        self
    }

    /// The name if set, else `call_id`.
    pub fn label(&self, call_id: &str) -> String {
        self.name.clone().unwrap_or_else(|| call_id.to_string())
    }

    /// Fails if the call is irreversible and not confirmed.
    pub fn check_confirmation(&self, call_id: &str) -> Result<(), RpcError> {
        if self.requires_confirmation && !self.confirmed {
            return Err(RpcError::IrreversibleActionNotConfirmed(self.label(call_id)));
        }
        Ok(())
    }
}

// ============================================================================
// RPC Client
// ============================================================================

/// Client for the batched and streaming transports.
///
/// Owns the live credential and the recovery state. Clone an `Arc` of it
/// to share between tasks.
pub struct RpcClient {
    settings: ClientSettings,
    ctx: RecoveryContext,
    engine: AuthRecoveryEngine,
    retry: RetryStrategy,
    validator: CredentialValidator,
    request_counter: AtomicU64,
    init_lock: Mutex<()>,
}

impl RpcClient {
    /// Creates a client without a login collaborator.
    pub fn new(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let retry = RetryStrategy::new(settings.max_transient_attempts)
            .with_base_delay(settings.retry_base_delay());
        let ctx = RecoveryContext::new(
            transport,
            store,
            Arc::new(SessionState::new()),
            RecoverySettings::from_client_settings(&settings),
        );
        let first_request_id = rand::thread_rng().gen_range(100_000..1_000_000);

        Self {
            settings,
            ctx,
            engine: AuthRecoveryEngine::new(),
            retry,
            validator: CredentialValidator::new(),
            request_counter: AtomicU64::new(first_request_id),
            init_lock: Mutex::new(()),
        }
    }

    /// Creates a client with the reqwest transport, the file store and the
    /// configured login command. Traffic is limited to
    /// [`SERVICE_DOMAINS`](crate::host::http::SERVICE_DOMAINS).
    pub fn from_settings(settings: ClientSettings) -> Result<Self, RpcError> {
        settings.validate()?;
        let transport =
            ReqwestTransport::for_service(&settings.base_url).map_err(RpcError::Transport)?;
        let store = FileCredentialStore::new(settings.credential_path());
        let login = CommandLogin::from_settings(&settings);

        let client = Self::new(settings, Arc::new(transport), Arc::new(store));
        Ok(match login {
            Some(login) => client.with_login(Arc::new(login)),
            None => client,
        })
    }

    /// Sets the headless login collaborator.
    #[must_use]
    pub fn with_login(mut self, login: Arc<dyn HeadlessLogin>) -> Self {
        self.ctx.login = Some(login);
        self
    }

    /// Replaces the recovery engine.
    #[must_use]
    pub fn with_recovery_engine(mut self, engine: AuthRecoveryEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Client settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The recovery engine.
    pub fn recovery(&self) -> &AuthRecoveryEngine {
        &self.engine
    }

    /// Current credential generation. 0 until credentials are loaded.
    pub fn credential_generation(&self) -> u64 {
        self.ctx.session.generation()
    }

    /// The live credential, loading it first if needed.
    pub async fn credential(&self) -> Result<Credential, RpcError> {
        Ok(self.current_session().await?.1.credential)
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter
            .fetch_add(REQUEST_ID_STEP, Ordering::Relaxed)
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Re-reads the store, installs its credential and resets recovery.
    ///
    /// Call after an out-of-band login.
    pub async fn reload_credentials(&self) -> Result<(), RpcError> {
        self.load_from_store(true).await.map(|_| ())
    }

    async fn current_session(&self) -> Result<(u64, Session), RpcError> {
        if let Some((generation, session)) = self.ctx.session.snapshot().await {
            if session.source == CredentialSource::Store
                && self.ctx.store.has_external_change().await
            {
                info!("Credential file changed on disk, reloading");
                return self.load_from_store(false).await;
            }
            return Ok((generation, session));
        }

        let _guard = self.init_lock.lock().await;
        if let Some(snapshot) = self.ctx.session.snapshot().await {
            return Ok(snapshot);
        }

        let (credential, source) = match &self.settings.cookie_header {
            Some(header) => (self.environment_credential(header), CredentialSource::Environment),
            None => (self.load_stored().await?, CredentialSource::Store),
        };
        debug!(source = ?source, "Loaded credentials");
        self.install(credential, source).await
    }

    /// Loads under the init lock. Without `force`, a change already picked
    /// up by another caller is not loaded twice.
    async fn load_from_store(&self, force: bool) -> Result<(u64, Session), RpcError> {
        let _guard = self.init_lock.lock().await;
        if !force && !self.ctx.store.has_external_change().await {
            if let Some(snapshot) = self.ctx.session.snapshot().await {
                return Ok(snapshot);
            }
        }

        let credential = self.load_stored().await?;
        let installed = self.install(credential, CredentialSource::Store).await?;
        self.engine.reset().await;
        Ok(installed)
    }

    async fn install(
        &self,
        credential: Credential,
        source: CredentialSource,
    ) -> Result<(u64, Session), RpcError> {
        self.check_credential(&credential);
        let (credential, page_label) = self.complete_tokens(credential).await;
        self.ctx
            .install_credential(credential, page_label, Some(source))
            .await;
        self.ctx
            .session
            .snapshot()
            .await
            .ok_or(RpcError::NoCredentials)
    }

    fn environment_credential(&self, header: &str) -> Credential {
        let mut credential = Credential::from_cookies(parse_cookie_header(header));
        if let Some(csrf) = &self.settings.csrf_token {
            credential.csrf_token.clone_from(csrf);
        }
        if let Some(sid) = &self.settings.session_id {
            credential.session_id.clone_from(sid);
        }
        credential
    }

    async fn load_stored(&self) -> Result<Credential, RpcError> {
        let credential = match self.ctx.store.load().await {
            Ok(credential) => credential,
            Err(e) if e.is_not_found() => return Err(RpcError::NoCredentials),
            Err(e) => return Err(e.into()),
        };
        if !credential.has_cookies() {
            return Err(RpcError::NoCredentials);
        }
        Ok(credential)
    }

    fn check_credential(&self, credential: &Credential) {
        let missing = credential.missing_cookies();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Credential is missing required cookies");
        }
        if self.validator.is_stale(credential, Utc::now()) {
            warn!(
                extracted_at = %credential.extracted_at,
                "Cookies are old and may have expired"
            );
        }
    }

    /// Derives CSRF/session values for a structurally invalid credential,
    /// such as one missing either token. Failures are logged: the first
    /// call's auth failure drives recovery instead.
    async fn complete_tokens(&self, credential: Credential) -> (Credential, Option<String>) {
        if self.validator.is_structurally_valid(&credential) {
            return (credential, None);
        }
        match derive_tokens(&self.ctx, &credential).await {
            Ok((refreshed, page_label)) => {
                persist(&self.ctx, &refreshed).await;
                (refreshed, page_label)
            }
            Err(e) => {
                warn!(error = %e, "Could not derive CSRF token");
                (credential, None)
            }
        }
    }

    fn request_context(&self, session: &Session, source_path: &str) -> RequestContext {
        RequestContext::new(self.ctx.settings.base_url.as_str(), session.build_label.as_str())
            .with_source_path(source_path)
            .with_tokens(
                session.credential.csrf_token.as_str(),
                session.credential.session_id.as_str(),
            )
            .with_language(self.settings.language.as_str())
            .with_request_id(self.next_request_id())
    }

    // ========================================================================
    // Batched Calls
    // ========================================================================

    /// Runs one call and returns its response.
    ///
    /// An error marker with code 8 is [`RpcError::RateLimited`]; any other
    /// marker is [`RpcError::Rpc`].
    #[instrument(skip(self, args, options), fields(call = %options.label(call_id)))]
    pub async fn call(
        &self,
        call_id: &str,
        args: &[RpcValue],
        options: &CallOptions,
    ) -> Result<RpcResponse, RpcError> {
        let call = BatchCall::new(call_id, args.to_vec());
        let response = self
            .execute_batch(std::slice::from_ref(&call), options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RpcError::MissingResult {
                call: call_id.to_string(),
                tag: crate::codec::GENERIC_TAG.to_string(),
            })?;

        match response.error_code() {
            None => Ok(response),
            Some(RPC_CODE_RESOURCE_EXHAUSTED) => Err(RpcError::RateLimited {
                retry_after: None,
                code: Some(RPC_CODE_RESOURCE_EXHAUSTED),
            }),
            Some(code) => Err(RpcError::Rpc {
                call: options.label(call_id),
                code,
            }),
        }
    }

    /// Runs several calls in one envelope. Per-call error markers stay in
    /// the returned responses.
    #[instrument(skip(self, calls, options), fields(calls = calls.len()))]
    pub async fn call_batch(
        &self,
        calls: &[BatchCall],
        options: &CallOptions,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        self.execute_batch(calls, options).await
    }

    async fn execute_batch(
        &self,
        calls: &[BatchCall],
        options: &CallOptions,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        let ids = calls
            .iter()
            .map(|c| c.call_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        options.check_confirmation(&ids)?;
        let label = options.label(&ids);
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.settings.timeouts.default_timeout());
        let mut budget = RecoveryBudget::new(
            options
                .max_recovery_layers
                .unwrap_or(self.settings.max_recovery_layers),
        );
        let mut reparsed = false;

        loop {
            let (generation, session) = self.current_session().await?;
            let encoded = encode_batch(calls, &self.request_context(&session, &options.source_path))?;
            trace!(url = %encoded.url, body = %encoded.redacted_body(), "Sending batch");

            let request = TransportRequest {
                url: encoded.url,
                body: encoded.body,
                cookie_header: session.credential.cookie_header(),
                timeout,
            };
            let transport = &self.ctx.transport;
            let request_ref = &request;
            let response = self
                .send_with_retry(&label, options.idempotent, timeout, move || {
                    transport.post_form(request_ref)
                })
                .await?;

            match parse_batch(&response, &encoded.calls) {
                Ok(responses) => {
                    self.engine.mark_valid();
                    return Ok(responses);
                }
                Err(error) if error.is_auth_class() => {
                    self.recover_or_expire(error, generation, &mut budget).await?;
                }
                Err(error) if error.is_retryable_once() && options.idempotent && !reparsed => {
                    warn!(call = %label, error = %error, "Malformed response, retrying once");
                    reparsed = true;
                }
                Err(error) => return Err(error),
            }
        }
    }

    // ========================================================================
    // Streaming Query
    // ========================================================================

    /// Sends the free-form query and streams decoded frames as they arrive.
    ///
    /// Recovery applies until the first frame is decoded. Later failures end
    /// the stream with an error item.
    #[instrument(skip(self, args, options))]
    pub async fn stream_query(
        &self,
        args: &[RpcValue],
        options: &CallOptions,
    ) -> Result<BoxStream<'static, Result<Value, RpcError>>, RpcError> {
        options.check_confirmation(STREAM_QUERY_NAME)?;
        let label = options.label(STREAM_QUERY_NAME);
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.settings.timeouts.query());
        let mut budget = RecoveryBudget::new(
            options
                .max_recovery_layers
                .unwrap_or(self.settings.max_recovery_layers),
        );

        loop {
            let (generation, session) = self.current_session().await?;
            let encoded = encode_streaming(args, &self.request_context(&session, &options.source_path))?;
            trace!(url = %encoded.url, body = %encoded.redacted_body(), "Sending query");

            let request = TransportRequest {
                url: encoded.url,
                body: encoded.body,
                cookie_header: session.credential.cookie_header(),
                timeout,
            };
            let transport = &self.ctx.transport;
            let request_ref = &request;
            let response = self
                .send_with_retry(&label, options.idempotent, timeout, move || {
                    transport.post_streaming(request_ref)
                })
                .await?;

            match open_stream(response).await {
                Ok(frames) => {
                    self.engine.mark_valid();
                    return Ok(frames);
                }
                Err(error) if error.is_auth_class() => {
                    self.recover_or_expire(error, generation, &mut budget).await?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    // ========================================================================
    // Retry and Recovery
    // ========================================================================

    /// Sends with backoff for transport failures.
    ///
    /// A failure that may have reached the server is retried only for
    /// idempotent calls; otherwise it is [`RpcError::OutcomeUnknown`].
    async fn send_with_retry<T, F, Fut>(
        &self,
        call: &str,
        idempotent: bool,
        timeout: Duration,
        mut send: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match send().await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !self.retry.should_retry(&error, idempotent) {
                if error.is_retryable() {
                    warn!(call, error = %error, "Request may have been delivered, not retrying");
                    return Err(RpcError::OutcomeUnknown {
                        call: call.to_string(),
                        timeout,
                    });
                }
                return Err(RpcError::Transport(error));
            }
            if !self.retry.has_attempts_left(attempt) {
                return Err(RpcError::TransientNetwork {
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(call, attempt, delay = ?delay, error = %error, "Transport failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs a recovery round, or fails with `AuthenticationExpired` when
    /// none is left.
    async fn recover_or_expire(
        &self,
        error: RpcError,
        generation: u64,
        budget: &mut RecoveryBudget,
    ) -> Result<(), RpcError> {
        if budget.is_spent() {
            return Err(RpcError::AuthenticationExpired {
                layers_attempted: budget.layers_attempted(),
                reason: format!("{error}; still rejected after recovery"),
            });
        }

        warn!(error = %error, "Authentication rejected, recovering");
        match self.engine.recover(&self.ctx, generation, budget).await {
            RecoveryOutcome::Recovered { layer } => {
                info!(layer = %layer, "Retrying with recovered credentials");
                Ok(())
            }
            RecoveryOutcome::Shared => {
                debug!("Retrying with credentials refreshed by another call");
                Ok(())
            }
            RecoveryOutcome::Interrupted { layer, reason } => Err(RpcError::TransientNetwork {
                attempts: 1,
                message: format!("{} interrupted: {reason}", layer.display_name()),
            }),
            RecoveryOutcome::Exhausted { reason } => Err(RpcError::AuthenticationExpired {
                layers_attempted: budget.layers_attempted(),
                reason: format!("{error}; {reason}"),
            }),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("base_url", &self.settings.base_url)
            .field("engine", &self.engine)
            .field("generation", &self.credential_generation())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Response Handling
// ============================================================================

fn check_status(status: u16, retry_after: Option<u64>) -> Result<(), RpcError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(RpcError::RateLimited {
            retry_after,
            code: None,
        }),
        _ => Err(RpcError::Http { status }),
    }
}

fn first_auth_error(frames: &[Value], call: &str) -> Result<(), RpcError> {
    let rejected = result_items(frames)
        .into_iter()
        .find(|item| item.error_code == Some(RPC_CODE_UNAUTHENTICATED));
    match rejected {
        Some(item) => Err(RpcError::Rpc {
            call: item.call_id.unwrap_or_else(|| call.to_string()),
            code: RPC_CODE_UNAUTHENTICATED,
        }),
        None => Ok(()),
    }
}

fn parse_batch(response: &TransportResponse, keys: &[CallKey]) -> Result<Vec<RpcResponse>, RpcError> {
    check_status(response.status, response.retry_after)?;
    if !response.body.starts_with(ANTI_XSSI_PREFIX) && looks_like_login_page(&response.body) {
        return Err(RpcError::SignInRequired);
    }

    let frames = decode_response(&response.body)?;
    first_auth_error(&frames, "batch")?;
    correlate(result_items(&frames), keys)
}

/// Decoder state carried between stream polls.
struct FrameStream {
    body: BoxStream<'static, Result<Bytes, TransportError>>,
    decoder: FrameDecoder,
    pending: VecDeque<Value>,
    done: bool,
}

impl FrameStream {
    /// Reads until a frame is ready or the body ends.
    async fn fill(&mut self) -> Result<(), RpcError> {
        while self.pending.is_empty() && !self.done {
            let frames = match self.body.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => Err(RpcError::TransientNetwork {
                    attempts: 1,
                    message: e.to_string(),
                }),
                None => {
                    self.done = true;
                    self.decoder.finish()
                }
            };
            match frames {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Checks status, waits for the first frame and checks it for an auth
/// rejection before handing the rest of the body to the caller.
async fn open_stream(
    response: StreamingResponse,
) -> Result<BoxStream<'static, Result<Value, RpcError>>, RpcError> {
    check_status(response.status, response.retry_after)?;

    let mut sniffed = Vec::new();
    let mut body = response.body;
    let mut state = FrameStream {
        body: stream::empty().boxed(),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    while state.pending.is_empty() && !state.done {
        match body.next().await {
            Some(Ok(chunk)) => {
                let room = LOGIN_SNIFF_BYTES.saturating_sub(sniffed.len());
                sniffed.extend_from_slice(&chunk[..chunk.len().min(room)]);
                match state.decoder.push(&chunk) {
                    Ok(frames) => state.pending.extend(frames),
                    Err(e) if looks_like_login_page(&sniffed) => {
                        debug!(error = %e, "Streamed body is a sign-in page");
                        return Err(RpcError::SignInRequired);
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(Err(e)) => {
                return Err(RpcError::TransientNetwork {
                    attempts: 1,
                    message: e.to_string(),
                });
            }
            None => {
                state.done = true;
                match state.decoder.finish() {
                    Ok(frames) => state.pending.extend(frames),
                    Err(_) if looks_like_login_page(&sniffed) => {
                        return Err(RpcError::SignInRequired);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    first_auth_error(state.pending.make_contiguous(), STREAM_QUERY_NAME)?;
    state.body = body;

    Ok(stream::unfold(state, |mut state| async move {
        if let Err(e) = state.fill().await {
            return Some((Err(e), state));
        }
        let frame = state.pending.pop_front()?;
        Some((Ok(frame), state))
    })
    .boxed())
}
