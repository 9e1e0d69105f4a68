//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use nblm_core::{Credential, REQUIRED_COOKIES};
use nblm_store::{CredentialStore, StoreError};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::context::{RecoveryContext, RecoverySettings, SessionState};
use crate::error::{ProcessError, RpcError, TransportError};
use crate::host::http::{PageResponse, StreamingResponse, Transport, TransportRequest, TransportResponse};
use crate::recovery::HeadlessLogin;

pub(crate) const BASE_URL: &str = "https://notebooklm.google.com";
pub(crate) const PAGE_BUILD_LABEL: &str = "boq_labs-tailwind-frontend_page";

// ============================================================================
// Credentials
// ============================================================================

/// A credential carrying every required cookie.
pub(crate) fn credential(csrf: &str) -> Credential {
    let cookies: BTreeMap<String, String> = REQUIRED_COOKIES
        .iter()
        .map(|name| ((*name).to_string(), format!("{name}-value")))
        .collect();
    Credential::new(cookies, csrf, "sess-1")
}

/// Same tokens, different cookie values.
pub(crate) fn rotated_credential(csrf: &str) -> Credential {
    let mut rotated = credential(csrf);
    for value in rotated.cookies.values_mut() {
        value.push_str("-rotated");
    }
    rotated
}

// ============================================================================
// Memory Store
// ============================================================================

/// Credential store backed by memory. `write_external` simulates another
/// process rewriting the file.
#[derive(Default)]
pub(crate) struct MemoryStore {
    credential: Mutex<Option<Credential>>,
    external: AtomicBool,
    saves: AtomicUsize,
    loads: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: Mutex::new(credential),
            ..Self::default()
        }
    }

    pub(crate) fn write_external(&self, credential: Credential) {
        *self.credential.lock().unwrap() = Some(credential);
        self.external.store(true, Ordering::SeqCst);
    }

    pub(crate) fn current(&self) -> Option<Credential> {
        self.credential.lock().unwrap().clone()
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Credential, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.external.store(false, Ordering::SeqCst);
        self.current()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from("memory")))
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.credential.lock().unwrap() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.credential.lock().unwrap() = None;
        Ok(())
    }

    async fn modified_at(&self) -> Result<Option<SystemTime>, StoreError> {
        Ok(None)
    }

    async fn has_external_change(&self) -> bool {
        self.external.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Fake Transport
// ============================================================================

type Responder =
    Box<dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// Transport answering posts through a closure and page fetches with a
/// fixed page.
pub(crate) struct FakeTransport {
    responder: Responder,
    page: Mutex<PageResponse>,
    page_delay: Duration,
    page_timeouts: AtomicUsize,
    stream_chunk: Option<usize>,
    posts: AtomicUsize,
    page_fetches: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl FakeTransport {
    pub(crate) fn new(
        responder: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            page: Mutex::new(PageResponse {
                status: 200,
                final_url: format!("{BASE_URL}/"),
                body: landing_page("fresh", "sess-2"),
            }),
            page_delay: Duration::ZERO,
            page_timeouts: AtomicUsize::new(0),
            stream_chunk: None,
            posts: AtomicUsize::new(0),
            page_fetches: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Accepts only requests carrying CSRF token `fresh`.
    pub(crate) fn accepting_fresh(call_id: &'static str, payload: Value) -> Self {
        Self::new(move |request| {
            if body_has_token(request, "fresh") {
                Ok(ok_response(call_id, &payload))
            } else {
                Ok(error_response(call_id, 16))
            }
        })
    }

    #[must_use]
    pub(crate) fn with_page(self, status: u16, final_url: &str, body: &str) -> Self {
        *self.page.lock().unwrap() = PageResponse {
            status,
            final_url: final_url.to_string(),
            body: body.to_string(),
        };
        self
    }

    #[must_use]
    pub(crate) fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Times out the next `count` page fetches.
    #[must_use]
    pub(crate) fn with_page_timeouts(self, count: usize) -> Self {
        self.page_timeouts.store(count, Ordering::SeqCst);
        self
    }

    /// Splits streamed bodies into chunks of `size` bytes.
    #[must_use]
    pub(crate) fn with_stream_chunks(mut self, size: usize) -> Self {
        self.stream_chunk = Some(size.max(1));
        self
    }

    pub(crate) fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub(crate) fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post_form(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }

    async fn post_streaming(
        &self,
        request: &TransportRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.post_form(request).await?;
        let size = self.stream_chunk.unwrap_or(response.body.len().max(1));
        let chunks: Vec<Result<Bytes, TransportError>> = response
            .body
            .chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(StreamingResponse {
            status: response.status,
            retry_after: response.retry_after,
            body: stream::iter(chunks).boxed(),
        })
    }

    async fn fetch_page(
        &self,
        _url: &str,
        _cookie_header: &str,
        _timeout: Duration,
    ) -> Result<PageResponse, TransportError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        if self
            .page_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Timeout(Duration::from_secs(5)));
        }
        Ok(self.page.lock().unwrap().clone())
    }
}

// ============================================================================
// Scripted Login
// ============================================================================

/// Login collaborator that writes a fixed credential to the store, or fails.
pub(crate) struct ScriptedLogin {
    store: Arc<MemoryStore>,
    credential: Option<Credential>,
    calls: AtomicUsize,
}

impl ScriptedLogin {
    pub(crate) fn writing(store: Arc<MemoryStore>, credential: Credential) -> Self {
        Self {
            store,
            credential: Some(credential),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            credential: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeadlessLogin for ScriptedLogin {
    async fn login(&self) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.credential {
            Some(credential) => {
                self.store.write_external(credential.clone());
                Ok(())
            }
            None => Err(RpcError::Process(ProcessError::NonZeroExit {
                code: 1,
                stderr: "browser profile locked".to_string(),
            })),
        }
    }
}

// ============================================================================
// Wire Helpers
// ============================================================================

/// Frames JSON chunks the way the server does.
pub(crate) fn framed(chunks: &[String]) -> Bytes {
    let mut body = String::from(")]}'\n\n");
    for chunk in chunks {
        body.push_str(&format!("{}\n{}\n", chunk.len(), chunk));
    }
    Bytes::from(body)
}

/// A `wrb.fr` result chunk with the `generic` tag.
pub(crate) fn wrb(call_id: &str, payload: &Value) -> String {
    json!([["wrb.fr", call_id, payload.to_string(), null, null, null, "generic"]]).to_string()
}

pub(crate) fn ok_response(call_id: &str, payload: &Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        retry_after: None,
        body: framed(&[wrb(call_id, payload)]),
    }
}

pub(crate) fn error_response(call_id: &str, code: i64) -> TransportResponse {
    let chunk = json!([["wrb.fr", call_id, null, null, null, [code], "generic"]]).to_string();
    TransportResponse {
        status: 200,
        retry_after: None,
        body: framed(&[chunk]),
    }
}

pub(crate) fn status_response(status: u16, retry_after: Option<u64>) -> TransportResponse {
    TransportResponse {
        status,
        retry_after,
        body: Bytes::new(),
    }
}

pub(crate) fn landing_page(csrf: &str, session_id: &str) -> String {
    format!(
        r#"<html><script>window.WIZ_global_data = {{"SNlM0e":"{csrf}","FdrFJe":"{session_id}","cfb2h":"{PAGE_BUILD_LABEL}"}};</script></html>"#
    )
}

/// Returns true if the form body carries `at=<token>`.
pub(crate) fn body_has_token(request: &TransportRequest, token: &str) -> bool {
    request
        .body
        .split('&')
        .any(|pair| pair == format!("at={token}"))
}

pub(crate) fn recovery_settings() -> RecoverySettings {
    RecoverySettings {
        base_url: BASE_URL.to_string(),
        build_label_override: None,
        default_build_label: "boq_default".to_string(),
        page_fetch_timeout: Duration::from_secs(5),
        debug_dump_path: None,
    }
}

pub(crate) fn recovery_context(
    transport: Arc<FakeTransport>,
    store: Arc<MemoryStore>,
) -> RecoveryContext {
    RecoveryContext::new(
        transport,
        store,
        Arc::new(SessionState::new()),
        recovery_settings(),
    )
}
