//! HTTP transport with tracing and domain allowlist.
//!
//! The [`Transport`] trait is the seam between the client and the network.
//! [`ReqwestTransport`] is the production implementation; tests substitute
//! scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportError;

/// Browser user agent. The service serves a degraded page to unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Form content type of batchexecute posts.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Connect timeout applied to every request.
const CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Requests and Responses
// ============================================================================

/// A form post.
#[derive(Clone)]
pub struct TransportRequest {
    /// Full URL including query string.
    pub url: String,
    /// Form-encoded body.
    pub body: String,
    /// `Cookie` header value.
    pub cookie_header: String,
    /// Whole-request timeout, body included.
    pub timeout: Duration,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Retry-After` in seconds, when present.
    pub retry_after: Option<u64>,
    /// Raw body.
    pub body: Bytes,
}

/// A response whose body arrives incrementally.
pub struct StreamingResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Retry-After` in seconds, when present.
    pub retry_after: Option<u64>,
    /// Body chunks in arrival order.
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// An HTML page fetched with cookies.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// HTTP status code.
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Page body.
    pub body: String,
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Network access used by the client and the recovery layers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts a form and buffers the whole response.
    async fn post_form(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Posts a form and streams the response body.
    ///
    /// The default buffers through [`Transport::post_form`] and yields the
    /// body as one chunk.
    async fn post_streaming(
        &self,
        request: &TransportRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.post_form(request).await?;
        Ok(StreamingResponse {
            status: response.status,
            retry_after: response.retry_after,
            body: stream::once(async move { Ok(response.body) }).boxed(),
        })
    }

    /// Fetches an HTML page with cookies, following redirects.
    async fn fetch_page(
        &self,
        url: &str,
        cookie_header: &str,
        timeout: Duration,
    ) -> Result<PageResponse, TransportError>;
}

// ============================================================================
// Reqwest Transport
// ============================================================================

/// Domains, with their subdomains, that production traffic may reach.
pub const SERVICE_DOMAINS: &[&str] = &["google.com"];

/// Transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: Client,
    origin: String,
    allowed_domains: Option<Vec<String>>,
}

impl ReqwestTransport {
    /// Creates a transport for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let origin = parsed.origin().ascii_serialization();

        let inner = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            origin,
            allowed_domains: None,
        })
    }

    /// Creates a transport limited to [`SERVICE_DOMAINS`].
    ///
    /// Fails with [`TransportError::DomainNotAllowed`] if `base_url` itself
    /// is outside them, so session cookies never leave the service.
    pub fn for_service(base_url: &str) -> Result<Self, TransportError> {
        let transport = Self::new(base_url)?
            .with_allowed_domains(SERVICE_DOMAINS.iter().map(|d| (*d).to_string()).collect());
        transport.is_domain_allowed(base_url)?;
        Ok(transport)
    }

    /// Restricts requests to the given domains and their subdomains.
    #[must_use]
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = Some(domains);
        self
    }

    /// Checks if a URL's domain is allowed.
    fn is_domain_allowed(&self, url: &str) -> Result<(), TransportError> {
        let Some(ref allowed) = self.allowed_domains else {
            return Ok(());
        };

        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("No host in URL".to_string()))?;

        let allowed = allowed
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{domain}")));

        if allowed {
            Ok(())
        } else {
            Err(TransportError::DomainNotAllowed(host.to_string()))
        }
    }

    fn form_headers(&self, cookie_header: &str) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(header::ORIGIN, header_value(&self.origin)?);
        headers.insert(header::REFERER, header_value(&format!("{}/", self.origin))?);
        headers.insert(HeaderName::from_static("x-same-domain"), HeaderValue::from_static("1"));
        if !cookie_header.is_empty() {
            headers.insert(header::COOKIE, header_value(cookie_header)?);
        }
        Ok(headers)
    }

    async fn send_form(&self, request: &TransportRequest) -> Result<Response, TransportError> {
        self.is_domain_allowed(&request.url)?;
        let headers = self.form_headers(&request.cookie_header)?;

        let response = self
            .inner
            .post(&request.url)
            .headers(headers)
            .body(request.body.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, request.timeout))?;
        debug!(status = %response.status(), "Response received");
        Ok(response)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn post_form(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let response = self.send_form(request).await?;
        let status = response.status().as_u16();
        let retry_after = retry_after_secs(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, request.timeout))?;

        debug!(bytes = body.len(), "Body read");
        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn post_streaming(
        &self,
        request: &TransportRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.send_form(request).await?;
        let status = response.status().as_u16();
        let retry_after = retry_after_secs(&response);
        let timeout = request.timeout;
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| TransportError::from_reqwest(&e, timeout)))
            .boxed();

        Ok(StreamingResponse {
            status,
            retry_after,
            body,
        })
    }

    #[instrument(skip(self, cookie_header), fields(url = %url))]
    async fn fetch_page(
        &self,
        url: &str,
        cookie_header: &str,
        timeout: Duration,
    ) -> Result<PageResponse, TransportError> {
        self.is_domain_allowed(url)?;
        debug!("GET page with cookies");

        let response = self
            .inner
            .get(url)
            .headers(navigation_headers())
            .header(header::COOKIE, header_value(cookie_header)?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout))?;

        debug!(status, final_url = %final_url, bytes = body.len(), "Page received");
        Ok(PageResponse {
            status,
            final_url,
            body,
        })
    }
}

/// Headers of a top-level browser navigation.
fn navigation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("document"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("none"));
    headers.insert(HeaderName::from_static("sec-fetch-user"), HeaderValue::from_static("?1"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|_| TransportError::Other("header value contains invalid characters".to_string()))
}

/// `Retry-After` in seconds. HTTP-date values are ignored.
fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Tests
// ============================================================================
