//! Description of the underlying HTTP request.
//!
//! A [`RequestSpec`] is the plain-data part of a request: everything a rebuild
//! copies into a fresh connection. Transports build one connection per attempt
//! from it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use url::Url;

use super::error::RequestError;

/// HTTP verbs the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Download only.
    #[default]
    Get,
    /// Optional upload, then download.
    Post,
    /// Upload; the response body is not collected.
    Put,
}

impl HttpMethod {
    /// Returns the method token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }

    /// Whether a supplied body is streamed to the server.
    #[must_use]
    pub fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }

    /// Whether the response body is collected into the result sink.
    #[must_use]
    pub fn collects_response(self) -> bool {
        matches!(self, Self::Get | Self::Post)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// Credentials attached to every attempt.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Optional password.
        password: Option<String>,
    },
    /// Bearer token.
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Everything needed to open an equivalent connection.
///
/// Cloning shares the cookie jar, so cookies set by a response stay visible to
/// the next attempt. Outside this crate the jar is read-only: cookies are added
/// through [`HttpRequest::add_cookie`](crate::HttpRequest::add_cookie), which
/// only succeeds while the request is idle.
///
/// ```compile_fail
/// use transfer_core::request::RequestSpec;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/").unwrap();
/// let spec = RequestSpec::new(url.clone());
/// spec.add_cookie(&url, "late=1");
/// ```
#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: Url,
    method: HttpMethod,
    headers: HeaderMap,
    cookies: Arc<Jar>,
    credentials: Option<Credentials>,
    proxy: Option<Url>,
    timeout: Option<Duration>,
}

impl RequestSpec {
    /// Creates a GET description for `url` with no headers or cookies.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: HttpMethod::Get,
            headers: HeaderMap::new(),
            cookies: Arc::new(Jar::default()),
            credentials: None,
            proxy: None,
            timeout: None,
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Method of the current or most recent attempt.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub(crate) fn set_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Parses and inserts a header, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArgument`] if the name or value is not a
    /// valid header token.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<(), RequestError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RequestError::invalid_argument(format!("invalid header name: {name:?}")))?;
        self.insert_typed_header(name, value)
    }

    /// Inserts a header by well-known name, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArgument`] if the value is not a valid
    /// header value.
    pub fn insert_typed_header(&mut self, name: HeaderName, value: &str) -> Result<(), RequestError> {
        let value = HeaderValue::from_str(value).map_err(|_| {
            RequestError::invalid_argument(format!("invalid value for header {name}"))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Shared cookie jar, written by the transport when responses set cookies.
    pub(crate) fn cookie_jar(&self) -> &Arc<Jar> {
        &self.cookies
    }

    /// Adds a `Set-Cookie` style cookie scoped to `scope`.
    pub(crate) fn add_cookie(&self, scope: &Url, cookie: &str) {
        self.cookies.add_cookie_str(cookie, scope);
    }

    /// The `Cookie` header this request would send to its own URL.
    #[must_use]
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        self.cookies.cookies(&self.url)
    }

    /// Attached credentials.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Replaces the credentials.
    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    /// Proxy used for every attempt, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Routes attempts through `proxy`.
    pub fn set_proxy(&mut self, proxy: Option<Url>) {
        self.proxy = proxy;
    }

    /// Per-attempt timeout overriding the transport default.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets the per-attempt timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}
