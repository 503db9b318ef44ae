//! `reqwest`-backed transport.

use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use reqwest::cookie::CookieStore;
use reqwest::header::{CONTENT_LENGTH, COOKIE, HeaderValue, SET_COOKIE};
use reqwest::{Body, Client, ClientBuilder, Proxy, RequestBuilder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use super::{Connection, RequestStream, Response, ResponseStream, Transport};
use crate::request::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::request::{Credentials, RequestSpec, TransportError};
use crate::user_agent;

static SHARED: OnceLock<Arc<HttpTransport>> = OnceLock::new();

/// Client settings shared by every connection a [`HttpTransport`] builds.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, unless the request sets its own.
    pub read_timeout: Duration,
    /// `User-Agent` sent unless the request sets its own.
    pub user_agent: String,
    /// Transparent gzip decoding.
    pub gzip: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            gzip: true,
        }
    }
}

/// Production transport over a pooled `reqwest::Client`.
///
/// Requests that carry a proxy get a dedicated client, since `reqwest` binds
/// proxies at client construction.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Builds a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = base_client_builder(&config)
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;
        Ok(Self { client, config })
    }

    /// Process-wide transport with default settings, built on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the first build fails.
    pub fn shared() -> Result<Arc<Self>, TransportError> {
        if let Some(transport) = SHARED.get() {
            return Ok(Arc::clone(transport));
        }
        let transport = Arc::new(Self::new(TransportConfig::default())?);
        Ok(Arc::clone(SHARED.get_or_init(|| transport)))
    }

    /// Settings this transport was built with.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn client_for(&self, spec: &RequestSpec) -> Result<Client, TransportError> {
        let Some(proxy) = spec.proxy() else {
            return Ok(self.client.clone());
        };
        debug!(proxy = %proxy, "building dedicated client for proxied request");
        let proxy =
            Proxy::all(proxy.as_str()).map_err(|source| TransportError::ClientBuild { source })?;
        base_client_builder(&self.config)
            .proxy(proxy)
            .build()
            .map_err(|source| TransportError::ClientBuild { source })
    }
}

impl Transport for HttpTransport {
    fn connect(&self, spec: &RequestSpec) -> Result<Box<dyn Connection>, TransportError> {
        let client = self.client_for(spec)?;
        Ok(Box::new(HttpConnection {
            client,
            spec: spec.clone(),
            pending: None,
        }))
    }
}

fn base_client_builder(config: &TransportConfig) -> ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .gzip(config.gzip)
        .user_agent(config.user_agent.clone())
}

type PendingResponse = JoinHandle<reqwest::Result<reqwest::Response>>;

struct HttpConnection {
    client: Client,
    spec: RequestSpec,
    /// Request already sent with a streaming body, awaiting its response.
    pending: Option<PendingResponse>,
}

impl HttpConnection {
    fn request_builder(&self) -> RequestBuilder {
        let mut request = self
            .client
            .request(self.spec.method().into(), self.spec.url().clone())
            .headers(self.spec.headers().clone());
        if let Some(cookie) = self.spec.cookie_header() {
            request = request.header(COOKIE, cookie);
        }
        request = match self.spec.credentials() {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, password.as_ref())
            }
            Some(Credentials::Bearer(token)) => request.bearer_auth(token),
            None => request,
        };
        if let Some(timeout) = self.spec.timeout() {
            request = request.timeout(timeout);
        }
        request
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn open_request_stream(
        &mut self,
        content_length: u64,
    ) -> Result<Box<dyn RequestStream>, TransportError> {
        let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(1);
        let body = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });
        let request = self
            .request_builder()
            .header(CONTENT_LENGTH, HeaderValue::from(content_length))
            .body(Body::wrap_stream(body));

        debug!(url = %self.spec.url(), content_length, "opening request body stream");
        self.pending = Some(tokio::spawn(request.send()));

        Ok(Box::new(HttpRequestStream {
            sender: Some(sender),
            url: self.spec.url().to_string(),
        }))
    }

    async fn response(&mut self) -> Result<Response, TransportError> {
        let url = self.spec.url().to_string();
        let result = match self.pending.take() {
            Some(handle) => handle.await.map_err(|e| {
                TransportError::connection(&url, format!("request task ended abnormally: {e}"))
            })?,
            None => self.request_builder().send().await,
        };
        let response = result.map_err(|e| TransportError::network(&url, e))?;

        let mut set_cookies = response.headers().get_all(SET_COOKIE).iter();
        self.spec
            .cookie_jar()
            .set_cookies(&mut set_cookies, response.url());

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::http_status(&url, status.as_u16()));
        }

        debug!(
            url = %url,
            status = status.as_u16(),
            content_length = ?response.content_length(),
            "response received"
        );

        Ok(Response {
            status: status.as_u16(),
            content_length: response.content_length(),
            headers: response.headers().clone(),
            body: Box::new(HttpResponseStream {
                response,
                leftover: Bytes::new(),
                url,
            }),
        })
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

struct HttpRequestStream {
    sender: Option<mpsc::Sender<io::Result<Bytes>>>,
    url: String,
}

#[async_trait]
impl RequestStream for HttpRequestStream {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TransportError::connection(&self.url, "request body already finished"))?;
        sender
            .send(Ok(Bytes::copy_from_slice(chunk)))
            .await
            .map_err(|_| {
                TransportError::connection(&self.url, "request body stream closed before upload finished")
            })
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        self.sender.take();
        Ok(())
    }
}

struct HttpResponseStream {
    response: reqwest::Response,
    leftover: Bytes,
    url: String,
}

#[async_trait]
impl ResponseStream for HttpResponseStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.leftover.is_empty() {
            match self
                .response
                .chunk()
                .await
                .map_err(|e| TransportError::network(&self.url, e))?
            {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(0),
            }
        }
        let n = self.leftover.len().min(buf.len());
        let head = self.leftover.split_to(n);
        buf[..n].copy_from_slice(&head);
        Ok(n)
    }
}
