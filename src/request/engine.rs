//! The request engine: a fluent, stateful handle over one HTTP transfer.
//!
//! An [`HttpRequest`] is configured while `Idle`, started with one of the verb
//! methods, and then driven to a terminal state by a background task. Callers
//! observe it through [`HttpRequest::state`], a `watch` subscription, or a
//! progress observer, and join it with [`HttpRequest::wait`].
//!
//! # Example
//!
//! ```no_run
//! use transfer_core::request::{HttpRequest, RequestState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = HttpRequest::create("https://example.com/feed.json")?;
//! request
//!     .add_header("Accept", "application/json")?
//!     .on_progress(|event| {
//!         if let Some(fraction) = event.stats.and_then(|s| s.progress_fraction()) {
//!             println!("{:.0}%", fraction * 100.0);
//!         }
//!     })?
//!     .get()?;
//!
//! if request.wait().await.state() == RequestState::Completed {
//!     println!("{}", request.result_as_string().await?);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::abort::AbortSignal;
use super::body::RequestBody;
use super::constants::{default_retry_count, transfer_chunk_size};
use super::error::RequestError;
use super::result::{ImageData, TextEncoding};
use super::retry::{CancelPolicy, RetryPolicy};
use super::sink::{ResultSlot, SinkHandle};
use super::spec::{HttpMethod, RequestSpec};
use super::state::{ProgressEvent, RequestState};
use super::stats::TransferStats;
use crate::transport::{HttpTransport, Transport};

mod transfer;

use transfer::TransferPlan;

/// Callback invoked on every state transition and every transferred chunk.
pub(crate) type ProgressObserver = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Status line and headers of the response that completed the transfer.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
}

/// Mutable request data. Never locked across an await.
struct Shared {
    spec: RequestSpec,
    result: ResultSlot,
    abort: AbortSignal,
    last_error: Option<Arc<RequestError>>,
    response: Option<ResponseHead>,
    observer: Option<ProgressObserver>,
    chunk_size: Option<usize>,
    retry_policy: RetryPolicy,
    retries_performed: u32,
    attempt: u32,
    disposed: bool,
}

struct Inner {
    url: Url,
    transport: Arc<dyn Transport>,
    shared: Mutex<Shared>,
    state: watch::Sender<RequestState>,
    running: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RequestState) {
        self.state.send_replace(state);
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Rejects `operation` unless the request is idle with nothing in flight.
    fn ensure_idle(&self, shared: &Shared, operation: &'static str) -> Result<(), RequestError> {
        if shared.disposed {
            return Err(RequestError::disposed(operation));
        }
        if self.is_running() {
            return Err(RequestError::in_progress(operation));
        }
        match self.state() {
            RequestState::Idle => Ok(()),
            state => Err(RequestError::invalid_state(operation, state)),
        }
    }
}

/// A single logical HTTP request with progress, retry and cancellation.
///
/// Cloning yields another handle to the same request, so one clone can
/// `cancel()` while another awaits `wait()`.
#[derive(Clone)]
pub struct HttpRequest {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.inner.state())
            .field("running", &self.inner.is_running())
            .finish_non_exhaustive()
    }
}

impl HttpRequest {
    /// Creates an idle request for an `http` or `https` URL string.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArgument`] if the URL does not parse or
    /// uses another scheme, and [`RequestError::InternalFault`] if the default
    /// transport cannot be built.
    pub fn create(url: &str) -> Result<Self, RequestError> {
        let parsed = Url::parse(url)
            .map_err(|e| RequestError::invalid_argument(format!("invalid URL {url:?}: {e}")))?;
        Self::from_url(parsed)
    }

    /// Creates an idle request for a parsed URL over the shared
    /// [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub fn from_url(url: Url) -> Result<Self, RequestError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::invalid_argument(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        let transport: Arc<dyn Transport> = HttpTransport::shared()
            .map_err(|e| RequestError::internal(format!("default transport unavailable: {e}")))?;
        Ok(Self::with_transport(url, transport))
    }

    /// Creates an idle request that opens its connections through `transport`.
    #[must_use]
    pub fn with_transport(url: Url, transport: Arc<dyn Transport>) -> Self {
        let shared = Shared {
            spec: RequestSpec::new(url.clone()),
            result: ResultSlot::default(),
            abort: AbortSignal::new(),
            last_error: None,
            response: None,
            observer: None,
            chunk_size: None,
            retry_policy: RetryPolicy::default(),
            retries_performed: 0,
            attempt: 0,
            disposed: false,
        };
        let (state, _) = watch::channel(RequestState::Idle);
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                url,
                transport,
                shared: Mutex::new(shared),
                state,
                running,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock()
    }

    fn configure<F>(&self, operation: &'static str, apply: F) -> Result<&Self, RequestError>
    where
        F: FnOnce(&mut Shared) -> Result<(), RequestError>,
    {
        let mut shared = self.lock();
        self.inner.ensure_idle(&shared, operation)?;
        apply(&mut shared)?;
        Ok(self)
    }

    // ==================== Configuration ====================

    /// Adds a request header, replacing any previous value for the name.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle; [`RequestError::InvalidArgument`]
    /// for an invalid name or value.
    pub fn add_header(&self, name: &str, value: &str) -> Result<&Self, RequestError> {
        self.configure("add header", |shared| shared.spec.insert_header(name, value))
    }

    /// Adds a header by well-known name, e.g. [`reqwest::header::ACCEPT`].
    ///
    /// # Errors
    ///
    /// Same as [`add_header`](Self::add_header).
    pub fn add_well_known_header(
        &self,
        name: HeaderName,
        value: &str,
    ) -> Result<&Self, RequestError> {
        self.configure("add header", |shared| {
            shared.spec.insert_typed_header(name, value)
        })
    }

    /// Adds a `Set-Cookie` style cookie scoped to `scope`.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle.
    pub fn add_cookie(&self, scope: &Url, cookie: &str) -> Result<&Self, RequestError> {
        self.configure("add cookie", |shared| {
            shared.spec.add_cookie(scope, cookie);
            Ok(())
        })
    }

    /// Adds several cookies scoped to `scope` in one step.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle.
    pub fn add_cookies<I, S>(&self, scope: &Url, cookies: I) -> Result<&Self, RequestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure("add cookie", |shared| {
            for cookie in cookies {
                shared.spec.add_cookie(scope, cookie.as_ref());
            }
            Ok(())
        })
    }

    /// Applies a customization callback to the request description right away.
    ///
    /// The callback runs without the request locked, so it may call back into
    /// this request; the result is stored only if the request is still idle.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle before and after the callback.
    pub fn handle_request<F>(&self, customize: F) -> Result<&Self, RequestError>
    where
        F: FnOnce(&mut RequestSpec),
    {
        let mut spec = {
            let shared = self.lock();
            self.inner.ensure_idle(&shared, "handle request")?;
            shared.spec.clone()
        };
        customize(&mut spec);
        self.configure("handle request", |shared| {
            shared.spec = spec;
            Ok(())
        })
    }

    /// Directs the response body into a caller-owned sink.
    ///
    /// Any engine-owned buffer is released. The engine never closes the sink.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle;
    /// [`RequestError::InvalidArgument`] if the sink is not writable.
    pub fn set_result_sink(&self, sink: SinkHandle) -> Result<&Self, RequestError> {
        self.configure("set result sink", |shared| {
            if !sink.is_writable() {
                return Err(RequestError::invalid_argument("result sink is not writable"));
            }
            shared.result = ResultSlot::External(sink);
            Ok(())
        })
    }

    /// Installs the progress observer, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle.
    pub fn on_progress<F>(&self, observer: F) -> Result<&Self, RequestError>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.configure("set progress observer", |shared| {
            shared.observer = Some(Arc::new(observer));
            Ok(())
        })
    }

    /// Overrides the process-wide chunk size for this request.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle;
    /// [`RequestError::InvalidArgument`] for zero.
    pub fn with_chunk_size(&self, bytes: usize) -> Result<&Self, RequestError> {
        self.configure("set chunk size", |shared| {
            if bytes == 0 {
                return Err(RequestError::invalid_argument("chunk size must be at least 1"));
            }
            shared.chunk_size = Some(bytes);
            Ok(())
        })
    }

    /// Replaces the retry policy.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle.
    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Result<&Self, RequestError> {
        self.configure("set retry policy", |shared| {
            shared.retry_policy = policy;
            Ok(())
        })
    }

    /// Chooses what `cancel()` does to the remaining retries.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle.
    pub fn with_cancel_policy(&self, policy: CancelPolicy) -> Result<&Self, RequestError> {
        self.configure("set cancel policy", |shared| {
            shared.retry_policy = shared.retry_policy.clone().cancel_policy(policy);
            Ok(())
        })
    }

    // ==================== Verbs ====================

    /// Starts a GET with the process-wide default retry count.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless idle; [`RequestError::InternalFault`]
    /// outside a Tokio runtime or if the transport cannot build a connection.
    pub fn get(&self) -> Result<&Self, RequestError> {
        self.get_with_retries(default_retry_count())
    }

    /// Starts a GET that rebuilds and retries up to `retries` times.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn get_with_retries(&self, retries: u32) -> Result<&Self, RequestError> {
        self.start(HttpMethod::Get, None, retries)
    }

    /// Starts a POST, uploading `body` if given.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get), plus [`RequestError::InvalidArgument`] for an
    /// unreadable body.
    pub fn post(&self, body: Option<RequestBody>) -> Result<&Self, RequestError> {
        self.post_with_retries(default_retry_count(), body)
    }

    /// Starts a POST with an explicit retry count.
    ///
    /// # Errors
    ///
    /// Same as [`post`](Self::post).
    pub fn post_with_retries(
        &self,
        retries: u32,
        body: Option<RequestBody>,
    ) -> Result<&Self, RequestError> {
        self.start(HttpMethod::Post, body, retries)
    }

    /// Starts a PUT of `body`. The response body is not collected.
    ///
    /// # Errors
    ///
    /// Same as [`post`](Self::post).
    pub fn put(&self, body: RequestBody) -> Result<&Self, RequestError> {
        self.put_with_retries(default_retry_count(), body)
    }

    /// Starts a PUT with an explicit retry count.
    ///
    /// # Errors
    ///
    /// Same as [`post`](Self::post).
    pub fn put_with_retries(&self, retries: u32, body: RequestBody) -> Result<&Self, RequestError> {
        self.start(HttpMethod::Put, Some(body), retries)
    }

    #[instrument(skip(self, body), fields(url = %self.inner.url, method = %method))]
    fn start(
        &self,
        method: HttpMethod,
        body: Option<RequestBody>,
        retry_limit: u32,
    ) -> Result<&Self, RequestError> {
        let operation = match method {
            HttpMethod::Get => "start GET",
            HttpMethod::Post => "start POST",
            HttpMethod::Put => "start PUT",
        };
        let runtime = Handle::try_current()
            .map_err(|_| RequestError::internal("no Tokio runtime available to run the transfer"))?;
        if let Some(body) = &body {
            body.validate()?;
        }

        let plan = {
            let mut shared = self.lock();
            self.inner.ensure_idle(&shared, operation)?;
            shared.spec.set_method(method);
            let connection = self.inner.transport.connect(&shared.spec).map_err(|e| {
                RequestError::internal(format!("cannot build connection: {e}"))
            })?;
            shared.retries_performed = 0;
            shared.attempt = 1;
            shared.last_error = None;
            shared.response = None;
            shared.abort = AbortSignal::new();
            shared.result.release();
            self.inner.running.send_replace(true);

            TransferPlan {
                method,
                body,
                retry_limit,
                chunk_size: shared.chunk_size.unwrap_or_else(transfer_chunk_size),
                policy: shared.retry_policy.clone(),
                observer: shared.observer.clone(),
                sink: match &shared.result {
                    ResultSlot::External(handle) => Some(handle.clone()),
                    ResultSlot::Owned(_) => None,
                },
                connection,
                abort: shared.abort.clone(),
            }
        };

        debug!(retry_limit, chunk_size = plan.chunk_size, "transfer scheduled");
        let inner = Arc::clone(&self.inner);
        runtime.spawn(supervise(inner, plan));
        Ok(self)
    }

    // ==================== Synchronization ====================

    /// Resolves once the current attempt-sequence, retries included, has ended.
    ///
    /// Returns immediately when nothing is in flight.
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn wait(&self) -> &Self {
        let mut running = self.inner.running.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = running.wait_for(|running| !*running).await;
        self
    }

    /// Aborts the in-flight attempt and moves to `Cancelled`.
    ///
    /// The observer receives an event without stats. A no-op when the request
    /// is idle with nothing in flight or already terminal.
    pub fn cancel(&self) -> &Self {
        let (observer, attempt) = {
            let shared = self.lock();
            let state = self.inner.state();
            if state.is_terminal() || (state == RequestState::Idle && !self.inner.is_running()) {
                debug!(url = %self.inner.url, %state, "cancel ignored");
                return self;
            }
            shared.abort.abort();
            self.inner.set_state(RequestState::Cancelled);
            (shared.observer.clone(), shared.attempt)
        };

        info!(url = %self.inner.url, attempt, "request cancelled");
        if let Some(observer) = observer {
            observer(&ProgressEvent::cancelled(attempt));
        }
        self
    }

    /// Returns a failed or cancelled request to `Idle`, keeping its method,
    /// headers, cookies, credentials, proxy and timeout.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] while a transfer is in flight, after
    /// disposal, or in any state other than `Failed` or `Cancelled`.
    pub fn rebuild(&self) -> Result<&Self, RequestError> {
        let observer = {
            let mut shared = self.lock();
            if shared.disposed {
                return Err(RequestError::disposed("rebuild"));
            }
            if self.inner.is_running() {
                return Err(RequestError::in_progress("rebuild"));
            }
            let state = self.inner.state();
            if !matches!(state, RequestState::Failed | RequestState::Cancelled) {
                return Err(RequestError::invalid_state("rebuild", state));
            }
            shared.abort = AbortSignal::new();
            shared.last_error = None;
            shared.response = None;
            shared.result.release();
            shared.retries_performed = 0;
            shared.attempt = 0;
            self.inner.set_state(RequestState::Idle);
            shared.observer.clone()
        };

        debug!(url = %self.inner.url, "request rebuilt");
        if let Some(observer) = observer {
            observer(&ProgressEvent::tick(
                RequestState::Idle,
                TransferStats::default(),
                0,
            ));
        }
        Ok(self)
    }

    /// Aborts in-flight work and releases the engine-owned buffer. Idempotent.
    ///
    /// A caller-supplied sink stays open.
    pub fn dispose(&self) {
        let mut shared = self.lock();
        if shared.disposed {
            return;
        }
        shared.disposed = true;
        shared.abort.abort();
        shared.result.release();
        debug!(url = %self.inner.url, "request disposed");
    }

    // ==================== Results ====================

    /// Reads the whole result, then releases engine-owned resources.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidState`] unless `Completed` (or after a previous
    /// materialization); [`RequestError::InvalidArgument`] if the caller's sink
    /// is not readable; [`RequestError::Io`] if reading it fails.
    pub async fn result_as_bytes(&self) -> Result<Vec<u8>, RequestError> {
        let handle = {
            let mut guard = self.lock();
            let shared = &mut *guard;
            if shared.disposed {
                return Err(RequestError::disposed("read result"));
            }
            let state = self.inner.state();
            if state != RequestState::Completed {
                return Err(RequestError::invalid_state("read result", state));
            }
            match &mut shared.result {
                ResultSlot::Owned(buffer) => {
                    let bytes = std::mem::take(buffer);
                    shared.disposed = true;
                    return Ok(bytes);
                }
                ResultSlot::External(handle) => {
                    if !handle.is_readable() {
                        return Err(RequestError::invalid_argument("result sink is not readable"));
                    }
                    handle.clone()
                }
            }
        };

        let mut bytes = Vec::new();
        handle
            .lock()
            .await
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| RequestError::io("result sink", e))?;
        self.lock().disposed = true;
        Ok(bytes)
    }

    /// Reads the result as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`result_as_bytes`](Self::result_as_bytes).
    pub async fn result_as_string(&self) -> Result<String, RequestError> {
        self.result_as_string_with(TextEncoding::Utf8).await
    }

    /// Reads the result as text in `encoding`.
    ///
    /// # Errors
    ///
    /// As for [`result_as_bytes`](Self::result_as_bytes), plus
    /// [`RequestError::InvalidArgument`] for a malformed UTF-16 payload.
    pub async fn result_as_string_with(
        &self,
        encoding: TextEncoding,
    ) -> Result<String, RequestError> {
        let bytes = self.result_as_bytes().await?;
        encoding.decode(&bytes)
    }

    /// Reads the result as an encoded image.
    ///
    /// # Errors
    ///
    /// As for [`result_as_bytes`](Self::result_as_bytes), plus
    /// [`RequestError::InvalidArgument`] when the payload is empty or not a
    /// recognized image.
    pub async fn result_as_image(&self) -> Result<ImageData, RequestError> {
        ImageData::from_bytes(self.result_as_bytes().await?)
    }

    // ==================== Accessors ====================

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.inner.state()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RequestState> {
        self.inner.state.subscribe()
    }

    /// Whether an attempt-sequence is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Whether the request has been disposed or its result materialized.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Failure that ended the last attempt-sequence, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<Arc<RequestError>> {
        self.lock().last_error.clone()
    }

    /// Status code of the response that completed the transfer.
    ///
    /// `None` until the request reaches `Completed`; cleared when a new
    /// transfer starts or the request is rebuilt.
    #[must_use]
    pub fn response_status(&self) -> Option<u16> {
        self.lock().response.as_ref().map(|head| head.status)
    }

    /// Headers of the response that completed the transfer.
    #[must_use]
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.lock().response.as_ref().map(|head| head.headers.clone())
    }

    /// Rebuilds performed by the current attempt-sequence.
    #[must_use]
    pub fn retries_performed(&self) -> u32 {
        self.lock().retries_performed
    }

    /// Method of the current or most recent transfer.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.lock().spec.method()
    }

    /// Configured request headers.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.lock().spec.headers().clone()
    }

    /// `Cookie` header the next attempt would send.
    #[must_use]
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        self.lock().spec.cookie_header()
    }

    /// Copy of the request description. Changes to the copy do not reach
    /// this request.
    #[must_use]
    pub fn spec(&self) -> RequestSpec {
        self.lock().spec.clone()
    }
}

/// Runs the attempt-sequence and always clears the running flag afterwards,
/// even if the transfer task panics.
async fn supervise(inner: Arc<Inner>, plan: TransferPlan) {
    let task = tokio::spawn(transfer::run(Arc::clone(&inner), plan));
    if let Err(error) = task.await {
        handle_task_join_error(&inner, &error);
    }
    inner.running.send_replace(false);
}

fn handle_task_join_error(inner: &Inner, error: &JoinError) {
    warn!(url = %inner.url, error = %error, "transfer task ended abnormally");
    let mut shared = inner.lock();
    shared.last_error = Some(Arc::new(RequestError::internal(format!(
        "transfer task failed: {error}"
    ))));
    if !inner.state().is_terminal() {
        inner.set_state(RequestState::Failed);
    }
}
