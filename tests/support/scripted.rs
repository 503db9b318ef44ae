//! In-memory transport that plays back one scripted outcome per connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use transfer_core::header::{HeaderMap, HeaderValue};
use transfer_core::request::RequestSpec;
use transfer_core::transport::{Connection, RequestStream, Response, ResponseStream, Transport};
use transfer_core::TransportError;

/// Bytes handed out per read, so the engine has to fill its chunks itself.
const PIECE: usize = 3;

/// Response header carrying the 1-based number of the connection that answered.
pub const CONNECTION_HEADER: &str = "x-scripted-connection";

/// Outcome of one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    /// 200 with the body and its length announced.
    Respond(Vec<u8>),
    /// 200 with the body but no content length.
    RespondUnsized(Vec<u8>),
    /// The response never arrives.
    FailConnect,
    /// An error status.
    Status(u16),
    /// The body breaks after `after` bytes.
    FailMidBody { body: Vec<u8>, after: usize },
    /// The body stops delivering after `after` bytes until aborted.
    StallMidBody { body: Vec<u8>, after: usize },
    /// The response head never arrives until aborted.
    Stall,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    connects: AtomicUsize,
    refuse_from: Option<usize>,
    seen: Mutex<Vec<RequestSpec>>,
    uploads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedTransport {
    /// Plays `steps` in order, then repeats `fallback`.
    pub fn new(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self::build(steps, fallback, None))
    }

    /// Every connection fails.
    pub fn always_failing() -> Arc<Self> {
        Self::new([], Step::FailConnect)
    }

    /// Every connection answers with `body`.
    pub fn always(body: &[u8]) -> Arc<Self> {
        Self::new([], Step::Respond(body.to_vec()))
    }

    /// Like [`new`](Self::new), but refuses to build connection number
    /// `refuse_from` (1-based) and every later one.
    pub fn refusing_from(
        steps: impl IntoIterator<Item = Step>,
        fallback: Step,
        refuse_from: usize,
    ) -> Arc<Self> {
        Arc::new(Self::build(steps, fallback, Some(refuse_from)))
    }

    fn build(steps: impl IntoIterator<Item = Step>, fallback: Step, refuse_from: Option<usize>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            connects: AtomicUsize::new(0),
            refuse_from,
            seen: Mutex::new(Vec::new()),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connections built so far (initial attempt plus rebuilds).
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Request descriptions each connection was built from.
    pub fn seen_specs(&self) -> Vec<RequestSpec> {
        self.seen.lock().unwrap().clone()
    }

    /// Bytes received on each opened request stream.
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, spec: &RequestSpec) -> Result<Box<dyn Connection>, TransportError> {
        let number = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse_from.is_some_and(|from| number >= from) {
            return Err(TransportError::connection(
                spec.url().as_str(),
                "script refuses to build connection",
            ));
        }
        self.seen.lock().unwrap().push(spec.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedConnection {
            step,
            number,
            url: spec.url().to_string(),
            uploads: Arc::clone(&self.uploads),
        }))
    }
}

struct ScriptedConnection {
    step: Step,
    number: usize,
    url: String,
    uploads: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn open_request_stream(
        &mut self,
        _content_length: u64,
    ) -> Result<Box<dyn RequestStream>, TransportError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(Vec::new());
        Ok(Box::new(ScriptedUpload {
            uploads: Arc::clone(&self.uploads),
            index: uploads.len() - 1,
        }))
    }

    async fn response(&mut self) -> Result<Response, TransportError> {
        let (body, content_length, fail_after, stall_after) = match self.step.clone() {
            Step::Respond(body) => {
                let length = body.len() as u64;
                (body, Some(length), None, None)
            }
            Step::RespondUnsized(body) => (body, None, None, None),
            Step::FailConnect => {
                return Err(TransportError::connection(&self.url, "connection refused"));
            }
            Step::Status(status) => return Err(TransportError::http_status(&self.url, status)),
            Step::FailMidBody { body, after } => {
                let length = body.len() as u64;
                (body, Some(length), Some(after), None)
            }
            Step::StallMidBody { body, after } => {
                let length = body.len() as u64;
                (body, Some(length), None, Some(after))
            }
            Step::Stall => std::future::pending().await,
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION_HEADER, HeaderValue::from(self.number));
        Ok(Response {
            status: 200,
            content_length,
            headers,
            body: Box::new(ScriptedBody {
                body,
                position: 0,
                fail_after,
                stall_after,
                url: self.url.clone(),
            }),
        })
    }
}

struct ScriptedUpload {
    uploads: Arc<Mutex<Vec<Vec<u8>>>>,
    index: usize,
}

#[async_trait]
impl RequestStream for ScriptedUpload {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        self.uploads.lock().unwrap()[self.index].extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct ScriptedBody {
    body: Vec<u8>,
    position: usize,
    fail_after: Option<usize>,
    stall_after: Option<usize>,
    url: String,
}

#[async_trait]
impl ResponseStream for ScriptedBody {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.fail_after == Some(self.position) {
            return Err(TransportError::connection(&self.url, "connection reset mid-body"));
        }
        if self.stall_after == Some(self.position) {
            std::future::pending::<()>().await;
        }
        let limit = self
            .fail_after
            .or(self.stall_after)
            .unwrap_or(self.body.len())
            .min(self.body.len());
        let n = (limit - self.position).min(buf.len()).min(PIECE);
        buf[..n].copy_from_slice(&self.body[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}
