//! The transfer loop: one attempt-sequence, run on a Tokio task.
//!
//! Each attempt moves `Connecting -> Progressing -> Completed`. A failure is
//! classified under the request lock together with the retry decision and the
//! rebuild, so a concurrent `cancel()` or `dispose()` is never lost between
//! attempts.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{Inner, ProgressObserver, ResponseHead};
use crate::request::abort::AbortSignal;
use crate::request::body::{BodySource, RequestBody};
use crate::request::constants::{MAX_INITIAL_BUFFER, PROVISIONAL_SIZE_FACTOR};
use crate::request::error::{RequestError, TransportError};
use crate::request::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::request::sink::{ResultSlot, SinkHandle};
use crate::request::spec::HttpMethod;
use crate::request::state::{ProgressEvent, RequestState};
use crate::request::stats::{TransferDirection, TransferMeter, TransferStats};
use crate::transport::{Connection, Response, ResponseStream};

/// Everything the background task needs, captured when the verb is called.
pub(super) struct TransferPlan {
    pub(super) method: HttpMethod,
    pub(super) body: Option<RequestBody>,
    pub(super) retry_limit: u32,
    pub(super) chunk_size: usize,
    pub(super) policy: RetryPolicy,
    pub(super) observer: Option<ProgressObserver>,
    pub(super) sink: Option<SinkHandle>,
    pub(super) connection: Box<dyn Connection>,
    pub(super) abort: AbortSignal,
}

/// Per-attempt view shared by the helpers below.
struct Attempt<'a> {
    inner: &'a Inner,
    url: &'a str,
    abort: &'a AbortSignal,
    observer: Option<&'a ProgressObserver>,
    sink: Option<&'a SinkHandle>,
    number: u32,
    chunk_size: usize,
}

impl Attempt<'_> {
    fn emit(&self, state: RequestState, stats: TransferStats) {
        if let Some(observer) = self.observer {
            observer(&ProgressEvent::tick(state, stats, self.number));
        }
    }

    /// Moves to `state` unless this attempt has been aborted.
    fn transition(&self, state: RequestState) -> Result<(), RequestError> {
        let _shared = self.inner.lock();
        if self.abort.is_aborted() {
            return Err(TransportError::aborted(self.url).into());
        }
        self.inner.set_state(state);
        Ok(())
    }

    /// Publishes `Completed`, storing the response head and any owned buffer.
    fn complete(&self, finished: Finished) -> Result<(), RequestError> {
        let mut shared = self.inner.lock();
        if self.abort.is_aborted() {
            return Err(TransportError::aborted(self.url).into());
        }
        if let Some(buffer) = finished.owned {
            shared.result = ResultSlot::Owned(buffer);
        }
        shared.response = Some(finished.head);
        self.inner.set_state(RequestState::Completed);
        Ok(())
    }
}

/// Sequence-wide bookkeeping carried across attempts.
#[derive(Default)]
struct Progress {
    /// Last snapshot emitted, reused for the final tick.
    last: TransferStats,
    /// Sink position the first download started at; retries rewind to it.
    sink_origin: Option<u64>,
}

/// A successful attempt's output.
struct Finished {
    head: ResponseHead,
    /// Engine-owned result buffer; `None` with a caller sink or for PUT.
    owned: Option<Vec<u8>>,
}

/// What follows a failed attempt.
enum Next {
    Retry {
        connection: Box<dyn Connection>,
        abort: AbortSignal,
        attempt: u32,
        delay: std::time::Duration,
    },
    Stop {
        state: RequestState,
    },
}

#[instrument(skip_all, fields(url = %inner.url, method = %plan.method))]
pub(super) async fn run(inner: Arc<Inner>, plan: TransferPlan) {
    let TransferPlan {
        method,
        body,
        retry_limit,
        chunk_size,
        policy,
        observer,
        sink,
        mut connection,
        mut abort,
    } = plan;
    let url = inner.url.to_string();
    let mut progress = Progress::default();
    let mut number = 1u32;

    loop {
        let attempt = Attempt {
            inner: &inner,
            url: &url,
            abort: &abort,
            observer: observer.as_ref(),
            sink: sink.as_ref(),
            number,
            chunk_size,
        };
        debug!(attempt = number, "attempt starting");

        let performed =
            perform(&attempt, connection.as_mut(), method, body.as_ref(), &mut progress).await;
        let outcome = performed.and_then(|finished| attempt.complete(finished));

        let error = match outcome {
            Ok(()) => {
                info!(
                    attempt = number,
                    bytes = progress.last.transferred_bytes,
                    "transfer completed"
                );
                attempt.emit(RequestState::Completed, progress.last);
                return;
            }
            Err(error) => error,
        };

        match after_failure(&inner, &abort, &policy, retry_limit, error) {
            Next::Retry {
                connection: rebuilt,
                abort: signal,
                attempt: next,
                delay,
            } => {
                // Replacing the connection drops, and so aborts, the previous one.
                connection = rebuilt;
                abort = signal;
                number = next;
                progress.last = TransferStats::default();
                if let Some(observer) = &observer {
                    observer(&ProgressEvent::tick(
                        RequestState::Idle,
                        progress.last,
                        number,
                    ));
                }
                if !delay.is_zero() {
                    // An abort during backoff surfaces at the next transition.
                    let _ = abort
                        .guard(&url, async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await;
                }
            }
            Next::Stop { state } => {
                if state == RequestState::Failed
                    && let Some(observer) = &observer
                {
                    observer(&ProgressEvent::tick(state, progress.last, number));
                }
                return;
            }
        }
    }
}

/// Records the failure and decides, under the request lock, whether to rebuild.
fn after_failure(
    inner: &Inner,
    abort: &AbortSignal,
    policy: &RetryPolicy,
    retry_limit: u32,
    error: RequestError,
) -> Next {
    let mut shared = inner.lock();
    let failure = if abort.is_aborted() {
        FailureType::Cancelled
    } else {
        classify_error(&error)
    };
    let decision = if shared.disposed {
        RetryDecision::DoNotRetry {
            reason: "request disposed".to_string(),
        }
    } else {
        policy.should_retry(failure, shared.retries_performed, retry_limit)
    };

    match decision {
        RetryDecision::Retry { delay, attempt } => {
            warn!(
                url = %inner.url,
                attempt = attempt - 1,
                next_attempt = attempt,
                retry_limit,
                delay_ms = delay.as_millis(),
                error = %error,
                "attempt failed, rebuilding"
            );
            shared.last_error = Some(Arc::new(error));
            let connection = match inner.transport.connect(&shared.spec) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(url = %inner.url, error = %e, "rebuild failed");
                    shared.last_error = Some(Arc::new(RequestError::internal(format!(
                        "cannot rebuild connection: {e}"
                    ))));
                    inner.set_state(RequestState::Failed);
                    return Next::Stop {
                        state: RequestState::Failed,
                    };
                }
            };
            shared.retries_performed += 1;
            shared.attempt = attempt;
            shared.abort = AbortSignal::new();
            shared.last_error = None;
            shared.response = None;
            shared.result.release();
            inner.set_state(RequestState::Idle);
            Next::Retry {
                connection,
                abort: shared.abort.clone(),
                attempt,
                delay,
            }
        }
        RetryDecision::DoNotRetry { reason } => {
            let state = if failure == FailureType::Cancelled
                || inner.state() == RequestState::Cancelled
            {
                RequestState::Cancelled
            } else {
                RequestState::Failed
            };
            warn!(
                url = %inner.url,
                retries = shared.retries_performed,
                %reason,
                %state,
                error = %error,
                "transfer ended without success"
            );
            shared.last_error = Some(Arc::new(error));
            inner.set_state(state);
            Next::Stop { state }
        }
    }
}

/// Runs one attempt.
async fn perform(
    attempt: &Attempt<'_>,
    connection: &mut dyn Connection,
    method: HttpMethod,
    body: Option<&RequestBody>,
    progress: &mut Progress,
) -> Result<Finished, RequestError> {
    attempt.transition(RequestState::Connecting)?;
    progress.last = TransferStats::default();
    attempt.emit(RequestState::Connecting, progress.last);

    if method.sends_body()
        && let Some(body) = body
    {
        upload(attempt, connection, body, progress).await?;
    }

    let response = attempt
        .abort
        .guard(attempt.url, connection.response())
        .await?;

    let head = ResponseHead {
        status: response.status,
        headers: response.headers.clone(),
    };
    if !method.collects_response() {
        debug!(status = head.status, "response body discarded");
        return Ok(Finished { head, owned: None });
    }
    let owned = download(attempt, response, progress).await?;
    Ok(Finished { head, owned })
}

async fn upload(
    attempt: &Attempt<'_>,
    connection: &mut dyn Connection,
    body: &RequestBody,
    progress: &mut Progress,
) -> Result<(), RequestError> {
    let mut source = body.open().await?;
    let total = source.len();
    let mut stream = attempt
        .abort
        .guard(attempt.url, connection.open_request_stream(total))
        .await?;
    attempt.transition(RequestState::Progressing)?;

    let mut meter = TransferMeter::new();
    meter.set_direction(TransferDirection::Upload);
    meter.set_total(total);
    progress.last = meter.snapshot();

    let mut buf = vec![0u8; attempt.chunk_size];
    loop {
        let n = fill_from_body(&mut source, &mut buf).await?;
        if n == 0 {
            break;
        }
        attempt
            .abort
            .guard(attempt.url, stream.write(&buf[..n]))
            .await?;
        progress.last = meter.update_bytes(n);
        attempt.emit(RequestState::Progressing, progress.last);
    }
    attempt.abort.guard(attempt.url, stream.finish()).await?;
    debug!(bytes = progress.last.transferred_bytes, "upload finished");
    Ok(())
}

async fn download(
    attempt: &Attempt<'_>,
    response: Response,
    progress: &mut Progress,
) -> Result<Option<Vec<u8>>, RequestError> {
    let Response {
        content_length,
        body: mut reader,
        ..
    } = response;
    let total = expected_total(content_length, attempt.chunk_size);
    attempt.transition(RequestState::Progressing)?;

    let mut meter = TransferMeter::new();
    meter.set_direction(TransferDirection::Download);
    meter.set_total(total);
    progress.last = meter.snapshot();

    let mut owned = match attempt.sink {
        Some(handle) => {
            prepare_sink(handle, progress).await?;
            None
        }
        None => {
            let capacity =
                usize::try_from(total).map_or(MAX_INITIAL_BUFFER, |t| t.min(MAX_INITIAL_BUFFER));
            Some(Vec::with_capacity(capacity))
        }
    };

    let mut buf = vec![0u8; attempt.chunk_size];
    loop {
        let n = fill_from_response(attempt, reader.as_mut(), &mut buf).await?;
        if n == 0 {
            break;
        }
        match (&mut owned, attempt.sink) {
            (Some(buffer), _) => buffer.extend_from_slice(&buf[..n]),
            (None, Some(handle)) => handle
                .lock()
                .await
                .write_chunk(&buf[..n])
                .await
                .map_err(|e| RequestError::io("result sink", e))?,
            (None, None) => {}
        }
        progress.last = meter.update_bytes(n);
        attempt.emit(RequestState::Progressing, progress.last);
    }

    if let Some(handle) = attempt.sink {
        let mut sink = handle.lock().await;
        sink.flush()
            .await
            .map_err(|e| RequestError::io("result sink", e))?;
        if let Some(origin) = progress.sink_origin {
            sink.seek_to(origin)
                .await
                .map_err(|e| RequestError::io("result sink", e))?;
        }
    }
    debug!(bytes = progress.last.transferred_bytes, "download finished");
    Ok(owned)
}

/// Download size used for progress: the announced length, or a provisional
/// multiple of the chunk size when the server sends none.
fn expected_total(content_length: Option<u64>, chunk_size: usize) -> u64 {
    content_length
        .filter(|&length| length > 0)
        .unwrap_or_else(|| (chunk_size as u64).saturating_mul(PROVISIONAL_SIZE_FACTOR))
}

/// Remembers where the first download started, and rewinds there on retries
/// so a failed attempt's partial bytes are overwritten.
async fn prepare_sink(handle: &SinkHandle, progress: &mut Progress) -> Result<(), RequestError> {
    if !handle.is_seekable() {
        return Ok(());
    }
    let mut sink = handle.lock().await;
    let prepared = match progress.sink_origin {
        Some(origin) => sink.seek_to(origin).await,
        None => sink.position().await.map(|position| {
            progress.sink_origin = Some(position);
        }),
    };
    prepared.map_err(|e| RequestError::io("result sink", e))
}

/// Reads until `buf` is full or the body ends, so every tick is one chunk.
async fn fill_from_body(source: &mut BodySource, buf: &mut [u8]) -> Result<usize, RequestError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn fill_from_response(
    attempt: &Attempt<'_>,
    reader: &mut dyn ResponseStream,
    buf: &mut [u8],
) -> Result<usize, RequestError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = attempt
            .abort
            .guard(attempt.url, reader.read(&mut buf[filled..]))
            .await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_total_prefers_announced_length() {
        assert_eq!(expected_total(Some(1234), 4096), 1234);
    }

    #[test]
    fn test_expected_total_is_provisional_without_length() {
        assert_eq!(expected_total(None, 4096), 4096 * PROVISIONAL_SIZE_FACTOR);
        assert_eq!(expected_total(Some(0), 4096), 4096 * PROVISIONAL_SIZE_FACTOR);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_expected_total_saturates_for_huge_chunk_size() {
        assert_eq!(expected_total(None, usize::MAX), u64::MAX);
    }
}
