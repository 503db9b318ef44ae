//! Application layer: turns parsed arguments into one driven request.

pub(crate) mod config;
pub(crate) mod progress;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use transfer_core::{HttpRequest, HttpTransport, RequestBody, RequestState, SinkHandle, StreamSink};
use url::Url;

use crate::cli::{Command, RequestArgs, UploadArgs};
use config::{FileConfig, RunSettings};
use progress::{ProgressMode, ProgressReporter};

/// Runs the command to completion. Errors mean the process should exit non-zero.
pub(crate) async fn run(command: &Command, quiet: bool, file: Option<&FileConfig>) -> Result<()> {
    let args = command.request();
    let settings = RunSettings::resolve(args, file)?;
    debug!(?settings, "resolved run settings");

    let request = build_request(args, &settings)?;

    let mode = ProgressMode::select(args.json, quiet, std::io::stderr().is_terminal());
    let reporter = ProgressReporter::new(mode);
    request.on_progress(reporter.observer())?;

    if let Some(path) = &args.output {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open output file '{}'", path.display()))?;
        request.set_result_sink(SinkHandle::new(StreamSink::new(file)))?;
    }

    let retries = settings.retries;
    match command {
        Command::Get(_) => request.get_with_retries(retries),
        Command::Post(upload) => request.post_with_retries(retries, upload_body(upload)),
        Command::Put(upload) => {
            let Some(body) = upload_body(upload) else {
                bail!("put requires --data or --data-file");
            };
            request.put_with_retries(retries, body)
        }
    }
    .context("Failed to start request")?;

    tokio::select! {
        _ = request.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                warn!("interrupt received, cancelling");
                request.cancel();
            }
            request.wait().await;
        }
    }

    let state = request.state();
    reporter.finish(state);
    info!(
        state = %state,
        retries = request.retries_performed(),
        status = ?request.response_status(),
        "request settled"
    );

    match state {
        RequestState::Completed => deliver(&request, args).await,
        RequestState::Cancelled => bail!("request to {} was cancelled", request.url()),
        _ => match request.last_error() {
            Some(error) => bail!("request to {} failed: {error}", request.url()),
            None => bail!("request to {} ended in state {state}", request.url()),
        },
    }
}

fn build_request(args: &RequestArgs, settings: &RunSettings) -> Result<HttpRequest> {
    let url = Url::parse(&args.url).with_context(|| format!("Invalid URL '{}'", args.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Unsupported URL scheme '{}': expected http or https", url.scheme());
    }

    let transport = HttpTransport::new(settings.transport_config())
        .context("Failed to build HTTP transport")?;
    let request = HttpRequest::with_transport(url.clone(), Arc::new(transport));

    for (name, value) in &args.headers {
        request
            .add_header(name, value)
            .with_context(|| format!("Invalid header '{name}'"))?;
    }
    request.add_cookies(&url, &args.cookies)?;

    let timeout = settings.request_timeout;
    request
        .handle_request(|spec| spec.set_timeout(timeout))?
        .with_chunk_size(settings.chunk_size)?
        .with_cancel_policy(settings.cancel_policy)?;
    Ok(request)
}

fn upload_body(upload: &UploadArgs) -> Option<RequestBody> {
    if let Some(path) = &upload.data_file {
        return Some(RequestBody::from_file(path.clone()));
    }
    upload
        .data
        .as_ref()
        .map(|data| RequestBody::from(data.clone()))
}

async fn deliver(request: &HttpRequest, args: &RequestArgs) -> Result<()> {
    if !request.method().collects_response() {
        return Ok(());
    }
    if let Some(path) = &args.output {
        info!(path = %path.display(), "response written");
        return Ok(());
    }
    let bytes = request.result_as_bytes().await?;
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(&bytes)
        .await
        .context("Failed to write response to stdout")?;
    stdout.flush().await?;
    Ok(())
}
