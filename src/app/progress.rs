//! Progress rendering for a single transfer.
//!
//! Events arrive synchronously from the engine's observer callback, so every
//! handler here must stay cheap.

use std::io::{self, Write};

use indicatif::{ProgressBar, ProgressStyle};
use transfer_core::{ProgressEvent, RequestState, TransferDirection};

const BAR_STYLE: &str =
    "{prefix:>9.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";

/// How progress is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    /// `indicatif` bar on stderr.
    Bar,
    /// One JSON object per event on stderr.
    Json,
    /// Nothing.
    Hidden,
}

impl ProgressMode {
    /// JSON wins when requested; otherwise a bar only on an interactive, non-quiet stderr.
    pub(crate) fn select(json: bool, quiet: bool, stderr_is_terminal: bool) -> Self {
        if json {
            Self::Json
        } else if quiet || !stderr_is_terminal {
            Self::Hidden
        } else {
            Self::Bar
        }
    }
}

/// Turns progress events into terminal output.
#[derive(Debug, Clone)]
pub(crate) struct ProgressReporter {
    mode: ProgressMode,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new(mode: ProgressMode) -> Self {
        let bar = match mode {
            ProgressMode::Bar => {
                let bar = ProgressBar::new(0);
                bar.set_style(
                    ProgressStyle::with_template(BAR_STYLE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            ProgressMode::Json | ProgressMode::Hidden => ProgressBar::hidden(),
        };
        Self { mode, bar }
    }

    /// Callback to register with `HttpRequest::on_progress`.
    pub(crate) fn observer(&self) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
        let reporter = self.clone();
        move |event| reporter.handle(event)
    }

    fn handle(&self, event: &ProgressEvent) {
        match self.mode {
            ProgressMode::Bar => apply_event(&self.bar, event),
            ProgressMode::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    let _ = writeln!(io::stderr().lock(), "{line}");
                }
            }
            ProgressMode::Hidden => {}
        }
    }

    /// Clears the bar once the request has settled.
    pub(crate) fn finish(&self, state: RequestState) {
        if self.mode != ProgressMode::Bar {
            return;
        }
        if state == RequestState::Completed {
            self.bar.finish_with_message("done");
        } else {
            self.bar.abandon_with_message(state.as_str());
        }
    }
}

fn apply_event(bar: &ProgressBar, event: &ProgressEvent) {
    match (event.state, event.stats) {
        (RequestState::Progressing, Some(stats)) => {
            bar.set_prefix(direction_label(stats.direction));
            bar.set_length(stats.total_bytes.max(stats.transferred_bytes));
            bar.set_position(stats.transferred_bytes);
        }
        (RequestState::Connecting, _) => {
            bar.set_prefix("connect");
            bar.set_message(format!("attempt {}", event.attempt));
        }
        (RequestState::Idle, _) if event.attempt > 0 => {
            bar.set_position(0);
            bar.set_message(format!("retrying (attempt {})", event.attempt));
        }
        (state, _) => bar.set_message(state.as_str()),
    }
}

fn direction_label(direction: TransferDirection) -> &'static str {
    match direction {
        TransferDirection::Upload => "upload",
        TransferDirection::Download => "download",
        TransferDirection::Unknown => "transfer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_core::TransferStats;

    fn progressing(transferred: u64, total: u64, direction: TransferDirection) -> ProgressEvent {
        ProgressEvent {
            state: RequestState::Progressing,
            stats: Some(TransferStats {
                transferred_bytes: transferred,
                total_bytes: total,
                direction,
                ..TransferStats::default()
            }),
            attempt: 1,
        }
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(ProgressMode::select(true, true, false), ProgressMode::Json);
        assert_eq!(ProgressMode::select(false, true, true), ProgressMode::Hidden);
        assert_eq!(ProgressMode::select(false, false, false), ProgressMode::Hidden);
        assert_eq!(ProgressMode::select(false, false, true), ProgressMode::Bar);
    }

    #[test]
    fn test_progressing_event_moves_bar() {
        let bar = ProgressBar::hidden();
        apply_event(&bar, &progressing(40, 100, TransferDirection::Download));
        assert_eq!(bar.position(), 40);
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.prefix(), "download");
    }

    #[test]
    fn test_overrun_extends_length() {
        let bar = ProgressBar::hidden();
        apply_event(&bar, &progressing(150, 100, TransferDirection::Upload));
        assert_eq!(bar.length(), Some(150));
    }

    #[test]
    fn test_retry_resets_position() {
        let bar = ProgressBar::hidden();
        apply_event(&bar, &progressing(40, 100, TransferDirection::Download));
        apply_event(
            &bar,
            &ProgressEvent {
                state: RequestState::Idle,
                stats: Some(TransferStats::default()),
                attempt: 2,
            },
        );
        assert_eq!(bar.position(), 0);
        assert_eq!(bar.message(), "retrying (attempt 2)");
    }

    #[test]
    fn test_event_serializes_as_json() {
        let json = serde_json::to_value(progressing(4, 10, TransferDirection::Upload)).unwrap();
        assert_eq!(json["state"], "progressing");
        assert_eq!(json["stats"]["direction"], "upload");
        assert_eq!(json["stats"]["transferred_bytes"], 4);
        assert_eq!(json["attempt"], 1);
    }
}
