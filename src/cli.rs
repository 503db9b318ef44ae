//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use transfer_core::CancelPolicy;

/// Run a single HTTP transfer with progress, retries and cancellation.
///
/// The response body is printed to stdout unless `--output` names a file.
#[derive(Parser, Debug)]
#[command(name = "transfer")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Supported HTTP verbs.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a resource
    Get(RequestArgs),
    /// Upload an optional body and download the reply
    Post(UploadArgs),
    /// Upload a body; the reply is discarded
    Put(UploadArgs),
}

impl Command {
    /// Options shared by every verb.
    #[must_use]
    pub fn request(&self) -> &RequestArgs {
        match self {
            Self::Get(request) => request,
            Self::Post(upload) | Self::Put(upload) => &upload.request,
        }
    }
}

/// Options shared by every verb.
#[derive(ClapArgs, Debug)]
pub struct RequestArgs {
    /// Target URL (http or https)
    pub url: String,

    /// Extra request header as `name:value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Cookie as `name=value`, scoped to the target URL (repeatable)
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    pub cookies: Vec<String>,

    /// Write the response body to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Retries after transport failures (0-100)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub retries: Option<u32>,

    /// Transfer chunk size in bytes
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=67_108_864))]
    pub chunk_size: Option<u64>,

    /// What Ctrl-C does: abandon, or consume_retry
    #[arg(long, value_name = "POLICY")]
    pub cancel_policy: Option<CancelPolicy>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Emit progress events as JSON lines on stderr instead of a progress bar
    #[arg(long)]
    pub json: bool,
}

/// Request options plus an upload body.
#[derive(ClapArgs, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Inline request body
    #[arg(short = 'd', long, conflicts_with = "data_file")]
    pub data: Option<String>,

    /// Read the request body from this file
    #[arg(long, value_name = "FILE")]
    pub data_file: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected NAME:VALUE, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_of(args: &Args) -> &RequestArgs {
        args.command.request()
    }

    #[test]
    fn test_cli_get_parses_url() {
        let args = Args::try_parse_from(["transfer", "get", "https://example.com/a"]).unwrap();
        assert!(matches!(args.command, Command::Get(_)));
        let request = request_of(&args);
        assert_eq!(request.url, "https://example.com/a");
        assert!(request.headers.is_empty());
        assert!(request.retries.is_none());
        assert!(request.chunk_size.is_none());
        assert!(!request.json);
    }

    #[test]
    fn test_cli_missing_subcommand_rejected() {
        let result = Args::try_parse_from(["transfer"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_url_rejected() {
        let result = Args::try_parse_from(["transfer", "get"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["transfer", "-v", "get", "http://h/"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["transfer", "get", "http://h/", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["transfer", "--quiet", "get", "http://h/"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["transfer", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["transfer", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["transfer", "get", "http://h/", "--invalid-flag"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_headers_repeatable() {
        let args = Args::try_parse_from([
            "transfer",
            "get",
            "http://h/",
            "-H",
            "Accept: text/plain",
            "--header",
            "X-Trace:abc",
        ])
        .unwrap();
        assert_eq!(
            request_of(&args).headers,
            vec![
                ("Accept".to_string(), "text/plain".to_string()),
                ("X-Trace".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_cli_header_without_colon_rejected() {
        let err = Args::try_parse_from(["transfer", "get", "http://h/", "-H", "Accept"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_retries_range() {
        let args = Args::try_parse_from(["transfer", "get", "http://h/", "-r", "0"]).unwrap();
        assert_eq!(request_of(&args).retries, Some(0));

        let err = Args::try_parse_from(["transfer", "get", "http://h/", "-r", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_chunk_size_zero_rejected() {
        let err = Args::try_parse_from(["transfer", "get", "http://h/", "--chunk-size", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_cancel_policy_parses() {
        let args = Args::try_parse_from([
            "transfer",
            "get",
            "http://h/",
            "--cancel-policy",
            "consume_retry",
        ])
        .unwrap();
        assert_eq!(request_of(&args).cancel_policy, Some(CancelPolicy::ConsumeRetry));

        let err = Args::try_parse_from([
            "transfer",
            "get",
            "http://h/",
            "--cancel-policy",
            "sometimes",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_post_with_inline_data() {
        let args =
            Args::try_parse_from(["transfer", "post", "http://h/items", "-d", "hello"]).unwrap();
        let Command::Post(upload) = args.command else {
            panic!("expected post");
        };
        assert_eq!(upload.data.as_deref(), Some("hello"));
        assert!(upload.data_file.is_none());
    }

    #[test]
    fn test_cli_data_conflicts_with_data_file() {
        let err = Args::try_parse_from([
            "transfer",
            "put",
            "http://h/items",
            "--data",
            "x",
            "--data-file",
            "body.bin",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_get_rejects_data() {
        let err =
            Args::try_parse_from(["transfer", "get", "http://h/", "--data", "x"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
