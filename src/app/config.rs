//! Config file loading and CLI merge.
//!
//! The file is a flat list of `key = value` lines at
//! `$XDG_CONFIG_HOME/transfer/config.toml` (or `$HOME/.config/transfer/config.toml`).
//! Command-line flags always win over file values.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use transfer_core::request::constants::{
    CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, default_retry_count, transfer_chunk_size,
};
use transfer_core::{CancelPolicy, TransportConfig};

use crate::cli::RequestArgs;

/// Values read from the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Default transfer chunk size in bytes.
    pub chunk_size: Option<u64>,
    /// Default retry count.
    pub retries: Option<u32>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Default cancellation policy.
    pub cancel_policy: Option<CancelPolicy>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against the same ranges the CLI enforces.
    pub fn validate(&self) -> Result<()> {
        if let Some(chunk_size) = self.chunk_size
            && !(1..=67_108_864).contains(&chunk_size)
        {
            bail!("Invalid config value for `chunk_size`: {chunk_size}. Expected range: 1..=67108864");
        }
        if let Some(retries) = self.retries
            && retries > 100
        {
            bail!("Invalid config value for `retries`: {retries}. Expected range: 0..=100");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor a CLI flag decides.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/transfer/config.toml`
/// 2. `$HOME/.config/transfer/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("transfer").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("transfer")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file from the default path. A missing file is not an error.
pub fn load_default_file_config() -> Result<Option<FileConfig>> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "chunk_size" => cfg.chunk_size = Some(parse_integer_u64(value).with_context(invalid)?),
            "retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let retries = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("retries out of range for u32"))
                    .with_context(invalid)?;
                cfg.retries = Some(retries);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "cancel_policy" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                let policy = parsed
                    .parse::<CancelPolicy>()
                    .map_err(anyhow::Error::msg)
                    .with_context(invalid)?;
                cfg.cancel_policy = Some(policy);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(invalid)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

/// Effective settings for one run after merging CLI flags over the file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub retries: u32,
    pub chunk_size: usize,
    pub cancel_policy: CancelPolicy,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl RunSettings {
    /// Merges `args` over `file`, falling back to library defaults.
    pub fn resolve(args: &RequestArgs, file: Option<&FileConfig>) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();
        let chunk_size = match args.chunk_size.or(file.chunk_size) {
            Some(bytes) => usize::try_from(bytes).context("chunk size does not fit in memory")?,
            None => transfer_chunk_size(),
        };
        Ok(Self {
            retries: args.retries.or(file.retries).unwrap_or_else(default_retry_count),
            chunk_size,
            cancel_policy: args.cancel_policy.or(file.cancel_policy).unwrap_or_default(),
            request_timeout: args.timeout.map(Duration::from_secs),
            connect_timeout: Duration::from_secs(
                file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            read_timeout: Duration::from_secs(file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
        })
    }

    /// Transport settings for this run.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            ..TransportConfig::default()
        }
    }
}

/// Picks the default log filter.
///
/// Priority: `--quiet` > `-v` count > config file verbosity > `info`.
/// `RUST_LOG` is checked by the caller before this applies.
#[must_use]
pub fn default_log_level(quiet: bool, verbose: u8, file: Option<&FileConfig>) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => file
            .and_then(|cfg| cfg.verbosity)
            .map_or("info", VerbositySetting::filter),
        1 => "debug",
        _ => "trace",
    }
}
