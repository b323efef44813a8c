//! Runs the external usage CLI once and classifies what came back.
//!
//! The process and the timeout race inside one future; whichever finishes
//! first resolves the attempt. On timeout the child is dropped, which kills it
//! (`kill_on_drop`), so late output is never read.

use crate::models::{FailureReason, FetchResult, Provider};
use crate::providers::normalize;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Reserved provider id the CLI uses for its own diagnostics.
pub const CLI_MARKER_ID: &str = "cli";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Takes priority over `executable_name`; never falls back to `PATH`.
    pub executable_path: Option<PathBuf>,
    pub executable_name: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            executable_path: None,
            executable_name: "codexbar".to_string(),
            args: vec!["usage".to_string(), "--format".to_string(), "json".to_string()],
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub trait Fetcher {
    fn fetch(&self, options: FetchOptions) -> BoxFuture<'static, FetchResult>;
}

/// Fetches by spawning the configured executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandFetcher;

impl Fetcher for CommandFetcher {
    fn fetch(&self, options: FetchOptions) -> BoxFuture<'static, FetchResult> {
        Box::pin(fetch(options))
    }
}

pub async fn fetch(options: FetchOptions) -> FetchResult {
    let started = Utc::now();

    let executable = match resolve_executable(&options) {
        Ok(path) => path,
        Err(message) => {
            warn!("usage source unavailable: {message}");
            return FetchResult::failure(FailureReason::NotFound, message, started);
        }
    };

    debug!(
        "spawning {} {} (timeout {:?})",
        executable.display(),
        options.args.join(" "),
        options.timeout
    );

    let child = Command::new(&executable)
        .args(&options.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            let message = format!("failed to start {}: {e}", executable.display());
            warn!("{message}");
            return FetchResult::failure(FailureReason::NotFound, message, started);
        }
    };

    let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let message = format!("failed waiting for {}: {e}", executable.display());
            warn!("{message}");
            return FetchResult::failure(FailureReason::NonZeroExit, message, started);
        }
        Err(_) => {
            let message = format!(
                "{} did not respond within {}s",
                executable.display(),
                options.timeout.as_secs_f32()
            );
            warn!("{message}");
            return FetchResult::failure(FailureReason::Timeout, message, started);
        }
    };

    let result = classify_output(output.status.code(), &output.stdout, &output.stderr, started);
    match &result {
        FetchResult::Success { providers, .. } => {
            info!("fetched usage for {} providers", providers.len());
        }
        FetchResult::Failure { reason, message, .. } => {
            warn!("usage fetch failed ({reason}): {message}");
        }
    }
    result
}

pub fn resolve_executable(options: &FetchOptions) -> Result<PathBuf, String> {
    let explicit = options
        .executable_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty());

    if let Some(path) = explicit {
        if is_executable(path) {
            return Ok(path.clone());
        }
        return Err(format!(
            "configured executable {} is missing or not executable",
            path.display()
        ));
    }

    which::which(&options.executable_name)
        .map_err(|_| format!("{} not found on PATH", options.executable_name))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `exit_code` is `None` when the process was terminated by a signal.
pub fn classify_output(
    exit_code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
    timestamp: DateTime<Utc>,
) -> FetchResult {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    if exit_code != Some(0) {
        let message = embedded_error(&stdout)
            .or_else(|| embedded_error(&stderr))
            .or_else(|| Some(stderr.trim().to_string()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| match exit_code {
                Some(code) => format!("usage source exited with status {code}"),
                None => "usage source was terminated by a signal".to_string(),
            });
        return FetchResult::failure(FailureReason::NonZeroExit, message, timestamp);
    }

    let value = match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(value) => value,
        Err(e) => {
            return FetchResult::failure(
                FailureReason::ParseError,
                format!("usage source returned invalid JSON: {e}"),
                timestamp,
            );
        }
    };

    let Value::Array(items) = value else {
        return FetchResult::failure(
            FailureReason::UnexpectedShape,
            "usage source returned JSON that is not an array of providers",
            timestamp,
        );
    };

    let providers: Vec<Provider> = items
        .iter()
        .filter(|item| !is_cli_marker(item))
        .filter_map(normalize)
        .collect();

    FetchResult::Success {
        providers,
        timestamp,
    }
}

fn is_cli_marker(item: &Value) -> bool {
    item.get("provider").and_then(Value::as_str) == Some(CLI_MARKER_ID)
}

fn embedded_error(text: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(text.trim()).ok()?;
    match &value {
        Value::Array(items) => items.iter().find_map(error_message),
        other => error_message(other),
    }
}

fn error_message(item: &Value) -> Option<String> {
    let message = match item.get("error")? {
        Value::String(s) => s.as_str(),
        other => other.get("message")?.as_str()?,
    };
    Some(message.trim().to_string()).filter(|m| !m.is_empty())
}
