//! Shell command execution utilities for cfgmgr daemons.
//!
//! Commands are run through `/bin/sh -c` with every interpolated value passed
//! through [`shellquote`]. Execution is blocking: callers finish the command
//! before releasing whatever lock they hold.
//!
//! # Example
//!
//! ```ignore
//! use sonic_cfgmgr_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set dev {} master {}",
//!     IP_CMD, shellquote("Ethernet0"), shellquote("PortChannel1"));
//! shell::exec_blocking_or_throw(&cmd)?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::{Output, Stdio};

use crate::error::{CfgMgrError, CfgMgrResult};

/// Path to the `ip` command for network interface configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `bridge` command for FDB learning control.
pub const BRIDGE_CMD: &str = "/sbin/bridge";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// This function wraps the string in double quotes and escapes any
/// characters that have special meaning inside double quotes:
/// - `$` (variable expansion)
/// - `` ` `` (command substitution)
/// - `"` (quote termination)
/// - `\` (escape character)
/// - newline (command termination)
///
/// # Arguments
///
/// * `s` - The string to quote
///
/// # Returns
///
/// A safely quoted string that can be used in shell commands.
///
/// # Example
///
/// ```
/// use sonic_cfgmgr_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// assert_eq!(shellquote("with\"quote"), "\"with\\\"quote\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The combined stdout output.
    pub stdout: String,
    /// The combined stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a finished command into its stdout, or a
    /// [`CfgMgrError::ShellCommandFailed`] for a non-zero exit.
    pub fn into_stdout(self, cmd: &str) -> CfgMgrResult<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CfgMgrError::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a shell command and blocks the calling thread until it exits.
pub fn exec_blocking(cmd: &str) -> CfgMgrResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command (blocking)");

    let output = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| CfgMgrError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    Ok(finish(cmd, output))
}

fn finish(cmd: &str, output: Output) -> ExecResult {
    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }
    result
}

/// Executes a shell command and returns an error on non-zero exit.
///
/// Returns the trimmed stdout on success.
pub fn exec_blocking_or_throw(cmd: &str) -> CfgMgrResult<String> {
    exec_blocking(cmd)?.into_stdout(cmd)
}
