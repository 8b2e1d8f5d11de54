//! Shell command execution for probes and the detached service restart.
//!
//! Probe commands are configured as strings and receive the interface name
//! as a single quoted argument, so everything runs through `/bin/sh -c`.
//! [`shellquote`] keeps the interface name from being interpreted by the
//! shell.
//!
//! # Example
//!
//! ```ignore
//! use ifsync_common::shell::{self, shellquote};
//!
//! let cmd = format!("{} {}", "cat /sys/class/net/eth0/mtu", shellquote("eth0"));
//! let line = shell::first_line(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{IfsyncError, IfsyncResult};

/// Path to the `sh` shell used for every command.
pub const SH_CMD: &str = "/bin/sh";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character with special
/// meaning inside double quotes (`$`, `` ` ``, `"`, `\`, newline) is escaped.
///
/// # Example
///
/// ```
/// use ifsync_common::shell::shellquote;
///
/// assert_eq!(shellquote("eth0"), "\"eth0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Builds `<command> "<argument>"`, the calling convention shared by
/// probes and the restart command.
pub fn with_arg(command: &str, arg: &str) -> String {
    format!("{} {}", command, shellquote(arg))
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The trimmed stdout output.
    pub stdout: String,
    /// The trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the first line of stdout, if stdout is not empty.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().next().filter(|l| !l.is_empty())
    }
}

/// Runs `cmd` to completion and captures its output.
///
/// Returns `Err` only if the shell could not be spawned; a non-zero exit
/// is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> IfsyncResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| IfsyncError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a command and captures the first line of its output.
///
/// The exit status is ignored: a probe that prints its answer and then
/// exits non-zero still produced an answer. `Ok(None)` means the command
/// ran but printed nothing.
pub async fn first_line(cmd: &str) -> IfsyncResult<Option<String>> {
    let result = exec(cmd).await?;
    Ok(result.first_line().map(str::to_string))
}

/// Starts `cmd` in its own process group and returns without waiting.
///
/// The child is not killed when the handle is dropped, so it outlives the
/// caller's runtime and the calling process. Its stdio is detached.
/// Returns the child's pid.
pub fn spawn_detached(cmd: &str) -> IfsyncResult<Option<u32>> {
    let spawn_err = |source: io::Error| IfsyncError::ShellExec {
        command: cmd.to_string(),
        source,
    };

    // Child reaping is tied to a runtime.
    tokio::runtime::Handle::try_current().map_err(|e| spawn_err(io::Error::other(e)))?;

    let child = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(spawn_err)?;

    tracing::debug!(command = %cmd, pid = ?child.id(), "Spawned detached command");
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("eth0"), "\"eth0\"");
        assert_eq!(shellquote("br-lan"), "\"br-lan\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_with_arg() {
        assert_eq!(
            with_arg("/etc/init.d/network", "restart"),
            "/etc/init.d/network \"restart\""
        );
    }

    #[test]
    fn test_exec_result_first_line() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "up\nsecond".to_string(),
            stderr: String::new(),
        };
        assert_eq!(result.first_line(), Some("up"));

        let empty = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        assert_eq!(empty.first_line(), None);
        assert!(!empty.success());
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("echo oops >&2; exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.stderr, "oops");
    }

    #[test]
    fn test_spawn_detached_needs_runtime() {
        match spawn_detached("true") {
            Err(IfsyncError::ShellExec { command, .. }) => assert_eq!(command, "true"),
            other => panic!("Expected ShellExec error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_detached_returns_immediately() {
        let started = std::time::Instant::now();
        let pid = spawn_detached("sleep 2").unwrap();
        assert!(pid.is_some());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_first_line_with_argument() {
        let line = first_line(&with_arg("echo", "eth0")).await.unwrap();
        assert_eq!(line.as_deref(), Some("eth0"));
    }

    #[tokio::test]
    async fn test_first_line_no_output() {
        assert_eq!(first_line("true").await.unwrap(), None);
    }
}
