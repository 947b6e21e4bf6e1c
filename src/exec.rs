// src/exec.rs

//! Shell command execution for build steps and test assertions

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Lines of stderr kept in failure reports
pub const STDERR_TAIL_LINES: usize = 20;

/// Default per-command timeout (4 hours; some builds really are that slow)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when killed by a signal or the timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr
    pub fn stderr_tail(&self, lines: usize) -> String {
        tail_lines(&self.stderr, lines)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Runs shell commands
///
/// Build steps and test assertions go through this trait so tests can
/// substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, env: &[(String, String)], workdir: &Path) -> Result<CommandOutput>;
}

/// Runs commands with `sh -c` on the host
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &str, env: &[(String, String)], workdir: &Path) -> Result<CommandOutput> {
        debug!("Command: {}", command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::IoError(format!("Failed to spawn `{}`: {}", command, e)))?;

        // Drain pipes on their own threads so a chatty build cannot fill
        // the pipe buffer and stall before the timeout fires
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let exit_code = match child.wait_timeout(self.timeout)? {
            Some(status) => status.code(),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                None
            }
        };

        let stdout = stdout.map(join_drain).unwrap_or_default();
        let mut stderr = stderr.map(join_drain).unwrap_or_default();
        if exit_code.is_none() {
            stderr.push_str(&format!(
                "\nkeg: command killed or timed out after {} seconds\n",
                self.timeout.as_secs()
            ));
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
