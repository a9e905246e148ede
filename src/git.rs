use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::GitError;

/// Longest a single git invocation may run before it is killed
pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether `rev` names a range (`a..b` or `a...b`) rather than one commit
pub fn is_range(rev: &str) -> bool {
    rev.contains("..")
}

/// Arguments that print `rev` as a unified diff: `git show` for a single
/// commit, `git diff` for a range
pub fn diff_args(rev: &str) -> Vec<&str> {
    let verb = if is_range(rev) { "diff" } else { "show" };
    vec![verb, rev, "--unified=3", "--no-color", "--no-ext-diff"]
}

/// Unified diff text for a commit or range, run inside `repo` if given
pub fn diff_for(rev: &str, repo: Option<&Path>) -> Result<String, GitError> {
    let args = diff_args(rev);
    let mut cmd = Command::new("git");
    cmd.args(&args);
    if let Some(dir) = repo {
        cmd.current_dir(dir);
    }
    debug!(?args, "running git");

    let stdout = run_bounded(cmd, &args.join(" "), GIT_TIMEOUT)?;
    Ok(String::from_utf8(stdout)?)
}

/// Run `cmd` to completion and return its stdout, killing it once
/// `timeout` has passed
fn run_bounded(mut cmd: Command, command: &str, timeout: Duration) -> Result<Vec<u8>, GitError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(GitError::Spawn)?;

    // pipes are drained concurrently so a large diff cannot block the child
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout).map_err(GitError::Spawn)? {
        Some(status) => status,
        None => {
            warn!(command, timeout_secs = timeout.as_secs(), "git timed out");
            let _ = child.kill();
            let _ = child.wait();
            return Err(GitError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    if !status.success() {
        return Err(GitError::Command {
            command: command.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}
