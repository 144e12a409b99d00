use std::{io, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured result of an external command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no program configured")]
    Empty,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

/// Run `argv` followed by `extra` without a shell, capturing both streams.
/// The child is killed if `limit` elapses first.
pub async fn run(
    argv: &[String],
    extra: &[&str],
    limit: Option<Duration>,
) -> Result<CommandOutput, CommandError> {
    let (program, leading) = argv.split_first().ok_or(CommandError::Empty)?;

    let mut cmd = Command::new(program);
    cmd.args(leading)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let spawn_err = |source: io::Error| CommandError::Spawn {
        program: program.clone(),
        source,
    };

    let output = match limit {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| CommandError::Timeout(limit))?
            .map_err(spawn_err)?,
        None => cmd.output().await.map_err(spawn_err)?,
    };

    let code = exit_code(&output.status);
    debug!(program = %program, args = ?extra, code, "command finished");
    Ok(CommandOutput {
        code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Drop CSI escape sequences (colours, cursor movement) from terminal output.
pub fn strip_ansi(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == 0x1b {
            idx += 1;
            if idx < bytes.len() && bytes[idx] == b'[' {
                idx += 1;
                while idx < bytes.len() && !(b'@'..=b'~').contains(&bytes[idx]) {
                    idx += 1;
                }
                if idx < bytes.len() {
                    idx += 1;
                }
            }
            continue;
        }
        output.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&output).into_owned()
}
