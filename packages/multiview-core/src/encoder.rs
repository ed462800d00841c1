//! Encoder Process Handle (C3): owns one spawned transcoder child.
//!
//! A handle is a one-shot value: once stopped or killed it is discarded and
//! never restarted. Standard output is handed to the broadcaster for reading;
//! this struct keeps only what's needed for liveness checks and termination.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};

use crate::error::{MultiviewError, MultiviewResult};
use crate::protocol_constants::ENCODER_STOP_GRACE_SECS;

/// One spawned transcoder process.
pub struct EncoderHandle {
    child: Child,
    stdout: Option<ChildStdout>,
    stopped: bool,
}

impl EncoderHandle {
    /// Spawns the transcoder named by `argv[0]` with the remaining elements
    /// as arguments, capturing stdout and discarding stderr (besides logging
    /// it line-by-line in a detached task).
    pub fn spawn(argv: &[String]) -> MultiviewResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MultiviewError::SpawnFailed("empty argv".into()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| MultiviewError::SpawnFailed(format!("{program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MultiviewError::SpawnFailed("child has no stdout pipe".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        Ok(Self {
            child,
            stdout: Some(stdout),
            stopped: false,
        })
    }

    /// Takes ownership of the child's stdout pipe. Can only be done once; the
    /// broadcaster's pump owns it afterwards.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Whether the process is still running. Reaps the exit status as a side
    /// effect if it has already exited (non-blocking).
    pub fn is_alive(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Sends an interrupt signal and waits up to `ENCODER_STOP_GRACE_SECS`
    /// for the process to exit; force-kills if it hasn't by then. Idempotent.
    pub async fn stop_graceful(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        send_interrupt(&self.child);

        let wait = tokio::time::timeout(
            Duration::from_secs(ENCODER_STOP_GRACE_SECS),
            self.child.wait(),
        )
        .await;

        if wait.is_err() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }

    /// Kills the process immediately, no grace period. Idempotent.
    pub async fn kill(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.child.start_kill();
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: sending SIGINT to a pid we own; no memory is touched.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) {
    // No POSIX signals on this platform; graceful stop degrades to the
    // subsequent force-kill once the grace period elapses.
}

async fn log_stderr(mut stderr: tokio::process::ChildStderr) {
    let mut buf = Vec::new();
    if stderr.read_to_end(&mut buf).await.is_ok() && !buf.is_empty() {
        for line in String::from_utf8_lossy(&buf).lines() {
            log::debug!("[Encoder] {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_rejects_empty_argv() {
        let err = EncoderHandle::spawn(&[]).unwrap_err();
        assert!(matches!(err, MultiviewError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn spawn_rejects_nonexistent_program() {
        let err = EncoderHandle::spawn(&["/no/such/transcoder-binary".to_string()]).unwrap_err();
        assert!(matches!(err, MultiviewError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn handle_reports_alive_then_dead_after_kill() {
        let mut handle = EncoderHandle::spawn(&["sleep".to_string(), "5".to_string()]).unwrap();
        assert!(handle.is_alive());
        handle.kill().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn stop_graceful_is_idempotent() {
        let mut handle = EncoderHandle::spawn(&["sleep".to_string(), "5".to_string()]).unwrap();
        handle.stop_graceful().await;
        handle.stop_graceful().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn take_stdout_returns_none_on_second_call() {
        let mut handle = EncoderHandle::spawn(&["echo".to_string(), "hi".to_string()]).unwrap();
        assert!(handle.take_stdout().is_some());
        assert!(handle.take_stdout().is_none());
        handle.kill().await;
    }
}
