//! Single-shot subprocess invocation with a deadline.
//!
//! The prompt goes to the child's stdin in one write and stdin is closed right
//! after. stdout and stderr are drained on their own threads while the child
//! runs, so a chatty child never blocks on a full pipe. When the deadline
//! passes the child gets SIGTERM and the call fails with `Timeout` at once; a
//! detached reaper escalates to SIGKILL after a grace period and collects the
//! exit status.
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        /// `-1` when the process was ended by a signal.
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {}ms", .elapsed.as_millis())]
    Timeout { program: String, elapsed: Duration },
}

/// Run `program` once, feed it `stdin_payload`, and return its trimmed stdout.
pub fn invoke(
    program: &str,
    args: &[String],
    stdin_payload: &str,
    timeout: Duration,
) -> Result<String, InvokeError> {
    let start = Instant::now();
    let spawn_error = |message: String| InvokeError::Spawn {
        program: program.to_string(),
        message,
    };

    let resolved = which::which(program).map_err(|err| spawn_error(err.to_string()))?;
    let mut child = Command::new(&resolved)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| spawn_error(err.to_string()))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    if let Some(mut stdin) = child.stdin.take() {
        let payload = stdin_payload.as_bytes().to_vec();
        thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe early.
            if let Err(err) = stdin.write_all(&payload) {
                tracing::debug!(error = %err, "stdin write interrupted");
            }
        });
    }

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                return Err(spawn_error(format!("wait for process: {err}")));
            }
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            terminate(&mut child);
            reap_in_background(child);
            return Err(timed_out(program, start));
        }
        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    };

    // A descendant that inherited the pipes can keep them open after the
    // child exits; the deadline still applies to reading them.
    let deadline = start + timeout;
    let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline))
    else {
        return Err(timed_out(program, start));
    };
    tracing::info!(
        program,
        elapsed_ms = start.elapsed().as_millis() as u64,
        prompt_bytes = stdin_payload.len(),
        response_bytes = stdout.len(),
        "lm invoke complete"
    );

    if !status.success() {
        return Err(InvokeError::NonZeroExit {
            program: program.to_string(),
            code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

fn timed_out(program: &str, start: Instant) -> InvokeError {
    let elapsed = start.elapsed();
    tracing::warn!(
        program,
        elapsed_ms = elapsed.as_millis() as u64,
        "lm invoke timed out"
    );
    InvokeError::Timeout {
        program: program.to_string(),
        elapsed,
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = reader.read_to_end(&mut bytes);
        let _ = tx.send(bytes);
    });
    rx
}

/// Bytes a drain thread read, or `None` if the pipe is still open at `deadline`.
fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Option<Vec<u8>> {
    let Some(rx) = rx else {
        return Some(Vec::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Some(bytes),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Vec::new()),
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet, so the id
    // cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

fn reap_in_background(mut child: Child) {
    thread::spawn(move || {
        let deadline = Instant::now() + KILL_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
            }
        }
    });
}
