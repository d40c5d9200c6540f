//! Bounded subprocess execution.
//!
//! The controller is run to completion on the calling thread, but never for
//! longer than the configured timeout. Stdout is drained on a helper thread
//! while the child runs, since the pipe has finite capacity and a chatty
//! child would otherwise block forever.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDOUT_GRACE: Duration = Duration::from_millis(500);

/// Shared flag that aborts an in-flight controller call.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a finished child left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start process: {0}")]
    Launch(#[source] io::Error),

    #[error("process did not finish within {0:?}")]
    Timeout(Duration),

    #[error("process was cancelled")]
    Cancelled,

    #[error("process I/O failed: {0}")]
    Io(#[source] io::Error),
}

/// Run `program` with `args`, waiting at most `timeout` for it to exit.
pub fn run<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
    cancel: &CancelFlag,
) -> Result<ProcessOutput, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if cancel.is_cancelled() {
        debug!("Not launching {}: already cancelled", program.display());
        return Err(RunError::Cancelled);
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    hide_console_window(&mut command);

    debug!("Launching {:?}", command);
    let mut child = command.spawn().map_err(RunError::Launch)?;

    let (tx, rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let result = stdout.read_to_end(&mut buf).map(|_| buf);
            let _ = tx.send(result);
        });
    } else {
        let _ = tx.send(Ok(Vec::new()));
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child);
                return Err(RunError::Io(e));
            }
        }

        if cancel.is_cancelled() {
            warn!("Cancelling {}", program.display());
            terminate(&mut child);
            return Err(RunError::Cancelled);
        }

        if Instant::now() >= deadline {
            warn!("{} timed out after {:?}", program.display(), timeout);
            terminate(&mut child);
            return Err(RunError::Timeout(timeout));
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    // A grandchild may still hold the pipe open after the child exits.
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(STDOUT_GRACE);
    let stdout = match rx.recv_timeout(wait) {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => return Err(RunError::Io(e)),
        Err(_) => return Err(RunError::Timeout(timeout)),
    };

    debug!(
        "{} exited with {} ({} bytes of output)",
        program.display(),
        status,
        stdout.len()
    );

    Ok(ProcessOutput { status, stdout })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_command: &mut Command) {}
