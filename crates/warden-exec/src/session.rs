use std::{
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, ChildStdin, ExitStatus, Stdio},
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::warn;
use warden_policy::ExecPolicy;

use crate::executor::{shell_command, CommandRequest, ExecutionReport};

/// Errors surfaced by [`CommandSession`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has already been started")]
    AlreadyStarted,
    #[error("session has not been started")]
    NotStarted,
    #[error("{0}")]
    Rejected(String),
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Which pipe a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Observer invoked for each line as it is drained from a session pipe.
pub type LineObserver<'a> = &'a (dyn Fn(StreamSource, &str) + Send + Sync);

/// A stateful handle over exactly one child process, with interactive stdin
/// writes and independent line streams for stdout and stderr.
///
/// Lifecycle: created → started → (running ⇄ poll) → stopped. `start`
/// validates against the session's policy before anything is spawned, and a
/// session never spawns more than one process. Line reads block without an
/// engine-side timeout; `stop` is the cancellation primitive, and dropping a
/// still-running session kills and reaps the child.
pub struct CommandSession {
    policy: Arc<ExecPolicy>,
    command: String,
    working_dir: Option<PathBuf>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_lines: Option<Receiver<String>>,
    stderr_lines: Option<Receiver<String>>,
    exit_status: Option<ExitStatus>,
    started: bool,
}

impl CommandSession {
    pub fn new(
        policy: Arc<ExecPolicy>,
        command: impl Into<String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            policy,
            command: command.into(),
            working_dir,
            child: None,
            stdin: None,
            stdout_lines: None,
            stderr_lines: None,
            exit_status: None,
            started: false,
        }
    }

    /// Validates the command and working directory, then spawns the child
    /// with all three pipes attached. Rejects a second start.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }

        let validation = self.policy.validate_command(&self.command);
        if !validation.valid {
            return Err(SessionError::Rejected(validation.reason_text().to_string()));
        }

        if let Some(working_dir) = &self.working_dir {
            if !working_dir.is_dir() {
                return Err(SessionError::Rejected(format!(
                    "Working directory does not exist: {}",
                    working_dir.display()
                )));
            }

            let validation = self.policy.validate_path(&working_dir.to_string_lossy());
            if !validation.valid {
                return Err(SessionError::Rejected(validation.reason_text().to_string()));
            }
        }

        let mut builder = shell_command(&self.command, self.working_dir.as_deref());
        builder.stdin(Stdio::piped());
        builder.stdout(Stdio::piped());
        builder.stderr(Stdio::piped());

        let mut child = builder.spawn()?;
        self.stdin = child.stdin.take();
        self.stdout_lines = child
            .stdout
            .take()
            .map(|pipe| spawn_line_reader("session-stdout-reader", pipe));
        self.stderr_lines = child
            .stderr
            .take()
            .map(|pipe| spawn_line_reader("session-stderr-reader", pipe));
        self.child = Some(child);
        self.started = true;
        Ok(())
    }

    /// Writes `text` plus a newline to the child's stdin and flushes
    /// immediately. Once the child has terminated the pipe is broken and
    /// this returns the underlying I/O error.
    pub fn write_input(&mut self, text: &str) -> Result<(), SessionError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SessionError::NotStarted);
        };
        writeln!(stdin, "{text}")?;
        stdin.flush()?;
        Ok(())
    }

    /// Closes the child's stdin so it sees EOF after any scripted input.
    pub fn close_input(&mut self) {
        self.stdin = None;
    }

    /// Blocks until the next stdout line is available. `None` once the pipe
    /// has closed and the buffered lines are drained; each line is consumed
    /// exactly once.
    pub fn next_stdout_line(&mut self) -> Option<String> {
        self.stdout_lines
            .as_ref()?
            .recv()
            .ok()
            .map(|raw| trim_line_ending(&raw).to_string())
    }

    /// Blocking stderr counterpart of [`CommandSession::next_stdout_line`].
    pub fn next_stderr_line(&mut self) -> Option<String> {
        self.stderr_lines
            .as_ref()?
            .recv()
            .ok()
            .map(|raw| trim_line_ending(&raw).to_string())
    }

    /// Non-blocking variant; `None` means no line is buffered right now.
    pub fn try_next_stdout_line(&mut self) -> Option<String> {
        try_recv_line(self.stdout_lines.as_ref()).map(|raw| trim_line_ending(&raw).to_string())
    }

    pub fn try_next_stderr_line(&mut self) -> Option<String> {
        try_recv_line(self.stderr_lines.as_ref()).map(|raw| trim_line_ending(&raw).to_string())
    }

    /// Non-blocking liveness poll.
    pub fn is_running(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(error) => {
                warn!(error = %error, "failed to poll session child");
                false
            }
        }
    }

    /// Kills the child if it is still running and blocks until it has been
    /// reaped.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        if self.exit_status.is_none() {
            if let Some(status) = child.try_wait()? {
                self.exit_status = Some(status);
            }
        }

        if self.exit_status.is_none() {
            child.kill()?;
            self.exit_status = Some(child.wait()?);
        }

        Ok(())
    }

    /// Exit code once the child has been reaped; -1 when it died to a
    /// signal.
    pub fn exit_code(&mut self) -> Option<i64> {
        if self.exit_status.is_none() {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.exit_status = Some(status);
                }
            }
        }
        self.exit_status
            .map(|status| status.code().map(i64::from).unwrap_or(-1))
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(error) = child.kill() {
                    warn!(error = %error, "failed to kill abandoned session child");
                }
                let _ = child.wait();
            }
        }
    }
}

fn try_recv_line(receiver: Option<&Receiver<String>>) -> Option<String> {
    match receiver?.try_recv() {
        Ok(line) => Some(line),
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
    }
}

/// Forwards lines from a child pipe over a channel. Each segment keeps its
/// terminator (a final unterminated segment has none), so consumers can
/// reassemble the output byte for byte; the sender is dropped when the pipe
/// closes, which ends the receiving stream.
fn spawn_line_reader<R>(name: &str, pipe: R) -> Receiver<String>
where
    R: std::io::Read + Send + 'static,
{
    let (sender, receiver) = std::sync::mpsc::channel();
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(error = %error, "session pipe read failed");
                    break;
                }
            }
        }
    });
    if let Err(error) = spawned {
        warn!(error = %error, "failed to spawn session reader thread");
    }
    receiver
}

/// A segment as line consumers see it: the trailing `\n` (or `\r\n`)
/// removed, an unterminated segment passed through unchanged.
fn trim_line_ending(raw: &str) -> &str {
    match raw.strip_suffix('\n') {
        Some(trimmed) => trimmed.strip_suffix('\r').unwrap_or(trimmed),
        None => raw,
    }
}

/// Streaming counterpart of `CommandRunner::execute`: validates, starts a
/// session, feeds the scripted responses, drains both pipes until the child
/// exits, and folds the lines into a report. Blocking; callers on a runtime
/// drive it through `spawn_blocking`.
pub fn run_streaming(
    policy: Arc<ExecPolicy>,
    request: &CommandRequest,
    observer: Option<LineObserver<'_>>,
) -> ExecutionReport {
    let mut session = CommandSession::new(
        policy,
        request.command.clone(),
        request.working_dir.clone(),
    );
    if let Err(error) = session.start() {
        return ExecutionReport::rejection(error.to_string());
    }

    for response in &request.responses {
        if let Err(error) = session.write_input(response) {
            warn!(error = %error, "failed to feed scripted response");
            break;
        }
    }
    session.close_input();

    // Raw segments keep their terminators, so the assembled report matches
    // the child's output byte for byte (`CommandRunner::execute` captures
    // the same bytes), unterminated final line included.
    let mut stdout = String::new();
    let mut stderr = String::new();

    loop {
        let mut progressed = false;
        while let Some(raw) = try_recv_line(session.stdout_lines.as_ref()) {
            forward(observer, StreamSource::Stdout, &raw, &mut stdout);
            progressed = true;
        }
        while let Some(raw) = try_recv_line(session.stderr_lines.as_ref()) {
            forward(observer, StreamSource::Stderr, &raw, &mut stderr);
            progressed = true;
        }

        if !session.is_running() {
            break;
        }
        if !progressed {
            thread::sleep(Duration::from_millis(10));
        }
    }

    // The pipes can still hold buffered output after exit; these drains end
    // when the reader threads close their channels.
    while let Some(raw) = recv_line(session.stdout_lines.as_ref()) {
        forward(observer, StreamSource::Stdout, &raw, &mut stdout);
    }
    while let Some(raw) = recv_line(session.stderr_lines.as_ref()) {
        forward(observer, StreamSource::Stderr, &raw, &mut stderr);
    }

    let exit_code = session.exit_code().unwrap_or(-1);
    ExecutionReport {
        success: exit_code == 0,
        stdout,
        stderr,
        exit_code,
    }
}

fn forward(
    observer: Option<LineObserver<'_>>,
    source: StreamSource,
    raw: &str,
    buffer: &mut String,
) {
    if let Some(observer) = observer {
        observer(source, trim_line_ending(raw));
    }
    buffer.push_str(raw);
}

fn recv_line(receiver: Option<&Receiver<String>>) -> Option<String> {
    receiver?.recv().ok()
}
