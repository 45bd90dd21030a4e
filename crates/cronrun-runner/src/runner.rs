//! Spawn, drain, wait, classify.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    buffer::OutputBuffer,
    error::{Result, RunnerError},
    lines::LineSplitter,
    sink::OutputSink,
    types::{ExecResult, Invocation, RunOptions, Stream, ABNORMAL_EXIT_THRESHOLD},
};

/// Chunks in flight between the pipe readers and the sink.
const CHANNEL_CAPACITY: usize = 64;

/// Bytes requested from a pipe per read.
const READ_CHUNK: usize = 8 * 1024;

/// After the child exits, how long the pipes may stay silent before they are
/// assumed to be held open by a background descendant.
const EXIT_DRAIN_IDLE: Duration = Duration::from_millis(500);

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

type Chunk = (Stream, Vec<u8>);

/// Run `invocation` to completion or until `options.timeout` expires.
///
/// Both pipes are drained on their own tasks while the child runs so a
/// chatty process can never block on a full pipe buffer. Lines reach `sink`
/// in arrival order. The run ends when the child itself exits; a background
/// descendant still holding the pipes is not waited for.
///
/// # Errors
///
/// - `Timeout`: the deadline passed; the child was killed. Output read
///   before the kill, including an unterminated last line, still reaches
///   `sink`.
/// - `AbnormalExit`: exit code >= 127, or death by signal (`128 + signo`).
/// - `Internal`: spawn, pipe or wait failure.
pub async fn run(
    invocation: &Invocation,
    options: &RunOptions,
    sink: &mut dyn OutputSink,
) -> Result<ExecResult> {
    debug!(command = %invocation.display_line(), "spawning");

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            RunnerError::Internal(format!(
                "failed to spawn {}: {e}",
                invocation.program.display()
            ))
        })?;
    let started = Instant::now();
    let deadline = started
        .checked_add(options.timeout)
        .unwrap_or_else(|| started + FAR_FUTURE);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Internal("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Internal("stderr was not captured".to_string()))?;

    let (tx, mut rx) = mpsc::channel::<Chunk>(CHANNEL_CAPACITY);
    let readers = [
        tokio::spawn(pump(stdout, Stream::Stdout, tx.clone())),
        tokio::spawn(pump(stderr, Stream::Stderr, tx)),
    ];

    let mut capture = Capture::new(sink, options.max_output_chars);
    let mut pipes_open = true;

    let status = loop {
        tokio::select! {
            chunk = rx.recv(), if pipes_open => match chunk {
                Some((stream, bytes)) => capture.chunk(stream, &bytes),
                None => pipes_open = false,
            },
            status = child.wait() => match status {
                Ok(status) => break status,
                Err(e) => return Err(RunnerError::Internal(format!("wait failed: {e}"))),
            },
            _ = tokio::time::sleep_until(deadline) => {
                let err = kill_on_timeout(&mut child, &readers, options).await;
                capture.drain(&mut rx);
                capture.finish();
                return Err(err);
            }
        }
    };

    // The child is gone; collect what it left in the pipes.
    while pipes_open {
        let idle = (Instant::now() + EXIT_DRAIN_IDLE).min(deadline);
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some((stream, bytes)) => capture.chunk(stream, &bytes),
                None => pipes_open = false,
            },
            _ = tokio::time::sleep_until(idle) => break,
        }
    }

    if pipes_open {
        debug!("output pipes held open by a descendant; no longer reading");
        for reader in &readers {
            reader.abort();
        }
        capture.drain(&mut rx);
    } else {
        for (reader, stream) in readers.into_iter().zip([Stream::Stdout, Stream::Stderr]) {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(RunnerError::Internal(format!("reading {stream} failed: {e}")))
                }
                Err(e) => {
                    return Err(RunnerError::Internal(format!("{stream} reader crashed: {e}")))
                }
            }
        }
    }

    let exit_code = exit_code(status);
    let output = capture.finish();
    if exit_code >= ABNORMAL_EXIT_THRESHOLD {
        return Err(RunnerError::AbnormalExit {
            code: exit_code,
            output,
        });
    }
    Ok(ExecResult { exit_code, output })
}

/// Turns pipe chunks into lines for the sink and the retained output.
struct Capture<'a> {
    sink: &'a mut dyn OutputSink,
    output: OutputBuffer,
    stdout: LineSplitter,
    stderr: LineSplitter,
}

impl<'a> Capture<'a> {
    fn new(sink: &'a mut dyn OutputSink, max_output_chars: usize) -> Self {
        Self {
            sink,
            output: OutputBuffer::new(max_output_chars),
            stdout: LineSplitter::default(),
            stderr: LineSplitter::default(),
        }
    }

    fn chunk(&mut self, stream: Stream, bytes: &[u8]) {
        let lines = match stream {
            Stream::Stdout => self.stdout.feed(bytes),
            Stream::Stderr => self.stderr.feed(bytes),
        };
        for line in lines {
            self.emit(stream, &line);
        }
    }

    fn emit(&mut self, stream: Stream, line: &str) {
        self.sink.line(stream, line);
        self.output.push_line(line);
    }

    /// Take whatever the readers queued but nobody received yet.
    fn drain(&mut self, rx: &mut mpsc::Receiver<Chunk>) {
        while let Ok((stream, bytes)) = rx.try_recv() {
            self.chunk(stream, &bytes);
        }
    }

    /// Flush unterminated lines and return the retained output.
    fn finish(mut self) -> String {
        for stream in [Stream::Stdout, Stream::Stderr] {
            let partial = match stream {
                Stream::Stdout => self.stdout.flush(),
                Stream::Stderr => self.stderr.flush(),
            };
            if let Some(line) = partial {
                self.emit(stream, &line);
            }
        }
        self.output.finish()
    }
}

/// Forward `reader` to `tx` in chunks of at most [`READ_CHUNK`] bytes.
async fn pump<R>(mut reader: R, stream: Stream, tx: mpsc::Sender<Chunk>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send((stream, buf[..n].to_vec())).await.is_err() {
            // The run is over; nobody is listening.
            return Ok(());
        }
    }
}

async fn kill_on_timeout(
    child: &mut Child,
    readers: &[JoinHandle<std::io::Result<()>>],
    options: &RunOptions,
) -> RunnerError {
    if let Err(e) = child.kill().await {
        warn!("failed to kill timed-out child: {e}");
    }
    // A grandchild may still hold the pipes open; stop reading them.
    for reader in readers {
        reader.abort();
    }
    RunnerError::Timeout {
        secs: options.timeout.as_secs(),
    }
}

/// A child killed by signal N reports `128 + N`, as a shell would.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
