use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};
use which::which;

use crate::{dispatcher::RunStep, error::Error, types::ExitStatus};

const READ_BUFFER_SIZE: usize = 8192;

/// Events a session may have queued before the readers stall the program
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Something a supervised process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Natural termination, sent exactly once and never for a killed process
    Exit(ExitStatus),
}

/// A [`ProcessEvent`] tagged with the run that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEvent {
    pub run_id: u64,
    pub event: ProcessEvent,
}

pub type EventSender = mpsc::Sender<SupervisorEvent>;
pub type EventReceiver = mpsc::Receiver<SupervisorEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Starts run steps and wires up their I/O
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    /// How long readers may keep draining after the process has exited
    drain_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(drain_grace: Duration) -> Self {
        Self { drain_grace }
    }

    /// Spawn `step` in its working directory and start forwarding its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        run_id: u64,
        step: &RunStep,
        events: EventSender,
    ) -> Result<ProcessHandle, Error> {
        let program = if step.program.contains('/') {
            std::path::PathBuf::from(&step.program)
        } else {
            which(&step.program)
                .map_err(|_| Error::Spawn(format!("Command not found: {}", step.program)))?
        };

        debug!("Spawn - Command: {} {:?}", program.display(), step.args);
        debug!("Spawn - Working dir: {:?}", step.cwd);

        let mut command = Command::new(&program);
        command
            .args(&step.args)
            .current_dir(&step.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", step.program, e)))?;
        let pid = child.id();

        let (exited_tx, exited_rx) = watch::channel(false);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                stdout,
                OutputRoute {
                    run_id,
                    events: events.clone(),
                    wrap: ProcessEvent::Stdout,
                    exited: exited_rx.clone(),
                    drain_grace: self.drain_grace,
                },
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(
                stderr,
                OutputRoute {
                    run_id,
                    events: events.clone(),
                    wrap: ProcessEvent::Stderr,
                    exited: exited_rx,
                    drain_grace: self.drain_grace,
                },
            )));
        }

        let input = child.stdin.take().map(|stdin| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_input(stdin, rx));
            tx
        });

        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel();
        let waiter = tokio::spawn(supervise(
            Supervised {
                child,
                pid,
                run_id,
                readers,
                exited: exited_tx,
                alive: alive.clone(),
            },
            kill_rx,
            events,
        ));

        Ok(ProcessHandle {
            run_id,
            pid,
            input,
            kill_tx: Some(kill_tx),
            waiter: Some(waiter),
            alive,
        })
    }
}

/// Live process started by [`ProcessSupervisor::spawn`].
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    run_id: u64,
    pid: Option<u32>,
    input: Option<mpsc::UnboundedSender<String>>,
    kill_tx: Option<oneshot::Sender<()>>,
    waiter: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue `text` plus a newline for the program's stdin.
    ///
    /// Silently dropped once stdin is closed.
    pub fn write(&mut self, text: &str) {
        let Some(input) = &self.input else {
            return;
        };
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        if input.send(line).is_err() {
            debug!("stdin of run {} is closed, dropping input", self.run_id);
            self.input = None;
        }
    }

    /// SIGKILL the process group and wait until the child is reaped.
    /// Safe to call on an already finished process.
    pub async fn kill(&mut self) {
        self.input = None;
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Some(waiter) = self.waiter.take() {
            if let Err(e) = waiter.await {
                warn!("Supervisor task of run {} failed: {}", self.run_id, e);
            }
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Everything the waiter task owns besides its channels
struct Supervised {
    child: Child,
    pid: Option<u32>,
    run_id: u64,
    readers: Vec<JoinHandle<()>>,
    /// Flipped once the child has exited
    exited: watch::Sender<bool>,
    alive: Arc<AtomicBool>,
}

/// Own the child until it exits or a kill is requested.
///
/// A dropped handle counts as a kill request. Every await also watches
/// `kill_rx`, so a kill is never stuck behind a full event channel.
async fn supervise(
    mut run: Supervised,
    mut kill_rx: oneshot::Receiver<()>,
    events: EventSender,
) {
    let run_id = run.run_id;
    let waited = tokio::select! {
        status = run.child.wait() => Some(status),
        _ = &mut kill_rx => None,
    };

    let Some(status) = waited else {
        kill_process_group(run.pid);
        if let Err(e) = run.child.start_kill() {
            debug!("Run {} already gone: {}", run_id, e);
        }
        if let Err(e) = run.child.wait().await {
            warn!("Failed to reap run {}: {}", run_id, e);
        }
        run.readers.iter().for_each(|r| r.abort());
        run.alive.store(false, Ordering::SeqCst);
        debug!("Run {} killed", run_id);
        return;
    };

    let status = match status {
        Ok(status) => exit_status(status),
        Err(e) => {
            warn!("Failed to wait for run {}: {}", run_id, e);
            ExitStatus::Code(-1)
        }
    };

    // background processes the program left behind go with it
    kill_process_group(run.pid);
    run.exited.send_replace(true);

    let readers = std::mem::take(&mut run.readers);
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    let drain = async move {
        for reader in readers {
            let _ = reader.await;
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = &mut kill_rx => {
            aborts.iter().for_each(|a| a.abort());
            run.alive.store(false, Ordering::SeqCst);
            debug!("Run {} killed while draining output", run_id);
            return;
        }
    }

    run.alive.store(false, Ordering::SeqCst);
    debug!("Run {} exited with {:?}", run_id, status);
    let exit = SupervisorEvent {
        run_id,
        event: ProcessEvent::Exit(status),
    };
    tokio::select! {
        _ = events.send(exit) => {}
        _ = &mut kill_rx => debug!("Run {} killed before its exit was delivered", run_id),
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    // the child led its own group; the id stays reserved while any member lives
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signal(signal);
        }
    }
    ExitStatus::Code(-1)
}

/// Where one output stream goes and when it stops
struct OutputRoute {
    run_id: u64,
    events: EventSender,
    wrap: fn(String) -> ProcessEvent,
    exited: watch::Receiver<bool>,
    /// After the exit, a read silent for this long ends the stream
    drain_grace: Duration,
}

async fn forward_output<R>(mut reader: R, mut route: OutputRoute)
where
    R: AsyncRead + Unpin,
{
    let run_id = route.run_id;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();

    loop {
        let read = if *route.exited.borrow() {
            match time::timeout(route.drain_grace, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    debug!("Output of run {} still open after exit, closing", run_id);
                    break;
                }
            }
        } else {
            tokio::select! {
                read = reader.read(&mut buf) => read,
                changed = route.exited.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                let event = SupervisorEvent {
                    run_id,
                    event: (route.wrap)(text),
                };
                // waits for room in the channel, which stalls the pipe
                if route.events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Output stream of run {} failed: {}", run_id, e);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = route
            .events
            .send(SupervisorEvent {
                run_id,
                event: (route.wrap)(rest),
            })
            .await;
    }
}

async fn forward_input(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            debug!("stdin closed: {}", e);
            return;
        }
    }
}

/// Incremental UTF-8 decoding that keeps a character split across two
/// reads intact. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
