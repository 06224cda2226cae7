//! Supervisor for worker processes.
//!
//! Every worker is spawned with stdout and stderr piped and handed to its own
//! [`StreamReader`] immediately, so a chatty worker can never block on a full
//! pipe. The supervisor owns the ordered sink and releases it last on
//! shutdown, after every worker has been told to stop.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use evalrun_core::{SignalExtractor, WorkerCommand, WorkerRole, WorkerState};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::HarnessError;
use crate::reader::{merged_lines, StreamReader};
use crate::sink::{LogSink, SinkHandle};
use crate::state::SessionState;

/// Default time to wait for workers to exit after the termination signal.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Opaque reference to a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerHandle(u64);

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct WorkerProcess {
    handle: WorkerHandle,
    role: WorkerRole,
    child: Child,
    state: WorkerState,
    reader: Option<JoinHandle<u64>>,
    stop: CancellationToken,
}

/// Launches, tracks and terminates worker processes.
pub struct ProcessSupervisor {
    extractor: Arc<SignalExtractor>,
    state: Arc<SessionState>,
    sink: LogSink,
    workers: Vec<WorkerProcess>,
    next_id: u64,
    shutdown_grace: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor that routes worker output into `sink`.
    pub fn new(sink: LogSink, extractor: SignalExtractor, state: Arc<SessionState>) -> Self {
        Self {
            extractor: Arc::new(extractor),
            state,
            sink,
            workers: Vec::new(),
            next_id: 0,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set how long shutdown waits for workers before killing them.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// A producer handle for harness messages.
    pub fn sink(&self) -> SinkHandle {
        self.sink.handle()
    }

    /// Handles, roles and states of the registered workers, in start order.
    pub fn registered(&self) -> Vec<(WorkerHandle, WorkerRole, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.handle, w.role, w.state))
            .collect()
    }

    /// Spawn a worker and start draining its output.
    ///
    /// At most one worker of a restartable role may be registered at a time.
    pub fn start(
        &mut self,
        role: WorkerRole,
        command: &WorkerCommand,
    ) -> Result<WorkerHandle, HarnessError> {
        if role.is_restartable() && self.workers.iter().any(|w| w.role == role) {
            return Err(HarnessError::RestartableAlreadyRunning(role));
        }

        self.sink.handle().note(format!("----- Starting {} -----", role));
        info!(role = %role, command = %command, "Starting worker");

        let mut cmd = Command::new(&command.runtime);
        cmd.args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let launch_error = |source: io::Error| HarnessError::Launch {
            role,
            program: command.runtime.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(|e| {
            error!(role = %role, error = %e, "Failed to spawn worker");
            launch_error(e)
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error(io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| launch_error(io::Error::other("stderr was not captured")))?;

        let handle = WorkerHandle(self.next_id);
        self.next_id += 1;

        let stop = CancellationToken::new();
        let reader = StreamReader::new(
            role,
            self.extractor.clone(),
            self.state.clone(),
            self.sink.handle(),
        )
        .spawn(merged_lines(stdout, stderr), stop.clone());

        info!(role = %role, handle = %handle, pid = ?child.id(), "Worker spawned");

        self.workers.push(WorkerProcess {
            handle,
            role,
            child,
            state: WorkerState::Starting,
            reader: Some(reader),
            stop,
        });
        Ok(handle)
    }

    fn worker_mut(&mut self, handle: WorkerHandle) -> Result<&mut WorkerProcess, HarnessError> {
        self.workers
            .iter_mut()
            .find(|w| w.handle == handle)
            .ok_or(HarnessError::UnknownWorker(handle.0))
    }

    /// Ask a worker to exit. Does not wait; repeated calls are no-ops.
    pub fn terminate(&mut self, handle: WorkerHandle) -> Result<(), HarnessError> {
        let worker = self.worker_mut(handle)?;
        terminate_worker(worker);
        Ok(())
    }

    /// Returns true while the worker process has not exited.
    ///
    /// The first check that finds a starting worker alive marks it running.
    pub fn is_alive(&mut self, handle: WorkerHandle) -> Result<bool, HarnessError> {
        let worker = self.worker_mut(handle)?;
        if worker.state.is_terminal() {
            return Ok(false);
        }
        match worker.child.try_wait()? {
            None => {
                if worker.state == WorkerState::Starting {
                    worker.state = WorkerState::Running;
                }
                Ok(true)
            }
            Some(status) => {
                debug!(role = %worker.role, code = ?status.code(), "Worker has exited");
                worker.state = WorkerState::Terminated;
                Ok(false)
            }
        }
    }

    /// Stop a worker's reader, wait for the reader task to finish and drop
    /// the worker from the registry. The process is reaped in the background.
    ///
    /// Returns the number of lines the reader consumed.
    pub async fn retire(&mut self, handle: WorkerHandle) -> Result<u64, HarnessError> {
        let index = self
            .workers
            .iter()
            .position(|w| w.handle == handle)
            .ok_or(HarnessError::UnknownWorker(handle.0))?;
        let mut worker = self.workers.remove(index);

        worker.stop.cancel();
        let lines = join_reader(&mut worker).await;

        let role = worker.role;
        let mut child = worker.child;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(role = %role, code = ?status.code(), "Worker reaped"),
                Err(e) => warn!(role = %role, error = %e, "Failed to reap worker"),
            }
        });

        debug!(role = %role, handle = %handle, lines, "Worker retired");
        Ok(lines)
    }

    /// Ask every registered worker to exit, in start order.
    pub fn terminate_all(&mut self) {
        for worker in self.workers.iter_mut() {
            terminate_worker(worker);
        }
    }

    /// Terminate every worker, wait for them to exit (killing stragglers after
    /// the grace period), join their readers and release the session log.
    ///
    /// Returns the number of lines written to the log.
    pub async fn shutdown(mut self) -> u64 {
        let sink = self.sink.handle();
        sink.note("Stopping...");
        self.terminate_all();

        for worker in self.workers.iter_mut() {
            match tokio::time::timeout(self.shutdown_grace, worker.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(role = %worker.role, code = ?status.code(), "Worker exited");
                }
                Ok(Err(e)) => warn!(role = %worker.role, error = %e, "Failed to wait for worker"),
                Err(_) => {
                    warn!(role = %worker.role, "Worker ignored termination signal, killing");
                    worker.child.kill().await.ok();
                }
            }
            worker.state = WorkerState::Terminated;
            // Grandchildren may still hold the pipes open.
            worker.stop.cancel();
            join_reader(worker).await;
        }

        if self.state.probe_error_occurred() {
            sink.note("Note: An error occurred!");
        }
        drop(sink);
        self.workers.clear();
        self.sink.close().await
    }
}

fn terminate_worker(worker: &mut WorkerProcess) {
    if worker.state.is_stopping() {
        return;
    }
    info!(role = %worker.role, handle = %worker.handle, "Terminating worker");
    if let Err(e) = send_terminate(&mut worker.child) {
        debug!(role = %worker.role, error = %e, "Termination signal not delivered");
    }
    worker.state = WorkerState::Terminating;
}

async fn join_reader(worker: &mut WorkerProcess) -> u64 {
    let Some(reader) = worker.reader.take() else {
        return 0;
    };
    match reader.await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(role = %worker.role, error = %e, "Reader task failed");
            0
        }
    }
}

/// Graceful termination: SIGTERM on Unix.
#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
