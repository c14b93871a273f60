//! Process supervisor.
//!
//! Every child process is watched by one background task. Children are kept
//! in a min-heap keyed by their next poll time; the task pops the earliest
//! entry, checks whether the child exited, and either reports the exit to a
//! [`ProcessEventSink`] or pushes the entry back with its next poll time.
//! Between polls the task sleeps until the next entry is due, the default
//! poll interval elapses, or a new process is registered.

use async_trait::async_trait;
use futures::FutureExt;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::SupervisorError;
use crate::command::signal_terminate;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest per-process poll interval accepted.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Entries due within this window are polled right away.
const POLL_THRESHOLD: Duration = Duration::from_millis(10);

/// Receives process lifecycle events from the supervisor.
#[async_trait]
pub trait ProcessEventSink: Send + Sync {
    async fn process_finished(&self, id: &str, status: ExitStatus) -> hookci_core::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinMode {
    #[default]
    Null,
    Piped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Null,
    /// Append to the file, creating it and its parent directory if needed.
    File(PathBuf),
}

/// How to launch a supervised process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdinMode,
    pub stdout: OutputMode,
    /// Send stderr wherever stdout goes.
    pub merge_stderr: bool,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinMode::default(),
            stdout: OutputMode::default(),
            merge_stderr: false,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, mode: StdinMode) -> Self {
        self.stdin = mode;
        self
    }

    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }

    pub fn merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self) -> io::Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(match self.stdin {
            StdinMode::Null => Stdio::null(),
            StdinMode::Piped => Stdio::piped(),
        });

        match &self.stdout {
            OutputMode::Null => {
                cmd.stdout(Stdio::null());
                if self.merge_stderr {
                    cmd.stderr(Stdio::null());
                }
            }
            OutputMode::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                if self.merge_stderr {
                    cmd.stderr(file.try_clone()?);
                }
                cmd.stdout(file);
            }
        }

        // Own process group so termination reaches the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);
        Ok(cmd)
    }
}

struct ProcessRecord {
    child: Child,
    poll_interval: Duration,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Due {
    at: Instant,
    seq: u64,
    id: String,
}

#[derive(Default)]
struct State {
    running: bool,
    stopping: bool,
    drain: bool,
    records: HashMap<String, ProcessRecord>,
    /// Ids reserved by registrations that are still spawning.
    spawning: HashSet<String>,
    heap: BinaryHeap<Reverse<Due>>,
    seq: u64,
}

impl State {
    fn schedule(&mut self, id: String, at: Instant) {
        self.seq += 1;
        self.heap.push(Reverse(Due {
            at,
            seq: self.seq,
            id,
        }));
    }
}

enum Step {
    Sleep(Duration),
    Exited(String, ExitStatus),
    Next,
    Done,
}

struct Shared {
    sink: Arc<dyn ProcessEventSink>,
    default_poll_interval: Duration,
    state: Mutex<State>,
    wake: Notify,
}

impl Shared {
    async fn run(self: Arc<Self>) {
        debug!("Process supervisor loop running");
        loop {
            match self.step().await {
                Step::Sleep(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                Step::Exited(id, status) => self.dispatch(&id, status).await,
                Step::Next => {}
                Step::Done => break,
            }
        }
        debug!("Process supervisor loop exited");
    }

    async fn step(&self) -> Step {
        let mut state = self.state.lock().await;
        if state.stopping && (!state.drain || state.heap.is_empty()) {
            return Step::Done;
        }

        let Some(Reverse(due)) = state.heap.pop() else {
            return Step::Sleep(self.default_poll_interval);
        };

        let now = Instant::now();
        if due.at > now + POLL_THRESHOLD {
            let wait = (due.at - now).min(self.default_poll_interval);
            state.heap.push(Reverse(due));
            return Step::Sleep(wait);
        }

        let polled = state
            .records
            .get_mut(&due.id)
            .map(|record| (record.child.try_wait(), record.poll_interval));

        match polled {
            // Removed since it was scheduled.
            None => Step::Next,
            Some((Ok(Some(status)), _)) => {
                state.records.remove(&due.id);
                Step::Exited(due.id, status)
            }
            Some((Ok(None), interval)) => {
                state.schedule(due.id, now + interval);
                Step::Next
            }
            Some((Err(e), interval)) => {
                warn!(process_id = %due.id, error = %e, "Failed to poll process");
                state.schedule(due.id, now + interval);
                Step::Next
            }
        }
    }

    async fn dispatch(&self, id: &str, status: ExitStatus) {
        info!(process_id = %id, %status, "Process exited");
        match AssertUnwindSafe(self.sink.process_finished(id, status))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(process_id = %id, error = %e, "Process exit handler failed"),
            Err(_) => error!(process_id = %id, "Process exit handler panicked"),
        }
    }
}

/// Supervises child processes from a single background task.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    /// `default_poll_interval` is raised to [`MIN_POLL_INTERVAL`] if lower.
    pub fn new(sink: Arc<dyn ProcessEventSink>, default_poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                default_poll_interval: default_poll_interval.max(MIN_POLL_INTERVAL),
                state: Mutex::new(State::default()),
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut task = self.task.lock().await;
        {
            let mut state = self.shared.state.lock().await;
            if state.running {
                return Err(SupervisorError::AlreadyStarted);
            }
            state.running = true;
            state.stopping = false;
            state.drain = false;
        }

        let shared = self.shared.clone();
        *task = Some(tokio::spawn(shared.run()));
        info!(
            poll_interval_ms = self.shared.default_poll_interval.as_millis() as u64,
            "Process supervisor started"
        );
        Ok(())
    }

    /// Stop the supervisor loop and wait for it to exit.
    ///
    /// With `kill`, every supervised process is sent SIGTERM first. With
    /// `drain`, the loop keeps running until every process has exited and
    /// its event was delivered; otherwise it exits right away and remaining
    /// processes are no longer tracked.
    pub async fn stop(&self, drain: bool, kill: bool) -> Result<(), SupervisorError> {
        let mut task = self.task.lock().await;
        {
            let mut state = self.shared.state.lock().await;
            if !state.running || state.stopping {
                return Err(SupervisorError::NotStarted);
            }
            state.stopping = true;
            state.drain = drain;

            if kill {
                for (id, record) in state.records.iter_mut() {
                    if let Err(e) = signal_terminate(&mut record.child) {
                        warn!(process_id = %id, error = %e, "Failed to terminate process");
                    }
                }
            }
        }
        self.shared.wake.notify_one();

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Process supervisor task failed");
            }
        }

        let mut state = self.shared.state.lock().await;
        if !state.records.is_empty() {
            warn!(
                count = state.records.len(),
                "Process supervisor stopped with processes still running"
            );
        }
        state.records.clear();
        state.spawning.clear();
        state.heap.clear();
        state.running = false;
        state.stopping = false;
        info!("Process supervisor stopped");
        Ok(())
    }

    /// Spawn and supervise a process polled at the default interval.
    ///
    /// Returns the child's stdin when [`StdinMode::Piped`] was requested.
    pub async fn start_process(
        &self,
        id: impl Into<String>,
        config: &ProcessConfig,
    ) -> Result<Option<ChildStdin>, SupervisorError> {
        self.start_process_with_interval(id, config, self.shared.default_poll_interval)
            .await
    }

    pub async fn start_process_with_interval(
        &self,
        id: impl Into<String>,
        config: &ProcessConfig,
        poll_interval: Duration,
    ) -> Result<Option<ChildStdin>, SupervisorError> {
        if poll_interval < MIN_POLL_INTERVAL {
            return Err(SupervisorError::InvalidPollInterval(poll_interval));
        }
        let id = id.into();

        {
            let mut state = self.shared.state.lock().await;
            if !state.running || state.stopping {
                return Err(SupervisorError::NotStarted);
            }
            if state.records.contains_key(&id) || !state.spawning.insert(id.clone()) {
                return Err(SupervisorError::DuplicateProcess(id));
            }
        }

        // Spawn (and open output files) without holding the state lock.
        let spawned = config.command().map_err(SupervisorError::from).and_then(|mut command| {
            command.spawn().map_err(|source| SupervisorError::Spawn {
                program: config.program.clone(),
                source,
            })
        });

        let mut state = self.shared.state.lock().await;
        state.spawning.remove(&id);
        let mut child = spawned?;
        if !state.running || state.stopping {
            drop(state);
            if let Err(e) = signal_terminate(&mut child) {
                warn!(process_id = %id, error = %e, "Failed to terminate process");
            }
            return Err(SupervisorError::NotStarted);
        }

        let stdin = child.stdin.take();
        info!(process_id = %id, pid = ?child.id(), program = %config.program, "Started process");

        state.records.insert(
            id.clone(),
            ProcessRecord {
                child,
                poll_interval,
            },
        );
        state.schedule(id, Instant::now() + poll_interval);
        drop(state);

        self.shared.wake.notify_one();
        Ok(stdin)
    }

    /// Ask a supervised process to terminate. Its exit is reported through
    /// the sink like any other.
    pub async fn terminate(&self, id: &str) -> Result<(), SupervisorError> {
        let mut state = self.shared.state.lock().await;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| SupervisorError::UnknownProcess(id.to_string()))?;
        debug!(process_id = %id, pid = ?record.child.id(), "Terminating process");
        signal_terminate(&mut record.child)?;
        Ok(())
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.shared.state.lock().await.records.contains_key(id)
    }

    pub async fn process_count(&self) -> usize {
        self.shared.state.lock().await.records.len()
    }
}
