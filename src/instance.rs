use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use crate::command::error::SpawnError;
use crate::policy::{ExitOutcome, Program};
use crate::restart::RetryCounter;

/// An instance's lifecycle state. See the state machine: STOPPED, STARTING, RUNNING, STOPPING,
/// BACKOFF, EXITED and FATAL, with the transitions enumerated on [`crate::job_manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
    Backoff,
    Exited,
    Fatal,
}

impl State {
    pub fn is_running_process(&self) -> bool {
        matches!(self, State::Starting | State::Running | State::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "STOPPED",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Backoff => "BACKOFF",
            State::Exited => "EXITED",
            State::Fatal => "FATAL",
        }
    }
}

/// One managed child, identified by `program:index`. Owned exclusively by the Job Manager's
/// registry; mutated only while the registry's lock is held.
pub struct Instance {
    pub id: String,
    pub program_name: String,
    pub index: u32,
    pub state: State,
    child: Option<Child>,
    pub pid: Option<u32>,
    pub start_time: Option<Instant>,
    pub stop_deadline: Option<Instant>,
    pub retries: RetryCounter,
    pub last_exit_code: Option<i32>,
    pub last_exit_signaled: bool,
    /// Set while a `Command::spawn` for this instance is in flight with the registry lock
    /// released (see [`Instance::prepare_spawn`]/[`Instance::apply_spawn_result`]). Guards
    /// against a second caller deciding to spawn the same instance in that window; it is not
    /// one of the seven lifecycle states and never appears in `status()` output.
    pub spawning: bool,
}

impl Instance {
    pub fn new(program: &Program, index: u32) -> Self {
        Self {
            id: format!("{}:{}", program.name, index),
            program_name: program.name.clone(),
            index,
            state: State::Stopped,
            child: None,
            pid: None,
            start_time: None,
            stop_deadline: None,
            retries: RetryCounter::new(program.startretries),
            last_exit_code: None,
            last_exit_signaled: false,
            spawning: false,
        }
    }

    /// Marks this instance as about to spawn and clears its stale process fields. Call while
    /// holding the registry lock; the state field is left untouched (still e.g. BACKOFF or
    /// STOPPED) since `pid` stays `None` until [`Instance::apply_spawn_result`] runs, preserving
    /// the `state ∈ {STARTING, RUNNING, STOPPING} ⇔ pid > 0` invariant across the gap where the
    /// actual `Command::spawn` runs with the lock released.
    pub fn prepare_spawn(&mut self) {
        self.child = None;
        self.pid = None;
        self.spawning = true;
    }

    /// Commits the outcome of a `Command::spawn` performed with the registry lock released (see
    /// [`crate::command::spawn::spawn_child`]). Call after reacquiring the lock.
    pub fn apply_spawn_result(&mut self, result: Result<Child, SpawnError>) -> Result<(), SpawnError> {
        self.spawning = false;
        let child = result?;
        self.pid = Some(child.id());
        self.child = Some(child);
        self.start_time = Some(Instant::now());
        self.state = State::Starting;
        Ok(())
    }

    /// Synchronous spawn: marks intent, runs the blocking `Command::spawn` inline, and commits
    /// the result, all without releasing any lock. Safe wherever the caller isn't itself holding
    /// the registry lock across the call (unit tests, or an embedder driving a single `Instance`
    /// directly); the Job Manager and Process Monitor instead split this into
    /// `prepare_spawn`/`apply_spawn_result` around the lock-free `spawn_child` call.
    pub fn spawn(&mut self, program: &Program) -> Result<(), SpawnError> {
        self.prepare_spawn();
        let result = crate::command::spawn::spawn_child(program);
        self.apply_spawn_result(result)
    }

    pub fn reset_retries(&mut self) {
        self.retries.reset();
    }

    pub fn successful_start_deadline(&self, program: &Program) -> Option<Instant> {
        self.start_time.map(|t| t + program.starttime)
    }

    pub fn uptime(&self) -> Duration {
        match self.state {
            State::Running => self
                .start_time
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Non-blocking reap. Returns `Some(outcome)` if the process has exited.
    pub fn try_reap(&mut self) -> Option<ExitOutcome> {
        let exited = match self.child.as_mut() {
            None => return None,
            Some(child) => child.try_wait().ok().flatten(),
        };
        exited.map(|status| self.record_exit(status))
    }

    fn record_exit(&mut self, status: ExitStatus) -> ExitOutcome {
        self.child = None;
        self.pid = None;
        match status.code() {
            Some(code) => {
                self.last_exit_code = Some(code);
                self.last_exit_signaled = false;
                ExitOutcome::Code(code)
            }
            None => {
                self.last_exit_code = status.signal();
                self.last_exit_signaled = true;
                ExitOutcome::Signaled
            }
        }
    }

    pub fn begin_stopping(&mut self, stoptime: Duration) {
        self.state = State::Stopping;
        self.stop_deadline = Some(Instant::now() + stoptime);
    }

    pub fn has_live_process(&self) -> bool {
        self.child.is_some()
    }
}
