use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::terminate::signal_group;
use crate::instance::{Instance, State};
use crate::policy::Policy;

#[derive(Error, Debug)]
pub enum JobManagerError {
    #[error("unknown program `{0}`")]
    UnknownProgram(String),

    #[error("program `{program}` has no instance at index {index}")]
    IndexOutOfRange { program: String, index: u32 },

    #[error("invalid target `{0}`")]
    InvalidTarget(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// the instance is STOPPING; a start request is refused while it is in flight
    Busy,
    FatalUnreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    AlreadyStopped,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub id: String,
    pub state: &'static str,
    pub pid: u32,
    pub uptime_secs: u64,
    pub last_exit_code: Option<i32>,
    pub retries_remaining: u32,
}

/// Registry of every declared instance, one lock, one owner. See the concurrency model: the
/// Job Manager owns this lock exclusively; the Process Monitor is the only other component
/// allowed to touch the registry, and only while holding it.
pub struct JobManager {
    policy: Arc<Policy>,
    pub(crate) registry: Mutex<HashMap<String, Instance>>,
    pub(crate) shutting_down: AtomicBool,
}

impl JobManager {
    pub fn new(policy: Arc<Policy>) -> Self {
        let mut registry = HashMap::new();
        for program in policy.programs() {
            for index in 0..program.numprocs {
                let instance = Instance::new(program, index);
                registry.insert(instance.id.clone(), instance);
            }
        }
        Self {
            policy,
            registry: Mutex::new(registry),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Issues a start for every instance whose program declares `autostart: true`. Called once
    /// at supervisor boot, before the monitor and shell loops begin.
    pub fn autostart(&self) {
        let names: Vec<String> = self
            .policy
            .programs()
            .filter(|p| p.autostart)
            .map(|p| p.name.clone())
            .collect();
        for name in names {
            if let Err(err) = self.start(&name) {
                error!(program = %name, error = %err, "autostart failed to resolve target");
            }
        }
    }

    fn resolve(&self, target: &str) -> Result<Vec<String>, JobManagerError> {
        match target.split_once(':') {
            Some((program, index_str)) => {
                let program_policy = self
                    .policy
                    .get(program)
                    .ok_or_else(|| JobManagerError::UnknownProgram(program.to_string()))?;
                let index: u32 = index_str
                    .parse()
                    .map_err(|_| JobManagerError::InvalidTarget(target.to_string()))?;
                if index >= program_policy.numprocs {
                    return Err(JobManagerError::IndexOutOfRange {
                        program: program.to_string(),
                        index,
                    });
                }
                Ok(vec![format!("{program}:{index}")])
            }
            None => {
                let program_policy = self
                    .policy
                    .get(target)
                    .ok_or_else(|| JobManagerError::UnknownProgram(target.to_string()))?;
                Ok((0..program_policy.numprocs)
                    .map(|index| format!("{target}:{index}"))
                    .collect())
            }
        }
    }

    pub fn start(&self, target: &str) -> Result<Vec<(String, StartOutcome)>, JobManagerError> {
        let ids = self.resolve(target)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.start_one(&id);
            out.push((id, outcome));
        }
        Ok(out)
    }

    /// Decides and, if warranted, performs one instance's start. The decision (does this
    /// instance need spawning, and with which program) is made under the registry lock; the
    /// actual `Command::spawn` — a blocking syscall — runs with the lock released, per §4.4/§5.
    /// `Instance::spawning` prevents a second caller from deciding to spawn the same instance in
    /// that window.
    fn start_one(&self, id: &str) -> StartOutcome {
        let program_name = {
            let mut registry = self.registry.lock().unwrap();
            let instance = registry.get_mut(id).expect("resolved id exists");
            if instance.spawning {
                return StartOutcome::Busy;
            }
            match instance.state {
                State::Running | State::Starting => return StartOutcome::AlreadyRunning,
                State::Stopping => return StartOutcome::Busy,
                State::Stopped | State::Exited | State::Fatal | State::Backoff => {
                    instance.reset_retries();
                    instance.prepare_spawn();
                    instance.program_name.clone()
                }
            }
        };

        let program = self
            .policy
            .get(&program_name)
            .expect("instance program exists in policy");
        let result = crate::command::spawn::spawn_child(program);

        let mut registry = self.registry.lock().unwrap();
        let instance = registry.get_mut(id).expect("resolved id exists");
        match instance.apply_spawn_result(result) {
            Ok(()) => {
                info!(instance = id, "starting");
                StartOutcome::Started
            }
            Err(err) => {
                error!(instance = id, error = %err, "spawn failed, instance is FATAL");
                instance.state = State::Fatal;
                StartOutcome::FatalUnreachable
            }
        }
    }

    pub fn stop(&self, target: &str) -> Result<Vec<(String, StopOutcome)>, JobManagerError> {
        let ids = self.resolve(target)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.stop_one(&id);
            out.push((id, outcome));
        }
        Ok(out)
    }

    /// Marks the instance STOPPING under the registry lock, then delivers `stopsignal` with the
    /// lock released — signal delivery is listed alongside spawn and file opens in §5 as an
    /// expensive operation that must not happen while holding the lock.
    fn stop_one(&self, id: &str) -> StopOutcome {
        let pending_signal = {
            let mut registry = self.registry.lock().unwrap();
            let instance = registry.get_mut(id).expect("resolved id exists");
            let program = self
                .policy
                .get(&instance.program_name)
                .expect("instance program exists in policy");

            match instance.state {
                State::Stopped | State::Exited | State::Fatal => return StopOutcome::AlreadyStopped,
                State::Stopping => return StopOutcome::Stopping,
                State::Starting | State::Running | State::Backoff => {
                    let pid = instance.pid;
                    instance.begin_stopping(program.stoptime);
                    info!(instance = id, "stopping");
                    pid.map(|pid| (pid, program.stopsignal))
                }
            }
        };

        if let Some((pid, stopsignal)) = pending_signal {
            if let Err(err) = signal_group(pid, stopsignal) {
                warn!(instance = id, error = %err, "failed to signal instance");
            }
        }
        StopOutcome::Stopping
    }

    /// Stop-then-start. Polls for STOPPED (bounded by the program's `stoptime` plus a fixed
    /// margin) before issuing the start, per the restart contract.
    pub fn restart(&self, target: &str) -> Result<Vec<(String, StartOutcome)>, JobManagerError> {
        let ids = self.resolve(target)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.stop_one(&id);
            let wait_bound = match outcome {
                StopOutcome::AlreadyStopped => Duration::ZERO,
                StopOutcome::Stopping => {
                    let program_name = {
                        let registry = self.registry.lock().unwrap();
                        registry.get(&id).expect("resolved id exists").program_name.clone()
                    };
                    let stoptime = self
                        .policy
                        .get(&program_name)
                        .expect("program exists")
                        .stoptime;
                    stoptime + Duration::from_secs(1)
                }
            };

            let deadline = Instant::now() + wait_bound;
            loop {
                let is_stopped = {
                    let registry = self.registry.lock().unwrap();
                    registry.get(&id).map(|i| i.state) == Some(State::Stopped)
                };
                if is_stopped || Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }

            let outcome = self.start_one(&id);
            out.push((id, outcome));
        }
        Ok(out)
    }

    pub fn status(&self) -> Vec<StatusEntry> {
        let registry = self.registry.lock().unwrap();
        let mut entries: Vec<StatusEntry> = registry
            .values()
            .map(|instance| StatusEntry {
                id: instance.id.clone(),
                state: instance.state.as_str(),
                pid: instance.pid.unwrap_or(0),
                uptime_secs: instance.uptime().as_secs(),
                last_exit_code: instance.last_exit_code,
                retries_remaining: instance.retries.remaining(),
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Broadcasts stop to every non-terminal instance, then waits up to the largest configured
    /// `stoptime` (plus margin) for every instance to reach STOPPED. Safe to call from the main
    /// thread's normal `exit`-command path, where blocking is expected.
    pub fn shutdown(&self) {
        self.request_shutdown();
        self.wait_for_shutdown();
    }

    /// Sets the shutdown flag and broadcasts `stopsignal` to every non-terminal instance. Does
    /// no blocking wait, so it is safe to call directly from a signal handler's callback: per
    /// §5, a *second* call (second INT/TERM) escalates to an immediate SIGKILL of every live
    /// process instead of repeating the graceful broadcast.
    pub fn request_shutdown(&self) {
        let already_shutting_down = self.shutting_down.swap(true, Ordering::SeqCst);
        if already_shutting_down {
            self.force_kill_all();
        } else {
            self.broadcast_stop();
        }
    }

    fn broadcast_stop(&self) {
        let ids: Vec<String> = {
            let registry = self.registry.lock().unwrap();
            registry.keys().cloned().collect()
        };
        for id in &ids {
            self.stop_one(id);
        }
    }

    /// Collects the live pids under a short lock, then delivers SIGKILL to each with the lock
    /// released, same discipline as every other blocking call in this module.
    fn force_kill_all(&self) {
        let pids: Vec<u32> = {
            let registry = self.registry.lock().unwrap();
            registry.values().filter_map(|i| i.pid).collect()
        };
        for pid in pids {
            if let Err(err) = crate::command::terminate::force_kill_group(pid) {
                warn!(pid, error = %err, "force kill on second shutdown signal failed");
            }
        }
    }

    /// Blocks until every instance reaches a terminal state or the bounded shutdown deadline
    /// (the largest configured `stoptime`, plus a fixed margin) elapses, whichever comes first.
    pub fn wait_for_shutdown(&self) {
        let max_stoptime = self
            .policy
            .programs()
            .map(|p| p.stoptime)
            .max()
            .unwrap_or(Duration::ZERO)
            + Duration::from_secs(1);

        let deadline = Instant::now() + max_stoptime;
        loop {
            let all_stopped = {
                let registry = self.registry.lock().unwrap();
                registry
                    .values()
                    .all(|i| matches!(i.state, State::Stopped | State::Exited | State::Fatal))
            };
            if all_stopped || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AutoRestart, Program};
    use std::collections::HashMap as Map;

    fn policy_with(program: Program) -> Arc<Policy> {
        let mut programs = Map::new();
        programs.insert(program.name.clone(), program);
        Arc::new(Policy::from_programs(programs))
    }

    fn quick_exit_program(name: &str) -> Program {
        Program {
            name: name.to_string(),
            argv: vec!["/bin/sh".into(), "-c".into(), "exit 0".into()],
            numprocs: 1,
            workingdir: None,
            umask: None,
            autostart: false,
            autorestart: AutoRestart::Unexpected,
            exitcodes: [0].into_iter().collect(),
            startretries: 3,
            starttime: Duration::from_secs(2),
            stopsignal: nix::sys::signal::Signal::SIGTERM,
            stoptime: Duration::from_secs(1),
            stdout_path: None,
            stderr_path: None,
            env: HashMap::new(),
        }
    }

    #[test]
    fn start_on_stopped_instance_spawns_it() {
        let policy = policy_with(quick_exit_program("one_shot"));
        let manager = JobManager::new(policy);
        let outcomes = manager.start("one_shot").unwrap();
        assert_eq!(outcomes, vec![("one_shot:0".to_string(), StartOutcome::Started)]);
    }

    #[test]
    fn start_twice_reports_already_running() {
        let policy = policy_with(quick_exit_program("sticky"));
        let manager = JobManager::new(policy);
        manager.start("sticky").unwrap();
        let outcomes = manager.start("sticky").unwrap();
        assert_eq!(
            outcomes,
            vec![("sticky:0".to_string(), StartOutcome::AlreadyRunning)]
        );
    }

    #[test]
    fn stop_on_stopped_instance_is_a_no_op() {
        let policy = policy_with(quick_exit_program("idle"));
        let manager = JobManager::new(policy);
        let outcomes = manager.stop("idle").unwrap();
        assert_eq!(
            outcomes,
            vec![("idle:0".to_string(), StopOutcome::AlreadyStopped)]
        );
    }

    #[test]
    fn unknown_program_is_an_error() {
        let policy = policy_with(quick_exit_program("known"));
        let manager = JobManager::new(policy);
        assert!(matches!(
            manager.start("unknown"),
            Err(JobManagerError::UnknownProgram(_))
        ));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let policy = policy_with(quick_exit_program("known"));
        let manager = JobManager::new(policy);
        assert!(matches!(
            manager.start("known:5"),
            Err(JobManagerError::IndexOutOfRange { .. })
        ));
    }
}
