use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::command::terminate::force_kill_group;
use crate::instance::{Instance, State};
use crate::job_manager::JobManager;
use crate::policy::{ExitOutcome, Program};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(300);

/// The background reconciliation loop. Wakes on a fixed cadence, and for every instance in the
/// registry, non-blockingly reaps, checks the starttime/stoptime deadlines and applies the
/// restart policy. Never holds the Job Manager's lock across a blocking syscall.
pub struct ProcessMonitor {
    manager: Arc<JobManager>,
    tick_interval: Duration,
}

impl ProcessMonitor {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self {
            manager,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            self.tick();

            if self.manager.is_shutting_down() && self.all_terminal() {
                break;
            }
            thread::sleep(self.tick_interval);
        })
    }

    fn all_terminal(&self) -> bool {
        let registry = self.manager.registry.lock().unwrap();
        registry
            .values()
            .all(|i| matches!(i.state, State::Stopped | State::Exited | State::Fatal))
    }

    fn tick(&self) {
        let actions = self.collect_actions();
        for action in actions {
            self.execute_action(action);
        }
    }

    /// Non-blocking pass over the registry: reaps exited children, checks starttime/stoptime
    /// deadlines and applies the restart policy. Any operation that would block (spawn, force
    /// kill) is queued as an [`Action`] instead of performed inline, so it can run after the lock
    /// is released, per §4.4/§5.
    fn collect_actions(&self) -> Vec<Action> {
        let policy = self.manager.policy();
        let mut registry = self.manager.registry.lock().unwrap();
        let mut actions = Vec::new();

        for instance in registry.values_mut() {
            if instance.spawning {
                continue;
            }
            let Some(program) = policy.get(&instance.program_name) else {
                continue;
            };
            if let Some(action) = reconcile_instance(instance, program) {
                actions.push(action);
            }
        }
        actions
    }

    fn execute_action(&self, action: Action) {
        match action {
            Action::Spawn { id, program_name } => self.spawn_pending(&id, &program_name),
            Action::ForceKill { id, pid } => {
                if let Err(err) = force_kill_group(pid) {
                    warn!(instance = %id, error = %err, "force kill failed");
                }
            }
        }
    }

    /// Runs the blocking `Command::spawn` with the registry lock released, then reacquires the
    /// lock only to commit the outcome onto the pinned instance.
    fn spawn_pending(&self, id: &str, program_name: &str) {
        let policy = self.manager.policy();
        let Some(program) = policy.get(program_name) else {
            return;
        };
        let result = crate::command::spawn::spawn_child(program);

        let mut registry = self.manager.registry.lock().unwrap();
        let Some(instance) = registry.get_mut(id) else {
            return;
        };
        match instance.apply_spawn_result(result) {
            Ok(()) => info!(instance = %id, "retrying start"),
            Err(err) => {
                error!(instance = %id, error = %err, "respawn failed, instance is FATAL");
                instance.state = State::Fatal;
            }
        }
    }
}

/// A blocking operation decided on under the registry lock, carried out once the lock is
/// released. Mirrors the Job Manager's own decide-under-lock/act-unlocked/commit-under-lock split.
enum Action {
    Spawn { id: String, program_name: String },
    ForceKill { id: String, pid: u32 },
}

/// Decides the next step for one instance. Never performs a blocking syscall itself; returns an
/// [`Action`] for the caller to carry out once the registry lock is released. Where the actual
/// state transition depends on the action's outcome (spawn success/failure), `prepare_spawn`
/// marks the instance in flight but leaves `state` untouched until
/// [`ProcessMonitor::spawn_pending`] commits the result.
fn reconcile_instance(instance: &mut Instance, program: &Program) -> Option<Action> {
    match instance.state {
        State::Backoff => {
            if instance.retries.remaining() == 0 {
                instance.state = State::Fatal;
                error!(instance = %instance.id, "start retries exhausted, FATAL");
                return None;
            }
            instance.prepare_spawn();
            Some(Action::Spawn {
                id: instance.id.clone(),
                program_name: instance.program_name.clone(),
            })
        }
        State::Starting | State::Running | State::Stopping => {
            if instance.state == State::Stopping && !instance.has_live_process() {
                instance.state = State::Stopped;
                instance.stop_deadline = None;
                info!(instance = %instance.id, "stopped");
                return None;
            }

            if let Some(outcome) = instance.try_reap() {
                return handle_exit(instance, program, outcome);
            }

            match instance.state {
                State::Starting => {
                    if let Some(deadline) = instance.successful_start_deadline(program) {
                        if Instant::now() >= deadline {
                            instance.state = State::Running;
                            info!(instance = %instance.id, "running");
                        }
                    }
                    None
                }
                State::Stopping => {
                    if let Some(deadline) = instance.stop_deadline {
                        if Instant::now() >= deadline {
                            if let Some(pid) = instance.pid {
                                return Some(Action::ForceKill {
                                    id: instance.id.clone(),
                                    pid,
                                });
                            }
                        }
                    }
                    None
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn handle_exit(instance: &mut Instance, program: &Program, outcome: ExitOutcome) -> Option<Action> {
    match instance.state {
        State::Stopping => {
            instance.state = State::Stopped;
            instance.stop_deadline = None;
            info!(instance = %instance.id, "stopped");
            None
        }
        State::Starting => {
            instance.retries.consume();
            instance.state = State::Backoff;
            warn!(instance = %instance.id, "start failed before starttime elapsed, backing off");
            None
        }
        State::Running => {
            if program.should_restart(outcome) {
                instance.reset_retries();
                instance.prepare_spawn();
                Some(Action::Spawn {
                    id: instance.id.clone(),
                    program_name: instance.program_name.clone(),
                })
            } else {
                instance.state = State::Exited;
                info!(instance = %instance.id, "exited");
                None
            }
        }
        _ => None,
    }
}
