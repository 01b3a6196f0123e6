use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::info;

use crate::job_manager::{JobManager, JobManagerError, StartOutcome, StopOutcome};

/// The interactive command REPL described in §6: one command per line on stdin, dispatched
/// against the Job Manager, with outcome lines written to `out`. Runs on the main thread so
/// the process's lifetime is naturally tied to EOF/`exit`.
pub struct Shell<R, W> {
    manager: Arc<JobManager>,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Shell<R, W> {
    pub fn new(manager: Arc<JobManager>, input: R, output: W) -> Self {
        Self {
            manager,
            input,
            output,
        }
    }

    /// Reads commands until `exit` or EOF. Returns once the shell loop should stop; the caller
    /// is responsible for driving the bounded shutdown afterwards.
    pub fn run(&mut self) {
        loop {
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(err) => {
                    let _ = writeln!(self.output, "error: reading command: {err}");
                    continue;
                }
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" {
                info!("shell received exit command");
                break;
            }

            self.dispatch(line);
        }
    }

    fn dispatch(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        let result = match command {
            "status" => {
                self.print_status();
                return;
            }
            "start" => self.run_on_targets(&args, command, |m, t| {
                m.start(t).map(|outcomes| {
                    outcomes
                        .into_iter()
                        .map(|(id, outcome)| format!("{id}: {}", describe_start(outcome)))
                        .collect()
                })
            }),
            "stop" => self.run_on_targets(&args, command, |m, t| {
                m.stop(t).map(|outcomes| {
                    outcomes
                        .into_iter()
                        .map(|(id, outcome)| format!("{id}: {}", describe_stop(outcome)))
                        .collect()
                })
            }),
            "restart" => self.run_on_targets(&args, command, |m, t| {
                m.restart(t).map(|outcomes| {
                    outcomes
                        .into_iter()
                        .map(|(id, outcome)| format!("{id}: {}", describe_start(outcome)))
                        .collect()
                })
            }),
            other => Err(format!("unknown command `{other}`")),
        };

        match result {
            Ok(lines) => {
                for line in lines {
                    let _ = writeln!(self.output, "{line}");
                }
            }
            Err(message) => {
                let _ = writeln!(self.output, "error: {message}");
            }
        }
    }

    fn run_on_targets(
        &self,
        args: &[&str],
        command: &str,
        op: impl Fn(&JobManager, &str) -> Result<Vec<String>, JobManagerError>,
    ) -> Result<Vec<String>, String> {
        if args.is_empty() {
            return Err(format!("usage: {command} <name|name:index>"));
        }
        let mut lines = Vec::new();
        for target in args {
            match op(&self.manager, target) {
                Ok(outcome_lines) => lines.extend(outcome_lines),
                Err(err) => lines.push(format!("{target}: {err}")),
            }
        }
        Ok(lines)
    }

    fn print_status(&mut self) {
        let _ = writeln!(
            self.output,
            "{:<20} {:<10} {:>8} {:>10} {:>12}",
            "NAME", "STATE", "PID", "UPTIME", "LAST-EXIT"
        );
        for entry in self.manager.status() {
            let last_exit = entry
                .last_exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                self.output,
                "{:<20} {:<10} {:>8} {:>10} {:>12}",
                entry.id, entry.state, entry.pid, entry.uptime_secs, last_exit
            );
        }
    }
}

fn describe_start(outcome: StartOutcome) -> &'static str {
    match outcome {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyRunning => "already-running",
        StartOutcome::Busy => "busy",
        StartOutcome::FatalUnreachable => "fatal-unreachable",
    }
}

fn describe_stop(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Stopping => "stopping",
        StopOutcome::AlreadyStopped => "already-stopped",
    }
}

/// Runs the shell against real stdin/stdout. Extracted so [`Shell`] itself stays testable
/// against in-memory buffers.
pub fn run_stdio(manager: Arc<JobManager>) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut shell = Shell::new(manager, stdin.lock(), stdout.lock());
    shell.run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AutoRestart, Policy, Program};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::time::Duration;

    fn program(name: &str) -> Program {
        Program {
            name: name.to_string(),
            argv: vec!["/bin/sh".into(), "-c".into(), "exit 0".into()],
            numprocs: 1,
            workingdir: None,
            umask: None,
            autostart: false,
            autorestart: AutoRestart::Never,
            exitcodes: [0].into_iter().collect(),
            startretries: 0,
            starttime: Duration::from_secs(1),
            stopsignal: nix::sys::signal::Signal::SIGTERM,
            stoptime: Duration::from_secs(1),
            stdout_path: None,
            stderr_path: None,
            env: HashMap::new(),
        }
    }

    fn manager_with(program: Program) -> Arc<JobManager> {
        let mut programs = HashMap::new();
        programs.insert(program.name.clone(), program);
        Arc::new(JobManager::new(Arc::new(Policy::from_programs(programs))))
    }

    #[test]
    fn unknown_command_reports_an_error() {
        let manager = manager_with(program("thing"));
        let input = Cursor::new(b"bogus\n".to_vec());
        let mut output = Vec::new();
        Shell::new(manager, input, &mut output).run();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("unknown command `bogus`"));
    }

    #[test]
    fn start_without_a_target_is_a_usage_error() {
        let manager = manager_with(program("thing"));
        let input = Cursor::new(b"start\n".to_vec());
        let mut output = Vec::new();
        Shell::new(manager, input, &mut output).run();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("usage: start"));
    }

    #[test]
    fn start_unknown_program_reports_per_token_error() {
        let manager = manager_with(program("thing"));
        let input = Cursor::new(b"start nope\n".to_vec());
        let mut output = Vec::new();
        Shell::new(manager, input, &mut output).run();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("nope: unknown program `nope`"));
    }

    #[test]
    fn start_then_status_reports_the_instance() {
        let manager = manager_with(program("thing"));
        let input = Cursor::new(b"start thing\nstatus\nexit\n".to_vec());
        let mut output = Vec::new();
        Shell::new(manager, input, &mut output).run();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("thing:0: started"));
        assert!(text.contains("thing:0"));
    }

    #[test]
    fn exit_stops_the_read_loop() {
        let manager = manager_with(program("thing"));
        let input = Cursor::new(b"exit\nstatus\n".to_vec());
        let mut output = Vec::new();
        Shell::new(manager, input, &mut output).run();
        let text = String::from_utf8(output).unwrap();
        assert!(!text.contains("NAME"));
    }
}
