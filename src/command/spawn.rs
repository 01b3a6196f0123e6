use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::sys::stat::Mode;

use super::error::SpawnError;
use crate::policy::Program;

/// Builds a [`SpawnSpec`] from `program` and performs the blocking `Command::spawn`. This is the
/// one call in the supervision core that forks/execs and opens log files; per §4.4/§5 it must
/// always be called with the Job Manager's registry lock released — see
/// [`crate::instance::Instance::prepare_spawn`]/[`crate::instance::Instance::apply_spawn_result`].
pub fn spawn_child(program: &Program) -> Result<Child, SpawnError> {
    let spec = SpawnSpec {
        argv: &program.argv,
        workingdir: program.workingdir.as_deref(),
        umask: program.umask,
        env: &program.env,
        stdout_path: program.stdout_path.as_deref(),
        stderr_path: program.stderr_path.as_deref(),
    };
    spec.spawn()
}

/// Everything the Job Manager needs to spawn one [`crate::instance::Instance`]'s process.
/// Built fresh for every spawn attempt from the owning [`crate::policy::Program`].
pub struct SpawnSpec<'a> {
    pub argv: &'a [String],
    pub workingdir: Option<&'a Path>,
    pub umask: Option<u32>,
    pub env: &'a HashMap<String, String>,
    pub stdout_path: Option<&'a Path>,
    pub stderr_path: Option<&'a Path>,
}

impl<'a> SpawnSpec<'a> {
    /// Spawns the child in its own process group so that stop signals can be delivered to the
    /// whole group, with stdout/stderr redirected (append mode, created 0644 if absent) and the
    /// environment merged on top of the supervisor's own.
    pub fn spawn(&self) -> Result<Child, SpawnError> {
        let (bin, args) = self.argv.split_first().expect("argv validated non-empty");
        let mut command = Command::new(bin);
        command.args(args);

        if let Some(dir) = self.workingdir {
            command.current_dir(dir);
        }

        for (key, value) in self.env {
            command.env(key, value);
        }

        // own process group: stop signals are delivered with killpg(2) to the whole group,
        // not just the directly-spawned pid.
        command.process_group(0);

        command.stdout(self.open_redirect(self.stdout_path)?);
        command.stderr(self.open_redirect(self.stderr_path)?);
        command.stdin(Stdio::null());

        if let Some(mask) = self.umask {
            // umask(2) has no safe wrapper; it is async-signal-safe so calling it between
            // fork and exec in pre_exec is sound.
            unsafe {
                command.pre_exec(move || {
                    nix::sys::stat::umask(Mode::from_bits_truncate(mask));
                    Ok(())
                });
            }
        }

        Ok(command.spawn()?)
    }

    fn open_redirect(&self, path: Option<&Path>) -> Result<Stdio, SpawnError> {
        match path {
            None => Ok(Stdio::null()),
            Some(p) => {
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .mode(0o644)
                    .open(p)
                    .map_err(|source| SpawnError::LogFile {
                        path: p.display().to_string(),
                        source,
                    })?;
                Ok(Stdio::from(file))
            }
        }
    }
}
