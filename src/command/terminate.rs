use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use super::error::TerminateError;

/// Sends `signal` to the whole process group led by `pid` (the group leader, since every
/// spawned child is placed in its own process group at spawn time). A process already gone
/// (ESRCH) is treated as success: the monitor's next reap picks up the exit.
pub fn signal_group(pid: u32, signal: Signal) -> Result<(), TerminateError> {
    match signal::killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(TerminateError::from(err)),
    }
}

/// Escalates a stuck STOPPING instance: SIGKILL to the whole group.
pub fn force_kill_group(pid: u32) -> Result<(), TerminateError> {
    signal_group(pid, Signal::SIGKILL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::os::unix::process::CommandExt;

    #[test]
    fn signal_already_exited_process_group_is_not_an_error() {
        let mut child = Command::new("/bin/true").process_group(0).spawn().unwrap();
        child.wait().unwrap();
        let pid = child.id();
        assert!(signal_group(pid, Signal::SIGTERM).is_ok());
    }

    #[test]
    fn force_kill_stops_a_sleeping_group() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        force_kill_group(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
