use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use tracing::{error, info};

use taskmaster::{
    cli::Cli, job_manager::JobManager, logging::Logging, monitor::ProcessMonitor, policy::Policy,
    shell, status_api,
};

fn main() -> ExitCode {
    let cli = Cli::init_cli();

    // Held for the process lifetime: dropping it stops the rotating writer's background
    // thread. `None` when logging to stderr, where no guard is needed.
    let _log_guard = match cli.log_dir() {
        Some(dir) => match Logging::try_init_rotating(
            &dir,
            "taskmaster.log",
            cli.log_max_bytes(),
            cli.log_max_backups(),
        ) {
            Ok(guard) => Some(guard),
            Err(err) => {
                eprintln!("failed to initialize rotating logging: {err}");
                None
            }
        },
        None => {
            if let Err(err) = Logging::try_init() {
                eprintln!("failed to initialize logging: {err}");
            }
            None
        }
    };

    let policy = match Policy::load(&cli.config_path()) {
        Ok(policy) => policy,
        Err(err) => {
            error!(error = %err, "configuration failed to load");
            return ExitCode::from(1);
        }
    };

    if cli.print_config() {
        println!("{:#?}", policy);
        return ExitCode::SUCCESS;
    }

    let manager = Arc::new(JobManager::new(Arc::new(policy)));
    manager.autostart();

    let monitor_handle = ProcessMonitor::new(manager.clone()).spawn();
    let _status_handle = status_api::spawn(manager.clone(), cli.http_addr());

    if let Err(err) = install_signal_handler(manager.clone()) {
        error!(error = %err, "failed to install signal handler");
        return ExitCode::from(2);
    }

    shell::run_stdio(manager.clone());

    info!("shell loop ended, beginning shutdown");
    manager.shutdown();

    if monitor_handle.join().is_err() {
        error!("process monitor thread panicked");
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}

/// Traps the supervisor's own INT/TERM. Per §5, the handler itself performs no blocking work —
/// it only flips the shutdown flag and broadcasts `stopsignal` (non-blocking signal delivery) —
/// so it never races the monitor's tick boundary. A detached watcher thread performs the bounded
/// wait and exits the process, since the shell loop may still be blocked reading stdin.
fn install_signal_handler(manager: Arc<JobManager>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("received termination signal, shutting down");
        manager.request_shutdown();

        let waiter = manager.clone();
        thread::spawn(move || {
            waiter.wait_for_shutdown();
            std::process::exit(0);
        });
    })
}
