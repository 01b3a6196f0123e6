use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;
use regex::Regex;

use super::error::PolicyError;
use super::raw::{RawConfig, RawProgram};
use super::{AutoRestart, Policy, Program};

pub fn validate(raw: RawConfig) -> Result<Policy, PolicyError> {
    let name_re = Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex");

    let mut programs = HashMap::with_capacity(raw.programs.len());
    for (name, raw_program) in raw.programs {
        if !name_re.is_match(&name) {
            return Err(PolicyError::InvalidName(name));
        }
        let program = validate_program(&name, raw_program)?;
        programs.insert(name, program);
    }

    Ok(Policy::from_programs(programs))
}

fn validate_program(name: &str, raw: RawProgram) -> Result<Program, PolicyError> {
    if raw.numprocs == 0 {
        return Err(PolicyError::InvalidField {
            program: name.to_string(),
            reason: "numprocs must be >= 1".to_string(),
        });
    }

    let argv =
        shell_words::split(raw.cmd.trim()).map_err(|source| PolicyError::CmdParse {
            program: name.to_string(),
            cmd: raw.cmd.clone(),
            source,
        })?;
    if argv.is_empty() {
        return Err(PolicyError::InvalidField {
            program: name.to_string(),
            reason: "cmd must not be empty".to_string(),
        });
    }

    let autorestart = match raw.autorestart.as_str() {
        "always" => AutoRestart::Always,
        "unexpected" => AutoRestart::Unexpected,
        "never" => AutoRestart::Never,
        other => {
            return Err(PolicyError::InvalidField {
                program: name.to_string(),
                reason: format!("unknown autorestart value `{other}`"),
            })
        }
    };

    let stopsignal = resolve_signal(name, &raw.stopsignal)?;

    let umask = raw
        .umask
        .as_deref()
        .map(|s| parse_umask(name, s))
        .transpose()?;

    let stdout_path = raw
        .stdout
        .as_deref()
        .map(|p| verify_log_path(name, p))
        .transpose()?;
    let stderr_path = raw
        .stderr
        .as_deref()
        .map(|p| verify_log_path(name, p))
        .transpose()?;

    Ok(Program {
        name: name.to_string(),
        argv,
        numprocs: raw.numprocs,
        workingdir: raw.workingdir.map(PathBuf::from),
        umask,
        autostart: raw.autostart,
        autorestart,
        exitcodes: raw.exitcodes.into_iter().collect::<HashSet<i32>>(),
        startretries: raw.startretries,
        starttime: Duration::from_secs_f64(raw.starttime.max(0.0)),
        stopsignal,
        stoptime: Duration::from_secs_f64(raw.stoptime.max(0.0)),
        stdout_path,
        stderr_path,
        env: raw.env,
    })
}

fn resolve_signal(program: &str, name: &str) -> Result<Signal, PolicyError> {
    let upper = name.trim().to_uppercase();
    let with_prefix = if upper.starts_with("SIG") {
        upper.clone()
    } else {
        format!("SIG{upper}")
    };
    with_prefix
        .parse::<Signal>()
        .map_err(|_| PolicyError::InvalidSignal {
            program: program.to_string(),
            signal: name.to_string(),
        })
}

fn parse_umask(program: &str, raw: &str) -> Result<u32, PolicyError> {
    let trimmed = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(trimmed, 8).map_err(|_| PolicyError::InvalidField {
        program: program.to_string(),
        reason: format!("invalid octal umask `{raw}`"),
    })
}

fn verify_log_path(program: &str, path: &str) -> Result<PathBuf, PolicyError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|source| PolicyError::LogPath {
            program: program.to_string(),
            path: path.to_string(),
            source,
        })?;
    Ok(PathBuf::from(path))
}
