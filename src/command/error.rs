use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("io error spawning process: `{0}`")]
    IOError(#[from] std::io::Error),

    #[error("cannot open log file `{path}`: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TerminateError {
    #[error("signal delivery failed: `{0}`")]
    NixError(#[from] nix::errno::Errno),
}
