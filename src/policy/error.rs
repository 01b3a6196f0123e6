use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("error reading config file: `{0}`")]
    IOError(#[from] std::io::Error),

    #[error("error parsing config file: `{0}`")]
    SerdeYamlError(#[from] serde_yaml::Error),

    #[error("program `{0}`: name must match [A-Za-z0-9_-]+")]
    InvalidName(String),

    #[error("program `{program}`: {reason}")]
    InvalidField { program: String, reason: String },

    #[error("program `{program}`: cannot parse cmd `{cmd}`: {source}")]
    CmdParse {
        program: String,
        cmd: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("program `{program}`: unknown stopsignal `{signal}`")]
    InvalidSignal { program: String, signal: String },

    #[error("program `{program}`: cannot open log path `{path}`: {source}")]
    LogPath {
        program: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}
