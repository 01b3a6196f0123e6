use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    #[arg(short, long, default_value_t = String::from("/etc/taskmaster/config.yaml"))]
    config: String,

    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], 8080)))]
    http_addr: SocketAddr,

    #[arg(long)]
    print_config: bool,

    /// Directory for the supervisor's own log file. When unset, logs go to stderr.
    #[arg(long)]
    log_dir: Option<String>,

    /// Size threshold in bytes at which the supervisor's own log rotates.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    log_max_bytes: u64,

    /// Number of rotated log backups to keep.
    #[arg(long, default_value_t = 5)]
    log_max_backups: u32,
}

impl Cli {
    /// Parses command line arguments
    pub fn init_cli() -> Self {
        Self::parse()
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn print_config(&self) -> bool {
        self.print_config
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(PathBuf::from)
    }

    pub fn log_max_bytes(&self) -> u64 {
        self.log_max_bytes
    }

    pub fn log_max_backups(&self) -> u32 {
        self.log_max_backups
    }
}
