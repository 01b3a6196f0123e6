use std::collections::HashMap;

use serde::Deserialize;

/// Deserialized shape of the YAML configuration file, one level removed from validation.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub programs: HashMap<String, RawProgram>,
}

fn default_numprocs() -> u32 {
    1
}

fn default_autorestart() -> String {
    "unexpected".to_string()
}

fn default_exitcodes() -> Vec<i32> {
    vec![0]
}

fn default_stopsignal() -> String {
    "TERM".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProgram {
    pub cmd: String,

    #[serde(default = "default_numprocs")]
    pub numprocs: u32,

    pub workingdir: Option<String>,

    pub umask: Option<String>,

    #[serde(default)]
    pub autostart: bool,

    #[serde(default = "default_autorestart")]
    pub autorestart: String,

    #[serde(default = "default_exitcodes")]
    pub exitcodes: Vec<i32>,

    #[serde(default)]
    pub startretries: u32,

    #[serde(default)]
    pub starttime: f64,

    #[serde(default = "default_stopsignal")]
    pub stopsignal: String,

    #[serde(default)]
    pub stoptime: f64,

    pub stdout: Option<String>,

    pub stderr: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}
