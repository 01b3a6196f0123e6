use std::path::{Path, PathBuf};

use super::error::PolicyError;
use super::raw::RawConfig;

pub trait ConfigLoader {
    fn load(&self) -> Result<RawConfig, PolicyError>;
}

pub struct ConfigLoaderFile {
    file_path: PathBuf,
}

impl ConfigLoaderFile {
    pub fn new(file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
        }
    }
}

impl ConfigLoader for ConfigLoaderFile {
    fn load(&self) -> Result<RawConfig, PolicyError> {
        let f = std::fs::File::open(&self.file_path)?;
        let raw: RawConfig = serde_yaml::from_reader(f)?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn loads_a_minimal_program() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
programs:
  sleeper:
    cmd: "/bin/sleep 60"
    autostart: true
"#
        )
        .unwrap();

        let raw = ConfigLoaderFile::new(tmp.path()).load().unwrap();
        assert_eq!(raw.programs.len(), 1);
        assert!(raw.programs.contains_key("sleeper"));
        assert!(raw.programs["sleeper"].autostart);
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
programs:
  sleeper:
    cmd: "/bin/sleep 60"
    bogus_field: true
"#
        )
        .unwrap();

        assert!(ConfigLoaderFile::new(tmp.path()).load().is_err());
    }
}
