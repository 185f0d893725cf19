use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "commands.log";
const DEFAULT_FILTER: &str = "info";

/// Installs the process-wide JSON-lines subscriber writing to
/// `<logs_dir>/commands.log`. `RUST_LOG` overrides the default `info` filter.
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(logs_dir: &Path) -> Result<PathBuf, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let path = logs_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(Mutex::new(file))
        .try_init();
    if let Err(error) = installed {
        tracing::debug!(%error, "tracing subscriber already installed");
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_file_and_tolerates_reinit() {
        let dir = std::env::temp_dir().join(format!("discipline-logging-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let first = init_logging(&dir).expect("first init");
        let second = init_logging(&dir).expect("second init");
        assert_eq!(first, second);
        assert!(first.exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
