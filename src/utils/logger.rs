use anyhow::Context;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Logging setup for hosts embedding a circuit.
///
/// With `file_dir` unset, logs go to stdout. With a directory, a rolling
/// non-blocking file appender is used so logging never stalls tick workers.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default)]
    pub max_files: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 2,
        }
    }
}

impl LoggerConfig {
    /// Read configuration from `LOG_LEVEL`, `LOG_FILE_DIR`, `LOG_FILE_PREFIX`
    /// and `LOG_ROLLING`, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("LOG_FILE_DIR").ok(),
            file_prefix: std::env::var("LOG_FILE_PREFIX").ok(),
            rolling: std::env::var("LOG_ROLLING").ok(),
            max_files: 2,
        }
    }

    /// Install the global subscriber. Returns the appender guard when
    /// logging to files; keep it alive for the life of the program.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            return Ok(None);
        };

        let rotation = match self.rolling.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("minutely") => Rotation::MINUTELY,
            _ => Rotation::DAILY,
        };

        let appender: RollingFileAppender = RollingFileAppender::builder()
            .rotation(rotation)
            .max_log_files(self.max_files.max(1))
            .filename_prefix(self.file_prefix.as_deref().unwrap_or(""))
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);

        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .try_init();

        Ok(Some(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logs_to_stdout_at_info() {
        let cfg = LoggerConfig::default();
        assert_eq!(cfg.level, "info");
        assert!(cfg.file_dir.is_none());
    }

    #[test]
    fn init_without_file_dir_returns_no_guard() {
        let guard = LoggerConfig::default().init().unwrap();
        assert!(guard.is_none());
    }
}
