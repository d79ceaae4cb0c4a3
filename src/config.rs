//! Configuration for a terminal session

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::io::DEFAULT_CAPACITY;

/// Rows of scrollback kept by default
pub const DEFAULT_TRANSCRIPT_ROWS: usize = 2000;

/// What to run in a session and how to size its buffers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program to execute; bare names are looked up in `PATH`
    pub executable: String,
    /// Working directory for the child, `None` to inherit
    pub cwd: Option<PathBuf>,
    /// Full argv including argv[0]; empty means `[executable]`
    pub args: Vec<String>,
    /// `KEY=VALUE` entries; empty inherits the host environment
    pub env: Vec<String>,
    /// Maximum scrollback rows
    pub transcript_rows: usize,
    /// Capacity of each byte queue between the pty and the emulator
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: "/bin/sh".to_string(),
            cwd: None,
            args: Vec::new(),
            env: Vec::new(),
            transcript_rows: DEFAULT_TRANSCRIPT_ROWS,
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Run `executable` with default settings
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Run the user's login shell (`$SHELL`, falling back to `/bin/sh`)
    pub fn shell() -> Self {
        std::env::var("SHELL")
            .ok()
            .filter(|shell| !shell.is_empty())
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_transcript_rows(mut self, rows: usize) -> Self {
        self.transcript_rows = rows;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// The argv the child will see
    pub fn argv(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec![self.executable.clone()]
        } else {
            self.args.clone()
        }
    }

    /// Check the values that cannot be fixed up later
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executable.is_empty() {
            return Err(ConfigError::Invalid("executable is empty".to_string()));
        }
        if let Some(bad) = self.env.iter().find(|entry| !entry.contains('=')) {
            return Err(ConfigError::Invalid(format!(
                "environment entry {bad:?} is not KEY=VALUE"
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.transcript_rows, 2000);
        assert_eq!(config.queue_capacity, 4096);
        assert_eq!(config.argv(), vec!["/bin/sh".to_string()]);
    }

    #[test]
    fn test_explicit_argv_wins() {
        let config = SessionConfig::new("/bin/sh").with_args(["-sh", "-c", "true"]);
        assert_eq!(config.argv(), vec!["-sh", "-c", "true"]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json_str(r#"{ "executable": "/bin/cat", "cwd": "/tmp" }"#)
            .unwrap();
        assert_eq!(config.executable, "/bin/cat");
        assert_eq!(config.cwd.as_deref(), Some(Path::new("/tmp")));
        assert_eq!(config.transcript_rows, DEFAULT_TRANSCRIPT_ROWS);
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "executable": "" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "env": ["NOEQUALS"] }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json_str("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let config = SessionConfig::new("/bin/echo")
            .with_args(["echo", "hi"])
            .with_env(["TERM=xterm-256color"])
            .with_transcript_rows(50);
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
