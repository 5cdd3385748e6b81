use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Verbosity for the tool-telemetry event stream.
///
/// `Off` suppresses tool events entirely, `Summary` delivers them with large
/// result payloads stripped, `Full` delivers them untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStreamVerbosity {
    #[default]
    Off,
    Summary,
    Full,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Show successful heartbeat-run chat output on the general broadcast.
    pub show_ok_on_broadcast: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolStreamConfig {
    pub default_verbosity: ToolStreamVerbosity,
}

/// Gateway configuration consumed by the dispatch core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace_dir: PathBuf,
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub context_tokens: u32,
    pub heartbeat: HeartbeatConfig,
    pub tool_stream: ToolStreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            default_provider: None,
            default_model: None,
            context_tokens: 200_000,
            heartbeat: HeartbeatConfig::default(),
            tool_stream: ToolStreamConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    /// Parse errors are not masked.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = Config::default();
        assert_eq!(config.tool_stream.default_verbosity, ToolStreamVerbosity::Off);
        assert!(!config.heartbeat.show_ok_on_broadcast);
        assert_eq!(config.context_tokens, 200_000);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            default_model = "claude-sonnet-4"

            [tool_stream]
            default_verbosity = "summary"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(
            config.tool_stream.default_verbosity,
            ToolStreamVerbosity::Summary
        );
        assert!(!config.heartbeat.show_ok_on_broadcast);
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.default_provider, None);
    }
}
