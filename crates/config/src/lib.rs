//! Configuration loading, validation, and management for Duet.
//!
//! Loads configuration from `~/.duet/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.duet/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Collaborator credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider endpoint (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model the collaborator runs on
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per collaborator reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout for the collaborator
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Document layout and location
    #[serde(default)]
    pub document: DocumentConfig,

    /// Kernel interpreter limits and required entry points
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Reload transaction policy
    #[serde(default)]
    pub reload: ReloadConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("document", &self.document)
            .field("kernel", &self.kernel)
            .field("reload", &self.reload)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Default document path for `duet session`
    #[serde(default = "default_document_path")]
    pub path: String,

    /// The line dividing kernel from annotations
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Comment token prefixed to every annotation line
    #[serde(default = "default_comment_prefix")]
    pub comment_prefix: String,

    /// Persist after every commit, not only on `save`
    #[serde(default)]
    pub autosave: bool,
}

fn default_document_path() -> String {
    "duet.dt".into()
}
fn default_separator() -> String {
    "# === CONVERSATION ===".into()
}
fn default_comment_prefix() -> String {
    "#".into()
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
            separator: default_separator(),
            comment_prefix: default_comment_prefix(),
            autosave: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Names every kernel must bind for a reload to succeed
    #[serde(default)]
    pub entry_points: Vec<String>,

    /// Evaluation step budget per load or call
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Maximum nested function calls
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

/// Deepest call nesting a config may ask for. The interpreter's own
/// recursion guard trips well past this even with nested expressions.
pub const MAX_CALL_DEPTH: usize = 1_000;

/// Largest step budget a config may ask for. Steps also pay for string and
/// list allocation, so this bounds kernel memory too.
pub const MAX_STEPS: u64 = 100_000_000;

fn default_max_steps() -> u64 {
    1_000_000
}
fn default_max_call_depth() -> usize {
    200
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            entry_points: vec![],
            max_steps: default_max_steps(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Commit and reload succeed or fail together. When false, a kernel that
    /// fails to load stays committed and only the live instance rolls back.
    #[serde(default = "default_true")]
    pub atomic_commit: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            atomic_commit: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.duet/config.toml).
    ///
    /// Also checks environment variables:
    /// - `DUET_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `DUET_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("DUET_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }

        if let Some(model) = lookup("DUET_MODEL") {
            self.model = model;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".duet")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 1.0".into(),
            ));
        }

        let separator = &self.document.separator;
        if separator.trim().is_empty() || separator.contains('\n') {
            return Err(ConfigError::ValidationError(
                "document.separator must be a single non-blank line".into(),
            ));
        }

        let prefix = &self.document.comment_prefix;
        if prefix.trim().is_empty() || prefix.contains('\n') {
            return Err(ConfigError::ValidationError(
                "document.comment_prefix must be non-blank and single-line".into(),
            ));
        }

        if !separator.starts_with(prefix.as_str()) {
            return Err(ConfigError::ValidationError(
                "document.separator must itself be a comment (start with comment_prefix)".into(),
            ));
        }

        if self.kernel.max_steps == 0 || self.kernel.max_call_depth == 0 {
            return Err(ConfigError::ValidationError(
                "kernel.max_steps and kernel.max_call_depth must be > 0".into(),
            ));
        }

        if self.kernel.max_call_depth > MAX_CALL_DEPTH {
            return Err(ConfigError::ValidationError(format!(
                "kernel.max_call_depth must be at most {MAX_CALL_DEPTH}"
            )));
        }

        if self.kernel.max_steps > MAX_STEPS {
            return Err(ConfigError::ValidationError(format!(
                "kernel.max_steps must be at most {MAX_STEPS}"
            )));
        }

        Ok(())
    }

    /// Check if a collaborator credential is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            document: DocumentConfig::default(),
            kernel: KernelConfig::default(),
            reload: ReloadConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.document.separator, "# === CONVERSATION ===");
        assert!(config.reload.atomic_commit);
        assert!(config.kernel.entry_points.is_empty());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.kernel.max_steps, config.kernel.max_steps);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn separator_must_be_a_comment() {
        let mut config = AppConfig::default();
        config.document.separator = "=== SEP ===".into();
        assert!(config.validate().is_err());

        config.document.separator = "# one\n# two".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn kernel_limits_are_bounded() {
        let mut config = AppConfig::default();
        config.kernel.max_call_depth = MAX_CALL_DEPTH;
        assert!(config.validate().is_ok());

        config.kernel.max_call_depth = MAX_CALL_DEPTH + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_call_depth"));

        config.kernel.max_call_depth = 200;
        config.kernel.max_steps = MAX_STEPS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn load_from_file_with_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r##"
model = "claude-haiku"

[document]
separator = "# === SEP ==="

[kernel]
entry_points = ["render", "on_key"]
max_steps = 5000

[reload]
atomic_commit = false
"##,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "claude-haiku");
        assert_eq!(config.document.separator, "# === SEP ===");
        assert_eq!(config.document.comment_prefix, "#");
        assert_eq!(config.kernel.entry_points, vec!["render", "on_key"]);
        assert_eq!(config.kernel.max_steps, 5000);
        assert_eq!(config.kernel.max_call_depth, 200);
        assert!(!config.reload.atomic_commit);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_credential_and_model() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "ANTHROPIC_API_KEY" => Some("sk-ant-env".into()),
            "DUET_MODEL" => Some("claude-opus".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-ant-env"));
        assert_eq!(config.model, "claude-opus");
    }

    #[test]
    fn explicit_credential_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|_| Some("from-env".into()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_credential() {
        let config = AppConfig {
            api_key: Some("sk-ant-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet"));
        assert!(toml_str.contains("[document]"));
    }
}
