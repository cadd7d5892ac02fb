//! Configuration stored in `rlm.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "rlm.toml";

/// Top-level configuration (TOML).
///
/// Missing fields default to the values used by the reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RlmConfig {
    /// Model used by the top-level session.
    pub root_model: String,

    /// Model used by every delegated session.
    pub sub_model: String,

    /// Sessions entered deeper than this return the depth sentinel.
    pub max_depth: u32,

    /// Model calls per session before giving up.
    pub max_iterations: u32,

    /// Wall-clock budget for a single snippet execution, in seconds.
    pub snippet_timeout_secs: u64,

    /// Operation cap for a single snippet execution (0 = unlimited).
    pub max_operations: u64,

    /// Truncate execution output fed back to the model beyond this many bytes.
    pub output_limit_bytes: usize,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Bridge command that answers one completion request per invocation.
    pub command: Vec<String>,

    /// Per-call wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Replies longer than this are rejected.
    pub reply_limit_bytes: usize,

    /// Environment variable holding the service credential.
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["rlm-model".to_string()],
            timeout_secs: 300,
            reply_limit_bytes: 1_000_000,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            root_model: "gpt-4".to_string(),
            sub_model: "gpt-3.5-turbo".to_string(),
            max_depth: 5,
            max_iterations: 10,
            snippet_timeout_secs: 30,
            max_operations: 10_000_000,
            output_limit_bytes: 100_000,
            model: ModelConfig::default(),
        }
    }
}

/// Settings threaded through every session of one call tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub root_model: String,
    pub sub_model: String,
    pub max_depth: u32,
    pub max_iterations: u32,
    pub snippet_timeout: Duration,
    pub max_operations: u64,
    pub output_limit_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        RlmConfig::default().session_config()
    }
}

impl RlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.root_model.trim().is_empty() {
            return Err(anyhow!("root_model must be non-empty"));
        }
        if self.sub_model.trim().is_empty() {
            return Err(anyhow!("sub_model must be non-empty"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.snippet_timeout_secs == 0 {
            return Err(anyhow!("snippet_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.reply_limit_bytes == 0 {
            return Err(anyhow!("model.reply_limit_bytes must be > 0"));
        }
        if self.model.api_key_env.trim().is_empty() {
            return Err(anyhow!("model.api_key_env must be non-empty"));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            root_model: self.root_model.clone(),
            sub_model: self.sub_model.clone(),
            max_depth: self.max_depth,
            max_iterations: self.max_iterations,
            snippet_timeout: Duration::from_secs(self.snippet_timeout_secs),
            max_operations: self.max_operations,
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

/// Fail unless the credential variable is set and non-empty.
///
/// Checked once at process entry, before any session runs.
pub fn require_credential(var: &str) -> Result<()> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(()),
        Ok(_) => Err(anyhow!("credential {var} is empty")),
        Err(_) => Err(anyhow!("missing credential: set the {var} environment variable")),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RlmConfig::default()`.
pub fn load_config(path: &Path) -> Result<RlmConfig> {
    if !path.exists() {
        let cfg = RlmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RlmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RlmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RlmConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RlmConfig {
            max_depth: 2,
            model: ModelConfig {
                command: vec!["bridge".to_string(), "--fast".to_string()],
                ..ModelConfig::default()
            },
            ..RlmConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rlm.toml");
        fs::write(&path, "max_iterations = 4\n[model]\ncommand = [\"bridge\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 4);
        assert_eq!(cfg.root_model, "gpt-4");
        assert_eq!(cfg.model.command, vec!["bridge"]);
        assert_eq!(cfg.model.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn rejects_zero_iterations() {
        let cfg = RlmConfig {
            max_iterations: 0,
            ..RlmConfig::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("max_iterations"));
    }

    #[test]
    fn session_config_carries_limits() {
        let session = RlmConfig::default().session_config();
        assert_eq!(session.max_depth, 5);
        assert_eq!(session.max_iterations, 10);
        assert_eq!(session.snippet_timeout, Duration::from_secs(30));
        assert_eq!(session.sub_model, "gpt-3.5-turbo");
    }

    #[test]
    fn credential_check_reports_missing_variable() {
        let err = require_credential("RLM_TEST_CREDENTIAL_THAT_IS_NEVER_SET").unwrap_err();
        assert!(err.to_string().contains("RLM_TEST_CREDENTIAL_THAT_IS_NEVER_SET"));
        assert!(require_credential("PATH").is_ok());
    }
}
