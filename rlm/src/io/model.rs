//! Language-model transport.
//!
//! The [`LanguageModel`] trait decouples the session orchestrator from the
//! model service. [`CommandModel`] delegates each completion to an external
//! command (a thin bridge to the hosted service); tests use scripted models
//! that return predetermined replies without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Turn;
use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// One request to the model service.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Turn],
}

/// Abstraction over model services.
///
/// Failures are transport faults: the orchestrator does not retry them.
pub trait LanguageModel {
    /// Return the text of a single reply to `request`.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;
}

/// Model that runs a bridge command per completion.
///
/// The request is written to the command's stdin as JSON
/// (`{"model": ..., "messages": [{"role": ..., "content": ...}]}`); the reply
/// text is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
    timeout: Duration,
    reply_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(command: Vec<String>, timeout: Duration, reply_limit_bytes: usize) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("model command must be a non-empty array");
        }
        Ok(Self {
            command,
            timeout,
            reply_limit_bytes,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
            config.reply_limit_bytes,
        )
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(model = request.model, turns = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        info!(program = %self.command[0], "requesting completion");
        let payload = serde_json::to_vec(request).context("serialize completion request")?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.reply_limit_bytes,
        )
        .context("run model command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "model reply exceeded {} bytes",
                self.reply_limit_bytes
            ));
        }

        let reply = String::from_utf8(output.stdout).context("model reply is not valid UTF-8")?;
        debug!(reply_bytes = reply.len(), "completion received");
        Ok(reply)
    }
}
