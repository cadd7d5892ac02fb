//! Result capture and persistence.
//!
//! Writes run metadata and the session transcript to the results directory
//! for later analysis.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rlm::core::types::SessionRecord;
use rlm::io::config::RlmConfig;
use rlm::io::transcript::write_transcript;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub config: &'a RlmConfig,
    pub context_chars: usize,
    /// Session record, or the transport error that ended the session.
    pub session: Result<&'a SessionRecord, &'a str>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// Git SHA of the repo at time of run.
    pub git_sha: Option<String>,
    pub root_model: String,
    pub sub_model: String,
    pub max_depth: u32,
    pub max_iterations: u32,
    pub context_chars: usize,
    pub outcome: Option<Outcome>,
    pub answer: Option<String>,
    /// Model calls across the whole session tree.
    pub model_calls: Option<u32>,
    pub max_depth_reached: Option<u32>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Transport error that aborted the session.
    pub error: Option<String>,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Capture results from a completed run to the results directory.
///
/// Writes the transcript (when the session finished) and metadata.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("git sha: {err}"));
            None
        }
    };

    if let Ok(record) = input.session
        && let Err(err) = write_transcript(&results_dir.join("transcript.json"), record)
    {
        errors.push(format!("transcript: {err:#}"));
    }

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let record = input.session.ok();
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        git_sha,
        root_model: input.config.root_model.clone(),
        sub_model: input.config.sub_model.clone(),
        max_depth: input.config.max_depth,
        max_iterations: input.config.max_iterations,
        context_chars: input.context_chars,
        outcome: None,
        answer: record.map(|record| record.outcome.text().to_string()),
        model_calls: record.map(SessionRecord::total_model_calls),
        max_depth_reached: record.map(SessionRecord::max_depth_reached),
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        error: input.session.err().map(str::to_string),
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)?;
    Ok(())
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm::core::types::SessionOutcome;
    use tempfile::tempdir;

    fn record() -> SessionRecord {
        SessionRecord {
            depth: 0,
            model: "gpt-4".to_string(),
            query: "q".to_string(),
            context_chars: 3,
            model_calls: 2,
            outcome: SessionOutcome::answered("dragon42"),
            history: Vec::new(),
            duration_ms: 10,
            children: Vec::new(),
        }
    }

    fn input<'a>(
        temp: &'a Path,
        case_path: &'a Path,
        config: &'a RlmConfig,
        session: Result<&'a SessionRecord, &'a str>,
    ) -> CaptureInput<'a> {
        CaptureInput {
            case_id: "case",
            case_path,
            eval_run_id: "eval-1",
            config,
            context_chars: 3,
            session,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            repo_root: temp,
        }
    }

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn writes_meta_and_transcript() {
        let temp = tempdir().expect("tempdir");
        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "[case]\nid='case'\nquery='q'\n").expect("case");
        let config = RlmConfig::default();
        let record = record();

        let output_dir = capture_results(
            &temp.path().join("results"),
            &input(temp.path(), &case_path, &config, Ok(&record)),
        )
        .expect("capture");
        update_outcome(&output_dir, Outcome::Success).expect("outcome");

        assert!(output_dir.join("transcript.json").exists());
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(output_dir.join("meta.json")).expect("read meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.answer.as_deref(), Some("dragon42"));
        assert_eq!(meta.model_calls, Some(2));
        assert_eq!(meta.outcome, Some(Outcome::Success));
        assert_eq!(meta.case_hash.len(), 64);
        assert!(meta.error.is_none());
    }

    #[test]
    fn records_session_error_without_transcript() {
        let temp = tempdir().expect("tempdir");
        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "x").expect("case");
        let config = RlmConfig::default();

        let output_dir = capture_results(
            &temp.path().join("results"),
            &input(temp.path(), &case_path, &config, Err("model command timed out")),
        )
        .expect("capture");

        assert!(!output_dir.join("transcript.json").exists());
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(output_dir.join("meta.json")).expect("read meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.error.as_deref(), Some("model command timed out"));
        assert!(meta.answer.is_none());
    }
}
