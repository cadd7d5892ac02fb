//! Case execution orchestration.
//!
//! Coordinates config merging, the session itself, checks and result capture.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::Utc;
use rlm::Rlm;
use rlm::io::config::{load_config, require_credential};
use rlm::io::model::CommandModel;
use tracing::{debug, info, instrument, warn};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::judge::{run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
}

/// Run a case end-to-end: session, checks, result capture.
///
/// Session transport errors are recorded as an `error` outcome; only
/// configuration and capture failures are returned as `Err`.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    config_path: &Path,
) -> Result<RunOutcome> {
    info!("case run started");

    let cfg = apply_case_config(load_config(config_path)?, &case.config)?;
    require_credential(&cfg.model.api_key_env)?;
    let model = CommandModel::from_config(&cfg.model).context("build model transport")?;
    let rlm = Rlm::new(Rc::new(model), cfg.session_config());

    let context = case.context();
    let context_chars = context.chars().count();
    debug!(context_chars, "context assembled");

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(started_at);
    let session = rlm.completion(&case.case.query, &context);
    let finished_at = Utc::now();

    let error_text = session.as_ref().err().map(|err| format!("{err:#}"));
    if let Some(error) = &error_text {
        warn!(error = %error, "session failed");
    }
    let session_ref = match &session {
        Ok(record) => Ok(record),
        Err(_) => Err(error_text.as_deref().unwrap_or_default()),
    };
    let duration = finished_at - started_at;
    info!(
        duration_secs = duration.num_milliseconds() as f64 / 1000.0,
        "session finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        config: &cfg,
        context_chars,
        session: session_ref,
        started_at,
        finished_at,
        repo_root,
    };
    let results_dir = capture_results(&repo_root.join("eval").join("results"), &capture_input)
        .context("capture results")?;

    debug!("running checks");
    let session_outcome = session.as_ref().ok().map(|record| &record.outcome);
    let judgment = run_checks(&case.checks, session_outcome);
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;

    let outcome = classify_outcome(session_outcome, &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}

fn eval_run_id(at: chrono::DateTime<Utc>) -> String {
    format!("eval-{}", at.format("%Y%m%d_%H%M%S_%3f"))
}
