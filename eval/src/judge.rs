//! Check execution and outcome recording.
//!
//! Applies the case checks to the session answer and records each result.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rlm::core::types::SessionOutcome;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::case::Check;

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

/// Result of running a single check.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    Contains { text: String, passed: bool },
    ContainsAny { any: Vec<String>, passed: bool },
    Answered { passed: bool },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::Contains { passed, .. }
            | CheckOutcome::ContainsAny { passed, .. }
            | CheckOutcome::Answered { passed } => *passed,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CheckOutcome::Contains { text, .. } => format!("contains({text})"),
            CheckOutcome::ContainsAny { any, .. } => format!("contains_any({})", any.join("|")),
            CheckOutcome::Answered { .. } => "answered".to_string(),
        }
    }
}

/// Run all checks against the session outcome (`None` when the session failed).
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], outcome: Option<&SessionOutcome>) -> Judgment {
    let answer = outcome.map(SessionOutcome::text);
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let result = match check {
            Check::Contains { text, ignore_case } => CheckOutcome::Contains {
                text: text.clone(),
                passed: answer.is_some_and(|answer| contains(answer, text, *ignore_case)),
            },
            Check::ContainsAny { any, ignore_case } => CheckOutcome::ContainsAny {
                any: any.clone(),
                passed: answer.is_some_and(|answer| {
                    any.iter()
                        .any(|needle| contains(answer, needle, *ignore_case))
                }),
            },
            Check::Answered => CheckOutcome::Answered {
                passed: outcome.is_some_and(SessionOutcome::is_answered),
            },
        };
        debug!(check = %result.label(), passed = result.passed(), "check result");
        outcomes.push(result);
    }
    Judgment { checks: outcomes }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn contains(haystack: &str, needle: &str, ignore_case: bool) -> bool {
    if ignore_case {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(needle)
    }
}
