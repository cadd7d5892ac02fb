use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub exhausted: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    pub avg_model_calls: Option<f64>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut calls: Vec<u32> = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let checks_path = run_dir.join("checks.json");

        let meta: EvalMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        let judgment: Judgment = match fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse checks"))
        {
            Ok(checks) => checks,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: checks.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Exhausted) => summary.exhausted += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        calls.extend(meta.model_calls);

        update_check_pass_rates(&mut summary.check_pass_rates, &judgment);
    }

    if !calls.is_empty() {
        let total: u32 = calls.iter().sum();
        summary.avg_model_calls = Some(f64::from(total) / calls.len() as f64);
    }
    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, judgment: &Judgment) {
    for check in &judgment.checks {
        let entry = stats.entry(check.label()).or_insert((0, 0));
        if check.passed() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use tempfile::tempdir;

    fn write_meta(path: &Path, outcome: Outcome, duration: f64, model_calls: Option<u32>) {
        let meta = EvalMeta {
            case_id: "case".to_string(),
            eval_run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            git_sha: None,
            root_model: "gpt-4".to_string(),
            sub_model: "gpt-3.5-turbo".to_string(),
            max_depth: 5,
            max_iterations: 10,
            context_chars: 100,
            outcome: Some(outcome),
            answer: None,
            model_calls,
            max_depth_reached: None,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            error: None,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(path, format!("{contents}\n")).expect("write meta");
    }

    fn write_checks(path: &Path, passed: bool) {
        let judgment = Judgment {
            checks: vec![CheckOutcome::Answered { passed }],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(path, format!("{contents}\n")).expect("write checks");
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        let run1 = temp.path().join("run1");
        let run2 = temp.path().join("run2");
        let run3 = temp.path().join("run3");
        for dir in [&run1, &run2, &run3] {
            fs::create_dir_all(dir).expect("run dir");
        }

        write_meta(&run1.join("meta.json"), Outcome::Success, 5.0, Some(2));
        write_checks(&run1.join("checks.json"), true);

        write_meta(&run2.join("meta.json"), Outcome::Exhausted, 15.0, Some(4));
        write_checks(&run2.join("checks.json"), false);

        fs::write(run3.join("meta.json"), "not json").expect("broken meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(warnings.len(), 1);
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.avg_model_calls, Some(3.0));
        assert_eq!(
            summary.check_pass_rates.get("answered"),
            Some(&(1, 2))
        );
    }
}
