//! Case file parsing and validation.
//!
//! Cases are TOML files defining a query, the context it runs over and the
//! checks applied to the answer. See `eval/cases/` for examples.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

/// A parsed case file containing query, context, config, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    /// Context segments, concatenated in order.
    #[serde(default, rename = "context")]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// Case metadata: identifier and query.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Query passed to the top-level session.
    pub query: String,
}

/// One piece of the case context.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Segment {
    /// `repeat` copied `times` times.
    Repeat { repeat: String, times: usize },
    /// `filler` spaces.
    Filler { filler: usize },
    Text { text: String },
}

/// Session configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub root_model: Option<String>,
    pub sub_model: Option<String>,
    pub max_depth: Option<u32>,
    pub max_iterations: Option<u32>,
}

/// Verification check applied to the session answer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The answer contains `text`.
    Contains {
        text: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// The answer contains at least one of `any`.
    ContainsAny {
        any: Vec<String>,
        #[serde(default)]
        ignore_case: bool,
    },
    /// The session ended with a final answer rather than exhaustion.
    Answered,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Assemble the context from its segments.
    pub fn context(&self) -> String {
        let mut context = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Repeat { repeat, times } => context.push_str(&repeat.repeat(*times)),
                Segment::Filler { filler } => context.push_str(&" ".repeat(*filler)),
                Segment::Text { text } => context.push_str(text),
            }
        }
        context
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.query.trim().is_empty() {
            bail!("case.query must be non-empty");
        }
        if self.segments.is_empty() {
            bail!("context must have at least one segment");
        }
        if let Some(max_iterations) = self.config.max_iterations
            && max_iterations == 0
        {
            bail!("config.max_iterations must be > 0");
        }
        for (name, model) in [
            ("root_model", &self.config.root_model),
            ("sub_model", &self.config.sub_model),
        ] {
            if let Some(model) = model
                && model.trim().is_empty()
            {
                bail!("config.{name} must be non-empty");
            }
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{}] invalid", index))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        match self {
            Check::Contains { text, .. } => {
                if text.is_empty() {
                    bail!("contains.text must be non-empty");
                }
            }
            Check::ContainsAny { any, .. } => {
                if any.is_empty() || any.iter().any(String::is_empty) {
                    bail!("contains_any.any must be a non-empty array of non-empty strings");
                }
            }
            Check::Answered => {}
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
