//! Session configuration merging.
//!
//! Applies case-specific overrides to the configuration loaded from `rlm.toml`.

use anyhow::Result;
use rlm::io::config::RlmConfig;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base config.
pub fn apply_case_config(mut base: RlmConfig, overrides: &CaseConfig) -> Result<RlmConfig> {
    if let Some(model) = &overrides.root_model {
        base.root_model = model.clone();
    }
    if let Some(model) = &overrides.sub_model {
        base.sub_model = model.clone();
    }
    if let Some(max_depth) = overrides.max_depth {
        base.max_depth = max_depth;
    }
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = max_iterations;
    }
    base.validate()?;
    Ok(base)
}
