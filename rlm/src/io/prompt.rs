//! Prompt rendering for the first two turns of a session.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::budget::RecursionBudget;
use crate::core::protocol::SNIPPET_MARKER;
use crate::core::types::DEPTH_EXHAUSTED;

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");
const QUERY_TEMPLATE: &str = include_str!("prompts/query.md");

static PROMPTS: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Inputs for the instruction turn.
#[derive(Debug, Clone, Copy)]
pub struct InstructionInputs {
    pub budget: RecursionBudget,
    pub max_iterations: u32,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
            .expect("instructions template should be valid");
        env.add_template("query", QUERY_TEMPLATE)
            .expect("query template should be valid");
        Self { env }
    }

    fn render_instructions(&self, inputs: &InstructionInputs) -> Result<String> {
        let template = self.env.get_template("instructions")?;
        let rendered = template.render(context! {
            marker => SNIPPET_MARKER,
            max_iterations => inputs.max_iterations,
            depth => inputs.budget.depth,
            can_delegate => inputs.budget.can_delegate(),
            depth_sentinel => DEPTH_EXHAUSTED,
        })?;
        Ok(rendered)
    }

    fn render_query(&self, query: &str, context_chars: usize) -> Result<String> {
        let template = self.env.get_template("query")?;
        let rendered = template.render(context! {
            query => query.trim(),
            context_chars => context_chars,
        })?;
        Ok(rendered)
    }
}

/// Static operating instructions for the protocol.
pub fn instruction_turn(inputs: &InstructionInputs) -> Result<String> {
    let rendered = PROMPTS.render_instructions(inputs)?;
    debug!(bytes = rendered.len(), depth = inputs.budget.depth, "rendered instructions");
    Ok(rendered)
}

/// Initial query framing: the query plus a context-size hint, never the body.
pub fn query_turn(query: &str, context_chars: usize) -> Result<String> {
    PROMPTS.render_query(query, context_chars)
}
