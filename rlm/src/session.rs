//! Orchestration for one completion: the reply / execute / answer loop.
//!
//! A session owns its history and its execution environment. Delegated
//! sessions are started from inside a snippet through [`crate::delegate`] and
//! recorded as children of the session that spawned them.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, warn};

use crate::core::budget::RecursionBudget;
use crate::core::protocol::parse_reply;
use crate::core::types::{SessionOutcome, SessionRecord, Turn};
use crate::delegate::Gateway;
use crate::io::config::SessionConfig;
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::prompt::{InstructionInputs, instruction_turn, query_turn};
use crate::repl::{Execution, Repl, ReplLimits};

/// Entry point for recursive completions.
pub struct Rlm {
    model: Rc<dyn LanguageModel>,
    config: SessionConfig,
}

impl Rlm {
    pub fn new(model: Rc<dyn LanguageModel>, config: SessionConfig) -> Self {
        Self { model, config }
    }

    /// Answer `query` over `context` in a top-level session.
    pub fn completion(&self, query: &str, context: &str) -> Result<SessionRecord> {
        self.completion_at(query, context, 0)
    }

    /// Answer `query` in a session entered at `depth`.
    ///
    /// Sessions past the configured depth cap return
    /// [`SessionOutcome::DepthExhausted`] without calling the model. Errors are
    /// transport failures only.
    pub fn completion_at(&self, query: &str, context: &str, depth: u32) -> Result<SessionRecord> {
        let budget = RecursionBudget {
            depth,
            ..RecursionBudget::root(self.config.max_depth)
        };
        run_session(&self.model, &self.config, budget, query, context)
    }
}

pub(crate) fn run_session(
    model: &Rc<dyn LanguageModel>,
    config: &SessionConfig,
    budget: RecursionBudget,
    query: &str,
    context: &str,
) -> Result<SessionRecord> {
    let started = Instant::now();
    let model_name = if budget.depth == 0 {
        &config.root_model
    } else {
        &config.sub_model
    };
    let span = info_span!("session", depth = budget.depth, model = %model_name);
    let _entered = span.enter();

    let context_chars = context.chars().count();
    let mut record = SessionRecord {
        depth: budget.depth,
        model: model_name.clone(),
        query: query.to_string(),
        context_chars,
        model_calls: 0,
        outcome: SessionOutcome::DepthExhausted,
        history: Vec::new(),
        duration_ms: 0,
        children: Vec::new(),
    };

    if budget.exhausted() {
        info!(max_depth = budget.max_depth, "depth cap reached");
        record.duration_ms = elapsed_ms(started);
        return Ok(record);
    }

    let inputs = InstructionInputs {
        budget,
        max_iterations: config.max_iterations,
    };
    record.history.push(Turn::instructions(instruction_turn(&inputs)?));
    record.history.push(Turn::user(query_turn(query, context_chars)?));

    let children = Rc::new(RefCell::new(Vec::new()));
    let gateway = Gateway {
        model: Rc::clone(model),
        config: config.clone(),
        parent_context: Rc::from(context),
        budget,
        children: Rc::clone(&children),
    };
    let mut repl = Repl::new(context, Rc::new(gateway), ReplLimits::from(config));

    record.outcome = SessionOutcome::IterationsExhausted;
    for iteration in 1..=config.max_iterations {
        let request = CompletionRequest {
            model: model_name,
            messages: &record.history,
        };
        let reply = model.complete(&request).with_context(|| {
            format!(
                "model call failed at depth {} iteration {iteration}",
                budget.depth
            )
        })?;
        record.model_calls += 1;

        let parsed = parse_reply(&reply);
        debug!(
            iteration,
            snippet = parsed.snippet.is_some(),
            directive = ?parsed.directive,
            "reply parsed"
        );
        let mut turns = vec![Turn::assistant(reply.as_str())];
        if let Some(snippet) = parsed.snippet {
            let execution = repl.execute(snippet)?;
            turns.push(Turn::user(execution_turn(&execution)));
        }
        let directive = parsed.directive;
        record.history.extend(turns);

        if let Some(directive) = directive {
            let answer = directive.resolve(|name| repl.binding(name));
            info!(iteration, answer_bytes = answer.len(), "final answer");
            record.outcome = SessionOutcome::answered(answer);
            break;
        }
    }

    if !record.outcome.is_answered() {
        warn!(max_iterations = config.max_iterations, "iteration cap reached");
    }
    record.children = std::mem::take(&mut *children.borrow_mut());
    record.duration_ms = elapsed_ms(started);
    Ok(record)
}

/// Turn fed back to the model after a snippet runs.
fn execution_turn(execution: &Execution) -> String {
    format!("REPL executed. Output:\n{}", execution.output)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::ScriptedModel;

    fn config() -> SessionConfig {
        SessionConfig {
            max_depth: 1,
            max_iterations: 3,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn execution_turn_formats() {
        let ok = Execution {
            output: "42\n".to_string(),
            failed: false,
            truncated_bytes: 0,
        };
        assert_eq!(execution_turn(&ok), "REPL executed. Output:\n42\n");
        let failed = Execution {
            output: "REPL Error: boom".to_string(),
            failed: true,
            truncated_bytes: 0,
        };
        assert_eq!(
            execution_turn(&failed),
            "REPL executed. Output:\nREPL Error: boom"
        );
    }

    #[test]
    fn history_starts_with_instructions_and_query() {
        let model = Rc::new(ScriptedModel::new(["FINAL(done)"]));
        let rlm = Rlm::new(model.clone(), config());
        let record = rlm.completion("Summarize", "abc").expect("completion");

        assert_eq!(record.outcome, SessionOutcome::answered("done"));
        assert_eq!(record.model_calls, 1);
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.history[0].role, Role::Instructions);
        assert!(record.history[1].content.contains("Context length: 3 characters"));
        assert!(!record.history[1].content.contains("abc"));
        assert_eq!(record.history[2], Turn::assistant("FINAL(done)"));
    }

    #[test]
    fn depth_past_cap_makes_no_model_call() {
        let model = Rc::new(ScriptedModel::new(["FINAL(unused)"]));
        let rlm = Rlm::new(model.clone(), config());
        let record = rlm.completion_at("q", "ctx", 2).expect("completion");

        assert_eq!(record.outcome, SessionOutcome::DepthExhausted);
        assert_eq!(record.model_calls, 0);
        assert!(record.history.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn session_at_the_depth_cap_still_runs() {
        let model = Rc::new(ScriptedModel::new(["FINAL(at cap)"]));
        let rlm = Rlm::new(model.clone(), config());
        let record = rlm.completion_at("q", "ctx", 1).expect("completion");

        assert_eq!(record.depth, 1);
        assert_eq!(record.outcome, SessionOutcome::answered("at cap"));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn transport_error_is_not_an_answer() {
        let model = Rc::new(ScriptedModel::new(Vec::<String>::new()));
        let rlm = Rlm::new(model, config());
        let err = rlm.completion("q", "ctx").unwrap_err();
        assert!(format!("{err:#}").contains("model call failed at depth 0 iteration 1"));
    }
}
