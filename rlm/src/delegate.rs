//! Recursive delegation: `llm_query` starts a fresh session one level deeper.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use tracing::debug;

use crate::core::budget::RecursionBudget;
use crate::core::types::SessionRecord;
use crate::io::config::SessionConfig;
use crate::io::model::LanguageModel;
use crate::repl::Delegate;
use crate::session::run_session;

/// Delegation capability bound to one parent session.
///
/// Child sessions share the transport and configuration of the parent but
/// get their own history and execution environment.
pub(crate) struct Gateway {
    pub model: Rc<dyn LanguageModel>,
    pub config: SessionConfig,
    pub parent_context: Rc<str>,
    pub budget: RecursionBudget,
    pub children: Rc<RefCell<Vec<SessionRecord>>>,
}

impl Delegate for Gateway {
    fn delegate(&self, query: &str, context: Option<&str>) -> Result<String> {
        let context = context.unwrap_or(&self.parent_context);
        let child_budget = self.budget.child();
        debug!(depth = child_budget.depth, query_bytes = query.len(), "delegating");
        let child = run_session(&self.model, &self.config, child_budget, query, context)?;
        let answer = child.outcome.text().to_string();
        self.children.borrow_mut().push(child);
        Ok(answer)
    }
}
