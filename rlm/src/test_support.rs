//! Test-only helpers: a model that replays scripted replies.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, bail};

use crate::core::types::Turn;
use crate::io::model::{CompletionRequest, LanguageModel};

/// A request observed by [`ScriptedModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Turn>,
}

/// Model returning predetermined replies in call order, across all depths.
///
/// Running out of replies is a transport error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        self.requests.borrow_mut().push(RecordedRequest {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
        });
        match self.replies.borrow_mut().pop_front() {
            Some(reply) => Ok(reply),
            None => bail!("scripted model has no reply left"),
        }
    }
}
