//! Scenario building and per-transport queues
//!
//! A [`Scenario`] is built once from a step-definition closure and frozen.
//! Each transport run gets its own [`ScenarioQueue`] via
//! [`Scenario::duplicate`], so variants never observe each other's progress.

mod builder;

pub use builder::{ScenarioBuilder, TextPattern, CONFIRMATION_COMMANDS};

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::common::Result;
use crate::session::RunState;

/// An assertion or action run against the state of one transport run
pub type Callback = Arc<dyn Fn(&mut RunState) -> Result<()> + Send + Sync>;

/// One scripted step
#[derive(Clone)]
pub enum Directive {
    /// A line sent verbatim; ends the dispatch cycle
    Literal(String),
    /// Invoked immediately, or deferred while a confirmation is pending
    Callback(Callback),
    /// Invoked immediately; ends the dispatch cycle whatever it returns
    TerminalCallback(Callback),
    /// A line whose reply is a confirmation prompt
    InteractivePrompt(String),
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Directive::Callback(_) => f.write_str("Callback(..)"),
            Directive::TerminalCallback(_) => f.write_str("TerminalCallback(..)"),
            Directive::InteractivePrompt(text) => {
                f.debug_tuple("InteractivePrompt").field(text).finish()
            }
        }
    }
}

/// A frozen, shareable sequence of directives
#[derive(Clone, Debug)]
pub struct Scenario {
    directives: Arc<[Directive]>,
}

impl Scenario {
    /// Run a step-definition closure against a fresh builder and freeze the result
    pub fn build<F>(steps: F) -> Self
    where
        F: FnOnce(&mut ScenarioBuilder),
    {
        let mut builder = ScenarioBuilder::new();
        steps(&mut builder);
        builder.freeze()
    }

    pub(crate) fn from_directives(directives: Vec<Directive>) -> Self {
        Self {
            directives: directives.into(),
        }
    }

    /// A fresh FIFO with every directive in order
    pub fn duplicate(&self) -> ScenarioQueue {
        ScenarioQueue {
            items: self.directives.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }
}

/// The consumable copy of a scenario owned by one transport run
#[derive(Debug, Default)]
pub struct ScenarioQueue {
    items: VecDeque<Directive>,
}

impl ScenarioQueue {
    pub fn pop(&mut self) -> Option<Directive> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
