//! Per-query mutable state. One `QuerySession` exists per `run_query`
//! invocation, is owned exclusively by the runtime for its lifetime, and is
//! dropped once the formatted answer has been extracted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use consulta_core::answer::FormattedAnswer;
use consulta_core::config::ProviderKind;

/// Hard ceiling on reevaluation passes. Exists precisely because the
/// judgment itself can be wrong or stuck.
pub const MAX_ITERATIONS: u32 = 3;

/// One capability invocation requested by the reasoner. Never fabricated by
/// the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub capability: String,
    pub arguments: Map<String, Value>,
}

impl ActionCall {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}

/// A reasoner reply after sanitization: free text plus zero or more
/// well-formed capability calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReasonerTurn {
    pub text: String,
    pub action_calls: Vec<ActionCall>,
}

/// One turn of the conversation log. Immutable once appended; the log order
/// is the single source of truth for what the reasoner has seen.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    User(String),
    Reasoner(ReasonerTurn),
    ActionResult { capability: String, payload: Value },
}

/// The closed-form verdict produced during reevaluation. `should_finish` is
/// the only required field; everything else is advisory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub should_finish: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub next_actions_needed: Option<Vec<String>>,
    #[serde(default)]
    pub errors_to_fix: Option<Vec<String>>,
    #[serde(default)]
    pub result_quality: Option<String>,
    #[serde(default)]
    pub data_coverage: Option<String>,
}

#[derive(Debug)]
pub struct QuerySession {
    pub original_query: String,
    pub user_id: String,
    conversation: Vec<Message>,
    pub iteration: u32,
    pub errors: Vec<String>,
    pub should_finish: bool,
    preferred_provider: Option<ProviderKind>,
    pub final_result: Option<FormattedAnswer>,
}

impl QuerySession {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            original_query: query.into(),
            user_id: user_id.into(),
            conversation: Vec::new(),
            iteration: 0,
            errors: Vec::new(),
            should_finish: false,
            preferred_provider: None,
            final_result: None,
        }
    }

    /// The conversation is append-only; this is the only way to grow it.
    pub fn push(&mut self, message: Message) {
        self.conversation.push(message);
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// The most recent reasoner turn. The routing decision consumes this
    /// directly instead of scanning the log for call markers.
    pub fn last_reasoner(&self) -> Option<&ReasonerTurn> {
        self.conversation.iter().rev().find_map(|message| match message {
            Message::Reasoner(turn) => Some(turn),
            _ => None,
        })
    }

    /// All capability calls the reasoner has issued so far, in log order.
    pub fn executed_calls(&self) -> impl Iterator<Item = &ActionCall> {
        self.conversation.iter().flat_map(|message| match message {
            Message::Reasoner(turn) => turn.action_calls.as_slice(),
            _ => &[],
        })
    }

    /// All capability result payloads accumulated so far, in log order.
    pub fn action_results(&self) -> impl Iterator<Item = &Value> {
        self.conversation.iter().filter_map(|message| match message {
            Message::ActionResult { payload, .. } => Some(payload),
            _ => None,
        })
    }

    pub fn result_set_count(&self) -> usize {
        self.action_results().count()
    }

    /// Errors accumulate for the whole session; they are never cleared or
    /// deduplicated.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn preferred_provider(&self) -> Option<ProviderKind> {
        self.preferred_provider
    }

    /// Pins the working backend after a failover. Once set, the preference
    /// can move to the other backend on a later failure but never back to
    /// "no preference".
    pub fn prefer(&mut self, provider: ProviderKind) {
        self.preferred_provider = Some(provider);
    }

    pub fn bump_iteration(&mut self) {
        self.iteration += 1;
    }
}
