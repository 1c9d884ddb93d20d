//! Iterative query agent - bounded natural-language retrieval orchestration
//!
//! This crate is the "brain" of consulta: it turns a free-text question about
//! financial records into a bounded sequence of read-only capability
//! invocations and a presentation-ready answer.
//!
//! # Architecture
//!
//! The agent runs a constrained loop, at most three iterations:
//! 1. **Analyze** (`runtime`) - seed the conversation, or summarize what is
//!    still missing on later passes
//! 2. **Plan** (`prompts`, `provider`) - one reasoning call with the full
//!    capability catalog bound, dual-backend failover included
//! 3. **Execute** (`executor`) - run every requested capability, in request
//!    order, failures recorded but never fatal
//! 4. **Reevaluate** (`evidence`) - a closed-form judgment on whether the
//!    accumulated results answer the question
//! 5. **Format** (`runtime`) - render the final `FormattedAnswer`, degrading
//!    to a safe narrative on any rendering failure
//!
//! # Key types
//!
//! - `AgentRuntime` - the state machine (see `runtime`)
//! - `ReasoningProvider` - pluggable trait over the Gemini/OpenAI backends
//! - `QuerySession` - exclusively-owned per-query state
//!
//! # Safety principle
//!
//! The reasoner only ever *requests* capabilities. Every request passes
//! through the schema-checked executor, ad-hoc SQL is validated and then
//! refused, and the iteration ceiling holds regardless of what the reasoner
//! replies.

pub mod evidence;
pub mod executor;
pub mod gateway;
pub mod gemini;
pub mod openai;
pub mod prompts;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod web;

pub use executor::ActionExecutor;
pub use gateway::{FacturaFilters, HttpRecordsGateway, RecordsGateway};
pub use provider::{Invocation, ProviderRouter, RawReply, ReasoningProvider};
pub use registry::{catalog, CapabilityDescriptor, ParamKind, ParamSpec};
pub use runtime::AgentRuntime;
pub use session::{ActionCall, Judgment, Message, QuerySession, ReasonerTurn, MAX_ITERATIONS};
pub use web::{HttpSearchGateway, SearchGateway, SearchHit};
