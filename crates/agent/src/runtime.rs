//! The agent state machine: Analyze → Plan → {Execute | Reevaluate} →
//! loop-or-finish → Format. The runtime owns the session exclusively for the
//! duration of one query and always drives it to a terminal answer: the only
//! error that ever crosses `run_query` is the empty-input rejection.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use consulta_core::answer::{self, FormattedAnswer};
use consulta_core::config::AppConfig;
use consulta_core::errors::ValidationError;

use crate::evidence;
use crate::executor::ActionExecutor;
use crate::gateway::HttpRecordsGateway;
use crate::prompts;
use crate::provider::ProviderRouter;
use crate::registry;
use crate::session::{ActionCall, Judgment, Message, QuerySession, ReasonerTurn, MAX_ITERATIONS};
use crate::web::HttpSearchGateway;

const FORMAT_EVIDENCE_CHARS: usize = 3000;

pub struct AgentRuntime {
    router: ProviderRouter,
    executor: Arc<ActionExecutor>,
}

impl AgentRuntime {
    pub fn new(router: ProviderRouter, executor: Arc<ActionExecutor>) -> Self {
        Self { router, executor }
    }

    /// Wires the HTTP-backed gateways and providers from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let records = Arc::new(HttpRecordsGateway::new(&config.backend));
        let search = Arc::new(HttpSearchGateway::new(&config.search));
        let executor = Arc::new(ActionExecutor::new(records, search));
        let router = ProviderRouter::from_config(&config.providers);
        Self::new(router, executor)
    }

    /// Runs one query session to completion. Always returns a well-formed
    /// answer once the input passes validation; internal failures degrade
    /// into narrative answers instead of propagating.
    pub async fn run_query(
        &self,
        query: &str,
        user_id: &str,
    ) -> Result<FormattedAnswer, ValidationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }

        info!(user_id, query, "starting query session");
        let mut session = QuerySession::new(query, user_id);

        loop {
            self.analyze(&mut session);
            let planned = self.plan(&mut session).await;
            if planned {
                let calls = session
                    .last_reasoner()
                    .map(|turn| turn.action_calls.clone())
                    .unwrap_or_default();
                if calls.is_empty() {
                    // A prose-only turn is a candidate direct answer; the
                    // judgment decides whether it suffices.
                    info!("plan requested no actions, deferring to reevaluation");
                } else {
                    self.execute_all(&mut session, calls).await;
                }
                self.reevaluate(&mut session).await;
            }
            if session.should_finish || session.iteration >= MAX_ITERATIONS {
                break;
            }
        }

        let answer = self.format(&mut session).await;
        session.final_result = Some(answer.clone());
        info!(
            format = answer.format.as_str(),
            iterations = session.iteration,
            errors = session.errors.len(),
            "query session finished"
        );
        Ok(answer)
    }

    /// Iteration 0 seeds the conversation with the raw question; later
    /// passes append a synthesized "what is still missing" context turn.
    fn analyze(&self, session: &mut QuerySession) {
        if session.iteration == 0 {
            let query = session.original_query.clone();
            session.push(Message::User(query));
            return;
        }
        let context = prompts::context_prompt(
            &session.original_query,
            session.iteration,
            session.result_set_count(),
            &session.errors,
        );
        session.push(Message::User(context));
    }

    /// One reasoning call with the full catalog bound. Returns false when
    /// both backends are down: planning failure means no progress is
    /// possible, so the session finishes instead of retrying forever.
    async fn plan(&self, session: &mut QuerySession) -> bool {
        let prompt = prompts::plan_prompt(
            &session.original_query,
            session.iteration,
            session.result_set_count(),
            &session.errors,
            registry::catalog(),
            today(),
        );
        session.push(Message::User(prompt));

        // Bound first so the conversation borrow held by the future ends
        // before the session is mutated below.
        let invoked = self
            .router
            .invoke(session.conversation(), registry::catalog(), session.preferred_provider())
            .await;
        match invoked {
            Ok(invocation) => {
                if let Some(from) = invocation.switched_from {
                    warn!(
                        from = from.as_str(),
                        to = invocation.used.as_str(),
                        "pinning preferred provider after failover"
                    );
                    session.prefer(invocation.used);
                }
                info!(
                    provider = invocation.used.as_str(),
                    action_calls = invocation.turn.action_calls.len(),
                    "plan produced"
                );
                session.push(Message::Reasoner(invocation.turn));
                true
            }
            Err(provider_error) => {
                error!(error = %provider_error, "planning failed, cannot make progress");
                session.record_error(format!("Error en planificación: {provider_error}"));
                session.should_finish = true;
                false
            }
        }
    }

    /// Runs every requested call. Calls execute concurrently but results are
    /// reassembled in request order so the log stays deterministic; one
    /// failure never blocks the others.
    async fn execute_all(&self, session: &mut QuerySession, calls: Vec<ActionCall>) {
        let mut join_set = JoinSet::new();
        for (index, call) in calls.into_iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let user_id = session.user_id.clone();
            join_set.spawn(async move {
                let result = executor.execute(&call, &user_id).await;
                (index, call, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    session.record_error(format!("Error interno ejecutando acción: {join_error}"));
                }
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        for (_, call, result) in outcomes {
            match result {
                Ok(payload) => {
                    session.push(Message::ActionResult { capability: call.capability, payload });
                }
                Err(execution_error) => {
                    let message = execution_error.to_string();
                    warn!(capability = %call.capability, error = %message, "action failed");
                    session.record_error(message.clone());
                    session.push(Message::ActionResult {
                        capability: call.capability,
                        payload: json!({ "error": message }),
                    });
                }
            }
        }
    }

    /// Builds the evidence summary, asks for the closed-form judgment, and
    /// applies it. Any failure on this path forces finish; the iteration
    /// counter increments exactly once per pass regardless of outcome.
    async fn reevaluate(&self, session: &mut QuerySession) {
        let summary = evidence::summarize(session, today());
        let actions_executed = session.executed_calls().count();
        let prompt = prompts::reevaluate_prompt(
            &session.original_query,
            session.iteration,
            &summary,
            &session.errors,
            actions_executed,
        );

        let judgment_conversation = [Message::User(prompt)];
        match self
            .router
            .invoke(&judgment_conversation, &[], session.preferred_provider())
            .await
        {
            Ok(invocation) => {
                if invocation.switched_from.is_some() {
                    session.prefer(invocation.used);
                }
                let parsed = prompts::parse_json_reply(&invocation.turn.text)
                    .map_err(|parse_error| parse_error.to_string())
                    .and_then(|value| {
                        serde_json::from_value::<Judgment>(value)
                            .map_err(|shape_error| shape_error.to_string())
                    });
                match parsed {
                    Ok(judgment) => {
                        info!(
                            should_finish = judgment.should_finish,
                            quality = judgment.result_quality.as_deref().unwrap_or("?"),
                            reason = judgment.reason.as_deref().unwrap_or(""),
                            "reevaluation judged"
                        );
                        session.should_finish = judgment.should_finish;
                        let rendered = serde_json::to_string(&judgment).unwrap_or_default();
                        session.push(Message::Reasoner(ReasonerTurn {
                            text: rendered,
                            action_calls: Vec::new(),
                        }));
                    }
                    Err(parse_error) => {
                        // A malformed judgment must terminate, never loop.
                        warn!(error = %parse_error, "judgment did not parse, forcing finish");
                        session.record_error(format!("Error en reevaluación: {parse_error}"));
                        session.should_finish = true;
                    }
                }
            }
            Err(provider_error) => {
                error!(error = %provider_error, "reevaluation provider call failed");
                session.record_error(format!("Error en reevaluación: {provider_error}"));
                session.should_finish = true;
            }
        }

        session.bump_iteration();
    }

    /// Renders the terminal answer. This path never raises: rendering and
    /// provider failures degrade to a narrative embedding the raw evidence.
    async fn format(&self, session: &mut QuerySession) -> FormattedAnswer {
        let evidence_payloads: Vec<Value> = session.action_results().cloned().collect();
        if evidence_payloads.is_empty() {
            if session.errors.is_empty() {
                return FormattedAnswer::no_results();
            }
            return FormattedAnswer::narrative(
                format!("No se pudo generar resultado. Errores: {}", session.errors.join(", ")),
                "Error",
                Some("No se generó resultado".to_string()),
            );
        }

        let suggested = answer::suggest_format(&evidence_payloads);
        let rendered =
            serde_json::to_string(&evidence_payloads).unwrap_or_else(|_| "[]".to_string());
        let rendered = truncate(rendered, FORMAT_EVIDENCE_CHARS);
        let prompt = prompts::format_prompt(&session.original_query, &rendered, suggested);

        let mut conversation = session.conversation().to_vec();
        conversation.push(Message::User(prompt));

        match self.router.invoke(&conversation, &[], session.preferred_provider()).await {
            Ok(invocation) => {
                if invocation.switched_from.is_some() {
                    session.prefer(invocation.used);
                }
                let validated = prompts::parse_json_reply(&invocation.turn.text)
                    .map_err(|parse_error| parse_error.to_string())
                    .and_then(|value| {
                        answer::validate_reply(value).map_err(|shape_error| shape_error.to_string())
                    });
                match validated {
                    Ok(formatted) => formatted,
                    Err(render_error) => {
                        warn!(error = %render_error, "rendered answer rejected, degrading");
                        answer::narrative_fallback(
                            &session.original_query,
                            &evidence_payloads,
                            &format!("Error formateando resultado: {render_error}"),
                        )
                    }
                }
            }
            Err(provider_error) => {
                error!(error = %provider_error, "format provider call failed, degrading");
                answer::narrative_fallback(
                    &session.original_query,
                    &evidence_payloads,
                    &format!("Error formateando resultado: {provider_error}"),
                )
            }
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn truncate(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut truncated: String = text.chars().take(max).collect();
    truncated.push_str("... (truncado)");
    truncated
}
