//! End-to-end tests of the agent state machine with scripted reasoning
//! backends and in-memory gateways: termination bounds, sticky failover,
//! the retrieval scenario, and the degraded paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Local};
use serde_json::{json, Value};

use consulta_agent::gateway::{FacturaFilters, RecordsGateway};
use consulta_agent::provider::{ProviderRouter, RawReply, ReasoningProvider};
use consulta_agent::registry::CapabilityDescriptor;
use consulta_agent::session::Message;
use consulta_agent::web::{SearchGateway, SearchHit};
use consulta_agent::{ActionExecutor, AgentRuntime};
use consulta_core::answer::AnswerFormat;
use consulta_core::config::ProviderKind;
use consulta_core::errors::{ExecutionError, ProviderFailure, ProviderFailureKind, ValidationError};

struct ScriptedProvider {
    kind: ProviderKind,
    fail_always: bool,
    replies: Mutex<VecDeque<RawReply>>,
    invocations: AtomicUsize,
}

impl ScriptedProvider {
    fn scripted(kind: ProviderKind, replies: Vec<RawReply>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_always: false,
            replies: Mutex::new(replies.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    fn broken(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fail_always: true,
            replies: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(
        &self,
        _conversation: &[Message],
        _capabilities: &[CapabilityDescriptor],
    ) -> Result<RawReply, ProviderFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(ProviderFailure::new(
                self.kind,
                ProviderFailureKind::RateLimited,
                "429 resource exhausted",
            ));
        }
        self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            ProviderFailure::new(self.kind, ProviderFailureKind::Other, "script exhausted")
        })
    }
}

fn plan_reply(raw_calls: Vec<Value>) -> RawReply {
    RawReply { text: String::new(), raw_calls }
}

fn prose_reply(text: &str) -> RawReply {
    RawReply { text: text.to_string(), raw_calls: Vec::new() }
}

fn judgment_reply(should_finish: bool, quality: &str) -> RawReply {
    prose_reply(
        &json!({
            "should_finish": should_finish,
            "reason": "evaluación programada",
            "next_actions_needed": null,
            "errors_to_fix": null,
            "result_quality": quality,
            "data_coverage": "según el guion",
        })
        .to_string(),
    )
}

fn format_reply(answer: Value) -> RawReply {
    prose_reply(&answer.to_string())
}

#[derive(Default)]
struct FakeRecords {
    factura_calls: Mutex<Vec<(String, String, FacturaFilters)>>,
    rows: Vec<Value>,
}

impl FakeRecords {
    fn with_rows(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self { factura_calls: Mutex::new(Vec::new()), rows })
    }
}

#[async_trait]
impl RecordsGateway for FakeRecords {
    async fn facturas(
        &self,
        desde: &str,
        hasta: &str,
        filters: &FacturaFilters,
    ) -> Result<Vec<Value>, ExecutionError> {
        self.factura_calls.lock().unwrap().push((
            desde.to_string(),
            hasta.to_string(),
            filters.clone(),
        ));
        Ok(self.rows.clone())
    }

    async fn ventas(&self, _desde: &str, _hasta: &str) -> Result<Vec<Value>, ExecutionError> {
        Ok(Vec::new())
    }

    async fn dashboard(&self) -> Result<Value, ExecutionError> {
        Ok(json!({ "ultimos_seis_meses": [] }))
    }

    async fn historico(&self, _limit: u32) -> Result<Value, ExecutionError> {
        Ok(json!({ "items": [] }))
    }
}

struct NoSearch;

#[async_trait]
impl SearchGateway for NoSearch {
    async fn search(&self, _query: &str, _max: u8) -> Result<Vec<SearchHit>, ExecutionError> {
        Ok(Vec::new())
    }
}

fn runtime_with(
    gemini: Option<Arc<ScriptedProvider>>,
    openai: Option<Arc<ScriptedProvider>>,
    records: Arc<FakeRecords>,
) -> AgentRuntime {
    let router = ProviderRouter::new(
        gemini.map(|provider| provider as Arc<dyn ReasoningProvider>),
        openai.map(|provider| provider as Arc<dyn ReasoningProvider>),
    );
    let executor = Arc::new(ActionExecutor::new(records, Arc::new(NoSearch)));
    AgentRuntime::new(router, executor)
}

fn meta_rows() -> Vec<Value> {
    vec![
        json!({"proveedor": "Meta Platforms Ireland", "importe_total_euro": 120.5}),
        json!({"proveedor": "Meta Platforms Ireland", "importe_total_euro": 85.0}),
    ]
}

#[tokio::test]
async fn meta_last_three_months_scenario() {
    let hasta = Local::now().date_naive();
    let desde = hasta - Duration::days(90);
    let desde = desde.format("%Y-%m-%d").to_string();
    let hasta = hasta.format("%Y-%m-%d").to_string();

    let gemini = ScriptedProvider::scripted(
        ProviderKind::Gemini,
        vec![
            plan_reply(vec![json!({
                "name": "get_facturas",
                "args": { "desde": desde.clone(), "hasta": hasta.clone(), "proveedor": "Meta" },
            })]),
            judgment_reply(true, "completo"),
            format_reply(json!({
                "format": "table",
                "data": meta_rows(),
                "metadata": { "title": "Facturas de Meta (últimos 3 meses)" },
            })),
        ],
    );
    let records = FakeRecords::with_rows(meta_rows());
    let runtime = runtime_with(Some(gemini.clone()), None, records.clone());

    let answer = runtime
        .run_query("facturas de Meta de los últimos 3 meses", "user-7")
        .await
        .expect("query runs");

    assert_eq!(answer.format, AnswerFormat::Table);
    assert_eq!(answer.data.as_array().unwrap().len(), 2);
    assert!(answer.metadata.title.contains("Meta"));
    assert_eq!(gemini.invocations(), 3);

    let calls = records.factura_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (got_desde, got_hasta, filters) = &calls[0];
    assert_eq!(got_desde, &desde);
    assert_eq!(got_hasta, &hasta);
    assert_eq!(filters.proveedor.as_deref(), Some("Meta"));
}

#[tokio::test]
async fn adversarial_judge_is_capped_at_three_iterations() {
    // The judge never sets should_finish; the hard iteration ceiling must
    // still drive the machine to Done.
    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push(plan_reply(vec![json!({ "name": "get_dashboard", "args": {} })]));
        replies.push(judgment_reply(false, "insuficiente"));
    }
    replies.push(format_reply(json!({
        "format": "text",
        "data": "sin avance",
        "metadata": { "title": "Resultado" },
    })));

    let gemini = ScriptedProvider::scripted(ProviderKind::Gemini, replies);
    let runtime = runtime_with(Some(gemini.clone()), None, FakeRecords::with_rows(Vec::new()));

    let answer = runtime.run_query("algo imposible", "user-1").await.expect("terminates");

    // 3 × (plan + judgment) + 1 format call: the loop ran exactly three times.
    assert_eq!(gemini.invocations(), 7);
    assert_eq!(answer.format, AnswerFormat::Text);
    assert_eq!(answer.data, json!({ "text": "sin avance" }));
}

#[tokio::test]
async fn failover_is_sticky_for_the_rest_of_the_session() {
    let gemini = ScriptedProvider::broken(ProviderKind::Gemini);
    let openai = ScriptedProvider::scripted(
        ProviderKind::OpenAi,
        vec![
            plan_reply(vec![json!({
                "name": "get_facturas",
                "args": { "desde": "2026-05-09", "hasta": "2026-08-07" },
            })]),
            judgment_reply(true, "completo"),
            format_reply(json!({
                "format": "table",
                "data": meta_rows(),
                "metadata": { "title": "Facturas" },
            })),
        ],
    );
    let runtime = runtime_with(
        Some(gemini.clone()),
        Some(openai.clone()),
        FakeRecords::with_rows(meta_rows()),
    );

    let answer = runtime.run_query("resumen del mes", "user-2").await.expect("query runs");

    // Gemini is probed exactly once; every later call (plan turn, judgment,
    // final rendering) goes straight to the pinned working backend.
    assert_eq!(gemini.invocations(), 1);
    assert_eq!(openai.invocations(), 3);
    assert_eq!(answer.format, AnswerFormat::Table);
}

#[tokio::test]
async fn dual_provider_failure_on_first_plan_degrades_to_narrative() {
    let gemini = ScriptedProvider::broken(ProviderKind::Gemini);
    let openai = ScriptedProvider::broken(ProviderKind::OpenAi);
    let runtime = runtime_with(
        Some(gemini.clone()),
        Some(openai.clone()),
        FakeRecords::with_rows(Vec::new()),
    );

    let answer = runtime.run_query("facturas de enero", "user-3").await.expect("never raises");

    assert_eq!(gemini.invocations(), 1);
    assert_eq!(openai.invocations(), 1);
    assert_eq!(answer.format, AnswerFormat::Text);
    let text = answer.data["text"].as_str().unwrap();
    assert!(text.contains("Error en planificación"));
    assert!(text.contains("gemini"));
    assert!(text.contains("openai"));
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_provider_call() {
    let gemini = ScriptedProvider::scripted(ProviderKind::Gemini, Vec::new());
    let runtime = runtime_with(Some(gemini.clone()), None, FakeRecords::with_rows(Vec::new()));

    let error = runtime.run_query("   ", "user-4").await.expect_err("empty query");
    assert_eq!(error, ValidationError::EmptyQuery);
    assert_eq!(gemini.invocations(), 0);
}

#[tokio::test]
async fn malformed_judgment_forces_finish_instead_of_looping() {
    let gemini = ScriptedProvider::scripted(
        ProviderKind::Gemini,
        vec![
            prose_reply("los datos parecen suficientes"),
            prose_reply("esto no es un JSON de evaluación"),
        ],
    );
    let runtime = runtime_with(Some(gemini.clone()), None, FakeRecords::with_rows(Vec::new()));

    let answer = runtime.run_query("ventas de ayer", "user-5").await.expect("terminates");

    // plan + failed judgment, then the no-evidence error narrative: exactly
    // one iteration happened and no rendering call was made.
    assert_eq!(gemini.invocations(), 2);
    assert_eq!(answer.format, AnswerFormat::Text);
    let text = answer.data["text"].as_str().unwrap();
    assert!(text.contains("Error en reevaluación"));
}

#[tokio::test]
async fn one_failed_action_does_not_block_the_others() {
    let hasta = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let gemini = ScriptedProvider::scripted(
        ProviderKind::Gemini,
        vec![
            plan_reply(vec![
                json!({
                    "name": "get_facturas",
                    "args": { "desde": "2026-05-09", "hasta": hasta },
                }),
                json!({ "name": "capability_inexistente", "args": {} }),
            ]),
            judgment_reply(true, "parcial"),
            // A rendering reply the validator rejects, to force the
            // evidence-embedding fallback.
            prose_reply("no pienso devolver JSON"),
        ],
    );
    let records = FakeRecords::with_rows(meta_rows());
    let runtime = runtime_with(Some(gemini.clone()), None, records.clone());

    let answer = runtime.run_query("facturas recientes", "user-6").await.expect("terminates");

    // The retrieval ran even though the second action failed.
    assert_eq!(records.factura_calls.lock().unwrap().len(), 1);
    assert_eq!(answer.format, AnswerFormat::Text);
    let text = answer.data["text"].as_str().unwrap();
    assert!(text.contains("Error formateando resultado"));
    assert!(text.contains("capability_inexistente"));
}
