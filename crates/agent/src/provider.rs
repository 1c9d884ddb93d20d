//! The reasoning-provider contract and the dual-backend failover router.
//!
//! Both backends sit behind one `ReasoningProvider` trait and are selected
//! through an explicit `ProviderKind` tag carried in session state. A failed
//! backend triggers exactly one retry with the other backend; there is no
//! retry of the same backend and no backoff loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use consulta_core::config::{ProviderKind, ProvidersConfig};
use consulta_core::errors::{ProviderError, ProviderFailure};

use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;
use crate::registry::CapabilityDescriptor;
use crate::session::{ActionCall, Message, ReasonerTurn};

/// A backend reply before sanitization: free text plus the raw call entries
/// exactly as the wire returned them.
#[derive(Clone, Debug, Default)]
pub struct RawReply {
    pub text: String,
    pub raw_calls: Vec<Value>,
}

#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate(
        &self,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<RawReply, ProviderFailure>;
}

/// Outcome of one routed invocation. `switched_from` is set when the reply
/// came from the alternate backend, so the orchestrator can pin the session's
/// preference to the one that worked.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub turn: ReasonerTurn,
    pub used: ProviderKind,
    pub switched_from: Option<ProviderKind>,
}

pub struct ProviderRouter {
    gemini: Option<Arc<dyn ReasoningProvider>>,
    openai: Option<Arc<dyn ReasoningProvider>>,
}

impl ProviderRouter {
    pub fn new(
        gemini: Option<Arc<dyn ReasoningProvider>>,
        openai: Option<Arc<dyn ReasoningProvider>>,
    ) -> Self {
        Self { gemini, openai }
    }

    /// Builds the HTTP-backed router from configuration. A missing credential
    /// leaves that slot empty; it surfaces as a `NotConfigured` failure at
    /// invocation time, not at startup.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let gemini = config.gemini_api_key.clone().map(|key| {
            Arc::new(GeminiClient::new(
                key,
                config.gemini_model.clone(),
                config.temperature,
                timeout,
            )) as Arc<dyn ReasoningProvider>
        });
        let openai = config.openai_api_key.clone().map(|key| {
            Arc::new(OpenAiClient::new(
                key,
                config.openai_model.clone(),
                config.temperature,
                timeout,
            )) as Arc<dyn ReasoningProvider>
        });
        Self::new(gemini, openai)
    }

    fn slot(&self, kind: ProviderKind) -> Option<&Arc<dyn ReasoningProvider>> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_ref(),
            ProviderKind::OpenAi => self.openai.as_ref(),
        }
    }

    fn default_kind(&self) -> Option<ProviderKind> {
        if self.gemini.is_some() {
            Some(ProviderKind::Gemini)
        } else if self.openai.is_some() {
            Some(ProviderKind::OpenAi)
        } else {
            None
        }
    }

    /// One generation call with single-shot failover. The session's sticky
    /// preference (if any) selects the first backend; otherwise the default
    /// order is Gemini-then-OpenAI.
    pub async fn invoke(
        &self,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
        preferred: Option<ProviderKind>,
    ) -> Result<Invocation, ProviderError> {
        let primary = match preferred.or_else(|| self.default_kind()) {
            Some(kind) => kind,
            None => return Err(ProviderError::NoneConfigured),
        };

        let first_failure = match self.try_one(primary, conversation, capabilities).await {
            Ok(turn) => return Ok(Invocation { turn, used: primary, switched_from: None }),
            Err(failure) => failure,
        };

        let alternate = primary.other();
        warn!(
            from = primary.as_str(),
            to = alternate.as_str(),
            error = %first_failure,
            "reasoning provider failed, switching"
        );

        match self.try_one(alternate, conversation, capabilities).await {
            Ok(turn) => {
                info!(provider = alternate.as_str(), "failover succeeded");
                Ok(Invocation { turn, used: alternate, switched_from: Some(primary) })
            }
            Err(second_failure) => {
                Err(ProviderError::Exhausted { first: first_failure, second: second_failure })
            }
        }
    }

    async fn try_one(
        &self,
        kind: ProviderKind,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ReasonerTurn, ProviderFailure> {
        let Some(provider) = self.slot(kind) else {
            return Err(ProviderFailure::not_configured(kind));
        };
        let raw = provider.generate(conversation, capabilities).await?;
        Ok(ReasonerTurn { text: raw.text, action_calls: sanitize_calls(kind, raw.raw_calls) })
    }
}

/// Drops call entries that are not well-formed structured calls: anything
/// that is not an object with a non-empty string name and object arguments.
/// Dropped entries are logged, never surfaced.
pub fn sanitize_calls(provider: ProviderKind, raw_calls: Vec<Value>) -> Vec<ActionCall> {
    raw_calls
        .into_iter()
        .filter_map(|raw| {
            let parsed = raw.as_object().and_then(|object| {
                let name = object.get("name")?.as_str()?.trim();
                if name.is_empty() {
                    return None;
                }
                let arguments = match object.get("args").or_else(|| object.get("arguments")) {
                    None => serde_json::Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => return None,
                };
                Some(ActionCall { capability: name.to_string(), arguments })
            });
            if parsed.is_none() {
                warn!(provider = provider.as_str(), raw = %raw, "dropping malformed action call");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{sanitize_calls, ProviderRouter, RawReply, ReasoningProvider};
    use crate::registry::CapabilityDescriptor;
    use crate::session::Message;
    use consulta_core::config::ProviderKind;
    use consulta_core::errors::{ProviderError, ProviderFailure, ProviderFailureKind};

    struct Scripted {
        kind: ProviderKind,
        fail: bool,
        invocations: AtomicUsize,
    }

    fn router(gemini: Option<Arc<Scripted>>, openai: Option<Arc<Scripted>>) -> ProviderRouter {
        ProviderRouter::new(
            gemini.map(|provider| provider as Arc<dyn ReasoningProvider>),
            openai.map(|provider| provider as Arc<dyn ReasoningProvider>),
        )
    }

    impl Scripted {
        fn ok(kind: ProviderKind) -> Arc<Self> {
            Arc::new(Self { kind, fail: false, invocations: AtomicUsize::new(0) })
        }

        fn failing(kind: ProviderKind) -> Arc<Self> {
            Arc::new(Self { kind, fail: true, invocations: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReasoningProvider for Scripted {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn generate(
            &self,
            _conversation: &[Message],
            _capabilities: &[CapabilityDescriptor],
        ) -> Result<RawReply, ProviderFailure> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderFailure::new(
                    self.kind,
                    ProviderFailureKind::RateLimited,
                    "429 quota exceeded",
                ))
            } else {
                Ok(RawReply { text: format!("ok from {}", self.kind), raw_calls: Vec::new() })
            }
        }
    }

    #[tokio::test]
    async fn default_order_prefers_gemini_when_configured() {
        let gemini = Scripted::ok(ProviderKind::Gemini);
        let openai = Scripted::ok(ProviderKind::OpenAi);
        let router = router(Some(gemini.clone()), Some(openai.clone()));

        let invocation = router.invoke(&[], &[], None).await.expect("success");
        assert_eq!(invocation.used, ProviderKind::Gemini);
        assert_eq!(invocation.switched_from, None);
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn preferred_provider_skips_the_default() {
        let gemini = Scripted::ok(ProviderKind::Gemini);
        let openai = Scripted::ok(ProviderKind::OpenAi);
        let router = router(Some(gemini.clone()), Some(openai.clone()));

        let invocation =
            router.invoke(&[], &[], Some(ProviderKind::OpenAi)).await.expect("success");
        assert_eq!(invocation.used, ProviderKind::OpenAi);
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn failover_reports_the_switch_and_tries_exactly_once() {
        let gemini = Scripted::failing(ProviderKind::Gemini);
        let openai = Scripted::ok(ProviderKind::OpenAi);
        let router = router(Some(gemini.clone()), Some(openai.clone()));

        let invocation = router.invoke(&[], &[], None).await.expect("failover success");
        assert_eq!(invocation.used, ProviderKind::OpenAi);
        assert_eq!(invocation.switched_from, Some(ProviderKind::Gemini));
        assert_eq!(gemini.calls(), 1);
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn both_failing_aggregates_both_causes() {
        let gemini = Scripted::failing(ProviderKind::Gemini);
        let openai = Scripted::failing(ProviderKind::OpenAi);
        let router = router(Some(gemini), Some(openai));

        let error = router.invoke(&[], &[], None).await.expect_err("both down");
        match error {
            ProviderError::Exhausted { first, second } => {
                assert_eq!(first.provider, ProviderKind::Gemini);
                assert_eq!(second.provider, ProviderKind::OpenAi);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_alternate_credential_counts_as_its_failure() {
        let gemini = Scripted::failing(ProviderKind::Gemini);
        let router = router(Some(gemini), None);

        let error = router.invoke(&[], &[], None).await.expect_err("no fallback slot");
        match error {
            ProviderError::Exhausted { second, .. } => {
                assert_eq!(second.kind, ProviderFailureKind::NotConfigured);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_provider_configured_at_all() {
        let router = router(None, None);
        let error = router.invoke(&[], &[], None).await.expect_err("nothing configured");
        assert_eq!(error, ProviderError::NoneConfigured);
    }

    #[test]
    fn sanitize_drops_scalars_and_nameless_entries() {
        let calls = sanitize_calls(
            ProviderKind::Gemini,
            vec![
                json!({"name": "get_facturas", "args": {"desde": "2026-05-09", "hasta": "2026-08-07"}}),
                json!(42),
                json!("get_ventas"),
                json!(null),
                json!({"args": {"x": 1}}),
                json!({"name": "", "args": {}}),
                json!({"name": "get_dashboard"}),
                json!({"name": "aggregate_data", "args": "not an object"}),
            ],
        );

        let names: Vec<_> = calls.iter().map(|c| c.capability.as_str()).collect();
        assert_eq!(names, vec!["get_facturas", "get_dashboard"]);
        assert_eq!(
            calls[0].argument("desde").and_then(|v| v.as_str()),
            Some("2026-05-09")
        );
        assert!(calls[1].arguments.is_empty());
    }
}
