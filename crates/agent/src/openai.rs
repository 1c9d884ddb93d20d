//! OpenAI backend: chat completions with tool definitions bound.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use consulta_core::config::ProviderKind;
use consulta_core::errors::{ProviderFailure, ProviderFailureKind};

use crate::provider::{RawReply, ReasoningProvider};
use crate::registry::CapabilityDescriptor;
use crate::session::Message;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, model: String, temperature: f32, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            api_key,
            temperature,
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(
        &self,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Value {
        let messages: Vec<Value> = conversation.iter().map(chat_message).collect();
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if !capabilities.is_empty() {
            let tools: Vec<Value> = capabilities
                .iter()
                .map(|capability| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": capability.name,
                            "description": capability.description,
                            "parameters": capability.parameters_schema(),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

fn chat_message(message: &Message) -> Value {
    match message {
        Message::User(text) => json!({ "role": "user", "content": text }),
        Message::Reasoner(turn) => json!({ "role": "assistant", "content": turn.text }),
        Message::ActionResult { capability, payload } => json!({
            "role": "user",
            "content": format!("Resultado de {capability}: {payload}"),
        }),
    }
}

fn failure(kind: ProviderFailureKind, message: impl Into<String>) -> ProviderFailure {
    ProviderFailure::new(ProviderKind::OpenAi, kind, message)
}

#[async_trait]
impl ReasoningProvider for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn generate(
        &self,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<RawReply, ProviderFailure> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(conversation, capabilities))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    failure(ProviderFailureKind::Timeout, "chat completion timed out")
                } else {
                    failure(ProviderFailureKind::Network, error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = match status.as_u16() {
                429 => ProviderFailureKind::RateLimited,
                401 | 403 => ProviderFailureKind::Auth,
                _ => ProviderFailureKind::Http,
            };
            return Err(failure(
                kind,
                format!("status {status}: {}", preview(&body, ERROR_BODY_PREVIEW_CHARS)),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| failure(ProviderFailureKind::Malformed, error.to_string()))?;
        parse_reply(&payload)
    }
}

fn parse_reply(payload: &Value) -> Result<RawReply, ProviderFailure> {
    let message = payload["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| failure(ProviderFailureKind::Malformed, "response carried no choices"))?;

    let text = message["content"].as_str().unwrap_or_default().to_string();

    let mut raw_calls = Vec::new();
    if let Some(tool_calls) = message["tool_calls"].as_array() {
        for tool_call in tool_calls {
            let function = &tool_call["function"];
            let name = function["name"].clone();
            // Arguments arrive JSON-encoded; a body that does not decode is
            // kept as the raw string so sanitization drops and logs it.
            let arguments = function["arguments"]
                .as_str()
                .map(|raw| serde_json::from_str::<Value>(raw).unwrap_or_else(|_| json!(raw)))
                .unwrap_or(Value::Null);
            raw_calls.push(json!({ "name": name, "args": arguments }));
        }
    }

    Ok(RawReply { text, raw_calls })
}

fn preview(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{parse_reply, OpenAiClient};
    use crate::provider::sanitize_calls;
    use crate::registry;
    use crate::session::Message;
    use consulta_core::config::ProviderKind;

    fn client() -> OpenAiClient {
        OpenAiClient::new(
            "sk-test".to_string().into(),
            "gpt-4o-mini".to_string(),
            0.1,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn request_binds_tool_definitions() {
        let body = client().request_body(
            &[Message::User("ventas del último mes".into())],
            registry::catalog(),
        );
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), registry::catalog().len());
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn reply_parsing_decodes_stringified_arguments() {
        let reply = parse_reply(&json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_ventas",
                            "arguments": "{\"desde\":\"2026-07-08\",\"hasta\":\"2026-08-07\"}"
                        }
                    }]
                }
            }]
        }))
        .expect("well-formed reply");

        assert_eq!(reply.text, "");
        assert_eq!(reply.raw_calls[0]["args"]["desde"], "2026-07-08");
    }

    #[test]
    fn undecodable_arguments_survive_to_be_dropped_by_sanitization() {
        let reply = parse_reply(&json!({
            "choices": [{
                "message": {
                    "content": "texto",
                    "tool_calls": [{
                        "function": { "name": "get_ventas", "arguments": "not json" }
                    }]
                }
            }]
        }))
        .expect("reply parses");

        let sanitized = sanitize_calls(ProviderKind::OpenAi, reply.raw_calls);
        assert!(sanitized.is_empty());
    }

    #[test]
    fn missing_choices_is_a_malformed_reply() {
        assert!(parse_reply(&json!({ "choices": [] })).is_err());
    }
}
