//! Gemini backend: `generateContent` with function declarations bound.

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
    temperature: f32,
    timeout: Duration,
}

impl GeminiClient {
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
        let contents: Vec<Value> = conversation.iter().map(content_from_message).collect();
        let mut body = json!({
            "contents": contents,
            "generationConfig": { "temperature": self.temperature },
        });
        if !capabilities.is_empty() {
            let declarations: Vec<Value> = capabilities
                .iter()
                .map(|capability| {
                    json!({
                        "name": capability.name,
                        "description": capability.description,
                        "parameters": capability.parameters_schema(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

fn content_from_message(message: &Message) -> Value {
    match message {
        Message::User(text) => json!({ "role": "user", "parts": [{ "text": text }] }),
        Message::Reasoner(turn) => {
            json!({ "role": "model", "parts": [{ "text": turn.text }] })
        }
        Message::ActionResult { capability, payload } => json!({
            "role": "user",
            "parts": [{ "text": format!("Resultado de {capability}: {payload}") }],
        }),
    }
}

fn failure(kind: ProviderFailureKind, message: impl Into<String>) -> ProviderFailure {
    ProviderFailure::new(ProviderKind::Gemini, kind, message)
}

#[async_trait]
impl ReasoningProvider for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(
        &self,
        conversation: &[Message],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<RawReply, ProviderFailure> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&self.request_body(conversation, capabilities))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    failure(ProviderFailureKind::Timeout, "generateContent timed out")
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
    let parts = payload["candidates"]
        .get(0)
        .and_then(|candidate| candidate["content"]["parts"].as_array())
        .ok_or_else(|| {
            failure(ProviderFailureKind::Malformed, "response carried no candidates")
        })?;

    let mut text_parts = Vec::new();
    let mut raw_calls = Vec::new();
    for part in parts {
        if let Some(text) = part["text"].as_str() {
            text_parts.push(text.to_string());
        }
        if let Some(call) = part.get("functionCall") {
            raw_calls.push(call.clone());
        }
    }

    Ok(RawReply { text: text_parts.join("\n"), raw_calls })
}

fn preview(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
