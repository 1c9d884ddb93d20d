use consulta_core::config::{AppConfig, LoadOptions};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct EffectiveConfig {
    backend_base_url: String,
    backend_timeout_secs: u64,
    gemini_api_key: &'static str,
    openai_api_key: &'static str,
    gemini_model: String,
    openai_model: String,
    provider_timeout_secs: u64,
    search_base_url: String,
    server_bind_address: String,
    server_port: u16,
    logging_level: String,
}

fn redacted(present: bool) -> &'static str {
    if present {
        "***configured***"
    } else {
        "(not set)"
    }
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let effective = EffectiveConfig {
                backend_base_url: config.backend.base_url.clone(),
                backend_timeout_secs: config.backend.timeout_secs,
                gemini_api_key: redacted(config.providers.gemini_api_key.is_some()),
                openai_api_key: redacted(config.providers.openai_api_key.is_some()),
                gemini_model: config.providers.gemini_model.clone(),
                openai_model: config.providers.openai_model.clone(),
                provider_timeout_secs: config.providers.timeout_secs,
                search_base_url: config.search.base_url.clone(),
                server_bind_address: config.server.bind_address.clone(),
                server_port: config.server.port,
                logging_level: config.logging.level.clone(),
            };
            serde_json::to_string_pretty(&effective)
                .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
        }
        Err(error) => format!("{{\"error\":\"{}\"}}", error.to_string().replace('"', "'")),
    }
}
