//! Web-lookup capabilities: plain search plus the two derived lookups
//! (exchange rates, company verification) that scan search snippets.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use consulta_core::config::SearchConfig;
use consulta_core::errors::ExecutionError;

pub const DEFAULT_MAX_RESULTS: u8 = 5;
pub const MAX_MAX_RESULTS: u8 = 10;
const SNIPPET_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(&self, query: &str, max_results: u8) -> Result<Vec<SearchHit>, ExecutionError>;
}

/// HTTP search client against a JSON endpoint returning
/// `{"results": [{"title", "url", "snippet"}]}`.
pub struct HttpSearchGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSearchGateway {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchGateway for HttpSearchGateway {
    async fn search(&self, query: &str, max_results: u8) -> Result<Vec<SearchHit>, ExecutionError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("max_results", &max_results.to_string())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ExecutionError::Timeout { capability: "web_search".to_string() }
                } else {
                    ExecutionError::Network {
                        capability: "web_search".to_string(),
                        detail: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::BackendStatus {
                capability: "web_search".to_string(),
                status: status.as_u16(),
                detail: "search endpoint returned an error".to_string(),
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|error| ExecutionError::MalformedPayload {
                capability: "web_search".to_string(),
                detail: error.to_string(),
            })?;
        let mut hits = parsed.results;
        hits.truncate(max_results as usize);
        Ok(hits)
    }
}

/// Clamps the requested result count to 1..=10, defaulting to 5.
pub fn clamp_max_results(requested: Option<i64>) -> u8 {
    match requested {
        None => DEFAULT_MAX_RESULTS,
        Some(value) if value < 1 => DEFAULT_MAX_RESULTS,
        Some(value) if value > MAX_MAX_RESULTS as i64 => MAX_MAX_RESULTS,
        Some(value) => value as u8,
    }
}

/// Currency rate lookup via search snippets. Best-effort: `rate` is null when
/// no ratio can be read out of the first snippet.
pub async fn search_exchange_rate(
    gateway: &dyn SearchGateway,
    currency_from: &str,
    currency_to: &str,
    date: Option<&str>,
) -> Result<Value, ExecutionError> {
    let currency_from = currency_from.trim().to_ascii_uppercase();
    let currency_to = currency_to.trim().to_ascii_uppercase();
    let query = match date {
        Some(date) => format!("tipo de cambio {currency_from} {currency_to} {date}"),
        None => format!("tipo de cambio {currency_from} {currency_to} hoy"),
    };

    let hits = gateway.search(&query, 3).await?;
    let Some(first) = hits.first() else {
        return Err(ExecutionError::NoData {
            capability: "search_exchange_rate".to_string(),
            detail: format!("sin resultados para {currency_from}/{currency_to}"),
        });
    };

    let rate = extract_rate(&first.snippet, &currency_from);
    Ok(json!({
        "currency_from": currency_from,
        "currency_to": currency_to,
        "date": date.map(str::to_string)
            .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string()),
        "rate": rate,
        "source": first.url,
        "snippet": preview(&first.snippet, SNIPPET_PREVIEW_CHARS),
    }))
}

/// Reads a rate from the first two numbers of a snippet like
/// "1 USD = 0.92 EUR". With EUR as the origin the ratio flips.
fn extract_rate(snippet: &str, currency_from: &str) -> Option<f64> {
    let numbers = numeric_tokens(snippet);
    if numbers.len() < 2 {
        return None;
    }
    let (first, second) = (numbers[0], numbers[1]);
    if currency_from == "EUR" {
        if first == 0.0 {
            return None;
        }
        Some(second / first)
    } else {
        if second == 0.0 {
            return None;
        }
        Some(first / second)
    }
}

fn numeric_tokens(text: &str) -> Vec<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| !token.is_empty() && token.chars().any(|c| c.is_ascii_digit()))
        .filter_map(|token| token.trim_matches('.').parse().ok())
        .collect()
}

/// Company verification via search snippets: NIF/VAT and website extraction.
/// An empty result set is a `found: false` payload, not an error.
pub async fn verify_company_info(
    gateway: &dyn SearchGateway,
    company_name: &str,
    country: Option<&str>,
) -> Result<Value, ExecutionError> {
    let query = match country {
        Some(country) => format!("{company_name} {country} NIF VAT información empresa"),
        None => format!("{company_name} NIF VAT información empresa"),
    };

    let hits = gateway.search(&query, 5).await?;
    if hits.is_empty() {
        return Ok(json!({
            "company_name": company_name,
            "nif_vat": null,
            "website": null,
            "snippets": [],
            "sources": [],
            "found": false,
        }));
    }

    let nif_vat = hits.iter().find_map(|hit| scan_nif(&hit.snippet));
    let website = hits.iter().map(|hit| hit.url.as_str()).find_map(url_origin);
    let snippets: Vec<&str> = hits.iter().take(3).map(|hit| hit.snippet.as_str()).collect();
    let sources: Vec<&str> = hits.iter().take(3).map(|hit| hit.url.as_str()).collect();

    Ok(json!({
        "company_name": company_name,
        "nif_vat": nif_vat,
        "website": website,
        "snippets": snippets,
        "sources": sources,
        "found": true,
    }))
}

/// Scans for a Spanish NIF/VAT shape: one uppercase letter followed by eight
/// digits, optionally prefixed with `ES`, bounded by non-alphanumerics.
fn scan_nif(text: &str) -> Option<String> {
    let mut previous: Option<char> = None;
    for (byte_index, ch) in text.char_indices() {
        // Token start: the previous character must not be alphanumeric.
        let at_token_start = previous.map_or(true, |prev| !prev.is_ascii_alphanumeric());
        previous = Some(ch);
        if !at_token_start {
            continue;
        }
        let rest = &text[byte_index..];
        let candidate = rest.strip_prefix("ES").unwrap_or(rest);
        if let Some(nif) = nif_at_start(candidate) {
            let with_prefix =
                if rest.len() != candidate.len() { format!("ES{nif}") } else { nif };
            // Token end: the match must not run into more alphanumerics.
            let end = byte_index + with_prefix.len();
            let terminated =
                text[end..].chars().next().map_or(true, |next| !next.is_ascii_alphanumeric());
            if terminated {
                return Some(with_prefix);
            }
        }
    }
    None
}

fn nif_at_start(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_uppercase() {
        return None;
    }
    let digits: String = chars.take(8).collect();
    if digits.len() == 8 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{letter}{digits}"))
    } else {
        None
    }
}

/// Scheme + host of a URL, without the path.
fn url_origin(url: &str) -> Option<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return None;
    }
    let after_scheme = url.find("://")? + 3;
    let end = url[after_scheme..].find('/').map_or(url.len(), |pos| after_scheme + pos);
    Some(url[..end].to_string())
}

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
