//! Read-only access to the records backend. Every retrieval capability maps
//! to one fixed query pattern here; the trait is the seam the tests script.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use consulta_core::config::BackendConfig;
use consulta_core::errors::ExecutionError;

const ERROR_BODY_PREVIEW_CHARS: usize = 500;

/// Optional filters for the invoice retrieval pattern.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FacturaFilters {
    pub proveedor: Option<String>,
    pub pais_origen: Option<String>,
    pub importe_min: Option<f64>,
    pub importe_max: Option<f64>,
    pub categoria: Option<String>,
    pub moneda: Option<String>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait RecordsGateway: Send + Sync {
    async fn facturas(
        &self,
        desde: &str,
        hasta: &str,
        filters: &FacturaFilters,
    ) -> Result<Vec<Value>, ExecutionError>;

    async fn ventas(&self, desde: &str, hasta: &str) -> Result<Vec<Value>, ExecutionError>;

    async fn dashboard(&self) -> Result<Value, ExecutionError>;

    async fn historico(&self, limit: u32) -> Result<Value, ExecutionError>;
}

pub struct HttpRecordsGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRecordsGateway {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn get_json(
        &self,
        capability: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value, ExecutionError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ExecutionError::Timeout { capability: capability.to_string() }
                } else {
                    ExecutionError::Network {
                        capability: capability.to_string(),
                        detail: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| ExecutionError::Network {
            capability: capability.to_string(),
            detail: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(ExecutionError::BackendStatus {
                capability: capability.to_string(),
                status: status.as_u16(),
                detail: preview(&body, ERROR_BODY_PREVIEW_CHARS),
            });
        }

        let trimmed = body.trim();
        if trimmed.is_empty() {
            // An empty body is a valid empty result set, not an error.
            return Ok(Value::Array(Vec::new()));
        }
        if trimmed.starts_with('<') {
            return Err(ExecutionError::MalformedPayload {
                capability: capability.to_string(),
                detail: "backend returned HTML instead of JSON".to_string(),
            });
        }

        serde_json::from_str(trimmed).map_err(|error| ExecutionError::MalformedPayload {
            capability: capability.to_string(),
            detail: error.to_string(),
        })
    }

    fn expect_records(capability: &str, value: Value) -> Result<Vec<Value>, ExecutionError> {
        match value {
            Value::Array(records) => Ok(records),
            other => Err(ExecutionError::MalformedPayload {
                capability: capability.to_string(),
                detail: format!("expected a record list, got: {}", preview(&other.to_string(), 120)),
            }),
        }
    }
}

#[async_trait]
impl RecordsGateway for HttpRecordsGateway {
    async fn facturas(
        &self,
        desde: &str,
        hasta: &str,
        filters: &FacturaFilters,
    ) -> Result<Vec<Value>, ExecutionError> {
        let mut query = vec![
            ("desde".to_string(), desde.to_string()),
            ("hasta".to_string(), hasta.to_string()),
        ];
        if let Some(proveedor) = &filters.proveedor {
            query.push(("proveedor".to_string(), proveedor.clone()));
        }
        if let Some(pais_origen) = &filters.pais_origen {
            query.push(("pais_origen".to_string(), pais_origen.clone()));
        }
        if let Some(importe_min) = filters.importe_min {
            query.push(("importe_min".to_string(), importe_min.to_string()));
        }
        if let Some(importe_max) = filters.importe_max {
            query.push(("importe_max".to_string(), importe_max.to_string()));
        }
        if let Some(categoria) = &filters.categoria {
            query.push(("categoria".to_string(), categoria.clone()));
        }
        if let Some(moneda) = &filters.moneda {
            query.push(("moneda".to_string(), moneda.clone()));
        }
        if let Some(limit) = filters.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }

        let value = self.get_json("get_facturas", "/api/facturas/", &query).await?;
        Self::expect_records("get_facturas", value)
    }

    async fn ventas(&self, desde: &str, hasta: &str) -> Result<Vec<Value>, ExecutionError> {
        let query = vec![
            ("desde".to_string(), desde.to_string()),
            ("hasta".to_string(), hasta.to_string()),
        ];
        let value = self.get_json("get_ventas", "/api/ventas/", &query).await?;
        Self::expect_records("get_ventas", value)
    }

    async fn dashboard(&self) -> Result<Value, ExecutionError> {
        self.get_json("get_dashboard", "/api/dashboard/", &[]).await
    }

    async fn historico(&self, limit: u32) -> Result<Value, ExecutionError> {
        let query = vec![("limit".to_string(), limit.to_string())];
        self.get_json("get_historico", "/api/dashboard/historico", &query).await
    }
}

fn preview(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
