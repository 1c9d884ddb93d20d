//! Validates and performs one capability invocation. Retrieval capabilities
//! go through the records gateway, transforms run in memory, web lookups go
//! through the search gateway, and the record-query capability is validated
//! and then refused by policy.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use consulta_core::errors::ExecutionError;
use consulta_core::sqlguard;
use consulta_core::transform::{aggregate_records, filter_records, AggregateOp};

use crate::gateway::{FacturaFilters, RecordsGateway};
use crate::session::ActionCall;
use crate::web::{self, SearchGateway};

const MAX_FACTURAS_LIMIT: u32 = 1000;
const DEFAULT_HISTORICO_LIMIT: u32 = 10;

/// Fixed refusal for the record-query capability. Validation still runs so a
/// broken query is reported as such rather than hidden behind the refusal.
pub const SQL_DISABLED_MESSAGE: &str =
    "Las consultas SQL directas no están disponibles por seguridad. Usa una capacidad de \
     consulta como get_facturas, get_ventas o get_dashboard.";

pub struct ActionExecutor {
    records: Arc<dyn RecordsGateway>,
    search: Arc<dyn SearchGateway>,
}

impl ActionExecutor {
    pub fn new(records: Arc<dyn RecordsGateway>, search: Arc<dyn SearchGateway>) -> Self {
        Self { records, search }
    }

    pub async fn execute(&self, call: &ActionCall, user_id: &str) -> Result<Value, ExecutionError> {
        debug!(capability = %call.capability, "executing action");
        match call.capability.as_str() {
            "get_facturas" => self.get_facturas(call).await,
            "get_ventas" => {
                let desde = required_str(call, "get_ventas", "desde")?;
                let hasta = required_str(call, "get_ventas", "hasta")?;
                Ok(Value::Array(self.records.ventas(desde, hasta).await?))
            }
            "get_dashboard" => self.records.dashboard().await,
            "get_historico" => {
                let limit = optional_u32(call, "get_historico", "limit")?
                    .unwrap_or(DEFAULT_HISTORICO_LIMIT);
                self.records.historico(limit).await
            }
            "filter_data" => {
                let records = required_array(call, "filter_data", "data")?;
                let campo = required_str(call, "filter_data", "campo")?;
                let valor = call
                    .argument("valor")
                    .ok_or(ExecutionError::MissingArgument {
                        capability: "filter_data",
                        argument: "valor",
                    })?;
                Ok(Value::Array(filter_records(records, campo, valor)))
            }
            "aggregate_data" => {
                let records = required_array(call, "aggregate_data", "data")?;
                let operation: AggregateOp = required_str(call, "aggregate_data", "operation")?
                    .parse()
                    .map_err(|error: consulta_core::transform::UnknownAggregateOp| {
                        ExecutionError::InvalidArgument {
                            capability: "aggregate_data",
                            argument: "operation",
                            reason: error.to_string(),
                        }
                    })?;
                let field = required_str(call, "aggregate_data", "field")?;
                Ok(json!(aggregate_records(records, operation, field)))
            }
            "web_search" => {
                let query = required_str(call, "web_search", "query")?;
                let max_results = web::clamp_max_results(optional_i64(call, "max_results"));
                let hits = self.search.search(query, max_results).await?;
                Ok(serde_json::to_value(hits).unwrap_or_else(|_| json!([])))
            }
            "search_exchange_rate" => {
                let from = required_str(call, "search_exchange_rate", "currency_from")?;
                let to = required_str(call, "search_exchange_rate", "currency_to")?;
                let date = optional_str(call, "date");
                web::search_exchange_rate(self.search.as_ref(), from, to, date).await
            }
            "verify_company_info" => {
                let company = required_str(call, "verify_company_info", "company_name")?;
                let country = optional_str(call, "country");
                web::verify_company_info(self.search.as_ref(), company, country).await
            }
            "execute_sql_safe" => {
                let query = required_str(call, "execute_sql_safe", "query")?;
                let prepared = sqlguard::prepare_query(query, user_id)?;
                debug!(prepared = %prepared, "sql query validated, execution refused by policy");
                Err(ExecutionError::SqlDisabled(SQL_DISABLED_MESSAGE))
            }
            "list_available_tables" => Ok(known_tables()),
            "get_table_schema" => {
                let table_name = required_str(call, "get_table_schema", "table_name")?;
                Ok(table_schema(table_name))
            }
            other => Err(ExecutionError::UnknownCapability(other.to_string())),
        }
    }

    async fn get_facturas(&self, call: &ActionCall) -> Result<Value, ExecutionError> {
        let desde = required_str(call, "get_facturas", "desde")?;
        let hasta = required_str(call, "get_facturas", "hasta")?;
        let filters = FacturaFilters {
            proveedor: optional_str(call, "proveedor").map(str::to_string),
            pais_origen: optional_str(call, "pais_origen").map(str::to_string),
            importe_min: optional_f64(call, "get_facturas", "importe_min")?,
            importe_max: optional_f64(call, "get_facturas", "importe_max")?,
            categoria: optional_str(call, "categoria").map(str::to_string),
            moneda: optional_str(call, "moneda").map(str::to_string),
            limit: optional_u32(call, "get_facturas", "limit")?
                .map(|limit| limit.min(MAX_FACTURAS_LIMIT)),
        };
        Ok(Value::Array(self.records.facturas(desde, hasta, &filters).await?))
    }
}

fn known_tables() -> Value {
    json!(sqlguard::ALLOWED_TABLES
        .iter()
        .map(|table| json!({ "name": table, "schema": "public" }))
        .collect::<Vec<_>>())
}

fn table_schema(table_name: &str) -> Value {
    match table_name.to_ascii_lowercase().as_str() {
        "facturas" => json!({
            "name": "facturas",
            "columns": [
                { "name": "id", "type": "integer" },
                { "name": "fecha", "type": "text" },
                { "name": "fecha_dt", "type": "date" },
                { "name": "proveedor", "type": "text" },
                { "name": "importe_total_euro", "type": "numeric" },
                { "name": "importe_sin_iva_euro", "type": "numeric" },
                { "name": "categoria", "type": "text" },
                { "name": "pais_origen", "type": "text" },
            ],
        }),
        "ventas" => json!({
            "name": "ventas",
            "columns": [
                { "name": "ID", "type": "integer" },
                { "name": "TRANSACTION_COMPLETE_DATE", "type": "text" },
                { "name": "TRANSACTION_COMPLETE_DATE_DT", "type": "date" },
                { "name": "TOTAL_PRICE_OF_ITEMS_AMT_VAT_INCL", "type": "numeric" },
                { "name": "MARKETPLACE", "type": "text" },
                { "name": "SALES_CHANNEL", "type": "text" },
            ],
        }),
        other => json!({
            "name": other,
            "columns": [],
            "note": "Esquema no disponible. Usa list_available_tables para ver las tablas conocidas.",
        }),
    }
}

fn required_str<'a>(
    call: &'a ActionCall,
    capability: &'static str,
    argument: &'static str,
) -> Result<&'a str, ExecutionError> {
    match call.argument(argument) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ExecutionError::InvalidArgument {
            capability,
            argument,
            reason: "expected a string".to_string(),
        }),
        None => Err(ExecutionError::MissingArgument { capability, argument }),
    }
}

fn optional_str<'a>(call: &'a ActionCall, argument: &str) -> Option<&'a str> {
    call.argument(argument).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

fn required_array<'a>(
    call: &'a ActionCall,
    capability: &'static str,
    argument: &'static str,
) -> Result<&'a [Value], ExecutionError> {
    match call.argument(argument) {
        Some(Value::Array(values)) => Ok(values),
        Some(_) => Err(ExecutionError::InvalidArgument {
            capability,
            argument,
            reason: "expected an array".to_string(),
        }),
        None => Err(ExecutionError::MissingArgument { capability, argument }),
    }
}

fn optional_i64(call: &ActionCall, argument: &str) -> Option<i64> {
    call.argument(argument).and_then(Value::as_i64)
}

fn optional_f64(
    call: &ActionCall,
    capability: &'static str,
    argument: &'static str,
) -> Result<Option<f64>, ExecutionError> {
    match call.argument(argument) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(text)) => {
            text.trim().parse().map(Some).map_err(|_| ExecutionError::InvalidArgument {
                capability,
                argument,
                reason: format!("`{text}` is not a number"),
            })
        }
        Some(_) => Err(ExecutionError::InvalidArgument {
            capability,
            argument,
            reason: "expected a number".to_string(),
        }),
    }
}

fn optional_u32(
    call: &ActionCall,
    capability: &'static str,
    argument: &'static str,
) -> Result<Option<u32>, ExecutionError> {
    match call.argument(argument) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => match number.as_u64() {
            Some(value) if value <= u32::MAX as u64 => Ok(Some(value as u32)),
            _ => Err(ExecutionError::InvalidArgument {
                capability,
                argument,
                reason: "expected a non-negative integer".to_string(),
            }),
        },
        Some(_) => Err(ExecutionError::InvalidArgument {
            capability,
            argument,
            reason: "expected an integer".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use super::{ActionExecutor, SQL_DISABLED_MESSAGE};
    use crate::gateway::{FacturaFilters, RecordsGateway};
    use crate::session::ActionCall;
    use crate::web::{SearchGateway, SearchHit};
    use consulta_core::errors::ExecutionError;
    use consulta_core::sqlguard::SqlGuardError;

    #[derive(Default)]
    struct RecordingGateway {
        factura_calls: Mutex<Vec<(String, String, FacturaFilters)>>,
        historico_limits: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl RecordsGateway for RecordingGateway {
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
            Ok(vec![json!({"proveedor": "Meta", "importe_total_euro": 10.0})])
        }

        async fn ventas(&self, _desde: &str, _hasta: &str) -> Result<Vec<Value>, ExecutionError> {
            Ok(Vec::new())
        }

        async fn dashboard(&self) -> Result<Value, ExecutionError> {
            Ok(json!({"ultimos_seis_meses": []}))
        }

        async fn historico(&self, limit: u32) -> Result<Value, ExecutionError> {
            self.historico_limits.lock().unwrap().push(limit);
            Ok(json!({"items": []}))
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchGateway for NoSearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: u8,
        ) -> Result<Vec<SearchHit>, ExecutionError> {
            Ok(Vec::new())
        }
    }

    fn executor() -> (ActionExecutor, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        (ActionExecutor::new(gateway.clone(), Arc::new(NoSearch)), gateway)
    }

    fn call(capability: &str, arguments: Value) -> ActionCall {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ActionCall { capability: capability.to_string(), arguments }
    }

    #[tokio::test]
    async fn facturas_pass_filters_and_cap_the_limit() {
        let (executor, gateway) = executor();
        let result = executor
            .execute(
                &call(
                    "get_facturas",
                    json!({
                        "desde": "2026-05-09",
                        "hasta": "2026-08-07",
                        "proveedor": "Meta",
                        "importe_min": 100.0,
                        "limit": 50_000,
                    }),
                ),
                "u-1",
            )
            .await
            .expect("facturas execute");

        assert_eq!(result.as_array().unwrap().len(), 1);
        let calls = gateway.factura_calls.lock().unwrap();
        let (desde, hasta, filters) = &calls[0];
        assert_eq!(desde, "2026-05-09");
        assert_eq!(hasta, "2026-08-07");
        assert_eq!(filters.proveedor.as_deref(), Some("Meta"));
        assert_eq!(filters.importe_min, Some(100.0));
        assert_eq!(filters.limit, Some(1000));
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let (executor, _) = executor();
        let error = executor
            .execute(&call("get_facturas", json!({"desde": "2026-05-09"})), "u-1")
            .await
            .expect_err("hasta missing");
        assert!(matches!(
            error,
            ExecutionError::MissingArgument { capability: "get_facturas", argument: "hasta" }
        ));
    }

    #[tokio::test]
    async fn historico_defaults_its_limit() {
        let (executor, gateway) = executor();
        executor.execute(&call("get_historico", json!({})), "u-1").await.expect("historico");
        assert_eq!(*gateway.historico_limits.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn transforms_run_in_memory() {
        let (executor, _) = executor();
        let data = json!([
            {"proveedor": "Meta", "importe_total_euro": "100,5"},
            {"proveedor": "OVH", "importe_total_euro": 10},
        ]);

        let filtered = executor
            .execute(
                &call(
                    "filter_data",
                    json!({"data": data.clone(), "campo": "proveedor", "valor": "meta"}),
                ),
                "u-1",
            )
            .await
            .expect("filter");
        assert_eq!(filtered.as_array().unwrap().len(), 1);

        let total = executor
            .execute(
                &call(
                    "aggregate_data",
                    json!({"data": data, "operation": "sum", "field": "importe_total_euro"}),
                ),
                "u-1",
            )
            .await
            .expect("aggregate");
        assert!((total.as_f64().unwrap() - 110.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unsupported_aggregate_operation_is_invalid() {
        let (executor, _) = executor();
        let error = executor
            .execute(
                &call("aggregate_data", json!({"data": [], "operation": "median", "field": "x"})),
                "u-1",
            )
            .await
            .expect_err("median unsupported");
        assert!(matches!(
            error,
            ExecutionError::InvalidArgument { capability: "aggregate_data", argument: "operation", .. }
        ));
    }

    #[tokio::test]
    async fn valid_sql_is_still_refused_by_policy() {
        let (executor, _) = executor();
        let error = executor
            .execute(
                &call("execute_sql_safe", json!({"query": "SELECT * FROM facturas"})),
                "u-1",
            )
            .await
            .expect_err("sql disabled");
        assert_eq!(error, ExecutionError::SqlDisabled(SQL_DISABLED_MESSAGE));
    }

    #[tokio::test]
    async fn invalid_sql_reports_the_validation_reason() {
        let (executor, _) = executor();
        let error = executor
            .execute(
                &call("execute_sql_safe", json!({"query": "DROP TABLE facturas"})),
                "u-1",
            )
            .await
            .expect_err("rejected before policy refusal");
        assert_eq!(error, ExecutionError::SqlRejected(SqlGuardError::NotSelect));
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let (executor, _) = executor();
        let error = executor
            .execute(&call("drop_everything", json!({})), "u-1")
            .await
            .expect_err("unknown capability");
        assert!(matches!(error, ExecutionError::UnknownCapability(name) if name == "drop_everything"));
    }

    #[tokio::test]
    async fn schema_discovery_is_static() {
        let (executor, _) = executor();
        let tables =
            executor.execute(&call("list_available_tables", json!({})), "u-1").await.unwrap();
        assert_eq!(tables.as_array().unwrap().len(), 4);

        let schema = executor
            .execute(&call("get_table_schema", json!({"table_name": "facturas"})), "u-1")
            .await
            .unwrap();
        assert_eq!(schema["name"], "facturas");
        assert!(!schema["columns"].as_array().unwrap().is_empty());

        let unknown = executor
            .execute(&call("get_table_schema", json!({"table_name": "misterio"})), "u-1")
            .await
            .unwrap();
        assert!(unknown["columns"].as_array().unwrap().is_empty());
    }
}
