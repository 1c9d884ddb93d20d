//! Compact evidence summary over everything retrieved so far. This is what
//! the judgment call sees, so it has to surface the *parameters* of executed
//! retrieval calls (date ranges, filters) and not just result counts, or the
//! reasoner cannot detect a range mismatch against the original question.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde_json::Value;

use consulta_core::transform::coerce_numeric;

use crate::session::{ActionCall, QuerySession};

const MAX_LISTED_NAMES: usize = 5;

pub fn summarize(session: &QuerySession, today: NaiveDate) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("Fecha actual: {}", today.format("%Y-%m-%d")));
    lines.push(format!(
        "Total de conjuntos de resultados: {}",
        session.result_set_count()
    ));

    let mut factura_count = 0usize;
    let mut venta_count = 0usize;
    let mut factura_total = 0.0f64;
    let mut venta_total = 0.0f64;
    let mut proveedores = BTreeSet::new();
    let mut categorias = BTreeSet::new();

    for payload in session.action_results() {
        match payload {
            Value::Array(items) => {
                for item in items {
                    let Some(record) = item.as_object() else { continue };
                    if record.contains_key("proveedor") || record.contains_key("importe_total_euro")
                    {
                        factura_count += 1;
                        if let Some(proveedor) = record.get("proveedor").and_then(Value::as_str) {
                            proveedores.insert(proveedor.to_string());
                        }
                        if let Some(categoria) = record.get("categoria").and_then(Value::as_str) {
                            categorias.insert(categoria.to_string());
                        }
                        if let Some(amount) = record.get("importe_total_euro").and_then(coerce_numeric)
                        {
                            factura_total += amount;
                        }
                    } else if record.contains_key("MARKETPLACE")
                        || record.contains_key("TOTAL_PRICE_OF_ITEMS_AMT_VAT_INCL")
                    {
                        venta_count += 1;
                        if let Some(amount) = record
                            .get("TOTAL_PRICE_OF_ITEMS_AMT_VAT_INCL")
                            .and_then(coerce_numeric)
                        {
                            venta_total += amount;
                        }
                    }
                }
            }
            Value::Object(map) => {
                if let Some(months) = map.get("ultimos_seis_meses").and_then(Value::as_array) {
                    lines.push(format!("Dashboard: {} meses de datos", months.len()));
                } else if let Some(items) = map.get("items").and_then(Value::as_array) {
                    lines.push(format!("Items obtenidos: {}", items.len()));
                } else {
                    let keys: Vec<&str> =
                        map.keys().take(MAX_LISTED_NAMES).map(String::as_str).collect();
                    lines.push(format!("Resultado único con claves: {}", keys.join(", ")));
                }
            }
            _ => {}
        }
    }

    if factura_count > 0 {
        lines.push(format!("Facturas obtenidas: {factura_count}"));
        lines.push(format!("Total facturado: {factura_total:.2} EUR"));
        if !proveedores.is_empty() {
            lines.push(format!("Proveedores encontrados: {}", joined(&proveedores)));
        }
        if !categorias.is_empty() {
            lines.push(format!("Categorías: {}", joined(&categorias)));
        }
    }
    if venta_count > 0 {
        lines.push(format!("Ventas obtenidas: {venta_count}"));
        lines.push(format!("Total vendido: {venta_total:.2} EUR"));
    }

    let executed: Vec<&ActionCall> = session.executed_calls().collect();
    if !executed.is_empty() {
        let names: BTreeSet<&str> =
            executed.iter().map(|call| call.capability.as_str()).collect();
        lines.push(format!(
            "Herramientas ejecutadas: {}",
            names.into_iter().collect::<Vec<_>>().join(", ")
        ));
        for call in &executed {
            if let Some(range) = queried_range(call) {
                lines.push(range);
            }
        }
    }

    if lines.len() <= 2 && session.result_set_count() == 0 {
        return "No se obtuvieron resultados detallados".to_string();
    }
    lines.iter().map(|line| format!("- {line}")).collect::<Vec<_>>().join("\n")
}

/// Renders the exact backend range and filters one retrieval call used.
fn queried_range(call: &ActionCall) -> Option<String> {
    let desde = call.argument("desde")?.as_str()?;
    let hasta = call.argument("hasta")?.as_str()?;
    let mut line = format!(
        "RANGO CONSULTADO EN BD ({}): desde {desde} hasta {hasta}",
        call.capability
    );
    if let Some(proveedor) = call.argument("proveedor").and_then(Value::as_str) {
        line.push_str(&format!(", proveedor: {proveedor}"));
    }
    if let Some(categoria) = call.argument("categoria").and_then(Value::as_str) {
        line.push_str(&format!(", categoría: {categoria}"));
    }
    if let Some(pais) = call.argument("pais_origen").and_then(Value::as_str) {
        line.push_str(&format!(", país: {pais}"));
    }
    Some(line)
}

fn joined(names: &BTreeSet<String>) -> String {
    names.iter().take(MAX_LISTED_NAMES).cloned().collect::<Vec<_>>().join(", ")
}
