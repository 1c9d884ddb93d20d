//! Prompt construction for the three reasoning calls (plan, judgment,
//! rendering) and the strict JSON ingestion they share. Prompts are in the
//! product's language; the current date is always injected so the reasoner
//! never has to guess it.

use chrono::NaiveDate;

use consulta_core::answer::AnswerFormat;

use crate::registry::CapabilityDescriptor;

/// Context turn appended by Analyze on iterations after the first.
pub fn context_prompt(
    query: &str,
    iteration: u32,
    result_sets: usize,
    errors: &[String],
) -> String {
    let mut context_parts = vec![format!("Iteración {}", iteration + 1)];
    if result_sets > 0 {
        context_parts.push(format!(
            "Resultados previos: {result_sets} conjunto(s) de datos obtenidos"
        ));
    }
    if !errors.is_empty() {
        context_parts.push(format!("Errores encontrados: {}", errors.join(", ")));
    }
    format!(
        "Contexto: {}\n\n¿Qué falta para completar la consulta '{query}'?",
        context_parts.join("\n")
    )
}

/// The capability-aware planning prompt.
pub fn plan_prompt(
    query: &str,
    iteration: u32,
    result_sets: usize,
    errors: &[String],
    capabilities: &[CapabilityDescriptor],
    today: NaiveDate,
) -> String {
    let mut context_parts = Vec::new();
    if iteration > 0 {
        context_parts.push(format!("Iteración {}. Ya se ejecutaron acciones previas.", iteration + 1));
        if result_sets > 0 {
            context_parts.push(format!(
                "Resultados previos: {result_sets} conjunto(s) de datos obtenidos"
            ));
        }
        if !errors.is_empty() {
            context_parts.push(format!("Errores encontrados: {}", errors.join(", ")));
        }
        context_parts.push("\nAnaliza qué falta o qué errores hay que resolver.".to_string());
    } else {
        context_parts.push(
            "Primera iteración. Analiza la consulta completa y planifica las acciones necesarias."
                .to_string(),
        );
    }
    let context = context_parts.join("\n");
    let herramientas = capability_listing(capabilities);
    let today = today.format("%Y-%m-%d");

    format!(
        r#"Eres un agente que planifica acciones para responder consultas sobre datos financieros.

Consulta original: "{query}"
{context}

DEBES usar las herramientas disponibles para obtener los datos. NO respondas directamente, SIEMPRE usa las herramientas.

Herramientas disponibles:
{herramientas}

IMPORTANTE:
- La fecha actual ES: {today}
- NO inventes fechas.
- Cuando la consulta diga "últimos X meses", calcula el rango usando ESTA fecha como referencia.
- Si ya tienes datos de facturas/ventas, usa filter_data o aggregate_data en lugar de volver a consultar.

INSTRUCCIONES:
1. Si la consulta menciona "últimos 3 meses", calcula SIEMPRE LAS FECHAS (no inventes, usa las fechas reales): desde = fecha actual - 90 días, hasta = fecha actual
2. Si menciona un proveedor (ej: "Meta"), país, importe, categoría o moneda, usa los filtros directamente en get_facturas en lugar de obtener todas las facturas y luego filtrar.
   Ejemplo: si la consulta es "facturas de Meta", usa: get_facturas(desde=..., hasta=..., proveedor="Meta")
3. SIEMPRE usa las herramientas. NO respondas con texto directo.
4. Prefiere usar filtros en get_facturas sobre usar filter_data cuando sea posible (más eficiente)."#
    )
}

fn capability_listing(capabilities: &[CapabilityDescriptor]) -> String {
    capabilities
        .iter()
        .map(|capability| {
            let params: Vec<String> = capability
                .parameters
                .iter()
                .map(|param| {
                    if param.required {
                        param.name.to_string()
                    } else {
                        format!("{}=None", param.name)
                    }
                })
                .collect();
            format!("- {}({}): {}", capability.name, params.join(", "), capability.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The closed-form judgment prompt for Reevaluate.
pub fn reevaluate_prompt(
    query: &str,
    iteration: u32,
    summary: &str,
    errors: &[String],
    actions_executed: usize,
) -> String {
    let query_date_info = match requested_window(query) {
        Some(Window::Months(months)) => {
            format!("La consulta solicita los últimos {months} meses.\n")
        }
        Some(Window::Days(days)) => format!("La consulta solicita los últimos {days} días.\n"),
        None => String::new(),
    };
    let errors_line = if errors.is_empty() { "ninguno".to_string() } else { errors.join(", ") };

    format!(
        r#"Eres un agente que reevalúa resultados de acciones ejecutadas.

Consulta original: "{query}"
{query_date_info}Iteración actual: {} (máximo 3)

RESUMEN DETALLADO DE RESULTADOS:
{summary}

Errores encontrados: {errors_line}
Acciones ejecutadas en total: {actions_executed}

Analiza si:
1. Se cumplió el objetivo de la consulta original
2. Hay errores que necesitan resolverse
3. Faltan datos que requieren más acciones
4. Los resultados son suficientes o necesitan refinamiento (filtros, agregaciones, etc.)

Responde SOLO con un JSON válido:
{{
  "should_finish": true|false,
  "reason": "razón detallada de la decisión basada en el resumen de resultados",
  "next_actions_needed": ["acción1", "acción2"] o null,
  "errors_to_fix": ["error1"] o null,
  "result_quality": "completo|parcial|insuficiente",
  "data_coverage": "descripción de qué datos se obtuvieron y qué falta"
}}"#,
        iteration + 1
    )
}

/// The rendering prompt for Format.
pub fn format_prompt(query: &str, results_json: &str, suggested: AnswerFormat) -> String {
    format!(
        r##"Formatea los resultados de la consulta.

Consulta original: "{query}"
Resultados obtenidos: {results_json}
Formato sugerido: {}

Formatea los datos según el formato sugerido.

Para formato "table": devuelve un array de objetos con las filas.
Para formato "text": devuelve un texto narrativo explicando los resultados.
Para formato "chart": devuelve datos estructurados para gráfica con labels y series.

Responde SOLO con un JSON válido:
{{
  "format": "table|text|chart",
  "data": <datos formateados>,
  "metadata": {{
    "title": "Título descriptivo",
    "description": "Descripción opcional",
    "chartType": "bar|line|pie (solo si format=chart)",
    "chartLabels": ["label1", "label2"] (solo si format=chart),
    "chartSeries": [{{"name": "Serie 1", "data": [1, 2, 3], "color": "#2563eb"}}] (solo si format=chart)
  }}
}}"##,
        suggested.as_str()
    )
}

/// Strips markdown code fences and parses the remainder as JSON. The
/// reasoners wrap structured replies in ```json fences often enough that the
/// ingestion path has to tolerate it.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    serde_json::from_str(cleaned.trim())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    Months(u32),
    Days(u32),
}

/// Extracts "últimos N meses/días" from the query so the judgment prompt can
/// surface a date-range mismatch against what was actually retrieved.
pub fn requested_window(query: &str) -> Option<Window> {
    let lower = query.to_lowercase();
    if !lower.contains("últimos") && !lower.contains("últimas") && !lower.contains("ultimos") {
        return None;
    }

    let tokens: Vec<&str> = lower.split_whitespace().collect();
    for window in tokens.windows(2) {
        let [number, unit] = window else { continue };
        let Ok(value) = number.parse::<u32>() else { continue };
        if unit.starts_with("mes") {
            return Some(Window::Months(value));
        }
        if unit.starts_with("día") || unit.starts_with("dia") {
            return Some(Window::Days(value));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        context_prompt, format_prompt, parse_json_reply, plan_prompt, reevaluate_prompt,
        requested_window, Window,
    };
    use crate::registry;
    use consulta_core::answer::AnswerFormat;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()
    }

    #[test]
    fn plan_prompt_pins_the_current_date() {
        let prompt =
            plan_prompt("facturas de Meta de los últimos 3 meses", 0, 0, &[], registry::catalog(), today());
        assert!(prompt.contains("La fecha actual ES: 2026-08-07"));
        assert!(prompt.contains("NO inventes fechas"));
        assert!(prompt.contains("get_facturas(desde, hasta, proveedor=None"));
        assert!(prompt.contains("Primera iteración"));
    }

    #[test]
    fn later_iterations_surface_results_and_errors() {
        let errors = vec!["timeout en get_ventas".to_string()];
        let prompt = plan_prompt("ventas", 1, 2, &errors, registry::catalog(), today());
        assert!(prompt.contains("Iteración 2"));
        assert!(prompt.contains("2 conjunto(s)"));
        assert!(prompt.contains("timeout en get_ventas"));

        let context = context_prompt("ventas", 1, 2, &errors);
        assert!(context.contains("¿Qué falta para completar la consulta 'ventas'?"));
    }

    #[test]
    fn reevaluate_prompt_names_the_requested_window() {
        let prompt = reevaluate_prompt(
            "facturas de los últimos 3 meses",
            0,
            "- Facturas obtenidas: 12",
            &[],
            1,
        );
        assert!(prompt.contains("los últimos 3 meses"));
        assert!(prompt.contains("Iteración actual: 1 (máximo 3)"));
        assert!(prompt.contains("\"should_finish\""));
    }

    #[test]
    fn format_prompt_carries_the_suggestion() {
        let prompt = format_prompt("total gastado", "[{\"x\":1}]", AnswerFormat::Table);
        assert!(prompt.contains("Formato sugerido: table"));
        assert!(prompt.contains("chartSeries"));
    }

    #[test]
    fn fenced_json_replies_parse() {
        let fenced = "```json\n{\"should_finish\": true}\n```";
        assert_eq!(parse_json_reply(fenced).unwrap(), json!({"should_finish": true}));

        let bare = "{\"format\": \"table\"}";
        assert_eq!(parse_json_reply(bare).unwrap(), json!({"format": "table"}));

        let plain_fence = "```\n{\"a\": 1}\n```";
        assert_eq!(parse_json_reply(plain_fence).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn prose_replies_do_not_parse() {
        assert!(parse_json_reply("Según los datos, el total es 205 EUR.").is_err());
    }

    #[test]
    fn requested_window_extraction() {
        assert_eq!(
            requested_window("facturas de Meta de los últimos 3 meses"),
            Some(Window::Months(3))
        );
        assert_eq!(requested_window("ventas de los últimos 15 días"), Some(Window::Days(15)));
        assert_eq!(requested_window("últimas 2 semanas de gastos"), None);
        assert_eq!(requested_window("facturas de enero"), None);
    }
}
