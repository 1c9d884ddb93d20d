use serde::Serialize;

#[derive(Debug, Serialize)]
struct CapabilityRow {
    name: &'static str,
    description: &'static str,
    required_parameters: Vec<&'static str>,
    optional_parameters: Vec<&'static str>,
}

pub fn run() -> String {
    let rows: Vec<CapabilityRow> = consulta_agent::catalog()
        .iter()
        .map(|descriptor| CapabilityRow {
            name: descriptor.name,
            description: descriptor.description,
            required_parameters: descriptor
                .parameters
                .iter()
                .filter(|param| param.required)
                .map(|param| param.name)
                .collect(),
            optional_parameters: descriptor
                .parameters
                .iter()
                .filter(|param| !param.required)
                .map(|param| param.name)
                .collect(),
        })
        .collect();

    serde_json::to_string_pretty(&rows).unwrap_or_else(|error| format!("[] // {error}"))
}

#[cfg(test)]
mod tests {
    use super::run;

    #[test]
    fn listing_is_valid_json_and_names_the_retrieval_capability() {
        let output = run();
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        let names: Vec<&str> =
            parsed.as_array().unwrap().iter().map(|row| row["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"get_facturas"));
        assert!(names.contains(&"web_search"));
    }
}
