use consulta_agent::AgentRuntime;
use consulta_core::config::{AppConfig, LoadOptions};

use crate::commands::CommandResult;

pub fn run(query: &str, user: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure("ask", "config", error.to_string(), 2),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("ask", "runtime", error.to_string(), 2),
    };

    let agent = AgentRuntime::from_config(&config);
    match runtime.block_on(agent.run_query(query, user)) {
        Ok(answer) => {
            let output = serde_json::to_string_pretty(&answer)
                .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"));
            CommandResult { exit_code: 0, output }
        }
        Err(validation) => CommandResult::failure("ask", "validation", validation.to_string(), 1),
    }
}
