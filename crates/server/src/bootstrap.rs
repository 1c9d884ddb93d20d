use std::sync::Arc;

use consulta_agent::AgentRuntime;
use consulta_core::config::AppConfig;
use tracing::info;

use crate::consulta::ConsultaState;

pub struct Application {
    pub config: AppConfig,
    pub state: ConsultaState,
}

pub fn bootstrap_with_config(config: AppConfig) -> Application {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let runtime = Arc::new(AgentRuntime::from_config(&config));
    info!(
        event_name = "system.bootstrap.agent_ready",
        capabilities = consulta_agent::catalog().len(),
        "agent runtime constructed"
    );

    Application { state: ConsultaState { runtime }, config }
}
