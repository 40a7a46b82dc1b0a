use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use reqflow::cli::{self, exit_code, Cli};
use reqflow::events::EventBus;
use reqflow::llm::{HttpLlmProvider, LlmGateway};
use reqflow::orchestrator::{recover_stale_sessions, Orchestrator, OrchestratorConfig};
use reqflow::settings::Settings;
use reqflow::store;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_code::CONFIG_ERROR);
        }
    };

    let events = EventBus::new();
    let store = match &settings.store_path {
        Some(path) => store::file_backed(path.clone()),
        None => store::in_memory(),
    };

    if let Err(e) = recover_stale_sessions(&store, &events, chrono::Duration::minutes(15)).await {
        tracing::warn!(error = %e, "stale session recovery failed");
    }

    let provider = Arc::new(HttpLlmProvider::new(
        settings.llm_endpoint.clone(),
        settings.llm_api_key.clone(),
        settings.llm_provider.clone(),
    ));
    let llm = Arc::new(LlmGateway::new(provider, settings.max_concurrent_llm));

    let config = OrchestratorConfig {
        max_agents_per_session: 3,
        max_sessions_per_process: settings.max_sessions,
        idle_timeout: settings.idle_timeout(),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config, events, store, llm);

    let cli = Cli::parse();
    if let Err(e) = cli::run(&orchestrator, cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(cli::exit_code_for(&e));
    }
}
