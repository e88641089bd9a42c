//! CognitionFlow HTTP service.
//!
//! Configuration comes from the environment and an optional `.env` file (see
//! `cognitionflow::config`). Provider
//! credentials are resolved per run, so the service starts even when they are missing and
//! reports `503` on `POST /run` until they are set.

use cognitionflow::clients::client_from_config;
use cognitionflow::client_wrapper::ClientWrapper;
use cognitionflow::config::{load_dotenv, CognitionFlowConfig, LlmConfig};
use cognitionflow::executor::LocalCodeExecutor;
use cognitionflow::run_store::JsonlRunStore;
use cognitionflow::server::{serve, AppState, ClientFactory, ClientOptions};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    load_dotenv();
    cognitionflow::init_logger();

    let config = CognitionFlowConfig::from_env()?;
    tokio::fs::create_dir_all(&config.workspace_dir).await?;
    let store = Arc::new(JsonlRunStore::open(&config.run_store_path)?);

    match LlmConfig::from_env() {
        Ok(llm) => log::info!("completion provider: {:?} model {}", llm.provider, llm.model),
        Err(e) => log::warn!("{}; runs will be rejected until it is fixed", e),
    }

    let client_factory: ClientFactory = Arc::new(
        |options: &ClientOptions| -> Result<Arc<dyn ClientWrapper>, Box<dyn Error + Send + Sync>> {
            let llm = LlmConfig::from_env()?
                .with_overrides(options.model.as_deref(), options.temperature);
            client_from_config(&llm)
        },
    );

    log::info!(
        "workspace {}, history {}, {} concurrent run(s)",
        config.workspace_dir.display(),
        config.run_store_path.display(),
        config.max_concurrent_runs
    );

    let state = AppState::new(
        config,
        store,
        client_factory,
        Arc::new(LocalCodeExecutor::new()),
    );
    serve(state).await
}
