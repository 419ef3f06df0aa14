//! ecoproof backend service entry point.

use tracing::info;
use tracing_subscriber::EnvFilter;

use ecoproof_backend::{bind_addr_from_env, serve, spawn_balance_projector, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (state, reward_events) = AppState::from_env()?;
    let _projector = spawn_balance_projector(state.store().clone(), reward_events);

    let addr = bind_addr_from_env();
    info!("starting ecoproof backend");
    serve(state, &addr).await
}
