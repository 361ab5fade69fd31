use tracing_subscriber::EnvFilter;

use judge_adapter::{api, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting judge adapter v{} (templates: {})",
        env!("CARGO_PKG_VERSION"),
        config.templates_path.display()
    );

    api::serve(config).await
}
