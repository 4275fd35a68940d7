// revlined: repository synchronization daemon entry point.

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting revline daemon");
    revline_daemon::runtime::run_standalone().await
}
