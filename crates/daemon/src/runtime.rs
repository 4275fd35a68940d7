use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::GlobalConfig;
use crate::scheduler::SyncScheduler;
use crate::store::meta_db::MetaDb;
use crate::vcs::directory::RepositoryDirectory;
use crate::vcs::fetcher::RemoteFetcher;
use crate::vcs::orchestrator::{AllowAllViewers, NoPreviousKeys, SyncOrchestrator};
use crate::vcs::parser::LogParser;

/// Wire the engine together and run until ctrl-c.
pub async fn run_standalone() -> Result<()> {
    let config = GlobalConfig::load();
    let database_path = config
        .database_path()
        .ok_or_else(|| anyhow!("could not determine home directory"))?;

    let store = Arc::new(
        MetaDb::open(&database_path)
            .with_context(|| format!("opening repository store at {}", database_path.display()))?,
    );

    let (schedule, driver) = SyncScheduler::new(config.sync_interval());
    let schedule = Arc::new(schedule);

    let directory = Arc::new(RepositoryDirectory::new(store, schedule.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        directory.clone(),
        RemoteFetcher::new(),
        LogParser::from_config(&config.encodings),
        Arc::new(AllowAllViewers),
        Arc::new(NoPreviousKeys),
    ));
    let scheduler_task = driver.spawn(orchestrator);

    // Activates the schedule when any repositories are already configured.
    directory.load().context("loading repository directory")?;
    info!(database = %database_path.display(), "revline daemon started");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    directory.shutdown();
    schedule.shutdown();
    let _ = scheduler_task.await;
    Ok(())
}
