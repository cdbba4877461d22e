use std::sync::Arc;

use campaign_engine::actors::dispatcher::{self, spawn_dispatcher, DispatcherArguments};
use campaign_engine::campaign::CampaignDefinition;
use campaign_engine::config::Config;
use campaign_engine::placement::HttpCallPlacement;
use campaign_engine::store::{run_snapshot_refresh, RowStore, SqliteRowStore};
use shared_types::{DispatcherMode, DispatcherStatus};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_engine=info,campaign_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let definition = CampaignDefinition::load(&config.campaign_file)?;
    info!(
        campaign_id = %definition.id,
        file = %config.campaign_file.display(),
        "campaign-runner starting"
    );

    // Rows
    let store = Arc::new(SqliteRowStore::connect(&config.database_url).await?);
    let seeded = store.insert_rows(definition.seed_rows()?).await?;
    info!(campaign_id = %definition.id, seeded, "Seed rows inserted");

    // Dispatcher
    let placement = Arc::new(HttpCallPlacement::new(config.placement())?);
    let (dispatcher_ref, dispatcher_handle) = spawn_dispatcher(DispatcherArguments {
        context: definition.context(),
        store: store.clone(),
        placement,
    })
    .await?;
    let mut updates = dispatcher::subscribe(&dispatcher_ref).await?;

    // Call outcomes are written by other processes.
    let refresher = tokio::spawn(run_snapshot_refresh(
        store.clone(),
        definition.id.clone(),
        config.poll_interval,
    ));

    match config.relaunch_from_line {
        Some(from_index) => {
            let reset = dispatcher::relaunch(&dispatcher_ref, from_index, None).await?;
            info!(from_index, reset, "Campaign relaunched");
        }
        None => dispatcher::start(&dispatcher_ref, None)?,
    }

    let mut current = dispatcher::status(&dispatcher_ref).await?;
    loop {
        if current.mode == DispatcherMode::Idle {
            break;
        }
        if current.totals.total_rows == 0 {
            warn!(campaign_id = %current.campaign_id, "No callable rows, nothing to do");
            dispatcher::stop(&dispatcher_ref)?;
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                current = updates.borrow_and_update().clone();
                log_progress(&current);
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; stopping dispatch, in-flight calls are left running");
                dispatcher::stop(&dispatcher_ref)?;
                break;
            }
        }
    }

    let final_status = dispatcher::status(&dispatcher_ref).await?;
    info!(
        campaign_id = %final_status.campaign_id,
        mode = %final_status.mode,
        total = final_status.totals.total_rows,
        completed = final_status.totals.completed_count,
        failed = final_status.totals.failed_count,
        pending = final_status.totals.pending_count,
        active = final_status.totals.active_calls,
        "campaign-runner finished"
    );

    refresher.abort();
    dispatcher_ref.stop(None);
    dispatcher_handle.await?;
    Ok(())
}

fn log_progress(status: &DispatcherStatus) {
    info!(
        mode = %status.mode,
        pending = status.totals.pending_count,
        active = status.totals.active_calls,
        completed = status.totals.completed_count,
        failed = status.totals.failed_count,
        "Campaign progress"
    );
}
