use std::sync::Arc;

use anyhow::{anyhow, Context};
use taskboard_sync::application::services::{ChangeKind, SyncEngine};
use taskboard_sync::domain::entities::NoticeLevel;
use taskboard_sync::domain::value_objects::EntityId;
use taskboard_sync::infrastructure::{BroadcastNoticeSink, HttpRemoteApi, WebSocketPushTransport};
use taskboard_sync::shared::{logging, SyncConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = SyncConfig::from_env();
    config
        .validate()
        .map_err(|err| anyhow!("invalid configuration: {err}"))?;

    let project_ids = std::env::args()
        .skip(1)
        .map(EntityId::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| anyhow!("invalid project id: {err}"))?;
    if project_ids.is_empty() {
        return Err(anyhow!("usage: board-watch <project-id> [<project-id> ...]"));
    }

    info!(
        api = %config.api.base_url,
        push = %config.push.url,
        projects = project_ids.len(),
        "Starting board watch"
    );

    let api = Arc::new(HttpRemoteApi::new(&config.api).context("failed to build REST client")?);
    let transport = Arc::new(WebSocketPushTransport::new(config.push.clone()));
    let notices = Arc::new(BroadcastNoticeSink::new());
    let mut notice_rx = notices.subscribe();

    let engine = Arc::new(SyncEngine::new(&config, api, transport, notices));
    let _changes = engine.store().subscribe(|change| {
        let verb = match change.change {
            ChangeKind::Put => "stored",
            ChangeKind::Delta => "patched",
            ChangeKind::Removed => "removed",
        };
        info!(
            kind = %change.kind,
            id = %change.id,
            revision = change.revision,
            "{verb}"
        );
    });

    for project_id in &project_ids {
        match engine.open_project(project_id).await {
            Ok(report) => info!(
                project = %project_id,
                tasks = report.applied + report.merged,
                "Project loaded"
            ),
            Err(err) => error!(project = %project_id, "Failed to load project: {}", err),
        }
    }
    engine.start().await.context("failed to start sync engine")?;

    loop {
        tokio::select! {
            notice = notice_rx.recv() => match notice {
                Ok(notice) => match notice.level {
                    NoticeLevel::Error => warn!(retryable = notice.retryable, "{}", notice.message),
                    _ => info!("{}", notice.message),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} notices", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    let metrics = engine.metrics();
    engine.dispose().await;
    info!(
        "Final metrics: {}",
        serde_json::to_string(&metrics).unwrap_or_default()
    );
    Ok(())
}
