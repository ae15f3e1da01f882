//! The leadflow engine process.
//!
//! Wires the trigger dispatcher, job worker, wake sweeper and calendar
//! ticker to one store and one transport, then runs them until ctrl-c.

mod collaborators;
mod config;
mod error;
mod seed;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::seed::Seed;
use leadflow_scheduler::{CalendarTicker, JobWorker, StaticCohorts, WakeSweeper};
use leadflow_workflow::bus::{EventBus, InMemoryEventBus};
use leadflow_workflow::clock::{Clock, SystemClock};
use leadflow_workflow::dispatcher::TriggerDispatcher;
use leadflow_workflow::executor::NodeExecutor;
use leadflow_workflow::memory::{InMemoryCollaborators, InMemoryStore};
use leadflow_workflow::nats::{NatsConfig, NatsEventBus, NatsJobQueue};
use leadflow_workflow::queue::{InMemoryJobQueue, JobQueue};
use leadflow_workflow::store::EngineStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> leadflow_core::Result<(), EngineError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,async_nats=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().map_err(EngineError::from)?;
    tracing::info!("Loaded configuration");
    run(config).await
}

async fn transport(
    config: &EngineConfig,
    clock: Arc<dyn Clock>,
) -> leadflow_core::Result<(Arc<dyn JobQueue>, Arc<dyn EventBus>), EngineError> {
    let Some(settings) = &config.nats else {
        tracing::warn!("no NATS url configured, jobs and events stay in this process");
        return Ok((
            Arc::new(InMemoryJobQueue::new(clock)),
            Arc::new(InMemoryEventBus::default()),
        ));
    };

    let nats = NatsConfig::from(settings);
    let client = async_nats::connect(&nats.url)
        .await
        .map_err(|err| EngineError::Nats {
            url: nats.url.clone(),
            reason: err.to_string(),
        })?;
    let queue = NatsJobQueue::with_client(client.clone(), &nats)
        .await
        .map_err(EngineError::Queue)?;
    let bus = NatsEventBus::with_client(client, &nats);
    tracing::info!(url = %nats.url, "connected to NATS");
    Ok((Arc::new(queue), Arc::new(bus)))
}

async fn run(config: EngineConfig) -> leadflow_core::Result<(), EngineError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn EngineStore> = Arc::new(InMemoryStore::new());
    let local = InMemoryCollaborators::new();

    let cohorts = match &config.seed_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "loading seed data");
            Seed::load(dir)?.apply(store.as_ref(), &local).await?
        }
        None => StaticCohorts::new(),
    };

    let executor_config = config.executor_config();
    let collaborators = collaborators::build(&local, executor_config.collaborator_timeout)
        .map_err(EngineError::Http)?;
    let (queue, bus) = transport(&config, clock.clone()).await?;

    let executor = NodeExecutor::new(
        store.clone(),
        collaborators,
        queue.clone(),
        clock.clone(),
        executor_config,
    );
    let dispatcher = TriggerDispatcher::new(store.clone(), queue.clone(), clock.clone());
    let worker = JobWorker::new(
        queue.clone(),
        executor.clone(),
        clock.clone(),
        config.retry.clone(),
        config.worker.clone(),
    );
    let sweeper = WakeSweeper::new(
        store.clone(),
        executor,
        queue,
        clock.clone(),
        config.sweep.clone(),
    );
    let ticker = CalendarTicker::new(
        store,
        dispatcher.clone(),
        Arc::new(cohorts),
        clock,
        config.calendar.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    {
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            if let Err(err) = dispatcher.listen(bus.as_ref(), shutdown).await {
                tracing::error!(error = %err, "trigger dispatcher could not subscribe");
            }
            "trigger dispatcher"
        });
    }
    {
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            worker.run(shutdown).await;
            "job worker"
        });
    }
    {
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            sweeper.run(shutdown).await;
            "wake sweeper"
        });
    }
    tasks.spawn(async move {
        ticker.run(shutdown_rx).await;
        "calendar ticker"
    });

    tracing::info!("leadflow engine running");
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c, shutting down");
        }
    };
    let outcome = supervise(&mut tasks, ctrl_c).await;

    tracing::info!("shutting down");
    shutdown_tx.send_replace(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "background task panicked");
        }
    }
    outcome.map_err(Into::into)
}

/// Waits for `signal` or for the first background task to end.
async fn supervise(
    tasks: &mut JoinSet<&'static str>,
    signal: impl Future<Output = ()>,
) -> Result<(), EngineError> {
    tokio::select! {
        () = signal => Ok(()),
        Some(joined) = tasks.join_next() => Err(stopped(joined)),
    }
}

/// Describes a background task that ended before shutdown was requested.
fn stopped(joined: Result<&'static str, JoinError>) -> EngineError {
    match joined {
        Ok(task) => {
            tracing::error!(task, "background task stopped unexpectedly");
            EngineError::TaskStopped {
                task: task.to_string(),
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "background task panicked");
            EngineError::TaskStopped {
                task: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn panicked_task_stops_the_engine() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "wake sweeper"
        });
        tasks.spawn(async {
            panic!("worker blew up");
        });

        let err = supervise(&mut tasks, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskStopped { ref task } if task.contains("panic")));
        tasks.abort_all();
    }

    #[tokio::test]
    async fn task_ending_early_is_named() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { "job worker" });

        let err = supervise(&mut tasks, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskStopped { ref task } if task == "job worker"));
    }

    #[tokio::test]
    async fn signal_wins_while_tasks_run() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "calendar ticker"
        });

        supervise(&mut tasks, async {}).await.expect("clean shutdown");
        assert_eq!(tasks.len(), 1);
        tasks.abort_all();
    }
}
