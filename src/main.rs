use std::sync::Arc;

use anyhow::Context;
use ctqs::compositor::build_compositor;
use ctqs::config::Config;
use ctqs::dispatcher::Dispatcher;
use ctqs::models::TaskType;
use ctqs::registry::TaskRegistry;
use ctqs::routes::routes;
use ctqs::worker::Worker;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env().context("invalid configuration")?;

  let compositor = build_compositor(config.compositor, config.output_dir.clone());
  let workers = (1..=config.worker_count)
    .map(|i| {
      Arc::new(
        Worker::new(
          format!("design-worker-{i:03}"),
          [TaskType::CollageGeneration],
          config.worker_max_concurrent,
          Arc::clone(&compositor),
        )
        .with_layout_options(config.layout_options()),
      )
    })
    .collect();

  let registry = Arc::new(TaskRegistry::new(config.event_log_capacity).with_layout_options(config.layout_options()));
  let dispatcher = Dispatcher::new(registry, workers, config.worker_selection, config.task_timeout());

  let shutdown = CancellationToken::new();
  let watchdog = tokio::spawn(Arc::clone(&dispatcher).run_watchdog(config.watchdog_interval(), shutdown.clone()));

  let api = routes(Arc::clone(&dispatcher), config.layout_options());
  let signal = shutdown.clone();
  let (addr, server) = warp::serve(api)
    .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.server_port), async move {
      signal.cancelled().await;
    })
    .with_context(|| format!("cannot bind port {}", config.server_port))?;
  info!("Collage task API listening on {}", addr);

  let server = tokio::spawn(server);
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("Failed to listen for shutdown signal: {}", e);
  }
  info!("Shutting down");
  shutdown.cancel();

  let _ = server.await;
  let _ = watchdog.await;
  dispatcher.shutdown().await;
  Ok(())
}
