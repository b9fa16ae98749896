//! Routes submitted tasks to workers.
//!
//! Tasks that find no eligible worker wait in a FIFO queue and are handed out
//! when capacity frees up. Lock order is always pending queue, then registry.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CollageError, Result};
use crate::models::{Outcome, Task, TaskError, TaskParameters, TaskStatus, TaskType, WorkerStatus};
use crate::registry::TaskRegistry;
use crate::worker::Worker;

/// How a worker is picked when several are eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
  /// First eligible worker in registration order.
  #[default]
  FirstAvailable,
  /// Lowest active/capacity ratio; registration order breaks ties.
  LeastLoaded,
}

impl fmt::Display for SelectionPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SelectionPolicy::FirstAvailable => f.write_str("first_available"),
      SelectionPolicy::LeastLoaded => f.write_str("least_loaded"),
    }
  }
}

impl FromStr for SelectionPolicy {
  type Err = CollageError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "first_available" | "first" => Ok(SelectionPolicy::FirstAvailable),
      "least_loaded" | "least" => Ok(SelectionPolicy::LeastLoaded),
      other => Err(CollageError::validation(format!("unknown worker selection policy '{other}'"))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTask {
  pub task_id: Uuid,
  pub task_type: TaskType,
}

pub struct Dispatcher {
  registry: Arc<TaskRegistry>,
  workers: Vec<Arc<Worker>>,
  pending: Mutex<VecDeque<PendingTask>>,
  policy: SelectionPolicy,
  task_timeout: Duration,
  tracker: TaskTracker,
}

impl Dispatcher {
  pub fn new(
    registry: Arc<TaskRegistry>,
    workers: Vec<Arc<Worker>>,
    policy: SelectionPolicy,
    task_timeout: Duration,
  ) -> Arc<Self> {
    info!("Dispatcher ready with {} workers ({} selection)", workers.len(), policy);
    Arc::new(Self {
      registry,
      workers,
      pending: Mutex::new(VecDeque::new()),
      policy,
      task_timeout,
      tracker: TaskTracker::new(),
    })
  }

  pub fn registry(&self) -> &Arc<TaskRegistry> {
    &self.registry
  }

  pub fn workers(&self) -> Vec<WorkerStatus> {
    self.workers.iter().map(|worker| worker.status()).collect()
  }

  pub fn worker(&self, worker_id: &str) -> Result<&Arc<Worker>> {
    self
      .workers
      .iter()
      .find(|worker| worker.id() == worker_id)
      .ok_or_else(|| CollageError::worker_not_found(worker_id))
  }

  /// Creates the task, queues it, and hands it to a worker right away when
  /// one is eligible and no older task of the same type is still waiting.
  pub async fn submit(self: &Arc<Self>, task_type: TaskType, parameters: TaskParameters) -> Result<Task> {
    let task = self.registry.create(task_type, parameters).await?;

    {
      let mut pending = self.pending.lock().await;
      self.registry.update_status(task.id, TaskStatus::Queued, None).await?;
      let waiting_ahead = pending.iter().any(|entry| entry.task_type == task_type);
      let worker = if waiting_ahead { None } else { self.select_worker(task_type) };
      match worker {
        Some(worker) => {
          self.assign(worker, task.id).await;
        }
        None => {
          pending.push_back(PendingTask { task_id: task.id, task_type });
          info!("Task {} queued ({} waiting)", task.id, pending.len());
        }
      }
    }

    self.registry.get(task.id).await
  }

  /// Cancels a task wherever it is. Queued tasks leave the pending queue
  /// before they can be assigned; processing tasks get their flag raised.
  pub async fn cancel(&self, task_id: Uuid) -> Result<Task> {
    let mut pending = self.pending.lock().await;
    let task = self.registry.cancel(task_id).await?;
    pending.retain(|entry| entry.task_id != task_id);
    info!("Task {} cancelled", task_id);
    Ok(task)
  }

  /// Toggles a worker's draining flag. Resuming immediately offers it
  /// queued work.
  pub async fn set_draining(self: &Arc<Self>, worker_id: &str, draining: bool) -> Result<WorkerStatus> {
    let worker = Arc::clone(self.worker(worker_id)?);
    worker.set_draining(draining);
    if !draining {
      self.pump().await;
    }
    Ok(worker.status())
  }

  /// Snapshot of the pending queue, oldest first.
  pub async fn queued(&self) -> Vec<PendingTask> {
    self.pending.lock().await.iter().cloned().collect()
  }

  /// Re-scans the whole pending queue against every worker.
  pub async fn pump(self: &Arc<Self>) -> usize {
    let mut pending = self.pending.lock().await;
    let mut assigned = 0;
    let mut index = 0;
    while index < pending.len() {
      let entry = pending[index].clone();
      if !self.still_queued(entry.task_id).await {
        pending.remove(index);
        continue;
      }
      match self.select_worker(entry.task_type) {
        Some(worker) => {
          pending.remove(index);
          if self.assign(worker, entry.task_id).await {
            assigned += 1;
          }
        }
        None => index += 1,
      }
    }
    if assigned > 0 {
      debug!("Pump assigned {} queued tasks", assigned);
    }
    assigned
  }

  /// Fails every processing task older than the timeout ceiling.
  pub async fn enforce_timeouts(&self) -> Vec<Uuid> {
    let overdue = self.registry.overdue(self.task_timeout, Utc::now()).await;
    let mut timed_out = Vec::with_capacity(overdue.len());
    for task_id in overdue {
      let err = CollageError::Timeout { limit_ms: self.task_timeout.as_millis() as u64 };
      match self.registry.finish(task_id, Outcome::Failed(TaskError::from(&err))).await {
        Ok(Some(_)) => {
          warn!("Task {} timed out after {:?}", task_id, self.task_timeout);
          timed_out.push(task_id);
        }
        Ok(None) => {}
        Err(err) => warn!("Could not time out task {}: {}", task_id, err),
      }
    }
    timed_out
  }

  /// Periodic timeout enforcement plus a queue re-scan, until `shutdown`.
  pub async fn run_watchdog(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    info!("Dispatcher watchdog started ({}ms interval)", interval.as_millis());
    loop {
      tokio::select! {
        _ = shutdown.cancelled() => {
          info!("Dispatcher watchdog stopped");
          break;
        }
        _ = ticker.tick() => {
          self.enforce_timeouts().await;
          self.pump().await;
        }
      }
    }
  }

  /// Stops accepting executions and waits for the in-flight ones.
  pub async fn shutdown(&self) {
    self.tracker.close();
    info!("Waiting for {} in-flight tasks", self.tracker.len());
    self.tracker.wait().await;
  }

  /// Picks and reserves a worker. The returned worker already holds a slot.
  fn select_worker(&self, task_type: TaskType) -> Option<Arc<Worker>> {
    match self.policy {
      SelectionPolicy::FirstAvailable => self
        .workers
        .iter()
        .find(|worker| worker.try_reserve(task_type))
        .cloned(),
      SelectionPolicy::LeastLoaded => {
        let mut candidates: Vec<&Arc<Worker>> =
          self.workers.iter().filter(|worker| worker.accepts(task_type)).collect();
        candidates.sort_by(|a, b| a.load().total_cmp(&b.load()));
        candidates.into_iter().find(|worker| worker.try_reserve(task_type)).cloned()
      }
    }
  }

  async fn still_queued(&self, task_id: Uuid) -> bool {
    matches!(self.registry.get(task_id).await, Ok(task) if task.status == TaskStatus::Queued)
  }

  /// Moves the task to processing and starts it on the reserved worker.
  async fn assign(self: &Arc<Self>, worker: Arc<Worker>, task_id: Uuid) -> bool {
    if let Err(err) = self.registry.start(task_id, worker.id()).await {
      warn!("Task {} could not start on {}: {}", task_id, worker.id(), err);
      worker.release();
      return false;
    }
    info!("Task {} assigned to {}", task_id, worker.id());
    self.spawn_execution(worker, task_id);
    true
  }

  fn spawn_execution(self: &Arc<Self>, worker: Arc<Worker>, task_id: Uuid) {
    let dispatcher = Arc::clone(self);
    self.tracker.spawn(async move {
      let status = worker.execute(task_id, &dispatcher.registry).await;
      debug!("Task {} finished on {} as {}", task_id, worker.id(), status);
      worker.release();
      dispatcher.on_worker_freed(&worker).await;
    });
  }

  /// Hands the freed worker the oldest queued tasks it can run.
  async fn on_worker_freed(self: &Arc<Self>, worker: &Arc<Worker>) {
    let mut pending = self.pending.lock().await;
    let mut index = 0;
    while index < pending.len() {
      if worker.is_draining() || worker.active_count() >= worker.max_concurrent() {
        break;
      }
      let entry = pending[index].clone();
      if !self.still_queued(entry.task_id).await {
        pending.remove(index);
        continue;
      }
      if !worker.try_reserve(entry.task_type) {
        index += 1;
        continue;
      }
      pending.remove(index);
      self.assign(Arc::clone(worker), entry.task_id).await;
    }
  }
}
