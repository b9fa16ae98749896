//! Execution unit with a declared capability set and a concurrency cap.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::compositor::Compositor;
use crate::error::{CollageError, Result};
use crate::layout::{self, LayoutOptions, LayoutSpec};
use crate::models::{Artifact, Outcome, Task, TaskError, TaskResult, TaskStatus, TaskType, WorkerStatus};
use crate::registry::TaskRegistry;

pub struct Worker {
  id: String,
  capabilities: HashSet<TaskType>,
  max_concurrent: usize,
  active: AtomicUsize,
  draining: AtomicBool,
  completed: AtomicU64,
  failed: AtomicU64,
  cancelled: AtomicU64,
  busy_ms: AtomicU64,
  compositor: Arc<dyn Compositor>,
  layout_options: LayoutOptions,
}

impl Worker {
  pub fn new(
    id: impl Into<String>,
    capabilities: impl IntoIterator<Item = TaskType>,
    max_concurrent: usize,
    compositor: Arc<dyn Compositor>,
  ) -> Self {
    Self {
      id: id.into(),
      capabilities: capabilities.into_iter().collect(),
      max_concurrent,
      active: AtomicUsize::new(0),
      draining: AtomicBool::new(false),
      completed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
      cancelled: AtomicU64::new(0),
      busy_ms: AtomicU64::new(0),
      compositor,
      layout_options: LayoutOptions::default(),
    }
  }

  pub fn with_layout_options(mut self, options: LayoutOptions) -> Self {
    self.layout_options = options;
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn max_concurrent(&self) -> usize {
    self.max_concurrent
  }

  pub fn active_count(&self) -> usize {
    self.active.load(Ordering::Acquire)
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  pub fn has_capability(&self, task_type: TaskType) -> bool {
    self.capabilities.contains(&task_type)
  }

  /// Fraction of capacity in use, used by the least-loaded policy.
  pub fn load(&self) -> f64 {
    if self.max_concurrent == 0 {
      return 1.0;
    }
    self.active_count() as f64 / self.max_concurrent as f64
  }

  /// Capability match, spare capacity, and not draining.
  pub fn accepts(&self, task_type: TaskType) -> bool {
    !self.is_draining() && self.has_capability(task_type) && self.active_count() < self.max_concurrent
  }

  /// Claims one execution slot. Never pushes the active count past the cap,
  /// even when several dispatch paths race for the same worker.
  pub fn try_reserve(&self, task_type: TaskType) -> bool {
    if self.is_draining() || !self.has_capability(task_type) {
      return false;
    }
    let mut current = self.active.load(Ordering::Acquire);
    loop {
      if current >= self.max_concurrent {
        return false;
      }
      match self
        .active
        .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return true,
        Err(actual) => current = actual,
      }
    }
  }

  pub fn release(&self) {
    let _ = self
      .active
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
  }

  pub fn set_draining(&self, draining: bool) {
    let previous = self.draining.swap(draining, Ordering::AcqRel);
    if previous != draining {
      if draining {
        info!("Worker {} draining ({} active)", self.id, self.active_count());
      } else {
        info!("Worker {} resumed", self.id);
      }
    }
  }

  pub fn status(&self) -> WorkerStatus {
    let completed = self.completed.load(Ordering::Relaxed);
    let failed = self.failed.load(Ordering::Relaxed);
    let finished = completed + failed;
    let mut capabilities: Vec<_> = self.capabilities.iter().copied().collect();
    capabilities.sort_by_key(|task_type| task_type.as_str());
    WorkerStatus {
      id: self.id.clone(),
      capabilities,
      active_count: self.active_count(),
      max_concurrent: self.max_concurrent,
      available: !self.is_draining() && self.active_count() < self.max_concurrent,
      draining: self.is_draining(),
      completed,
      failed,
      cancelled: self.cancelled.load(Ordering::Relaxed),
      average_processing_ms: if finished == 0 {
        0.0
      } else {
        self.busy_ms.load(Ordering::Relaxed) as f64 / finished as f64
      },
    }
  }

  /// Runs one task that the dispatcher already moved to processing, and
  /// records its terminal state. Cancellation is honoured between stages; a
  /// cancelled task never gets a result stored. A panic inside the run is
  /// recorded as an internal failure and never escapes.
  pub async fn execute(&self, task_id: Uuid, registry: &TaskRegistry) -> TaskStatus {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(self.run(task_id, registry))
      .catch_unwind()
      .await
      .unwrap_or_else(|panic| {
        Err(CollageError::Internal(format!("task {task_id} panicked: {}", panic_message(&*panic))))
      });
    let status = match outcome {
      Ok(status) => status,
      Err(err) => {
        let failure = TaskError::from(&err);
        error!("Worker {}: task {} failed: {}", self.id, task_id, err);
        match registry.finish(task_id, Outcome::Failed(failure)).await {
          Ok(Some(task)) => task.status,
          Ok(None) => self.current_status(task_id, registry).await,
          Err(err) => {
            error!("Worker {}: could not record failure of task {}: {}", self.id, task_id, err);
            TaskStatus::Failed
          }
        }
      }
    };

    let elapsed = started.elapsed().as_millis() as u64;
    match status {
      TaskStatus::Completed => {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.busy_ms.fetch_add(elapsed, Ordering::Relaxed);
      }
      TaskStatus::Failed => {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.busy_ms.fetch_add(elapsed, Ordering::Relaxed);
      }
      TaskStatus::Cancelled => {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
      }
      _ => {}
    }
    status
  }

  async fn run(&self, task_id: Uuid, registry: &TaskRegistry) -> Result<TaskStatus> {
    let started = Instant::now();
    let task = registry.get(task_id).await?;
    let cancel = registry.cancellation_token(task_id).await?;
    if cancel.is_cancelled() {
      return Ok(self.abandon(&task, registry).await);
    }
    if task.status != TaskStatus::Processing {
      return Err(CollageError::Internal(format!(
        "worker {} was handed task {} in state {}",
        self.id, task_id, task.status
      )));
    }
    if !self.has_capability(task.task_type) {
      return Err(CollageError::Internal(format!(
        "worker {} cannot run {} tasks",
        self.id, task.task_type
      )));
    }
    info!("Worker {}: processing task {} ({} layout)", self.id, task_id, task.parameters.layout);

    let params = &task.parameters;
    let images = params.image_dims();
    layout::validate_inputs(&images, params.canvas, params.spacing, &params.background_color)?;
    if cancel.is_cancelled() {
      return Ok(self.abandon(&task, registry).await);
    }

    let spec = LayoutSpec {
      algorithm: params.layout,
      canvas: params.canvas,
      spacing: params.spacing,
      background_color: params.background_color.clone(),
      seed: params.seed.unwrap_or(task.id.as_u128() as u64),
      options: self.layout_options,
    };
    let plan = layout::compute(&images, &spec)?;
    if cancel.is_cancelled() {
      return Ok(self.abandon(&task, registry).await);
    }

    let rendered = tokio::select! {
      biased;
      _ = cancel.cancelled() => None,
      rendered = self.compositor.render(task_id, &plan, &params.images, params.output_format) => Some(rendered),
    };
    let Some(rendered) = rendered else {
      return Ok(self.abandon(&task, registry).await);
    };
    let artifact = rendered?;

    if cancel.is_cancelled() {
      self.discard(artifact.as_ref()).await;
      return Ok(self.abandon(&task, registry).await);
    }

    let result = TaskResult {
      plan,
      artifact: artifact.clone(),
      processing_ms: started.elapsed().as_millis() as u64,
    };
    match registry.finish(task_id, Outcome::Completed(result)).await? {
      Some(done) => {
        info!("Worker {}: task {} completed in {}ms", self.id, task_id, started.elapsed().as_millis());
        Ok(done.status)
      }
      None => {
        self.discard(artifact.as_ref()).await;
        Ok(self.abandon(&task, registry).await)
      }
    }
  }

  async fn abandon(&self, task: &Task, registry: &TaskRegistry) -> TaskStatus {
    let status = self.current_status(task.id, registry).await;
    warn!("Worker {}: abandoned task {} ({})", self.id, task.id, status);
    status
  }

  async fn current_status(&self, task_id: Uuid, registry: &TaskRegistry) -> TaskStatus {
    registry
      .get(task_id)
      .await
      .map(|task| task.status)
      .unwrap_or(TaskStatus::Cancelled)
  }

  async fn discard(&self, artifact: Option<&Artifact>) {
    let Some(artifact) = artifact else {
      return;
    };
    if let Err(err) = self.compositor.discard(artifact).await {
      warn!("Worker {}: {}", self.id, err);
    }
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  panic
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("non-string payload")
}
