//! Authoritative in-memory store of tasks and their lifecycle.
//!
//! Every mutation happens under one write lock, so a reader never sees a
//! half-applied transition. Listings are cloned snapshots in creation order.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{CollageError, Result};
use crate::layout::{self, LayoutOptions};
use crate::models::{Outcome, Task, TaskEvent, TaskFilter, TaskParameters, TaskStatus, TaskType};

struct Entry {
  sequence: u64,
  task: Task,
  cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
  tasks: HashMap<Uuid, Entry>,
  order: BTreeMap<u64, Uuid>,
  next_sequence: u64,
  events: VecDeque<TaskEvent>,
  next_event: u64,
}

impl RegistryState {
  fn record(&mut self, capacity: usize, task: &Task, message: String) {
    if capacity == 0 {
      return;
    }
    self.next_event += 1;
    self.events.push_back(TaskEvent {
      sequence: self.next_event,
      task_id: task.id,
      status: task.status,
      worker: task.assigned_worker.clone(),
      message,
      at: task.updated_at,
    });
    while self.events.len() > capacity {
      self.events.pop_front();
    }
  }
}

pub struct TaskRegistry {
  state: RwLock<RegistryState>,
  event_capacity: usize,
  layout_options: LayoutOptions,
}

impl Default for TaskRegistry {
  fn default() -> Self {
    Self::new(200)
  }
}

impl TaskRegistry {
  pub fn new(event_capacity: usize) -> Self {
    Self {
      state: RwLock::new(RegistryState::default()),
      event_capacity,
      layout_options: LayoutOptions::default(),
    }
  }

  /// Tuning used for the feasibility check at creation. Should match the
  /// options the workers lay tasks out with.
  pub fn with_layout_options(mut self, layout_options: LayoutOptions) -> Self {
    self.layout_options = layout_options;
    self
  }

  /// Registers a new pending task. Malformed parameters create nothing.
  pub async fn create(&self, task_type: TaskType, parameters: TaskParameters) -> Result<Task> {
    let images = parameters.image_dims();
    layout::validate_inputs(&images, parameters.canvas, parameters.spacing, &parameters.background_color)?;
    layout::check_feasible(
      &images,
      parameters.canvas,
      parameters.spacing,
      parameters.layout,
      &self.layout_options,
    )?;

    let task = Task::new(task_type, parameters);
    let mut state = self.state.write().await;
    state.next_sequence += 1;
    let sequence = state.next_sequence;
    state.order.insert(sequence, task.id);
    state.tasks.insert(
      task.id,
      Entry { sequence, task: task.clone(), cancel: CancellationToken::new() },
    );
    let message = format!(
      "created {} task with {} images ({})",
      task.task_type,
      task.parameters.images.len(),
      task.parameters.layout
    );
    state.record(self.event_capacity, &task, message);
    info!("Task {} created ({} layout, {} images)", task.id, task.parameters.layout, task.parameters.images.len());
    Ok(task)
  }

  pub async fn get(&self, id: Uuid) -> Result<Task> {
    let state = self.state.read().await;
    state
      .tasks
      .get(&id)
      .map(|entry| entry.task.clone())
      .ok_or_else(|| CollageError::task_not_found(id))
  }

  /// Moves a task forward. Backward or skipping moves are contract
  /// violations and fail with `InvalidTransition`.
  pub async fn update_status(&self, id: Uuid, status: TaskStatus, outcome: Option<Outcome>) -> Result<Task> {
    let mut state = self.state.write().await;
    self.apply(&mut state, id, status, outcome, None)
  }

  /// queued -> processing, recording the responsible worker.
  pub async fn start(&self, id: Uuid, worker_id: &str) -> Result<Task> {
    let mut state = self.state.write().await;
    self.apply(&mut state, id, TaskStatus::Processing, None, Some(worker_id))
  }

  /// Records the terminal outcome of a processing task. Returns `Ok(None)`
  /// when the task already became terminal elsewhere (cancelled or timed
  /// out while the outcome was being produced).
  pub async fn finish(&self, id: Uuid, outcome: Outcome) -> Result<Option<Task>> {
    let mut state = self.state.write().await;
    let current = state
      .tasks
      .get(&id)
      .map(|entry| entry.task.status)
      .ok_or_else(|| CollageError::task_not_found(id))?;
    if current.is_terminal() {
      debug!("Task {} already {}, dropping late outcome", id, current);
      return Ok(None);
    }
    let status = match &outcome {
      Outcome::Completed(_) => TaskStatus::Completed,
      Outcome::Failed(_) => TaskStatus::Failed,
    };
    self.apply(&mut state, id, status, Some(outcome), None).map(Some)
  }

  pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
    let state = self.state.read().await;
    state
      .order
      .values()
      .filter_map(|id| state.tasks.get(id))
      .map(|entry| &entry.task)
      .filter(|task| filter.matches(task))
      .cloned()
      .collect()
  }

  /// Cancels a non-terminal task. For a processing task this only raises the
  /// cancellation flag; the worker notices it at its next checkpoint.
  pub async fn cancel(&self, id: Uuid) -> Result<Task> {
    let mut state = self.state.write().await;
    self.apply(&mut state, id, TaskStatus::Cancelled, None, None)
  }

  /// Removes a terminal task.
  pub async fn delete(&self, id: Uuid) -> Result<Task> {
    let mut state = self.state.write().await;
    let status = state
      .tasks
      .get(&id)
      .map(|entry| entry.task.status)
      .ok_or_else(|| CollageError::task_not_found(id))?;
    if !status.is_terminal() {
      return Err(CollageError::Conflict(format!("task {id} is still {status}")));
    }
    let entry = state
      .tasks
      .remove(&id)
      .ok_or_else(|| CollageError::task_not_found(id))?;
    state.order.remove(&entry.sequence);
    info!("Task {} deleted", id);
    Ok(entry.task)
  }

  /// Flag polled by the worker at its checkpoints. Fires on cancellation and
  /// on any other terminal transition.
  pub async fn cancellation_token(&self, id: Uuid) -> Result<CancellationToken> {
    let state = self.state.read().await;
    state
      .tasks
      .get(&id)
      .map(|entry| entry.cancel.clone())
      .ok_or_else(|| CollageError::task_not_found(id))
  }

  /// Processing tasks that started more than `ceiling` before `now`.
  pub async fn overdue(&self, ceiling: Duration, now: DateTime<Utc>) -> Vec<Uuid> {
    let state = self.state.read().await;
    state
      .order
      .values()
      .filter_map(|id| state.tasks.get(id))
      .filter(|entry| entry.task.status == TaskStatus::Processing)
      .filter(|entry| {
        entry
          .task
          .started_at
          .and_then(|started| (now - started).to_std().ok())
          .is_some_and(|elapsed| elapsed > ceiling)
      })
      .map(|entry| entry.task.id)
      .collect()
  }

  /// Most recent lifecycle events, oldest first.
  pub async fn recent_events(&self, limit: usize) -> Vec<TaskEvent> {
    let state = self.state.read().await;
    let skip = state.events.len().saturating_sub(limit);
    state.events.iter().skip(skip).cloned().collect()
  }

  pub async fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
    let state = self.state.read().await;
    let mut counts = BTreeMap::new();
    for entry in state.tasks.values() {
      *counts.entry(entry.task.status).or_insert(0) += 1;
    }
    counts
  }

  fn apply(
    &self,
    state: &mut RegistryState,
    id: Uuid,
    status: TaskStatus,
    outcome: Option<Outcome>,
    worker_id: Option<&str>,
  ) -> Result<Task> {
    let entry = state
      .tasks
      .get_mut(&id)
      .ok_or_else(|| CollageError::task_not_found(id))?;
    let from = entry.task.status;
    if !from.can_transition_to(status) {
      error!("Rejected transition for task {}: {} -> {}", id, from, status);
      return Err(CollageError::InvalidTransition { id, from, to: status });
    }

    let (result, failure) = match (status, outcome) {
      (TaskStatus::Completed, Some(Outcome::Completed(result))) => (Some(result), None),
      (TaskStatus::Failed, Some(Outcome::Failed(failure))) => (None, Some(failure)),
      (TaskStatus::Completed | TaskStatus::Failed, _) | (_, Some(_)) => {
        error!("Task {} outcome does not match target status {}", id, status);
        return Err(CollageError::Internal(format!(
          "outcome for task {id} does not match status {status}"
        )));
      }
      (_, None) => (None, None),
    };

    let now = Utc::now();
    let task = &mut entry.task;
    task.status = status;
    task.updated_at = now;
    task.result = result;
    task.error = failure;
    if status == TaskStatus::Processing {
      task.started_at = Some(now);
      if let Some(worker_id) = worker_id {
        task.assigned_worker = Some(worker_id.to_string());
      }
    }
    if status.is_terminal() {
      task.finished_at = Some(now);
      entry.cancel.cancel();
    }

    let task = task.clone();
    let message = match (&task.error, &task.assigned_worker) {
      (Some(failure), _) => format!("{from} -> {status}: {}", failure.message),
      (None, Some(worker)) if status == TaskStatus::Processing => format!("{from} -> {status} on {worker}"),
      _ => format!("{from} -> {status}"),
    };
    state.record(self.event_capacity, &task, message);
    debug!("Task {} moved {} -> {}", id, from, status);
    Ok(task)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::layout::{LayoutAlgorithm, LayoutPlan, Size};
  use crate::models::{ImageRef, TaskError, TaskResult};

  fn params(n: usize) -> TaskParameters {
    let images = (0..n)
      .map(|i| ImageRef { image_id: format!("img-{i}"), path: None, width: 100, height: 100 })
      .collect();
    TaskParameters::new(LayoutAlgorithm::Grid, images).with_canvas(400, 400)
  }

  fn result() -> TaskResult {
    TaskResult {
      plan: LayoutPlan {
        algorithm: LayoutAlgorithm::Grid,
        canvas: Size::new(400, 400),
        spacing: 0,
        background_color: "#FFFFFF".into(),
        placements: vec![],
        seed: None,
      },
      artifact: None,
      processing_ms: 1,
    }
  }

  async fn processing(registry: &TaskRegistry) -> Task {
    let task = registry.create(TaskType::CollageGeneration, params(2)).await.unwrap();
    registry.update_status(task.id, TaskStatus::Queued, None).await.unwrap();
    registry.start(task.id, "w-1").await.unwrap()
  }

  #[tokio::test]
  async fn create_starts_pending() {
    let registry = TaskRegistry::default();
    let task = registry.create(TaskType::CollageGeneration, params(4)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(registry.get(task.id).await.unwrap(), task);
  }

  #[tokio::test]
  async fn create_rejects_empty_image_list() {
    let registry = TaskRegistry::default();
    let err = registry.create(TaskType::CollageGeneration, params(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(registry.list(&TaskFilter::default()).await.is_empty());
  }

  #[tokio::test]
  async fn create_rejects_spacing_that_leaves_no_room() {
    let registry = TaskRegistry::default();
    let cramped = params(4).with_canvas(30, 30).with_spacing(10);
    let err = registry.create(TaskType::CollageGeneration, cramped).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(err.to_string().contains("no room"), "{err}");
    assert!(registry.list(&TaskFilter::default()).await.is_empty());
    assert!(registry.recent_events(10).await.is_empty());
  }

  #[tokio::test]
  async fn create_checks_mosaic_against_configured_tiles() {
    let registry =
      TaskRegistry::default().with_layout_options(LayoutOptions { mosaic_tile_divisor: 1, ..Default::default() });
    let mut mosaic = params(4);
    mosaic.layout = LayoutAlgorithm::Mosaic;
    let err = registry.create(TaskType::CollageGeneration, mosaic.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(TaskRegistry::default().create(TaskType::CollageGeneration, mosaic).await.is_ok());
  }

  #[tokio::test]
  async fn get_unknown_is_not_found() {
    let registry = TaskRegistry::default();
    let err = registry.get(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
  }

  #[tokio::test]
  async fn backward_and_skipping_moves_fail() {
    let registry = TaskRegistry::default();
    let task = registry.create(TaskType::CollageGeneration, params(1)).await.unwrap();
    let err = registry.update_status(task.id, TaskStatus::Processing, None).await.unwrap_err();
    assert!(matches!(err, CollageError::InvalidTransition { from: TaskStatus::Pending, .. }));

    registry.update_status(task.id, TaskStatus::Queued, None).await.unwrap();
    let err = registry.update_status(task.id, TaskStatus::Pending, None).await.unwrap_err();
    assert!(matches!(err, CollageError::InvalidTransition { to: TaskStatus::Pending, .. }));
    assert_eq!(registry.get(task.id).await.unwrap().status, TaskStatus::Queued);
  }

  #[tokio::test]
  async fn completion_requires_a_result() {
    let registry = TaskRegistry::default();
    let task = processing(&registry).await;
    assert!(registry.update_status(task.id, TaskStatus::Completed, None).await.is_err());
    let done = registry
      .update_status(task.id, TaskStatus::Completed, Some(Outcome::Completed(result())))
      .await
      .unwrap();
    assert!(done.result.is_some() && done.error.is_none());
    assert!(done.finished_at.is_some());
    assert_eq!(done.assigned_worker.as_deref(), Some("w-1"));
  }

  #[tokio::test]
  async fn terminal_tasks_cannot_be_cancelled() {
    let registry = TaskRegistry::default();
    let task = processing(&registry).await;
    let failure = TaskError { kind: ErrorKind::RenderError, message: "boom".into() };
    registry.finish(task.id, Outcome::Failed(failure)).await.unwrap();
    let err = registry.cancel(task.id).await.unwrap_err();
    assert!(matches!(err, CollageError::InvalidTransition { from: TaskStatus::Failed, .. }));
  }

  #[tokio::test]
  async fn cancel_raises_the_flag() {
    let registry = TaskRegistry::default();
    let task = processing(&registry).await;
    let token = registry.cancellation_token(task.id).await.unwrap();
    assert!(!token.is_cancelled());
    let cancelled = registry.cancel(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(token.is_cancelled());
  }

  #[tokio::test]
  async fn late_outcome_after_cancel_is_dropped() {
    let registry = TaskRegistry::default();
    let task = processing(&registry).await;
    registry.cancel(task.id).await.unwrap();
    let late = registry.finish(task.id, Outcome::Completed(result())).await.unwrap();
    assert!(late.is_none());
    let stored = registry.get(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert!(stored.result.is_none());
  }

  #[tokio::test]
  async fn list_keeps_creation_order_and_filters() {
    let registry = TaskRegistry::default();
    let mut ids = Vec::new();
    for n in 1..=4 {
      ids.push(registry.create(TaskType::CollageGeneration, params(n)).await.unwrap().id);
    }
    registry.update_status(ids[1], TaskStatus::Queued, None).await.unwrap();
    let listed: Vec<_> = registry.list(&TaskFilter::default()).await.into_iter().map(|t| t.id).collect();
    assert_eq!(listed, ids);
    let queued = registry.list(&TaskFilter::with_status(TaskStatus::Queued)).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, ids[1]);
  }

  #[tokio::test]
  async fn delete_only_terminal() {
    let registry = TaskRegistry::default();
    let task = registry.create(TaskType::CollageGeneration, params(1)).await.unwrap();
    assert_eq!(registry.delete(task.id).await.unwrap_err().kind(), ErrorKind::Conflict);
    registry.cancel(task.id).await.unwrap();
    registry.delete(task.id).await.unwrap();
    assert_eq!(registry.get(task.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(registry.list(&TaskFilter::default()).await.is_empty());
  }

  #[tokio::test]
  async fn overdue_only_reports_processing() {
    let registry = TaskRegistry::default();
    let task = processing(&registry).await;
    let idle = registry.create(TaskType::CollageGeneration, params(1)).await.unwrap();
    let later = Utc::now() + chrono::Duration::seconds(10);
    let overdue = registry.overdue(Duration::from_secs(5), later).await;
    assert_eq!(overdue, vec![task.id]);
    assert!(!overdue.contains(&idle.id));
    assert!(registry.overdue(Duration::from_secs(60), later).await.is_empty());
  }

  #[tokio::test]
  async fn event_log_is_bounded() {
    let registry = TaskRegistry::new(3);
    let task = processing(&registry).await;
    registry.cancel(task.id).await.unwrap();
    let events = registry.recent_events(10).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().unwrap().status, TaskStatus::Cancelled);
    assert_eq!(registry.recent_events(1).await.len(), 1);
  }
}
