#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ctqs::compositor::Compositor;
use ctqs::dispatcher::{Dispatcher, SelectionPolicy};
use ctqs::error::{CollageError, Result};
use ctqs::layout::{LayoutAlgorithm, LayoutPlan};
use ctqs::models::{Artifact, ImageRef, OutputFormat, Task, TaskParameters, TaskStatus, TaskType};
use ctqs::registry::TaskRegistry;
use ctqs::worker::Worker;
use uuid::Uuid;

/// Sleeps for a fixed time and tracks how many renders overlap.
#[derive(Default)]
pub struct SlowCompositor {
  pub delay: Duration,
  pub fail: bool,
  pub panics: bool,
  running: AtomicUsize,
  pub peak: AtomicUsize,
  pub started: AtomicUsize,
}

impl SlowCompositor {
  pub fn new(delay: Duration) -> Self {
    Self { delay, ..Default::default() }
  }

  pub fn failing(delay: Duration) -> Self {
    Self { delay, fail: true, ..Default::default() }
  }

  pub fn panicking(delay: Duration) -> Self {
    Self { delay, panics: true, ..Default::default() }
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Compositor for SlowCompositor {
  async fn render(
    &self,
    _task_id: Uuid,
    _plan: &LayoutPlan,
    _images: &[ImageRef],
    _format: OutputFormat,
  ) -> Result<Option<Artifact>> {
    self.started.fetch_add(1, Ordering::SeqCst);
    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.running.fetch_sub(1, Ordering::SeqCst);
    if self.panics {
      panic!("stub compositor blew up");
    }
    if self.fail {
      return Err(CollageError::Render("stub compositor refused".into()));
    }
    Ok(None)
  }
}

pub fn images(n: usize) -> Vec<ImageRef> {
  (0..n)
    .map(|i| ImageRef { image_id: format!("img-{i}"), path: None, width: 200 + i as u32, height: 150 })
    .collect()
}

pub fn grid_params(n: usize) -> TaskParameters {
  TaskParameters::new(LayoutAlgorithm::Grid, images(n)).with_canvas(800, 800)
}

pub fn workers(
  compositor: &Arc<SlowCompositor>,
  capacities: &[usize],
) -> Vec<Arc<Worker>> {
  capacities
    .iter()
    .enumerate()
    .map(|(i, &max)| {
      let compositor: Arc<dyn Compositor> = compositor.clone();
      Arc::new(Worker::new(format!("w-{i}"), [TaskType::CollageGeneration], max, compositor))
    })
    .collect()
}

pub fn dispatcher_with(
  compositor: &Arc<SlowCompositor>,
  capacities: &[usize],
  timeout: Duration,
) -> Arc<Dispatcher> {
  Dispatcher::new(
    Arc::new(TaskRegistry::default()),
    workers(compositor, capacities),
    SelectionPolicy::FirstAvailable,
    timeout,
  )
}

/// Polls the registry until the task reaches `status` or two seconds pass.
pub async fn wait_for(dispatcher: &Dispatcher, id: Uuid, status: TaskStatus) -> Task {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
  loop {
    let task = dispatcher.registry().get(id).await.unwrap();
    if task.status == status || tokio::time::Instant::now() >= deadline {
      return task;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

/// Polls until the task is terminal.
pub async fn wait_terminal(dispatcher: &Dispatcher, id: Uuid) -> Task {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  loop {
    let task = dispatcher.registry().get(id).await.unwrap();
    if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
      return task;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}
