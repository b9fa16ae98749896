use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CollageError, ErrorKind};
use crate::layout::{ImageDims, LayoutAlgorithm, LayoutPlan, Size};

/// Which capability a task needs from a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  CollageGeneration,
}

impl TaskType {
  pub fn as_str(self) -> &'static str {
    match self {
      TaskType::CollageGeneration => "collage_generation",
    }
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskType {
  type Err = CollageError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "collage_generation" | "collage" => Ok(TaskType::CollageGeneration),
      other => Err(CollageError::validation(format!("unsupported task type '{other}'"))),
    }
  }
}

/// Lifecycle: pending -> queued -> processing -> {completed, failed, cancelled}.
/// Pending and queued tasks may also be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Queued,
  Processing,
  Completed,
  Failed,
  Cancelled,
}

impl TaskStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::Queued => "queued",
      TaskStatus::Processing => "processing",
      TaskStatus::Completed => "completed",
      TaskStatus::Failed => "failed",
      TaskStatus::Cancelled => "cancelled",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
  }

  pub fn can_transition_to(self, next: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
      (self, next),
      (Pending, Queued)
        | (Pending, Cancelled)
        | (Queued, Processing)
        | (Queued, Cancelled)
        | (Processing, Completed)
        | (Processing, Failed)
        | (Processing, Cancelled)
    )
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = CollageError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "pending" => Ok(TaskStatus::Pending),
      "queued" => Ok(TaskStatus::Queued),
      "processing" => Ok(TaskStatus::Processing),
      "completed" => Ok(TaskStatus::Completed),
      "failed" => Ok(TaskStatus::Failed),
      "cancelled" => Ok(TaskStatus::Cancelled),
      other => Err(CollageError::validation(format!("unknown task status '{other}'"))),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
  #[default]
  Jpeg,
  Png,
  Webp,
}

impl OutputFormat {
  pub fn extension(self) -> &'static str {
    match self {
      OutputFormat::Jpeg => "jpg",
      OutputFormat::Png => "png",
      OutputFormat::Webp => "webp",
    }
  }

  pub fn media_type(self) -> &'static str {
    match self {
      OutputFormat::Jpeg => "image/jpeg",
      OutputFormat::Png => "image/png",
      OutputFormat::Webp => "image/webp",
    }
  }
}

impl FromStr for OutputFormat {
  type Err = CollageError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
      "png" => Ok(OutputFormat::Png),
      "webp" => Ok(OutputFormat::Webp),
      other => Err(CollageError::validation(format!("unsupported output format '{other}'"))),
    }
  }
}

/// An uploaded image as handed over by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
  pub image_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
  pub width: u32,
  pub height: u32,
}

impl ImageRef {
  pub fn dims(&self) -> ImageDims {
    ImageDims::new(self.image_id.clone(), self.width, self.height)
  }
}

pub const DEFAULT_SPACING: u32 = 10;
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

fn default_spacing() -> u32 {
  DEFAULT_SPACING
}

fn default_background() -> String {
  DEFAULT_BACKGROUND.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParameters {
  pub layout: LayoutAlgorithm,
  pub images: Vec<ImageRef>,
  /// `None` lets the layout engine size the canvas.
  #[serde(default)]
  pub canvas: Option<Size>,
  #[serde(default = "default_spacing")]
  pub spacing: u32,
  #[serde(default = "default_background")]
  pub background_color: String,
  #[serde(default)]
  pub seed: Option<u64>,
  #[serde(default)]
  pub output_format: OutputFormat,
}

impl TaskParameters {
  pub fn new(layout: LayoutAlgorithm, images: Vec<ImageRef>) -> Self {
    Self {
      layout,
      images,
      canvas: None,
      spacing: DEFAULT_SPACING,
      background_color: default_background(),
      seed: None,
      output_format: OutputFormat::default(),
    }
  }

  pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
    self.canvas = Some(Size::new(width, height));
    self
  }

  pub fn with_spacing(mut self, spacing: u32) -> Self {
    self.spacing = spacing;
    self
  }

  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }

  pub fn image_dims(&self) -> Vec<ImageDims> {
    self.images.iter().map(ImageRef::dims).collect()
  }
}

/// Reference to a rendered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub path: PathBuf,
  pub media_type: String,
  pub width: u32,
  pub height: u32,
  pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
  pub plan: LayoutPlan,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifact: Option<Artifact>,
  pub processing_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
  pub kind: ErrorKind,
  pub message: String,
}

impl From<&CollageError> for TaskError {
  fn from(err: &CollageError) -> Self {
    let kind = match err.kind() {
      kind @ (ErrorKind::ValidationError | ErrorKind::RenderError | ErrorKind::Timeout) => kind,
      _ => ErrorKind::InternalError,
    };
    Self { kind, message: err.to_string() }
  }
}

/// Terminal payload handed to the registry alongside a status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Completed(TaskResult),
  Failed(TaskError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: Uuid,
  pub task_type: TaskType,
  pub status: TaskStatus,
  pub parameters: TaskParameters,
  pub result: Option<TaskResult>,
  pub error: Option<TaskError>,
  pub assigned_worker: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
  pub fn new(task_type: TaskType, parameters: TaskParameters) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      task_type,
      status: TaskStatus::Pending,
      parameters,
      result: None,
      error: None,
      assigned_worker: None,
      created_at: now,
      updated_at: now,
      started_at: None,
      finished_at: None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
  pub status: Option<TaskStatus>,
  pub task_type: Option<TaskType>,
}

impl TaskFilter {
  pub fn with_status(status: TaskStatus) -> Self {
    Self { status: Some(status), task_type: None }
  }

  pub fn matches(&self, task: &Task) -> bool {
    self.status.is_none_or(|status| task.status == status)
      && self.task_type.is_none_or(|task_type| task.task_type == task_type)
  }
}

/// One entry of the registry's lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
  pub sequence: u64,
  pub task_id: Uuid,
  pub status: TaskStatus,
  pub worker: Option<String>,
  pub message: String,
  pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
  pub id: String,
  pub capabilities: Vec<TaskType>,
  pub active_count: usize,
  pub max_concurrent: usize,
  pub available: bool,
  pub draining: bool,
  pub completed: u64,
  pub failed: u64,
  pub cancelled: u64,
  pub average_processing_ms: f64,
}
