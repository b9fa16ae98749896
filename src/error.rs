use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::TaskStatus;

pub type Result<T, E = CollageError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollageError {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("invalid transition for task {id}: {from} -> {to}")]
  InvalidTransition { id: Uuid, from: TaskStatus, to: TaskStatus },

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("render failed: {0}")]
  Render(String),

  #[error("processing exceeded the {limit_ms}ms ceiling")]
  Timeout { limit_ms: u64 },

  #[error("internal error: {0}")]
  Internal(String),
}

impl CollageError {
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub fn task_not_found(id: Uuid) -> Self {
    Self::NotFound { entity: "task", id: id.to_string() }
  }

  pub fn worker_not_found(id: &str) -> Self {
    Self::NotFound { entity: "worker", id: id.to_string() }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::ValidationError,
      Self::NotFound { .. } => ErrorKind::NotFound,
      Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
      Self::Conflict(_) => ErrorKind::Conflict,
      Self::Render(_) => ErrorKind::RenderError,
      Self::Timeout { .. } => ErrorKind::Timeout,
      Self::Internal(_) => ErrorKind::InternalError,
    }
  }
}

/// Serializable error taxonomy. Failed tasks only ever carry
/// `ValidationError`, `RenderError`, `Timeout` or `InternalError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  ValidationError,
  RenderError,
  Timeout,
  InternalError,
  InvalidTransition,
  NotFound,
  Conflict,
}
