use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::{AppState, reject, with_state};
use crate::error::{CollageError, Result};
use crate::layout::{self, LayoutSpec, Size};
use crate::models::{
  DEFAULT_BACKGROUND, DEFAULT_SPACING, ImageRef, OutputFormat, Task, TaskFilter, TaskParameters, TaskStatus, TaskType,
};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct NewTask {
  #[serde(default)]
  pub task_type: Option<String>,
  pub layout: String,
  pub images: Vec<ImageRef>,
  pub output_width: Option<u32>,
  pub output_height: Option<u32>,
  pub spacing: Option<u32>,
  pub background_color: Option<String>,
  pub seed: Option<u64>,
  pub output_format: Option<String>,
}

impl NewTask {
  pub fn into_parts(self) -> Result<(TaskType, TaskParameters)> {
    let task_type = match self.task_type.as_deref() {
      Some(raw) => raw.parse()?,
      None => TaskType::CollageGeneration,
    };
    let canvas = match (self.output_width, self.output_height) {
      (Some(width), Some(height)) => Some(Size::new(width, height)),
      (None, None) => None,
      _ => {
        return Err(CollageError::validation(
          "output_width and output_height must be given together",
        ));
      }
    };
    let output_format = match self.output_format.as_deref() {
      Some(raw) => raw.parse()?,
      None => OutputFormat::default(),
    };
    let parameters = TaskParameters {
      layout: self.layout.parse()?,
      images: self.images,
      canvas,
      spacing: self.spacing.unwrap_or(DEFAULT_SPACING),
      background_color: self.background_color.unwrap_or_else(|| DEFAULT_BACKGROUND.to_string()),
      seed: self.seed,
      output_format,
    };
    Ok((task_type, parameters))
  }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
  pub task_id: Uuid,
  pub status: TaskStatus,
  pub sse_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
  pub status: Option<String>,
  pub task_type: Option<String>,
  pub limit: Option<usize>,
  pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TaskPage {
  tasks: Vec<Task>,
  total: usize,
  limit: usize,
  offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
  pub limit: Option<usize>,
}

pub fn task_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  let submit = warp::path!("tasks")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_state(state.clone()))
    .and_then(handle_submit_task);

  let list = warp::path!("tasks")
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_state(state.clone()))
    .and_then(handle_list_tasks);

  let get = warp::path!("tasks" / Uuid)
    .and(warp::get())
    .and(with_state(state.clone()))
    .and_then(handle_get_task);

  let result = warp::path!("tasks" / Uuid / "result")
    .and(warp::get())
    .and(with_state(state.clone()))
    .and_then(handle_get_result);

  let cancel = warp::path!("tasks" / Uuid / "cancel")
    .and(warp::post())
    .and(with_state(state.clone()))
    .and_then(handle_cancel_task);

  let delete = warp::path!("tasks" / Uuid)
    .and(warp::delete())
    .and(with_state(state))
    .and_then(handle_delete_task);

  submit.or(list).or(get).or(result).or(cancel).or(delete)
}

pub fn preview_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("layout" / "preview")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_state(state))
    .and_then(handle_preview)
}

pub fn events_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("events")
    .and(warp::get())
    .and(warp::query::<EventsQuery>())
    .and(with_state(state))
    .and_then(handle_events)
}

async fn handle_submit_task(new_task: NewTask, state: AppState) -> Result<impl Reply, Rejection> {
  let (task_type, parameters) = new_task.into_parts().map_err(|e| {
    error!("Task request rejected: {}", e);
    reject(e)
  })?;
  let task = state.dispatcher.submit(task_type, parameters).await.map_err(reject)?;

  info!("Task {} submitted ({})", task.id, task.status);
  let response = TaskResponse {
    task_id: task.id,
    status: task.status,
    sse_url: format!("/api/v1/sse?task_id={}", task.id),
  };
  Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::CREATED))
}

async fn handle_list_tasks(query: ListQuery, state: AppState) -> Result<impl Reply, Rejection> {
  let filter = TaskFilter {
    status: query.status.as_deref().map(str::parse).transpose().map_err(reject)?,
    task_type: query.task_type.as_deref().map(str::parse).transpose().map_err(reject)?,
  };
  let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
  let offset = query.offset.unwrap_or(0);

  let tasks = state.dispatcher.registry().list(&filter).await;
  let total = tasks.len();
  let tasks = tasks.into_iter().skip(offset).take(limit).collect();
  Ok(warp::reply::json(&TaskPage { tasks, total, limit, offset }))
}

async fn handle_get_task(task_id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
  let task = state.dispatcher.registry().get(task_id).await.map_err(reject)?;
  Ok(warp::reply::json(&task))
}

async fn handle_get_result(task_id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
  let task = state.dispatcher.registry().get(task_id).await.map_err(reject)?;
  match (&task.result, &task.error) {
    (Some(result), _) => Ok(warp::reply::json(result)),
    (None, Some(failure)) => Err(reject(CollageError::Conflict(format!(
      "task {task_id} failed: {}",
      failure.message
    )))),
    (None, None) => Err(reject(CollageError::Conflict(format!(
      "task {task_id} has no result ({})",
      task.status
    )))),
  }
}

async fn handle_cancel_task(task_id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
  let task = state.dispatcher.cancel(task_id).await.map_err(reject)?;
  Ok(warp::reply::json(&task))
}

async fn handle_delete_task(task_id: Uuid, state: AppState) -> Result<impl Reply, Rejection> {
  state.dispatcher.registry().delete(task_id).await.map_err(reject)?;
  Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT))
}

/// Unseeded previews sample with seed 0, unlike tasks which fall back to
/// their id. Freeform plans echo the seed they used.
async fn handle_preview(request: NewTask, state: AppState) -> Result<impl Reply, Rejection> {
  let (_, parameters) = request.into_parts().map_err(reject)?;
  let spec = LayoutSpec {
    algorithm: parameters.layout,
    canvas: parameters.canvas,
    spacing: parameters.spacing,
    background_color: parameters.background_color.clone(),
    seed: parameters.seed.unwrap_or_default(),
    options: state.layout_options,
  };
  let plan = layout::compute(&parameters.image_dims(), &spec).map_err(reject)?;
  Ok(warp::reply::json(&plan))
}

async fn handle_events(query: EventsQuery, state: AppState) -> Result<impl Reply, Rejection> {
  let events = state
    .dispatcher
    .registry()
    .recent_events(query.limit.unwrap_or(DEFAULT_PAGE))
    .await;
  Ok(warp::reply::json(&events))
}
