use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::dispatcher::Dispatcher;
use crate::error::{CollageError, ErrorKind};
use crate::layout::LayoutOptions;

pub mod sse;
pub mod tasks;
pub mod workers;

/// Everything the handlers need, cloned into each request.
#[derive(Clone)]
pub struct AppState {
  pub dispatcher: Arc<Dispatcher>,
  pub layout_options: LayoutOptions,
}

#[derive(Debug)]
pub struct ApiError(pub CollageError);

impl warp::reject::Reject for ApiError {}

pub(crate) fn reject(err: CollageError) -> Rejection {
  warp::reject::custom(ApiError(err))
}

#[derive(Serialize)]
struct ErrorBody {
  kind: ErrorKind,
  message: String,
}

pub fn routes(
  dispatcher: Arc<Dispatcher>,
  layout_options: LayoutOptions,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  let state = AppState { dispatcher, layout_options };
  let api = warp::path("api").and(warp::path("v1")).and(
    tasks::task_routes(state.clone())
      .or(workers::worker_routes(state.clone()))
      .or(tasks::preview_route(state.clone()))
      .or(tasks::events_route(state.clone()))
      .or(health_route())
      .or(sse::sse_route(state)),
  );
  api.recover(handle_rejection)
}

pub(crate) fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
  warp::any().map(move || state.clone())
}

fn health_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path("health")
    .and(warp::path::end())
    .and(warp::get())
    .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })))
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::Conflict | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
    ErrorKind::RenderError | ErrorKind::Timeout | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
  let (status, body) = if let Some(ApiError(err)) = rejection.find::<ApiError>() {
    let kind = err.kind();
    let status = status_for(kind);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      error!("Request failed: {}", err);
    }
    (status, ErrorBody { kind, message: err.to_string() })
  } else if rejection.is_not_found() {
    (
      StatusCode::NOT_FOUND,
      ErrorBody { kind: ErrorKind::NotFound, message: "route not found".into() },
    )
  } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
    (
      StatusCode::BAD_REQUEST,
      ErrorBody { kind: ErrorKind::ValidationError, message: err.to_string() },
    )
  } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
    (
      StatusCode::BAD_REQUEST,
      ErrorBody { kind: ErrorKind::ValidationError, message: err.to_string() },
    )
  } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
    (
      StatusCode::METHOD_NOT_ALLOWED,
      ErrorBody { kind: ErrorKind::NotFound, message: "method not allowed".into() },
    )
  } else {
    error!("Unhandled rejection: {:?}", rejection);
    (
      StatusCode::INTERNAL_SERVER_ERROR,
      ErrorBody { kind: ErrorKind::InternalError, message: "unhandled request error".into() },
    )
  };

  Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
