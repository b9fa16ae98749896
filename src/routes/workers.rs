use tracing::info;
use warp::{Filter, Rejection, Reply};

use super::{AppState, reject, with_state};

pub fn worker_routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  let list = warp::path!("workers")
    .and(warp::get())
    .and(with_state(state.clone()))
    .and_then(handle_list_workers);

  let drain = warp::path!("workers" / String / "drain")
    .and(warp::post())
    .and(with_state(state.clone()))
    .and_then(|worker_id: String, state: AppState| handle_set_draining(worker_id, true, state));

  let resume = warp::path!("workers" / String / "resume")
    .and(warp::post())
    .and(with_state(state))
    .and_then(|worker_id: String, state: AppState| handle_set_draining(worker_id, false, state));

  list.or(drain).or(resume)
}

async fn handle_list_workers(state: AppState) -> Result<impl Reply, Rejection> {
  Ok(warp::reply::json(&state.dispatcher.workers()))
}

async fn handle_set_draining(worker_id: String, draining: bool, state: AppState) -> Result<impl Reply, Rejection> {
  let status = state
    .dispatcher
    .set_draining(&worker_id, draining)
    .await
    .map_err(reject)?;
  info!("Worker {} {} via API", worker_id, if draining { "drained" } else { "resumed" });
  Ok(warp::reply::json(&status))
}
