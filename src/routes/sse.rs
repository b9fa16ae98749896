use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

use super::{AppState, reject, with_state};
use crate::models::TaskStatus;
use crate::registry::TaskRegistry;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct SseQuery {
  pub task_id: Uuid,
}

pub fn sse_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("sse")
    .and(warp::get())
    .and(warp::query::<SseQuery>())
    .and(with_state(state))
    .and_then(handle_sse)
}

struct Watch {
  registry: Arc<TaskRegistry>,
  task_id: Uuid,
  last: Option<TaskStatus>,
  done: bool,
  first: bool,
}

async fn handle_sse(query: SseQuery, state: AppState) -> Result<impl Reply, Rejection> {
  let registry = Arc::clone(state.dispatcher.registry());
  registry.get(query.task_id).await.map_err(reject)?;

  let watch = Watch { registry, task_id: query.task_id, last: None, done: false, first: true };
  let events = stream::unfold(watch, |mut watch| async move {
    loop {
      if watch.done {
        return None;
      }
      if !watch.first {
        tokio::time::sleep(POLL_INTERVAL).await;
      }
      watch.first = false;

      let task = match watch.registry.get(watch.task_id).await {
        Ok(task) => task,
        Err(err) => {
          watch.done = true;
          let event = Event::default().event("error").data(err.to_string());
          return Some((Ok::<_, Infallible>(event), watch));
        }
      };
      if watch.last == Some(task.status) {
        continue;
      }
      watch.last = Some(task.status);
      watch.done = task.status.is_terminal();
      let payload = json!({
        "task_id": task.id,
        "status": task.status,
        "worker": task.assigned_worker,
        "error": task.error,
      });
      let event = Event::default().event("status").data(payload.to_string());
      return Some((Ok(event), watch));
    }
  });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}
