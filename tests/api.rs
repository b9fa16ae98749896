mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SlowCompositor, dispatcher_with, wait_terminal};
use ctqs::dispatcher::Dispatcher;
use ctqs::layout::{LayoutOptions, LayoutPlan};
use ctqs::models::{Task, TaskStatus, TaskType, WorkerStatus};
use ctqs::routes::routes;
use ctqs::routes::tasks::TaskResponse;
use serde_json::{Value, json};
use warp::http::StatusCode;

fn setup(delay: Duration) -> Arc<Dispatcher> {
  let compositor = Arc::new(SlowCompositor::new(delay));
  dispatcher_with(&compositor, &[1], Duration::from_secs(60))
}

fn body(n: usize) -> Value {
  let images: Vec<Value> = (0..n)
    .map(|i| json!({"image_id": format!("img-{i}"), "width": 300, "height": 200}))
    .collect();
  json!({
    "layout": "grid",
    "images": images,
    "output_width": 800,
    "output_height": 600,
    "spacing": 10,
    "background_color": "#FFFFFF"
  })
}

#[tokio::test]
async fn submit_then_fetch_result() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());

  let res = warp::test::request()
    .method("POST")
    .path("/api/v1/tasks")
    .json(&body(4))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::CREATED);
  let created: TaskResponse = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(created.sse_url, format!("/api/v1/sse?task_id={}", created.task_id));

  wait_terminal(&dispatcher, created.task_id).await;
  let res = warp::test::request()
    .path(&format!("/api/v1/tasks/{}/result", created.task_id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  let result: Value = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(result["plan"]["placements"].as_array().unwrap().len(), 4);
  assert_eq!(result["plan"]["canvas"], json!({"width": 800, "height": 600}));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());

  let mut unknown = body(2);
  unknown["layout"] = json!("spiral");
  let res = warp::test::request().method("POST").path("/api/v1/tasks").json(&unknown).reply(&api).await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  let err: Value = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(err["kind"], "validation_error");

  let res = warp::test::request().method("POST").path("/api/v1/tasks").json(&body(0)).reply(&api).await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);

  let res = warp::test::request()
    .method("POST")
    .path("/api/v1/tasks")
    .body("{not json")
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  assert!(dispatcher.registry().list(&Default::default()).await.is_empty());
}

#[tokio::test]
async fn unknown_task_is_404() {
  let api = routes(setup(Duration::from_millis(5)), LayoutOptions::default());
  let res = warp::test::request()
    .path(&format!("/api/v1/tasks/{}", uuid::Uuid::new_v4()))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
  let err: Value = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(err["kind"], "not_found");
}

#[tokio::test]
async fn cancel_delete_and_conflicts() {
  let dispatcher = setup(Duration::from_millis(200));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());

  let running = dispatcher.submit(TaskType::CollageGeneration, common::grid_params(1)).await.unwrap();
  let queued = dispatcher.submit(TaskType::CollageGeneration, common::grid_params(1)).await.unwrap();
  assert_eq!(queued.status, TaskStatus::Queued);

  let res = warp::test::request()
    .method("DELETE")
    .path(&format!("/api/v1/tasks/{}", running.id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::CONFLICT);

  let res = warp::test::request()
    .path(&format!("/api/v1/tasks/{}/result", queued.id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::CONFLICT);

  let res = warp::test::request()
    .method("POST")
    .path(&format!("/api/v1/tasks/{}/cancel", queued.id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::OK);
  let task: Task = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(task.status, TaskStatus::Cancelled);

  let res = warp::test::request()
    .method("POST")
    .path(&format!("/api/v1/tasks/{}/cancel", queued.id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::CONFLICT);

  let res = warp::test::request()
    .method("DELETE")
    .path(&format!("/api/v1/tasks/{}", queued.id))
    .reply(&api)
    .await;
  assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn list_filters_by_status() {
  let dispatcher = setup(Duration::from_millis(300));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());
  for _ in 0..3 {
    dispatcher.submit(TaskType::CollageGeneration, common::grid_params(2)).await.unwrap();
  }

  let res = warp::test::request().path("/api/v1/tasks?status=queued").reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);
  let page: Value = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(page["total"], 2);

  let res = warp::test::request().path("/api/v1/tasks?limit=1&offset=1").reply(&api).await;
  let page: Value = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(page["total"], 3);
  assert_eq!(page["tasks"].as_array().unwrap().len(), 1);

  let res = warp::test::request().path("/api/v1/tasks?status=bogus").reply(&api).await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn worker_drain_and_resume() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());

  let res = warp::test::request().method("POST").path("/api/v1/workers/w-0/drain").reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);
  let status: WorkerStatus = serde_json::from_slice(res.body()).unwrap();
  assert!(status.draining);

  let res = warp::test::request().path("/api/v1/workers").reply(&api).await;
  let workers: Vec<WorkerStatus> = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(workers.len(), 1);
  assert!(!workers[0].available);

  let res = warp::test::request().method("POST").path("/api/v1/workers/w-0/resume").reply(&api).await;
  let status: WorkerStatus = serde_json::from_slice(res.body()).unwrap();
  assert!(!status.draining);

  let res = warp::test::request().method("POST").path("/api/v1/workers/ghost/drain").reply(&api).await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preview_computes_plan_without_a_task() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());
  let mut request = body(3);
  request["layout"] = json!("freeform");
  request["seed"] = json!(11);

  let first = warp::test::request().method("POST").path("/api/v1/layout/preview").json(&request).reply(&api).await;
  let second = warp::test::request().method("POST").path("/api/v1/layout/preview").json(&request).reply(&api).await;
  assert_eq!(first.status(), StatusCode::OK);
  let plan: LayoutPlan = serde_json::from_slice(first.body()).unwrap();
  assert_eq!(plan.seed, Some(11));
  assert_eq!(first.body(), second.body());
  assert!(dispatcher.registry().list(&Default::default()).await.is_empty());
}

#[tokio::test]
async fn unseeded_preview_reports_seed_zero() {
  let api = routes(setup(Duration::from_millis(5)), LayoutOptions::default());
  let mut request = body(3);
  request["layout"] = json!("freeform");

  let res = warp::test::request().method("POST").path("/api/v1/layout/preview").json(&request).reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);
  let plan: LayoutPlan = serde_json::from_slice(res.body()).unwrap();
  assert_eq!(plan.seed, Some(0));

  request["seed"] = json!(0);
  let seeded = warp::test::request().method("POST").path("/api/v1/layout/preview").json(&request).reply(&api).await;
  assert_eq!(res.body(), seeded.body());
}

#[tokio::test]
async fn health_and_events() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());
  let task = dispatcher.submit(TaskType::CollageGeneration, common::grid_params(1)).await.unwrap();
  wait_terminal(&dispatcher, task.id).await;

  let res = warp::test::request().path("/api/v1/health").reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);

  let res = warp::test::request().path("/api/v1/events?limit=10").reply(&api).await;
  let events: Vec<Value> = serde_json::from_slice(res.body()).unwrap();
  let statuses: Vec<_> = events.iter().map(|e| e["status"].as_str().unwrap().to_string()).collect();
  assert_eq!(statuses, ["pending", "queued", "processing", "completed"]);
}

#[tokio::test]
async fn served_over_http() {
  let dispatcher = setup(Duration::from_millis(5));
  let api = routes(Arc::clone(&dispatcher), LayoutOptions::default());
  let (addr, server) = warp::serve(api).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);

  let client = reqwest::Client::new();
  let created: TaskResponse = client
    .post(format!("http://{addr}/api/v1/tasks"))
    .json(&body(2))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  wait_terminal(&dispatcher, created.task_id).await;

  let task: Task = client
    .get(format!("http://{addr}/api/v1/tasks/{}", created.task_id))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(task.status, TaskStatus::Completed);
  assert_eq!(task.result.unwrap().plan.placements.len(), 2);
}
