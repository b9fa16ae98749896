//! Overview (workers and active tasks)
//! Queue (next queued tasks)
//! Logs (recent lifecycle events)

use std::{
  env,
  error::Error,
  io, thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ctqs::models::{Task, TaskEvent, WorkerStatus};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
};

const QUEUE_PREVIEW: usize = 5;
const LOG_LINES: usize = 20;

#[derive(Deserialize)]
struct TaskPage {
  tasks: Vec<Task>,
  total: usize,
}

#[derive(Clone, Copy)]
enum DashboardTab {
  Overview,
  Queue,
  Logs,
}

struct App {
  current_tab: DashboardTab,
  workers: Vec<WorkerStatus>,
  active_tasks: Vec<Task>,
  queued_tasks: Vec<Task>,
  queued_total: usize,
  events: Vec<TaskEvent>,
  last_error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Overview,
      workers: vec![],
      active_tasks: vec![],
      queued_tasks: vec![],
      queued_total: 0,
      events: vec![],
      last_error: None,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Queue,
      DashboardTab::Queue => DashboardTab::Logs,
      DashboardTab::Logs => DashboardTab::Overview,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Logs,
      DashboardTab::Queue => DashboardTab::Overview,
      DashboardTab::Logs => DashboardTab::Queue,
    }
  }

  /// Keeps the selected tab when a fresh snapshot arrives.
  fn absorb(&mut self, snapshot: App) {
    let tab = self.current_tab;
    *self = snapshot;
    self.current_tab = tab;
  }
}

async fn get_json<T: for<'de> Deserialize<'de>>(client: &reqwest::Client, url: String) -> anyhow::Result<T> {
  let response = client
    .get(&url)
    .send()
    .await
    .with_context(|| format!("GET {url}"))?
    .error_for_status()?;
  Ok(response.json().await?)
}

async fn fetch_state(client: &reqwest::Client, base: &str) -> anyhow::Result<App> {
  let (workers, active, queued, events) = futures::try_join!(
    get_json::<Vec<WorkerStatus>>(client, format!("{base}/api/v1/workers")),
    get_json::<TaskPage>(client, format!("{base}/api/v1/tasks?status=processing")),
    get_json::<TaskPage>(client, format!("{base}/api/v1/tasks?status=queued&limit={QUEUE_PREVIEW}")),
    get_json::<Vec<TaskEvent>>(client, format!("{base}/api/v1/events?limit={LOG_LINES}")),
  )?;

  let mut app = App::new();
  app.workers = workers;
  app.active_tasks = active.tasks;
  app.queued_tasks = queued.tasks;
  app.queued_total = queued.total;
  app.events = events.into_iter().rev().collect();
  Ok(app)
}

fn main() -> Result<(), Box<dyn Error>> {
  let base = env::var("DASHBOARD_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".into());

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let (tx, rx) = std::sync::mpsc::channel::<App>();

  let rt_bg = Runtime::new()?;
  thread::spawn(move || {
    let client = reqwest::Client::new();
    loop {
      let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);
      let fetched = rt_bg.block_on(Retry::spawn(strategy, || fetch_state(&client, &base)));
      let app_state = fetched.unwrap_or_else(|e| {
        let mut app = App::new();
        app.last_error = Some(format!("{e:#}"));
        app
      });
      if tx.send(app_state).is_err() {
        break;
      }
      thread::sleep(Duration::from_secs(2));
    }
  });

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(new_state) = rx.try_recv() {
      app.absorb(new_state);
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
    .split(f.size());

  let tab_titles = ["Overview", "Queue", "Logs"];
  let titles: Vec<Spans> = tab_titles
    .iter()
    .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
    .collect();
  let tabs = Tabs::new(titles)
    .block(Block::default().borders(Borders::ALL).title("Collage Tasks"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Overview => 0,
      DashboardTab::Queue => 1,
      DashboardTab::Logs => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Overview => render_overview(f, app, chunks[1]),
    DashboardTab::Queue => render_queue(f, app, chunks[1]),
    DashboardTab::Logs => render_logs(f, app, chunks[1]),
  }

  let footer_text = match &app.last_error {
    Some(err) => format!("API unreachable: {err}"),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(if app.last_error.is_some() { Color::Red } else { Color::White }))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_overview<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);

  let worker_items: Vec<ListItem> = app
    .workers
    .iter()
    .map(|w| {
      let state = if w.draining {
        "draining"
      } else if w.available {
        "available"
      } else {
        "full"
      };
      let lines = vec![
        Spans::from(Span::styled(format!("ID: {}", w.id), Style::default().add_modifier(Modifier::BOLD))),
        Spans::from(Span::raw(format!("Load: {}/{} ({})", w.active_count, w.max_concurrent, state))),
        Spans::from(Span::raw(format!(
          "Done: {} | Failed: {} | Cancelled: {}",
          w.completed, w.failed, w.cancelled
        ))),
        Spans::from(Span::raw(format!("Avg: {:.0}ms", w.average_processing_ms))),
      ];
      ListItem::new(lines)
    })
    .collect();

  let workers_list = List::new(worker_items)
    .block(Block::default().borders(Borders::ALL).title("Workers"))
    .highlight_style(Style::default().bg(Color::Blue));
  f.render_widget(workers_list, chunks[0]);

  let active_tasks: Vec<ListItem> = app
    .active_tasks
    .iter()
    .map(|t| {
      ListItem::new(Spans::from(vec![Span::raw(format!(
        "{}: {} ({} images, {})",
        t.assigned_worker.as_deref().unwrap_or("-"),
        t.id,
        t.parameters.images.len(),
        t.parameters.layout
      ))]))
    })
    .collect();
  let items = if active_tasks.is_empty() {
    vec![ListItem::new(Spans::from(Span::raw("No active tasks")))]
  } else {
    active_tasks
  };
  let tasks_list = List::new(items).block(Block::default().borders(Borders::ALL).title("Active Tasks"));
  f.render_widget(tasks_list, chunks[1]);
}

fn render_queue<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app
    .queued_tasks
    .iter()
    .map(|t| {
      ListItem::new(Spans::from(vec![
        Span::styled(format!("{} ", t.id), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw(format!(
          "Layout: {} | Images: {} | Since: {}",
          t.parameters.layout,
          t.parameters.images.len(),
          t.created_at.format("%H:%M:%S")
        )),
      ]))
    })
    .collect();
  let header = format!("Next {} Queued Tasks (total queued: {})", QUEUE_PREVIEW, app.queued_total);
  let tasks_list = List::new(task_items).block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(tasks_list, area);
}

fn render_logs<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let log_items: Vec<ListItem> = app
    .events
    .iter()
    .map(|e| {
      ListItem::new(Spans::from(vec![
        Span::styled(e.at.format("%Y-%m-%d %H:%M:%S").to_string(), Style::default().fg(Color::Green)),
        Span::raw(" - "),
        Span::raw(format!("{} {}", e.task_id, e.message)),
      ]))
    })
    .collect();
  let logs_list = List::new(log_items).block(Block::default().borders(Borders::ALL).title("Lifecycle Events"));
  f.render_widget(logs_list, area);
}
