use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::dispatcher::SelectionPolicy;
use crate::layout::{FreeformBounds, LayoutOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositorKind {
  #[default]
  Image,
  Manifest,
  DryRun,
}

impl FromStr for CompositorKind {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "image" => Ok(CompositorKind::Image),
      "manifest" => Ok(CompositorKind::Manifest),
      "dry_run" | "dry-run" | "none" => Ok(CompositorKind::DryRun),
      other => Err(anyhow!("unknown compositor '{other}' (expected image, manifest or dry_run)")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub server_port: u16,
  pub worker_count: usize,
  pub worker_max_concurrent: usize,
  pub task_timeout_secs: u64,
  pub watchdog_interval_ms: u64,
  pub worker_selection: SelectionPolicy,
  pub compositor: CompositorKind,
  pub output_dir: PathBuf,
  pub freeform_min_size: u32,
  pub freeform_max_size: u32,
  pub freeform_max_attempts: u32,
  pub mosaic_tile_divisor: u32,
  pub event_log_capacity: usize,
}

impl Default for Config {
  fn default() -> Self {
    let freeform = FreeformBounds::default();
    Self {
      server_port: 8080,
      worker_count: 1,
      worker_max_concurrent: 3,
      task_timeout_secs: 300,
      watchdog_interval_ms: 1000,
      worker_selection: SelectionPolicy::default(),
      compositor: CompositorKind::default(),
      output_dir: PathBuf::from("collages"),
      freeform_min_size: freeform.min_size,
      freeform_max_size: freeform.max_size,
      freeform_max_attempts: freeform.max_attempts,
      mosaic_tile_divisor: LayoutOptions::default().mosaic_tile_divisor,
      event_log_capacity: 200,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  /// Builds the configuration from any key lookup; unset keys keep defaults.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let defaults = Self::default();
    let config = Self {
      server_port: parse(&lookup, "SERVER_PORT", defaults.server_port)?,
      worker_count: parse(&lookup, "WORKER_COUNT", defaults.worker_count)?,
      worker_max_concurrent: parse(&lookup, "WORKER_MAX_CONCURRENT", defaults.worker_max_concurrent)?,
      task_timeout_secs: parse(&lookup, "TASK_TIMEOUT_SECS", defaults.task_timeout_secs)?,
      watchdog_interval_ms: parse(&lookup, "WATCHDOG_INTERVAL_MS", defaults.watchdog_interval_ms)?,
      worker_selection: parse(&lookup, "WORKER_SELECTION", defaults.worker_selection)?,
      compositor: parse(&lookup, "COMPOSITOR", defaults.compositor)?,
      output_dir: lookup("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
      freeform_min_size: parse(&lookup, "FREEFORM_MIN_SIZE", defaults.freeform_min_size)?,
      freeform_max_size: parse(&lookup, "FREEFORM_MAX_SIZE", defaults.freeform_max_size)?,
      freeform_max_attempts: parse(&lookup, "FREEFORM_MAX_ATTEMPTS", defaults.freeform_max_attempts)?,
      mosaic_tile_divisor: parse(&lookup, "MOSAIC_TILE_DIVISOR", defaults.mosaic_tile_divisor)?,
      event_log_capacity: parse(&lookup, "EVENT_LOG_CAPACITY", defaults.event_log_capacity)?,
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.worker_count == 0 {
      bail!("WORKER_COUNT must be at least 1");
    }
    if self.worker_max_concurrent == 0 {
      bail!("WORKER_MAX_CONCURRENT must be at least 1");
    }
    if self.task_timeout_secs == 0 {
      bail!("TASK_TIMEOUT_SECS must be positive");
    }
    if self.watchdog_interval_ms == 0 {
      bail!("WATCHDOG_INTERVAL_MS must be positive");
    }
    if self.freeform_min_size == 0 || self.freeform_min_size > self.freeform_max_size {
      bail!(
        "freeform size bounds {}..{} are invalid",
        self.freeform_min_size,
        self.freeform_max_size
      );
    }
    if self.freeform_max_attempts == 0 {
      bail!("FREEFORM_MAX_ATTEMPTS must be at least 1");
    }
    if self.mosaic_tile_divisor == 0 {
      bail!("MOSAIC_TILE_DIVISOR must be at least 1");
    }
    Ok(())
  }

  pub fn layout_options(&self) -> LayoutOptions {
    LayoutOptions {
      freeform: FreeformBounds {
        min_size: self.freeform_min_size,
        max_size: self.freeform_max_size,
        max_attempts: self.freeform_max_attempts,
      },
      mosaic_tile_divisor: self.mosaic_tile_divisor,
    }
  }

  pub fn task_timeout(&self) -> Duration {
    Duration::from_secs(self.task_timeout_secs)
  }

  pub fn watchdog_interval(&self) -> Duration {
    Duration::from_millis(self.watchdog_interval_ms)
  }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: Display,
{
  match lookup(key) {
    Some(raw) if !raw.trim().is_empty() => raw
      .trim()
      .parse()
      .map_err(|e: T::Err| anyhow!("{e}"))
      .with_context(|| format!("invalid value for {key}: '{raw}'")),
    _ => Ok(default),
  }
}
