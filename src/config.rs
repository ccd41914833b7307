use crate::game::constants::{
  DEFAULT_ANNOUNCE_MS, DEFAULT_MULTICAST_GROUP, DEFAULT_RECV_TIMEOUT_MS,
};
use crate::shared::names::sanitize_player_name;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
  pub width: i32,
  pub height: i32,
  pub food_static: i32,
  pub food_per_player: f32,
  pub state_delay_ms: u32,
  pub dead_food_prob: f32,
  pub ping_delay_ms: u32,
  pub node_timeout_ms: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("{field} must be within {min}..={max}, got {value}")]
  OutOfRange {
    field: &'static str,
    min: f64,
    max: f64,
    value: f64,
  },
}

impl Default for GameConfig {
  fn default() -> Self {
    Self {
      width: 40,
      height: 30,
      food_static: 1,
      food_per_player: 1.0,
      state_delay_ms: 1000,
      dead_food_prob: 0.1,
      ping_delay_ms: 100,
      node_timeout_ms: 800,
    }
  }
}

impl GameConfig {
  pub fn from_env() -> anyhow::Result<Self> {
    let defaults = Self::default();
    Self {
      width: env_or("SNAKE_WIDTH", defaults.width)?,
      height: env_or("SNAKE_HEIGHT", defaults.height)?,
      food_static: env_or("SNAKE_FOOD_STATIC", defaults.food_static)?,
      food_per_player: env_or("SNAKE_FOOD_PER_PLAYER", defaults.food_per_player)?,
      state_delay_ms: env_or("SNAKE_STATE_DELAY_MS", defaults.state_delay_ms)?,
      dead_food_prob: env_or("SNAKE_DEAD_FOOD_PROB", defaults.dead_food_prob)?,
      ping_delay_ms: env_or("SNAKE_PING_DELAY_MS", defaults.ping_delay_ms)?,
      node_timeout_ms: env_or("SNAKE_NODE_TIMEOUT_MS", defaults.node_timeout_ms)?,
    }
    .validate()
    .context("invalid game config")
  }

  pub fn validate(self) -> Result<Self, ConfigError> {
    check("width", self.width as f64, 10.0, 100.0)?;
    check("height", self.height as f64, 10.0, 100.0)?;
    check("food_static", self.food_static as f64, 0.0, 100.0)?;
    check("food_per_player", self.food_per_player as f64, 0.0, 100.0)?;
    check("state_delay_ms", self.state_delay_ms as f64, 1.0, 10_000.0)?;
    check("dead_food_prob", self.dead_food_prob as f64, 0.0, 1.0)?;
    check("ping_delay_ms", self.ping_delay_ms as f64, 1.0, 10_000.0)?;
    check("node_timeout_ms", self.node_timeout_ms as f64, 1.0, 10_000.0)?;
    Ok(self)
  }

  pub fn tick_period(&self) -> Duration {
    Duration::from_millis(self.state_delay_ms as u64)
  }

  pub fn ping_interval(&self) -> Duration {
    Duration::from_millis(self.ping_delay_ms as u64)
  }

  pub fn node_timeout(&self) -> Duration {
    Duration::from_millis(self.node_timeout_ms as u64)
  }

  pub fn target_food(&self, active_players: usize) -> usize {
    let bonus = (active_players as f32 * self.food_per_player).floor() as usize;
    self.food_static.max(0) as usize + bonus
  }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
  if value.is_finite() && value >= min && value <= max {
    return Ok(());
  }
  Err(ConfigError::OutOfRange {
    field,
    min,
    max,
    value,
  })
}

fn env_or<T>(key: &str, fallback: T) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(key) {
    Ok(value) if !value.trim().is_empty() => value
      .trim()
      .parse::<T>()
      .with_context(|| format!("failed to parse {key}")),
    _ => Ok(fallback),
  }
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
  pub name: String,
  pub bind: SocketAddr,
  pub multicast_group: SocketAddr,
  pub retry_interval: Duration,
  pub recv_timeout: Duration,
  pub announce_period: Duration,
}

impl NodeSettings {
  pub fn for_config(name: &str, config: &GameConfig) -> Self {
    Self {
      name: sanitize_player_name(name, "Player"),
      bind: SocketAddr::from(([0, 0, 0, 0], 0)),
      multicast_group: SocketAddr::from(DEFAULT_MULTICAST_GROUP),
      retry_interval: config.ping_interval(),
      recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
      announce_period: Duration::from_millis(DEFAULT_ANNOUNCE_MS),
    }
  }

  pub fn from_env(config: &GameConfig) -> anyhow::Result<Self> {
    let name = env::var("SNAKE_NAME").unwrap_or_else(|_| "Player".to_string());
    let mut settings = Self::for_config(&name, config);
    settings.bind = env_or("SNAKE_BIND", settings.bind)?;
    settings.multicast_group = env_or("SNAKE_MULTICAST", settings.multicast_group)?;
    if let Some(ms) = optional_ms("SNAKE_RETRY_MS")? {
      settings.retry_interval = ms;
    }
    if let Some(ms) = optional_ms("SNAKE_RECV_TIMEOUT_MS")? {
      settings.recv_timeout = ms;
    }
    if let Some(ms) = optional_ms("SNAKE_ANNOUNCE_MS")? {
      settings.announce_period = ms;
    }
    Ok(settings)
  }
}

fn optional_ms(key: &str) -> anyhow::Result<Option<Duration>> {
  let Ok(value) = env::var(key) else { return Ok(None) };
  let ms = value
    .trim()
    .parse::<u64>()
    .with_context(|| format!("failed to parse {key}"))?;
  Ok(Some(Duration::from_millis(ms.max(1))))
}
