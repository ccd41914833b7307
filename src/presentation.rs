use crate::config::GameConfig;
use crate::game::snake::Snake;
use crate::game::types::{Coord, Peer, PeerId, SnakeState, WorldSnapshot};
use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub trait PresentationSink: Send + 'static {
  fn present(&mut self, snapshot: &WorldSnapshot) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct LogSink;

impl PresentationSink for LogSink {
  fn present(&mut self, snapshot: &WorldSnapshot) -> anyhow::Result<()> {
    let leader = snapshot.players.iter().max_by_key(|peer| peer.score);
    tracing::info!(
      state_order = snapshot.state_order,
      players = snapshot.players.len(),
      snakes = snapshot.snakes.len(),
      food = snapshot.food.len(),
      leader = leader.map(|peer| peer.name.as_str()).unwrap_or("-"),
      "world updated"
    );
    Ok(())
  }
}

#[derive(Debug, Serialize)]
struct FrameSnake {
  player_id: PeerId,
  state: SnakeState,
  cells: Vec<Coord>,
}

#[derive(Debug, Serialize)]
struct Frame<'a> {
  state_order: u64,
  width: i32,
  height: i32,
  players: &'a [Peer],
  snakes: Vec<FrameSnake>,
  food: &'a [Coord],
}

pub struct JsonLinesSink<W> {
  out: W,
  width: i32,
  height: i32,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
  pub fn new(out: W, config: &GameConfig) -> Self {
    Self {
      out,
      width: config.width,
      height: config.height,
    }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write + Send + 'static> PresentationSink for JsonLinesSink<W> {
  fn present(&mut self, snapshot: &WorldSnapshot) -> anyhow::Result<()> {
    let snakes = snapshot
      .snakes
      .iter()
      .filter_map(Snake::from_snapshot)
      .map(|snake| FrameSnake {
        player_id: snake.player_id,
        state: snake.state,
        cells: snake.cells(self.width, self.height),
      })
      .collect();
    let frame = Frame {
      state_order: snapshot.state_order,
      width: self.width,
      height: self.height,
      players: &snapshot.players,
      snakes,
      food: &snapshot.food,
    };
    serde_json::to_writer(&mut self.out, &frame).context("failed to encode frame")?;
    self.out.write_all(b"\n").context("failed to write frame")?;
    self.out.flush().context("failed to flush frame")?;
    Ok(())
  }
}

pub fn spawn_presenter<S: PresentationSink>(
  mut snapshots: watch::Receiver<Arc<WorldSnapshot>>,
  mut sink: S,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    while snapshots.changed().await.is_ok() {
      let snapshot = Arc::clone(&snapshots.borrow_and_update());
      if let Err(error) = sink.present(&snapshot) {
        tracing::warn!(?error, state_order = snapshot.state_order, "presentation failed");
      }
    }
  })
}
