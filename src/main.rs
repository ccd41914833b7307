use anyhow::{bail, Context};
use snake_mesh::config::{GameConfig, NodeSettings};
use snake_mesh::game::input::parse_direction;
use snake_mesh::node::Node;
use snake_mesh::presentation::{spawn_presenter, JsonLinesSink, LogSink};
use snake_mesh::transport::discovery;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

enum Mode {
  Host,
  Join(SocketAddr),
  Discover,
}

fn mode_from_env() -> anyhow::Result<Mode> {
  if let Ok(value) = env::var("SNAKE_JOIN") {
    let addr = value
      .trim()
      .parse::<SocketAddr>()
      .with_context(|| format!("SNAKE_JOIN is not an address: {value}"))?;
    return Ok(Mode::Join(addr));
  }
  let discover = env::var("SNAKE_DISCOVER")
    .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE"))
    .unwrap_or(false);
  Ok(if discover { Mode::Discover } else { Mode::Host })
}

async fn start_node(mode: Mode, local_config: GameConfig) -> anyhow::Result<Arc<Node>> {
  match mode {
    Mode::Host => {
      let settings = NodeSettings::from_env(&local_config)?;
      Node::host(local_config, settings).await
    }
    Mode::Join(addr) => {
      let settings = NodeSettings::from_env(&local_config)?;
      Node::join(local_config, settings, addr).await
    }
    Mode::Discover => {
      let listen_settings = NodeSettings::from_env(&local_config)?;
      let mut games = discovery::listen(listen_settings.multicast_group).await?;
      let game = loop {
        let Some(game) = games.recv().await else {
          bail!("discovery listener stopped");
        };
        if game.can_join {
          break game;
        }
        tracing::info!(addr = %game.addr, "announced game is full");
      };
      tracing::info!(addr = %game.addr, players = game.players.len(), "found game");
      let settings = NodeSettings::from_env(&game.config)?;
      Node::join(game.config, settings, game.addr).await
    }
  }
}

fn spawn_stdin_steering(node: Arc<Node>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => match parse_direction(&line) {
          Some(direction) => node.steer(direction).await,
          None => tracing::debug!(input = %line.trim(), "unrecognised steering input"),
        },
        Ok(None) => break,
        Err(error) => {
          tracing::warn!(?error, "stdin read failed");
          break;
        }
      }
    }
  })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr so JSON frames own stdout.
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let local_config = GameConfig::from_env()?;
  let node = start_node(mode_from_env()?, local_config).await?;

  let presenter = match env::var("SNAKE_RENDER").as_deref() {
    Ok("json") => spawn_presenter(
      node.subscribe(),
      JsonLinesSink::new(std::io::stdout(), node.config()),
    ),
    _ => spawn_presenter(node.subscribe(), LogSink),
  };
  let steering = spawn_stdin_steering(Arc::clone(&node));

  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for ctrl-c")?;
  steering.abort();
  presenter.abort();
  node.shutdown().await;
  Ok(())
}
