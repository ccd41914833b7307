mod handler;
pub mod role;
pub mod state;

use crate::config::{GameConfig, NodeSettings};
use crate::game::types::{Direction, NodeRole, PeerId, WorldSnapshot};
use crate::game::world::World;
use crate::protocol::GameMessage;
use crate::transport::receiver;
use crate::transport::sender::ReliableSender;
use anyhow::Context;
use state::NodeState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct Duties {
  tick: JoinHandle<()>,
  announce: JoinHandle<()>,
}

impl Duties {
  fn abort(self) {
    self.tick.abort();
    self.announce.abort();
  }
}

pub struct Node {
  state: Mutex<NodeState>,
  sender: Arc<ReliableSender>,
  // The socket itself is owned by the sender and receiver tasks.
  local_addr: SocketAddr,
  settings: NodeSettings,
  config: GameConfig,
  snapshots: watch::Sender<Arc<WorldSnapshot>>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
  duties: Mutex<Option<Duties>>,
}

impl Node {
  pub async fn host(config: GameConfig, settings: NodeSettings) -> anyhow::Result<Arc<Self>> {
    let socket = bind(&settings).await?;
    let sender = Arc::new(ReliableSender::new(settings.retry_interval));
    let state = NodeState::host(World::new(config), &settings.name, Arc::clone(&sender))?;
    Self::start(config, settings, socket, sender, state).await
  }

  pub async fn join(
    config: GameConfig,
    settings: NodeSettings,
    coordinator: SocketAddr,
  ) -> anyhow::Result<Arc<Self>> {
    let socket = bind(&settings).await?;
    let sender = Arc::new(ReliableSender::new(settings.retry_interval));
    let state = NodeState::joining(
      World::new(config),
      &settings.name,
      coordinator,
      Arc::clone(&sender),
      Instant::now(),
    );
    Self::start(config, settings, socket, sender, state).await
  }

  async fn start(
    config: GameConfig,
    settings: NodeSettings,
    socket: UdpSocket,
    sender: Arc<ReliableSender>,
    state: NodeState,
  ) -> anyhow::Result<Arc<Self>> {
    let role = state.role();
    let local_addr = socket
      .local_addr()
      .context("failed to read the unicast socket address")?;
    let socket = Arc::new(socket);
    let (snapshots, _) = watch::channel(Arc::new(state.snapshot()));
    let node = Arc::new(Self {
      state: Mutex::new(state),
      sender: Arc::clone(&sender),
      local_addr,
      settings,
      config,
      snapshots,
      tasks: Mutex::new(Vec::new()),
      duties: Mutex::new(None),
    });

    let handles = vec![
      tokio::spawn(Arc::clone(&sender).run(Arc::clone(&socket))),
      tokio::spawn(receiver::run(
        Arc::clone(&node),
        socket,
        node.settings.recv_timeout,
      )),
      node.spawn_pinger(),
    ];
    node.tasks.lock().await.extend(handles);
    node.sync_duties(role).await;
    tracing::info!(addr = %local_addr, role = ?role, "node started");
    Ok(node)
  }

  pub fn config(&self) -> &GameConfig {
    &self.config
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  pub fn subscribe(&self) -> watch::Receiver<Arc<WorldSnapshot>> {
    self.snapshots.subscribe()
  }

  pub async fn role(&self) -> NodeRole {
    self.state.lock().await.role()
  }

  pub async fn my_id(&self) -> Option<PeerId> {
    self.state.lock().await.my_id()
  }

  pub async fn master_addr(&self) -> Option<SocketAddr> {
    self.state.lock().await.master_addr()
  }

  pub async fn steer(&self, direction: Direction) {
    self.state.lock().await.steer(direction);
  }

  pub async fn shutdown(&self) {
    let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
    for task in &tasks {
      task.abort();
    }
    // The socket closes once the aborted tasks have dropped it.
    for task in tasks {
      let _ = task.await;
    }
    let duties = self.duties.lock().await.take();
    if let Some(duties) = duties {
      duties.abort();
    }
    self.sender.clear();
    tracing::info!(addr = %self.local_addr, "node stopped");
  }

  pub(crate) async fn handle_datagram(self: &Arc<Self>, message: GameMessage, from: SocketAddr) {
    let role = {
      let mut state = self.state.lock().await;
      state.on_datagram(message, from, Instant::now());
      self.publish(&state);
      state.role()
    };
    self.sync_duties(role).await;
  }

  pub(crate) async fn evict_silent(self: &Arc<Self>) {
    let role = {
      let mut state = self.state.lock().await;
      state.evict_silent(Instant::now());
      self.publish(&state);
      state.role()
    };
    self.sync_duties(role).await;
  }

  async fn tick(self: &Arc<Self>) {
    let role = {
      let mut state = self.state.lock().await;
      state.tick(Instant::now());
      self.publish(&state);
      state.role()
    };
    self.sync_duties(role).await;
  }

  fn publish(&self, state: &NodeState) {
    let order = state.world().state_order();
    self.snapshots.send_if_modified(|current| {
      if current.state_order == order {
        return false;
      }
      *current = Arc::new(state.snapshot());
      true
    });
  }

  async fn sync_duties(self: &Arc<Self>, role: NodeRole) {
    let mut duties = self.duties.lock().await;
    match (role.coordinates(), duties.is_some()) {
      (true, false) => {
        *duties = Some(Duties {
          tick: self.spawn_ticker(),
          announce: self.spawn_announcer(),
        });
        tracing::info!("coordinator duties started");
      }
      (false, true) => {
        if let Some(running) = duties.take() {
          running.abort();
        }
        tracing::info!("coordinator duties stopped");
      }
      _ => {}
    }
  }

  fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
    let node = Arc::clone(self);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(node.config.tick_period());
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      interval.tick().await;
      loop {
        interval.tick().await;
        node.tick().await;
      }
    })
  }

  fn spawn_announcer(self: &Arc<Self>) -> JoinHandle<()> {
    let node = Arc::clone(self);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(node.settings.announce_period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        let message = node.state.lock().await.announcement();
        node.sender.send(message, node.settings.multicast_group);
      }
    })
  }

  fn spawn_pinger(self: &Arc<Self>) -> JoinHandle<()> {
    let node = Arc::clone(self);
    tokio::spawn(async move {
      let period = node.config.ping_interval();
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        node.state.lock().await.ping_idle(Instant::now(), period);
      }
    })
  }
}

async fn bind(settings: &NodeSettings) -> anyhow::Result<UdpSocket> {
  UdpSocket::bind(settings.bind)
    .await
    .with_context(|| format!("failed to bind unicast socket on {}", settings.bind))
}
