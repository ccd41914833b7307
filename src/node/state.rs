use super::role::RoleError;
use crate::game::types::{Direction, NodeRole, Peer, PeerId, WorldSnapshot};
use crate::game::world::World;
use crate::protocol::{GameMessage, MessageBody};
use crate::transport::sender::ReliableSender;
use anyhow::bail;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

// Key for the inbound duplicate filter. Datagrams from an address that is not
// in the peer table yet are tracked by address until a JOIN or a snapshot
// binds it to an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum PeerKey {
  Known(PeerId),
  Prospective(SocketAddr),
}

#[derive(Debug)]
pub struct NodeState {
  pub(super) world: World,
  pub(super) name: String,
  pub(super) my_id: Option<PeerId>,
  pub(super) role: NodeRole,
  // Where coordinator-bound traffic goes. `None` while this node is MASTER.
  pub(super) master_addr: Option<SocketAddr>,
  pub(super) next_msg_seq: u64,
  pub(super) next_peer_id: PeerId,
  pub(super) seen: HashMap<PeerKey, HashSet<u64>>,
  pub(super) last_steer_seq: HashMap<PeerId, u64>,
  pub(super) contacts: HashMap<SocketAddr, Instant>,
  pub(super) sender: Arc<ReliableSender>,
}

impl NodeState {
  pub fn host(mut world: World, name: &str, sender: Arc<ReliableSender>) -> anyhow::Result<Self> {
    let me = Peer {
      id: 1,
      name: name.to_string(),
      addr: None,
      role: NodeRole::Master,
      score: 0,
    };
    if !world.try_spawn(me) {
      bail!("no room for the host snake on a {}x{} field", world.config().width, world.config().height);
    }
    world.top_up_food();
    tracing::info!(peer_id = 1, role = ?NodeRole::Master, "hosting new game");
    Ok(Self {
      world,
      name: name.to_string(),
      my_id: Some(1),
      role: NodeRole::Master,
      master_addr: None,
      next_msg_seq: 1,
      next_peer_id: 2,
      seen: HashMap::new(),
      last_steer_seq: HashMap::new(),
      contacts: HashMap::new(),
      sender,
    })
  }

  pub fn joining(
    world: World,
    name: &str,
    coordinator: SocketAddr,
    sender: Arc<ReliableSender>,
    now: Instant,
  ) -> Self {
    let mut state = Self {
      world,
      name: name.to_string(),
      my_id: None,
      role: NodeRole::Normal,
      master_addr: Some(coordinator),
      next_msg_seq: 1,
      next_peer_id: 1,
      seen: HashMap::new(),
      last_steer_seq: HashMap::new(),
      contacts: HashMap::from([(coordinator, now)]),
      sender,
    };
    state.send_reliable(
      MessageBody::Join {
        name: name.to_string(),
      },
      coordinator,
      None,
    );
    tracing::info!(addr = %coordinator, "joining game");
    state
  }

  pub fn world(&self) -> &World {
    &self.world
  }

  pub fn my_id(&self) -> Option<PeerId> {
    self.my_id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn role(&self) -> NodeRole {
    self.role
  }

  pub fn master_addr(&self) -> Option<SocketAddr> {
    self.master_addr
  }

  pub fn snapshot(&self) -> WorldSnapshot {
    self.world.snapshot()
  }

  fn take_seq(&mut self) -> u64 {
    let seq = self.next_msg_seq;
    self.next_msg_seq += 1;
    seq
  }

  fn envelope(&mut self, body: MessageBody, receiver_id: Option<PeerId>) -> GameMessage {
    let seq = self.take_seq();
    GameMessage::new(seq, body)
      .with_sender(self.my_id)
      .with_receiver(receiver_id)
  }

  pub(super) fn send_reliable(&mut self, body: MessageBody, to: SocketAddr, receiver_id: Option<PeerId>) {
    let message = self.envelope(body, receiver_id);
    self.sender.send(message, to);
  }

  pub(super) fn reply(&self, body: MessageBody, seq: u64, to: SocketAddr, receiver_id: Option<PeerId>) {
    let message = GameMessage::new(seq, body)
      .with_sender(self.my_id)
      .with_receiver(receiver_id);
    self.sender.send(message, to);
  }

  pub fn announcement(&mut self) -> GameMessage {
    let body = MessageBody::Announcement {
      config: *self.world.config(),
      players: self.world.peers().cloned().collect(),
      can_join: self.world.field().find_spawn_center().is_some(),
    };
    self.envelope(body, None)
  }

  pub(super) fn change_role(&mut self, next: NodeRole) -> Result<bool, RoleError> {
    let next = self.role.transition_to(next)?;
    if next == self.role {
      return Ok(false);
    }
    tracing::info!(peer_id = ?self.my_id, from = ?self.role, role = ?next, "role changed");
    self.role = next;
    if let Some(id) = self.my_id {
      self.world.set_role(id, next);
    }
    Ok(true)
  }

  pub fn steer(&mut self, direction: Direction) {
    let Some(id) = self.my_id else { return };
    match self.role {
      NodeRole::Master => self.world.queue_steer(id, direction),
      NodeRole::Viewer => {}
      NodeRole::Normal | NodeRole::Deputy => {
        if let Some(master) = self.master_addr {
          self.send_reliable(MessageBody::Steer { direction }, master, None);
        }
      }
    }
  }

  pub fn ping_idle(&mut self, now: Instant, interval: std::time::Duration) {
    let idle: Vec<SocketAddr> = self
      .contacts
      .keys()
      .copied()
      .filter(|addr| self.sender.is_idle(*addr, now, interval))
      .collect();
    for addr in idle {
      let receiver_id = self.world.peer_by_addr(addr).map(|peer| peer.id);
      self.send_reliable(MessageBody::Ping, addr, receiver_id);
    }
  }

  pub fn tick(&mut self, now: Instant) {
    if self.role != NodeRole::Master {
      return;
    }
    let deputy = self.world.peer_with_role(NodeRole::Deputy).cloned();
    let outcome = self.world.tick();

    let own_death = self.my_id.map_or(false, |id| outcome.died.contains(&id));
    if own_death {
      // Abandon whatever is still in flight.
      if let Err(error) = self.change_role(NodeRole::Viewer) {
        tracing::warn!(?error, "retirement refused");
      }
      self.sender.clear();
    }

    let mut deputy_died = false;
    for id in outcome.died {
      if Some(id) == self.my_id {
        continue;
      }
      deputy_died |= deputy.as_ref().map(|peer| peer.id) == Some(id);
      self.notify_death(id);
    }

    self.broadcast_state();
    if own_death {
      self.hand_off(deputy.filter(|_| !deputy_died), now);
    } else if deputy_died {
      self.assign_deputy();
    }
  }

  fn notify_death(&mut self, id: PeerId) {
    let Some(addr) = self.world.peer(id).and_then(|peer| peer.addr) else { return };
    tracing::info!(peer_id = id, "player died");
    self.send_reliable(
      MessageBody::RoleChange {
        sender_role: Some(NodeRole::Master),
        receiver_role: Some(NodeRole::Viewer),
      },
      addr,
      Some(id),
    );
  }

  fn broadcast_state(&mut self) {
    let snapshot = self.world.snapshot();
    let targets: Vec<(PeerId, SocketAddr)> = self
      .world
      .peers()
      .filter(|peer| Some(peer.id) != self.my_id)
      .filter_map(|peer| peer.addr.map(|addr| (peer.id, addr)))
      .collect();
    for (id, addr) in targets {
      self.send_reliable(
        MessageBody::State {
          snapshot: snapshot.clone(),
        },
        addr,
        Some(id),
      );
    }
  }

  fn hand_off(&mut self, deputy: Option<Peer>, now: Instant) {
    self.contacts.clear();
    self.master_addr = None;

    let Some((deputy_id, deputy_addr)) = deputy.and_then(|peer| peer.addr.map(|addr| (peer.id, addr)))
    else {
      tracing::warn!("coordinator died without a deputy; session has no successor");
      return;
    };
    self.send_reliable(
      MessageBody::RoleChange {
        sender_role: Some(NodeRole::Viewer),
        receiver_role: Some(NodeRole::Master),
      },
      deputy_addr,
      Some(deputy_id),
    );
    self.master_addr = Some(deputy_addr);
    self.contacts.insert(deputy_addr, now);
    tracing::info!(peer_id = deputy_id, addr = %deputy_addr, "handed mastership to deputy");
  }

  pub(super) fn assign_deputy(&mut self) {
    if self.role != NodeRole::Master || self.world.peer_with_role(NodeRole::Deputy).is_some() {
      return;
    }
    let candidate = self
      .world
      .peers()
      .filter(|peer| Some(peer.id) != self.my_id && peer.role == NodeRole::Normal)
      .find_map(|peer| peer.addr.map(|addr| (peer.id, addr)));
    let Some((id, addr)) = candidate else { return };
    self.world.set_role(id, NodeRole::Deputy);
    self.send_reliable(
      MessageBody::RoleChange {
        sender_role: Some(NodeRole::Master),
        receiver_role: Some(NodeRole::Deputy),
      },
      addr,
      Some(id),
    );
    tracing::info!(peer_id = id, addr = %addr, "deputy assigned");
  }

  pub(super) fn promote(&mut self, now: Instant) {
    self.master_addr = None;
    self.next_peer_id = self.next_peer_id.max(self.world.max_peer_id() + 1);
    let others: Vec<(PeerId, SocketAddr)> = self
      .world
      .peers()
      .filter(|peer| Some(peer.id) != self.my_id)
      .filter_map(|peer| peer.addr.map(|addr| (peer.id, addr)))
      .collect();
    self.contacts = others.iter().map(|(_, addr)| (*addr, now)).collect();
    for (id, addr) in others {
      self.send_reliable(
        MessageBody::RoleChange {
          sender_role: Some(NodeRole::Master),
          receiver_role: None,
        },
        addr,
        Some(id),
      );
    }
    self.assign_deputy();
    tracing::info!(peer_id = ?self.my_id, state_order = self.world.state_order(), "took over as coordinator");
  }

  pub(super) fn touch(&mut self, addr: SocketAddr, now: Instant) {
    if let Some(last) = self.contacts.get_mut(&addr) {
      *last = now;
    }
  }

  pub fn evict_silent(&mut self, now: Instant) {
    let timeout = self.world.config().node_timeout();
    let silent: Vec<SocketAddr> = self
      .contacts
      .iter()
      .filter(|(_, last)| now.saturating_duration_since(**last) > timeout)
      .map(|(addr, _)| *addr)
      .collect();
    for addr in silent {
      self.contacts.remove(&addr);
      self.depart(addr, now);
    }
  }

  pub(super) fn depart(&mut self, addr: SocketAddr, now: Instant) {
    let departed = self.world.peer_by_addr(addr).cloned();
    let departed_role = match &departed {
      Some(peer) => peer.role,
      None if self.master_addr == Some(addr) => NodeRole::Master,
      None => NodeRole::Normal,
    };
    if let Some(peer) = &departed {
      self.world.remove_peer(peer.id);
      self.seen.remove(&PeerKey::Known(peer.id));
      self.last_steer_seq.remove(&peer.id);
    }
    tracing::info!(
      peer_id = ?departed.as_ref().map(|peer| peer.id),
      addr = %addr,
      role = ?departed_role,
      "peer evicted"
    );

    match (departed_role, self.role) {
      (NodeRole::Master, NodeRole::Deputy) => {
        self.sender.forget(addr);
        match self.change_role(NodeRole::Master) {
          Ok(_) => self.promote(now),
          Err(error) => tracing::warn!(?error, "promotion refused"),
        }
      }
      (NodeRole::Master, NodeRole::Normal | NodeRole::Viewer) => {
        self.redirect_to_deputy(addr, now);
        self.sender.forget(addr);
      }
      (NodeRole::Deputy, NodeRole::Master) => {
        self.sender.forget(addr);
        self.assign_deputy();
      }
      _ => self.sender.forget(addr),
    }
  }

  fn redirect_to_deputy(&mut self, old_master: SocketAddr, now: Instant) {
    let deputy = self
      .world
      .peer_with_role(NodeRole::Deputy)
      .filter(|peer| Some(peer.id) != self.my_id)
      .and_then(|peer| peer.addr.map(|addr| (peer.id, addr)));
    let Some((deputy_id, deputy_addr)) = deputy else {
      tracing::warn!(addr = %old_master, "coordinator lost with no deputy to fall back on");
      self.master_addr = None;
      return;
    };
    let moved = self.sender.readdress(old_master, deputy_addr);
    self.master_addr = Some(deputy_addr);
    self.contacts.insert(deputy_addr, now);
    self.world.set_role(deputy_id, NodeRole::Master);
    tracing::info!(peer_id = deputy_id, addr = %deputy_addr, moved, "redirected to deputy");
  }
}
