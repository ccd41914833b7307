use super::state::{NodeState, PeerKey};
use crate::game::constants::{JOIN_REJECTED_NOT_COORDINATOR, JOIN_REJECTED_NO_ROOM};
use crate::game::types::{Direction, NodeRole, Peer, PeerId, WorldSnapshot};
use crate::protocol::{GameMessage, MessageBody};
use crate::shared::names::sanitize_player_name;
use std::net::SocketAddr;
use tokio::time::Instant;

impl NodeState {
  pub fn on_datagram(&mut self, message: GameMessage, from: SocketAddr, now: Instant) {
    self.touch(from, now);

    if message.kind().is_reply() {
      self.dispatch(message, from, now);
      return;
    }

    let key = self.peer_key(from);
    let fresh = self.seen.entry(key).or_default().insert(message.seq);
    if !fresh {
      tracing::debug!(seq = message.seq, addr = %from, kind = ?message.kind(), "duplicate dropped");
      let receiver_id = self.world.peer_by_addr(from).map(|peer| peer.id);
      self.reply(MessageBody::Ack, message.seq, from, receiver_id);
      return;
    }
    self.dispatch(message, from, now);
  }

  fn peer_key(&self, from: SocketAddr) -> PeerKey {
    match self.world.peer_by_addr(from) {
      Some(peer) => PeerKey::Known(peer.id),
      None => PeerKey::Prospective(from),
    }
  }

  // Moves dedup records kept by address onto the peer id that address now
  // belongs to.
  fn adopt_prospective_keys(&mut self) {
    let bound: Vec<(SocketAddr, PeerId)> = self
      .seen
      .keys()
      .filter_map(|key| match key {
        PeerKey::Prospective(addr) => self.world.peer_by_addr(*addr).map(|peer| (*addr, peer.id)),
        PeerKey::Known(_) => None,
      })
      .collect();
    for (addr, id) in bound {
      if let Some(seqs) = self.seen.remove(&PeerKey::Prospective(addr)) {
        self.seen.entry(PeerKey::Known(id)).or_default().extend(seqs);
      }
    }
  }

  fn dispatch(&mut self, message: GameMessage, from: SocketAddr, now: Instant) {
    let seq = message.seq;
    match message.body {
      MessageBody::Join { name } => self.on_join(&name, seq, from, now),
      MessageBody::Steer { direction } => self.on_steer(direction, seq, from),
      MessageBody::State { snapshot } => self.on_state(&snapshot, seq, from),
      MessageBody::RoleChange {
        sender_role,
        receiver_role,
      } => self.on_role_change(message.sender_id, sender_role, receiver_role, seq, from, now),
      MessageBody::Ping => self.ack(seq, from),
      MessageBody::Ack => self.on_ack(seq, message.receiver_id),
      MessageBody::Error { message: reason } => {
        self.sender.acknowledge(seq);
        tracing::warn!(seq, addr = %from, reason = %reason, "request rejected");
      }
      MessageBody::Announcement { .. } => {
        tracing::debug!(addr = %from, "announcement on unicast socket ignored");
      }
    }
  }

  fn ack(&self, seq: u64, to: SocketAddr) {
    let receiver_id = self.world.peer_by_addr(to).map(|peer| peer.id);
    self.reply(MessageBody::Ack, seq, to, receiver_id);
  }

  fn on_join(&mut self, name: &str, seq: u64, from: SocketAddr, now: Instant) {
    if self.role != NodeRole::Master {
      self.seen.remove(&PeerKey::Prospective(from));
      self.reply(
        MessageBody::Error {
          message: JOIN_REJECTED_NOT_COORDINATOR.to_string(),
        },
        seq,
        from,
        None,
      );
      tracing::debug!(addr = %from, role = ?self.role, "join refused by non-coordinator");
      return;
    }
    let id = self.next_peer_id;
    let peer = Peer {
      id,
      name: sanitize_player_name(name, "Player"),
      addr: Some(from),
      role: NodeRole::Normal,
      score: 0,
    };
    if !self.world.try_spawn(peer) {
      // Let a retransmitted JOIN try again.
      self.seen.remove(&PeerKey::Prospective(from));
      self.reply(
        MessageBody::Error {
          message: JOIN_REJECTED_NO_ROOM.to_string(),
        },
        seq,
        from,
        None,
      );
      tracing::info!(addr = %from, "join rejected, no free spawn square");
      return;
    }

    self.next_peer_id += 1;
    self.adopt_prospective_keys();
    self.contacts.insert(from, now);
    self.world.top_up_food();
    self.reply(MessageBody::Ack, seq, from, Some(id));
    tracing::info!(peer_id = id, addr = %from, "player joined");
    self.assign_deputy();
  }

  fn on_steer(&mut self, direction: Direction, seq: u64, from: SocketAddr) {
    let Some(id) = self.world.peer_by_addr(from).map(|peer| peer.id) else {
      tracing::debug!(addr = %from, seq, "steer from unknown address dropped");
      return;
    };
    let last = self.last_steer_seq.get(&id).copied().unwrap_or(0);
    if seq > last {
      self.last_steer_seq.insert(id, seq);
      self.world.queue_steer(id, direction);
    } else {
      tracing::debug!(peer_id = id, seq, last, "stale steer ignored");
    }
    self.ack(seq, from);
  }

  fn on_state(&mut self, snapshot: &WorldSnapshot, seq: u64, from: SocketAddr) {
    if self.role == NodeRole::Master {
      // Late snapshots from a retired coordinator must not rewrite our table.
      tracing::debug!(state_order = snapshot.state_order, addr = %from, "snapshot ignored by coordinator");
    } else if self.world.apply_snapshot(snapshot, from) {
      self.next_peer_id = self.next_peer_id.max(self.world.max_peer_id() + 1);
      self.adopt_prospective_keys();
    } else {
      tracing::debug!(
        state_order = snapshot.state_order,
        current = self.world.state_order(),
        "stale snapshot ignored"
      );
    }
    self.ack(seq, from);
  }

  fn on_role_change(
    &mut self,
    sender_id: Option<PeerId>,
    sender_role: Option<NodeRole>,
    receiver_role: Option<NodeRole>,
    seq: u64,
    from: SocketAddr,
    now: Instant,
  ) {
    let sender_id = sender_id.or_else(|| self.world.peer_by_addr(from).map(|peer| peer.id));

    match sender_role {
      Some(NodeRole::Master) => self.follow_master(sender_id, from, now),
      Some(NodeRole::Viewer) => {
        // The retiring coordinator's snake is already gone on its side.
        if let Some(id) = sender_id {
          self.world.set_role(id, NodeRole::Viewer);
          self.world.discard_snake(id);
        }
      }
      Some(role) => {
        if let Some(id) = sender_id {
          self.world.set_role(id, role);
        }
      }
      None => {}
    }

    if let Some(next) = receiver_role {
      match self.change_role(next) {
        Ok(true) if next == NodeRole::Master => self.promote(now),
        Ok(_) => {}
        Err(error) => tracing::warn!(?error, addr = %from, "role change refused"),
      }
    }
    self.ack(seq, from);
  }

  fn follow_master(&mut self, sender_id: Option<PeerId>, from: SocketAddr, now: Instant) {
    if let Some(id) = sender_id {
      self.world.set_role(id, NodeRole::Master);
    }
    if self.role == NodeRole::Master {
      return;
    }
    let previous = self.master_addr.replace(from);
    if let Some(previous) = previous.filter(|previous| *previous != from) {
      let moved = self.sender.readdress(previous, from);
      self.contacts.remove(&previous);
      tracing::info!(addr = %from, previous = %previous, moved, "coordinator moved");
    }
    self.contacts.entry(from).or_insert(now);
  }

  fn on_ack(&mut self, seq: u64, receiver_id: Option<PeerId>) {
    self.sender.acknowledge(seq);
    if self.my_id.is_none() {
      if let Some(id) = receiver_id {
        self.my_id = Some(id);
        tracing::info!(peer_id = id, "joined game");
      }
    }
  }
}
