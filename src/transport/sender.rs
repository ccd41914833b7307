use crate::game::constants::SENDER_IDLE_POLL_MS;
use crate::protocol::{self, GameMessage, MessageKind};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutboundKey {
  // Dropped after its first successful transmission. Replies reuse the
  // peer's sequence number, so they get a local slot instead.
  OneShot(u64),
  Announcement,
  Seq(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
  pub message: GameMessage,
  pub destination: SocketAddr,
  pub last_sent: Option<Instant>,
}

impl Outbound {
  fn is_due(&self, now: Instant, retry_interval: Duration) -> bool {
    match self.last_sent {
      None => true,
      Some(sent) => now.saturating_duration_since(sent) >= retry_interval,
    }
  }
}

#[derive(Debug)]
pub struct ReliableSender {
  queue: DashMap<OutboundKey, Outbound>,
  last_sent: DashMap<SocketAddr, Instant>,
  next_one_shot: AtomicU64,
  retry_interval: Duration,
  wake: Notify,
}

impl ReliableSender {
  pub fn new(retry_interval: Duration) -> Self {
    Self {
      queue: DashMap::new(),
      last_sent: DashMap::new(),
      next_one_shot: AtomicU64::new(1),
      retry_interval,
      wake: Notify::new(),
    }
  }

  pub fn send(&self, message: GameMessage, destination: SocketAddr) {
    let key = match message.kind() {
      MessageKind::Announcement => OutboundKey::Announcement,
      kind if kind.is_fire_and_forget() => {
        OutboundKey::OneShot(self.next_one_shot.fetch_add(1, Ordering::Relaxed))
      }
      _ => OutboundKey::Seq(message.seq),
    };
    self.queue.insert(
      key,
      Outbound {
        message,
        destination,
        last_sent: None,
      },
    );
    self.wake.notify_one();
  }

  pub fn acknowledge(&self, seq: u64) -> bool {
    self.queue.remove(&OutboundKey::Seq(seq)).is_some()
  }

  pub fn clear(&self) {
    self.queue.clear();
  }

  // Points queued traffic for `from` at `to`. Pings already addressed to
  // `from` keep their destination.
  pub fn readdress(&self, from: SocketAddr, to: SocketAddr) -> usize {
    let mut moved = 0;
    for mut entry in self.queue.iter_mut() {
      if entry.destination != from || entry.message.kind() == MessageKind::Ping {
        continue;
      }
      entry.destination = to;
      entry.last_sent = None;
      moved += 1;
    }
    if moved > 0 {
      self.wake.notify_one();
    }
    moved
  }

  pub fn forget(&self, destination: SocketAddr) {
    self.queue.retain(|_, entry| entry.destination != destination);
    self.last_sent.remove(&destination);
  }

  pub fn is_idle(&self, destination: SocketAddr, now: Instant, interval: Duration) -> bool {
    match self.last_sent.get(&destination) {
      None => true,
      Some(sent) => now.saturating_duration_since(*sent) >= interval,
    }
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn pending(&self) -> Vec<Outbound> {
    let mut entries: Vec<(OutboundKey, Outbound)> = self
      .queue
      .iter()
      .map(|entry| (*entry.key(), entry.value().clone()))
      .collect();
    entries.sort_by_key(|(key, _)| *key);
    entries.into_iter().map(|(_, entry)| entry).collect()
  }

  fn due(&self, now: Instant) -> Vec<(OutboundKey, Outbound)> {
    let mut due: Vec<(OutboundKey, Outbound)> = self
      .queue
      .iter()
      .filter(|entry| entry.is_due(now, self.retry_interval))
      .map(|entry| (*entry.key(), entry.value().clone()))
      .collect();
    due.sort_by_key(|(key, _)| *key);
    due
  }

  pub async fn flush(&self, socket: &UdpSocket, now: Instant) -> usize {
    let mut sent = 0;
    for (key, entry) in self.due(now) {
      let payload = protocol::encode(&entry.message);
      if let Err(error) = socket.send_to(&payload, entry.destination).await {
        tracing::warn!(
          ?error,
          seq = entry.message.seq,
          addr = %entry.destination,
          "unicast send failed"
        );
        continue;
      }
      sent += 1;
      self.last_sent.insert(entry.destination, now);
      match key {
        OutboundKey::OneShot(_) | OutboundKey::Announcement => {
          self.queue
            .remove_if(&key, |_, queued| queued.message.seq == entry.message.seq);
        }
        OutboundKey::Seq(_) => {
          if let Some(mut queued) = self.queue.get_mut(&key) {
            queued.last_sent = Some(now);
          }
        }
      }
    }
    sent
  }

  pub async fn run(self: Arc<Self>, socket: Arc<UdpSocket>) {
    let poll = self
      .retry_interval
      .min(Duration::from_millis(SENDER_IDLE_POLL_MS));
    loop {
      self.flush(&socket, Instant::now()).await;
      tokio::select! {
        _ = tokio::time::sleep(poll) => {}
        _ = self.wake.notified() => {}
      }
    }
  }
}
