use crate::config::GameConfig;
use crate::game::constants::MAX_DATAGRAM;
use crate::game::types::Peer;
use crate::protocol::{self, MessageBody};
use anyhow::{bail, Context};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const DISCOVERY_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredGame {
  pub addr: SocketAddr,
  pub config: GameConfig,
  pub players: Vec<Peer>,
  pub can_join: bool,
}

pub async fn listen(group: SocketAddr) -> anyhow::Result<mpsc::Receiver<DiscoveredGame>> {
  let SocketAddr::V4(group_v4) = group else {
    bail!("multicast group {group} is not IPv4");
  };
  let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group_v4.port()))
    .await
    .with_context(|| format!("failed to bind discovery port {}", group_v4.port()))?;
  socket
    .join_multicast_v4(*group_v4.ip(), Ipv4Addr::UNSPECIFIED)
    .with_context(|| format!("failed to join multicast group {}", group_v4.ip()))?;
  tracing::info!(group = %group, "listening for announcements");
  Ok(spawn_listener(socket))
}

pub(crate) fn spawn_listener(socket: UdpSocket) -> mpsc::Receiver<DiscoveredGame> {
  let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
  tokio::spawn(async move {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
      let (len, from) = match socket.recv_from(&mut buf).await {
        Ok(received) => received,
        Err(error) => {
          tracing::warn!(?error, "discovery receive failed");
          continue;
        }
      };
      let Some(game) = parse_announcement(&buf[..len], from) else { continue };
      if tx.send(game).await.is_err() {
        break;
      }
    }
  });
  rx
}

fn parse_announcement(bytes: &[u8], from: SocketAddr) -> Option<DiscoveredGame> {
  let message = match protocol::decode(bytes) {
    Ok(message) => message,
    Err(error) => {
      tracing::debug!(?error, addr = %from, "undecodable announcement dropped");
      return None;
    }
  };
  match message.body {
    MessageBody::Announcement {
      config,
      players,
      can_join,
    } => Some(DiscoveredGame {
      addr: from,
      config,
      players,
      can_join,
    }),
    _ => None,
  }
}
