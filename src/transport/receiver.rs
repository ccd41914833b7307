use crate::game::constants::MAX_DATAGRAM;
use crate::node::Node;
use crate::protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

// Receives unicast datagrams until the task is aborted. Every attempt, with
// or without a datagram, is followed by the silent-peer check.
pub async fn run(node: Arc<Node>, socket: Arc<UdpSocket>, recv_timeout: Duration) {
  let mut buf = vec![0u8; MAX_DATAGRAM];
  loop {
    match tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)).await {
      Err(_elapsed) => {}
      Ok(Ok((len, from))) => match protocol::decode(&buf[..len]) {
        Ok(message) => node.handle_datagram(message, from).await,
        Err(error) => {
          tracing::debug!(?error, addr = %from, len, "undecodable datagram dropped");
        }
      },
      Ok(Err(error)) => {
        tracing::warn!(?error, "unicast receive failed");
      }
    }
    node.evict_silent().await;
  }
}
