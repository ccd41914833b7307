use crate::config::GameConfig;
use crate::game::types::{
  Coord, Direction, NodeRole, Peer, PeerId, SnakeSnapshot, SnakeState, WorldSnapshot,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

pub const VERSION: u8 = 1;

pub const TYPE_JOIN: u8 = 0x01;
pub const TYPE_ACK: u8 = 0x02;
pub const TYPE_ERROR: u8 = 0x03;
pub const TYPE_STATE: u8 = 0x04;
pub const TYPE_STEER: u8 = 0x05;
pub const TYPE_ROLE_CHANGE: u8 = 0x06;
pub const TYPE_PING: u8 = 0x07;
pub const TYPE_ANNOUNCEMENT: u8 = 0x08;

pub const FLAG_SENDER_ID: u16 = 1 << 0;
pub const FLAG_RECEIVER_ID: u16 = 1 << 1;
pub const FLAG_SENDER_ROLE: u16 = 1 << 2;
pub const FLAG_RECEIVER_ROLE: u16 = 1 << 3;
pub const FLAG_CAN_JOIN: u16 = 1 << 4;

const ADDR_NONE: u8 = 0;
const ADDR_V4: u8 = 4;
const ADDR_V6: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct GameMessage {
  pub seq: u64,
  pub sender_id: Option<PeerId>,
  pub receiver_id: Option<PeerId>,
  pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
  Join {
    name: String,
  },
  Ack,
  Error {
    message: String,
  },
  State {
    snapshot: WorldSnapshot,
  },
  Steer {
    direction: Direction,
  },
  RoleChange {
    sender_role: Option<NodeRole>,
    receiver_role: Option<NodeRole>,
  },
  Ping,
  Announcement {
    config: GameConfig,
    players: Vec<Peer>,
    can_join: bool,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
  Join,
  Ack,
  Error,
  State,
  Steer,
  RoleChange,
  Ping,
  Announcement,
}

impl MessageBody {
  pub fn kind(&self) -> MessageKind {
    match self {
      MessageBody::Join { .. } => MessageKind::Join,
      MessageBody::Ack => MessageKind::Ack,
      MessageBody::Error { .. } => MessageKind::Error,
      MessageBody::State { .. } => MessageKind::State,
      MessageBody::Steer { .. } => MessageKind::Steer,
      MessageBody::RoleChange { .. } => MessageKind::RoleChange,
      MessageBody::Ping => MessageKind::Ping,
      MessageBody::Announcement { .. } => MessageKind::Announcement,
    }
  }
}

impl MessageKind {
  pub fn is_fire_and_forget(self) -> bool {
    matches!(
      self,
      MessageKind::Ack | MessageKind::Error | MessageKind::Announcement
    )
  }

  // Replies carry the sequence number of the request they answer and are
  // exempt from duplicate filtering.
  pub fn is_reply(self) -> bool {
    matches!(self, MessageKind::Ack | MessageKind::Error)
  }
}

impl GameMessage {
  pub fn new(seq: u64, body: MessageBody) -> Self {
    Self {
      seq,
      sender_id: None,
      receiver_id: None,
      body,
    }
  }

  pub fn with_sender(mut self, sender_id: Option<PeerId>) -> Self {
    self.sender_id = sender_id;
    self
  }

  pub fn with_receiver(mut self, receiver_id: Option<PeerId>) -> Self {
    self.receiver_id = receiver_id;
    self
  }

  pub fn kind(&self) -> MessageKind {
    self.body.kind()
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
  #[error("unsupported protocol version {0}")]
  UnsupportedVersion(u8),
  #[error("unknown message type {0:#04x}")]
  UnknownType(u8),
  #[error("datagram ended early")]
  Truncated,
  #[error("invalid value for {0}")]
  InvalidField(&'static str),
  #[error("{0} unexpected trailing bytes")]
  TrailingBytes(usize),
}

pub fn encode(message: &GameMessage) -> Vec<u8> {
  let mut flags = 0u16;
  if message.sender_id.is_some() {
    flags |= FLAG_SENDER_ID;
  }
  if message.receiver_id.is_some() {
    flags |= FLAG_RECEIVER_ID;
  }
  let message_type = match &message.body {
    MessageBody::Join { .. } => TYPE_JOIN,
    MessageBody::Ack => TYPE_ACK,
    MessageBody::Error { .. } => TYPE_ERROR,
    MessageBody::State { .. } => TYPE_STATE,
    MessageBody::Steer { .. } => TYPE_STEER,
    MessageBody::RoleChange {
      sender_role,
      receiver_role,
    } => {
      if sender_role.is_some() {
        flags |= FLAG_SENDER_ROLE;
      }
      if receiver_role.is_some() {
        flags |= FLAG_RECEIVER_ROLE;
      }
      TYPE_ROLE_CHANGE
    }
    MessageBody::Ping => TYPE_PING,
    MessageBody::Announcement { can_join, .. } => {
      if *can_join {
        flags |= FLAG_CAN_JOIN;
      }
      TYPE_ANNOUNCEMENT
    }
  };

  let mut encoder = Encoder::with_capacity(64);
  encoder.write_header(message_type, flags);
  encoder.write_u64(message.seq);
  if let Some(id) = message.sender_id {
    encoder.write_i32(id);
  }
  if let Some(id) = message.receiver_id {
    encoder.write_i32(id);
  }

  match &message.body {
    MessageBody::Join { name } => encoder.write_string(name),
    MessageBody::Ack | MessageBody::Ping => {}
    MessageBody::Error { message } => encoder.write_string(message),
    MessageBody::State { snapshot } => encoder.write_snapshot(snapshot),
    MessageBody::Steer { direction } => encoder.write_u8(direction.to_wire()),
    MessageBody::RoleChange {
      sender_role,
      receiver_role,
    } => {
      if let Some(role) = sender_role {
        encoder.write_u8(role.to_wire());
      }
      if let Some(role) = receiver_role {
        encoder.write_u8(role.to_wire());
      }
    }
    MessageBody::Announcement {
      config, players, ..
    } => {
      encoder.write_config(config);
      encoder.write_players(players);
    }
  }
  encoder.into_vec()
}

pub fn decode(data: &[u8]) -> Result<GameMessage, DecodeError> {
  let mut reader = Reader::new(data);
  let version = reader.read_u8()?;
  if version != VERSION {
    return Err(DecodeError::UnsupportedVersion(version));
  }
  let message_type = reader.read_u8()?;
  let flags = reader.read_u16()?;
  let seq = reader.read_u64()?;
  let sender_id = if flags & FLAG_SENDER_ID != 0 {
    Some(reader.read_i32()?)
  } else {
    None
  };
  let receiver_id = if flags & FLAG_RECEIVER_ID != 0 {
    Some(reader.read_i32()?)
  } else {
    None
  };

  let body = match message_type {
    TYPE_JOIN => MessageBody::Join {
      name: reader.read_string()?,
    },
    TYPE_ACK => MessageBody::Ack,
    TYPE_ERROR => MessageBody::Error {
      message: reader.read_string()?,
    },
    TYPE_STATE => MessageBody::State {
      snapshot: reader.read_snapshot()?,
    },
    TYPE_STEER => MessageBody::Steer {
      direction: reader.read_direction()?,
    },
    TYPE_ROLE_CHANGE => {
      let sender_role = if flags & FLAG_SENDER_ROLE != 0 {
        Some(reader.read_role()?)
      } else {
        None
      };
      let receiver_role = if flags & FLAG_RECEIVER_ROLE != 0 {
        Some(reader.read_role()?)
      } else {
        None
      };
      MessageBody::RoleChange {
        sender_role,
        receiver_role,
      }
    }
    TYPE_PING => MessageBody::Ping,
    TYPE_ANNOUNCEMENT => MessageBody::Announcement {
      config: reader.read_config()?,
      players: reader.read_players()?,
      can_join: flags & FLAG_CAN_JOIN != 0,
    },
    other => return Err(DecodeError::UnknownType(other)),
  };

  let remaining = reader.remaining();
  if remaining != 0 {
    return Err(DecodeError::TrailingBytes(remaining));
  }

  Ok(GameMessage {
    seq,
    sender_id,
    receiver_id,
    body,
  })
}

pub struct Encoder {
  buffer: Vec<u8>,
}

impl Encoder {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      buffer: Vec::with_capacity(capacity),
    }
  }

  pub fn into_vec(self) -> Vec<u8> {
    self.buffer
  }

  pub fn write_header(&mut self, message_type: u8, flags: u16) {
    self.write_u8(VERSION);
    self.write_u8(message_type);
    self.write_u16(flags);
  }

  pub fn write_u8(&mut self, value: u8) {
    self.buffer.push(value);
  }

  pub fn write_u16(&mut self, value: u16) {
    self.buffer.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_i32(&mut self, value: i32) {
    self.buffer.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_u32(&mut self, value: u32) {
    self.buffer.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_u64(&mut self, value: u64) {
    self.buffer.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_f32(&mut self, value: f32) {
    self.buffer.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_string(&mut self, value: &str) {
    let bytes = value.as_bytes();
    let mut end = bytes.len().min(u8::MAX as usize);
    while !value.is_char_boundary(end) {
      end = end.saturating_sub(1);
    }
    self.write_u8(end as u8);
    self.buffer.extend_from_slice(&bytes[..end]);
  }

  fn write_len(&mut self, len: usize) {
    self.write_u16(len.min(u16::MAX as usize) as u16);
  }

  fn write_coord(&mut self, coord: Coord) {
    self.write_i32(coord.x);
    self.write_i32(coord.y);
  }

  fn write_addr(&mut self, addr: Option<SocketAddr>) {
    match addr {
      None => self.write_u8(ADDR_NONE),
      Some(SocketAddr::V4(addr)) => {
        self.write_u8(ADDR_V4);
        self.buffer.extend_from_slice(&addr.ip().octets());
        self.write_u16(addr.port());
      }
      Some(SocketAddr::V6(addr)) => {
        self.write_u8(ADDR_V6);
        self.buffer.extend_from_slice(&addr.ip().octets());
        self.write_u16(addr.port());
      }
    }
  }

  fn write_config(&mut self, config: &GameConfig) {
    self.write_i32(config.width);
    self.write_i32(config.height);
    self.write_i32(config.food_static);
    self.write_f32(config.food_per_player);
    self.write_u32(config.state_delay_ms);
    self.write_f32(config.dead_food_prob);
    self.write_u32(config.ping_delay_ms);
    self.write_u32(config.node_timeout_ms);
  }

  fn write_players(&mut self, players: &[Peer]) {
    let count = players.len().min(u16::MAX as usize);
    self.write_len(count);
    for player in players.iter().take(count) {
      self.write_i32(player.id);
      self.write_string(&player.name);
      self.write_addr(player.addr);
      self.write_u8(player.role.to_wire());
      self.write_i32(player.score);
    }
  }

  fn write_snapshot(&mut self, snapshot: &WorldSnapshot) {
    self.write_u64(snapshot.state_order);
    let snake_count = snapshot.snakes.len().min(u16::MAX as usize);
    self.write_len(snake_count);
    for snake in snapshot.snakes.iter().take(snake_count) {
      self.write_i32(snake.player_id);
      self.write_u8(match snake.state {
        SnakeState::Alive => 0,
        SnakeState::Zombie => 1,
      });
      self.write_u8(snake.direction.to_wire());
      self.write_u8(snake.pending_direction.to_wire());
      let point_count = snake.points.len().min(u16::MAX as usize);
      self.write_len(point_count);
      for point in snake.points.iter().take(point_count) {
        self.write_coord(*point);
      }
    }
    let food_count = snapshot.food.len().min(u16::MAX as usize);
    self.write_len(food_count);
    for food in snapshot.food.iter().take(food_count) {
      self.write_coord(*food);
    }
    self.write_players(&snapshot.players);
  }
}

struct Reader<'a> {
  data: &'a [u8],
  offset: usize,
}

impl<'a> Reader<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self { data, offset: 0 }
  }

  fn remaining(&self) -> usize {
    self.data.len().saturating_sub(self.offset)
  }

  fn read_u8(&mut self) -> Result<u8, DecodeError> {
    let value = *self.data.get(self.offset).ok_or(DecodeError::Truncated)?;
    self.offset += 1;
    Ok(value)
  }

  fn read_u16(&mut self) -> Result<u16, DecodeError> {
    Ok(u16::from_le_bytes(self.read_bytes::<2>()?))
  }

  fn read_i32(&mut self) -> Result<i32, DecodeError> {
    Ok(i32::from_le_bytes(self.read_bytes::<4>()?))
  }

  fn read_u32(&mut self) -> Result<u32, DecodeError> {
    Ok(u32::from_le_bytes(self.read_bytes::<4>()?))
  }

  fn read_u64(&mut self) -> Result<u64, DecodeError> {
    Ok(u64::from_le_bytes(self.read_bytes::<8>()?))
  }

  fn read_f32(&mut self) -> Result<f32, DecodeError> {
    Ok(f32::from_le_bytes(self.read_bytes::<4>()?))
  }

  fn read_string(&mut self) -> Result<String, DecodeError> {
    let len = self.read_u8()? as usize;
    if self.offset + len > self.data.len() {
      return Err(DecodeError::Truncated);
    }
    let slice = &self.data[self.offset..self.offset + len];
    self.offset += len;
    Ok(String::from_utf8_lossy(slice).into_owned())
  }

  fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
    if self.offset + N > self.data.len() {
      return Err(DecodeError::Truncated);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&self.data[self.offset..self.offset + N]);
    self.offset += N;
    Ok(out)
  }

  fn read_direction(&mut self) -> Result<Direction, DecodeError> {
    Direction::from_wire(self.read_u8()?).ok_or(DecodeError::InvalidField("direction"))
  }

  fn read_role(&mut self) -> Result<NodeRole, DecodeError> {
    NodeRole::from_wire(self.read_u8()?).ok_or(DecodeError::InvalidField("role"))
  }

  fn read_coord(&mut self) -> Result<Coord, DecodeError> {
    Ok(Coord::new(self.read_i32()?, self.read_i32()?))
  }

  fn read_addr(&mut self) -> Result<Option<SocketAddr>, DecodeError> {
    match self.read_u8()? {
      ADDR_NONE => Ok(None),
      ADDR_V4 => {
        let ip = Ipv4Addr::from(self.read_bytes::<4>()?);
        let port = self.read_u16()?;
        Ok(Some(SocketAddr::new(IpAddr::V4(ip), port)))
      }
      ADDR_V6 => {
        let ip = Ipv6Addr::from(self.read_bytes::<16>()?);
        let port = self.read_u16()?;
        Ok(Some(SocketAddr::new(IpAddr::V6(ip), port)))
      }
      _ => Err(DecodeError::InvalidField("address")),
    }
  }

  fn read_config(&mut self) -> Result<GameConfig, DecodeError> {
    let config = GameConfig {
      width: self.read_i32()?,
      height: self.read_i32()?,
      food_static: self.read_i32()?,
      food_per_player: self.read_f32()?,
      state_delay_ms: self.read_u32()?,
      dead_food_prob: self.read_f32()?,
      ping_delay_ms: self.read_u32()?,
      node_timeout_ms: self.read_u32()?,
    };
    config
      .validate()
      .map_err(|_| DecodeError::InvalidField("config"))
  }

  fn read_players(&mut self) -> Result<Vec<Peer>, DecodeError> {
    let count = self.read_u16()? as usize;
    let mut players = Vec::with_capacity(count.min(256));
    for _ in 0..count {
      players.push(Peer {
        id: self.read_i32()?,
        name: self.read_string()?,
        addr: self.read_addr()?,
        role: self.read_role()?,
        score: self.read_i32()?,
      });
    }
    Ok(players)
  }

  fn read_snapshot(&mut self) -> Result<WorldSnapshot, DecodeError> {
    let state_order = self.read_u64()?;
    let snake_count = self.read_u16()? as usize;
    let mut snakes = Vec::with_capacity(snake_count.min(256));
    for _ in 0..snake_count {
      let player_id = self.read_i32()?;
      let state = match self.read_u8()? {
        0 => SnakeState::Alive,
        1 => SnakeState::Zombie,
        _ => return Err(DecodeError::InvalidField("snake state")),
      };
      let direction = self.read_direction()?;
      let pending_direction = self.read_direction()?;
      let point_count = self.read_u16()? as usize;
      let mut points = Vec::with_capacity(point_count.min(1024));
      for _ in 0..point_count {
        points.push(self.read_coord()?);
      }
      snakes.push(SnakeSnapshot {
        player_id,
        points,
        direction,
        pending_direction,
        state,
      });
    }
    let food_count = self.read_u16()? as usize;
    let mut food = Vec::with_capacity(food_count.min(1024));
    for _ in 0..food_count {
      food.push(self.read_coord()?);
    }
    let players = self.read_players()?;
    Ok(WorldSnapshot {
      state_order,
      snakes,
      food,
      players,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_snapshot() -> WorldSnapshot {
    WorldSnapshot {
      state_order: 42,
      snakes: vec![SnakeSnapshot {
        player_id: 2,
        points: vec![Coord::new(3, 4), Coord::new(0, 2), Coord::new(-3, 0)],
        direction: Direction::Up,
        pending_direction: Direction::Left,
        state: SnakeState::Zombie,
      }],
      food: vec![Coord::new(0, 0), Coord::new(9, 7)],
      players: vec![
        Peer {
          id: 1,
          name: "host".to_string(),
          addr: None,
          role: NodeRole::Master,
          score: 3,
        },
        Peer {
          id: 2,
          name: "guest".to_string(),
          addr: Some("[::1]:7001".parse().expect("addr")),
          role: NodeRole::Deputy,
          score: 0,
        },
      ],
    }
  }

  #[test]
  fn every_message_kind_survives_encoding() {
    let messages = vec![
      GameMessage::new(1, MessageBody::Join {
        name: "Player-7".to_string(),
      }),
      GameMessage::new(2, MessageBody::Ack).with_receiver(Some(5)),
      GameMessage::new(3, MessageBody::Error {
        message: "no room".to_string(),
      }),
      GameMessage::new(4, MessageBody::State {
        snapshot: sample_snapshot(),
      })
      .with_sender(Some(1)),
      GameMessage::new(5, MessageBody::Steer {
        direction: Direction::Right,
      }),
      GameMessage::new(6, MessageBody::RoleChange {
        sender_role: Some(NodeRole::Viewer),
        receiver_role: Some(NodeRole::Master),
      })
      .with_sender(Some(1))
      .with_receiver(Some(2)),
      GameMessage::new(7, MessageBody::RoleChange {
        sender_role: None,
        receiver_role: Some(NodeRole::Deputy),
      }),
      GameMessage::new(u64::MAX, MessageBody::Ping),
      GameMessage::new(9, MessageBody::Announcement {
        config: GameConfig::default(),
        players: sample_snapshot().players,
        can_join: true,
      }),
    ];

    for message in messages {
      let bytes = encode(&message);
      assert_eq!(decode(&bytes), Ok(message));
    }
  }

  #[test]
  fn decode_rejects_other_versions() {
    let mut bytes = encode(&GameMessage::new(1, MessageBody::Ping));
    bytes[0] = VERSION + 1;
    assert_eq!(
      decode(&bytes),
      Err(DecodeError::UnsupportedVersion(VERSION + 1))
    );
  }

  #[test]
  fn decode_rejects_truncated_and_padded_datagrams() {
    let bytes = encode(&GameMessage::new(1, MessageBody::Join {
      name: "abc".to_string(),
    }));
    assert_eq!(decode(&bytes[..bytes.len() - 1]), Err(DecodeError::Truncated));

    let mut padded = bytes.clone();
    padded.push(0);
    assert_eq!(decode(&padded), Err(DecodeError::TrailingBytes(1)));
  }

  #[test]
  fn decode_rejects_unknown_type_and_bad_direction() {
    let mut encoder = Encoder::with_capacity(16);
    encoder.write_header(0x7f, 0);
    encoder.write_u64(1);
    assert_eq!(
      decode(&encoder.into_vec()),
      Err(DecodeError::UnknownType(0x7f))
    );

    let mut encoder = Encoder::with_capacity(16);
    encoder.write_header(TYPE_STEER, 0);
    encoder.write_u64(1);
    encoder.write_u8(9);
    assert_eq!(
      decode(&encoder.into_vec()),
      Err(DecodeError::InvalidField("direction"))
    );
  }

  #[test]
  fn fire_and_forget_kinds() {
    assert!(MessageKind::Ack.is_fire_and_forget());
    assert!(MessageKind::Announcement.is_fire_and_forget());
    assert!(MessageKind::Error.is_fire_and_forget());
    assert!(!MessageKind::State.is_fire_and_forget());
    assert!(!MessageKind::Ping.is_fire_and_forget());
    assert!(!MessageKind::Announcement.is_reply());
  }
}
