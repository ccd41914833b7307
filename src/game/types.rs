use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub type PeerId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
  pub x: i32,
  pub y: i32,
}

impl Coord {
  pub const fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }

  pub fn wrapped(self, width: i32, height: i32) -> Self {
    Self {
      x: self.x.rem_euclid(width),
      y: self.y.rem_euclid(height),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
  Up,
  Down,
  Left,
  Right,
}

impl Direction {
  pub const ALL: [Direction; 4] = [
    Direction::Up,
    Direction::Down,
    Direction::Left,
    Direction::Right,
  ];

  pub fn opposite(self) -> Self {
    match self {
      Direction::Up => Direction::Down,
      Direction::Down => Direction::Up,
      Direction::Left => Direction::Right,
      Direction::Right => Direction::Left,
    }
  }

  // Unit step on the grid. `Up` decreases `y`.
  pub fn delta(self) -> (i32, i32) {
    match self {
      Direction::Up => (0, -1),
      Direction::Down => (0, 1),
      Direction::Left => (-1, 0),
      Direction::Right => (1, 0),
    }
  }

  pub fn to_wire(self) -> u8 {
    match self {
      Direction::Up => 1,
      Direction::Down => 2,
      Direction::Left => 3,
      Direction::Right => 4,
    }
  }

  pub fn from_wire(value: u8) -> Option<Self> {
    match value {
      1 => Some(Direction::Up),
      2 => Some(Direction::Down),
      3 => Some(Direction::Left),
      4 => Some(Direction::Right),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
  Normal,
  Master,
  Deputy,
  Viewer,
}

impl NodeRole {
  pub fn to_wire(self) -> u8 {
    match self {
      NodeRole::Normal => 0,
      NodeRole::Master => 1,
      NodeRole::Deputy => 2,
      NodeRole::Viewer => 3,
    }
  }

  pub fn from_wire(value: u8) -> Option<Self> {
    match value {
      0 => Some(NodeRole::Normal),
      1 => Some(NodeRole::Master),
      2 => Some(NodeRole::Deputy),
      3 => Some(NodeRole::Viewer),
      _ => None,
    }
  }

  pub fn is_active(self) -> bool {
    !matches!(self, NodeRole::Viewer)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnakeState {
  Alive,
  Zombie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
  pub id: PeerId,
  pub name: String,
  // `None` for the coordinator's own entry; receivers fill in the
  // address the snapshot arrived from.
  pub addr: Option<SocketAddr>,
  pub role: NodeRole,
  pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnakeSnapshot {
  pub player_id: PeerId,
  // Absolute head position followed by head-relative runs towards the tail.
  pub points: Vec<Coord>,
  pub direction: Direction,
  pub pending_direction: Direction,
  pub state: SnakeState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
  pub state_order: u64,
  pub snakes: Vec<SnakeSnapshot>,
  pub food: Vec<Coord>,
  pub players: Vec<Peer>,
}

impl WorldSnapshot {
  pub fn empty() -> Self {
    Self {
      state_order: 0,
      snakes: Vec::new(),
      food: Vec::new(),
      players: Vec::new(),
    }
  }
}
