use super::types::{Coord, Direction, PeerId, SnakeSnapshot, SnakeState};

// Grid snake stored as its absolute head followed by axis-aligned runs that
// walk from the head towards the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
  pub player_id: PeerId,
  pub state: SnakeState,
  points: Vec<Coord>,
  direction: Direction,
  pending_direction: Direction,
}

impl Snake {
  pub fn spawn(player_id: PeerId, head: Coord, direction: Direction) -> Self {
    let (dx, dy) = direction.opposite().delta();
    Self {
      player_id,
      state: SnakeState::Alive,
      points: vec![head, Coord::new(dx, dy)],
      direction,
      pending_direction: direction,
    }
  }

  pub fn from_snapshot(snapshot: &SnakeSnapshot) -> Option<Self> {
    if snapshot.points.is_empty() {
      return None;
    }
    let runs_are_axis_aligned = snapshot
      .points
      .iter()
      .skip(1)
      .all(|run| run.x == 0 || run.y == 0);
    if !runs_are_axis_aligned {
      return None;
    }
    Some(Self {
      player_id: snapshot.player_id,
      state: snapshot.state,
      points: snapshot.points.clone(),
      direction: snapshot.direction,
      pending_direction: snapshot.pending_direction,
    })
  }

  pub fn snapshot(&self) -> SnakeSnapshot {
    SnakeSnapshot {
      player_id: self.player_id,
      points: self.points.clone(),
      direction: self.direction,
      pending_direction: self.pending_direction,
      state: self.state,
    }
  }

  pub fn head(&self) -> Coord {
    self.points[0]
  }

  pub fn direction(&self) -> Direction {
    self.direction
  }

  pub fn pending_direction(&self) -> Direction {
    self.pending_direction
  }

  pub fn try_steer(&mut self, direction: Direction) -> bool {
    if direction == self.direction.opposite() {
      return false;
    }
    self.pending_direction = direction;
    true
  }

  // Moves the head one cell, wrapping on both axes. The tail is left in
  // place; call `shrink_tail` unless the snake grew this step.
  pub fn advance(&mut self, width: i32, height: i32) -> Coord {
    if self.pending_direction != self.direction {
      self.direction = self.pending_direction;
      self.points.insert(1, Coord::new(0, 0));
    }
    if self.points.len() == 1 {
      self.points.push(Coord::new(0, 0));
    }
    let (dx, dy) = self.direction.delta();
    let head = Coord::new(self.points[0].x + dx, self.points[0].y + dy).wrapped(width, height);
    self.points[0] = head;
    self.points[1].x -= dx;
    self.points[1].y -= dy;
    head
  }

  pub fn shrink_tail(&mut self) {
    if self.points.len() <= 1 {
      return;
    }
    let Some(tail) = self.points.last_mut() else { return };
    tail.x -= tail.x.signum();
    tail.y -= tail.y.signum();
    if tail.x == 0 && tail.y == 0 {
      self.points.pop();
    }
  }

  pub fn is_consumed(&self) -> bool {
    self.points.len() <= 1
  }

  pub fn len(&self) -> usize {
    1 + self
      .points
      .iter()
      .skip(1)
      .map(|run| (run.x.abs() + run.y.abs()) as usize)
      .sum::<usize>()
  }

  pub fn cells(&self, width: i32, height: i32) -> Vec<Coord> {
    let mut cells = Vec::with_capacity(self.len());
    let mut cursor = self.points[0];
    cells.push(cursor.wrapped(width, height));
    for run in self.points.iter().skip(1) {
      let step = Coord::new(run.x.signum(), run.y.signum());
      for _ in 0..(run.x.abs() + run.y.abs()) {
        cursor = Coord::new(cursor.x + step.x, cursor.y + step.y);
        cells.push(cursor.wrapped(width, height));
      }
    }
    cells
  }
}
