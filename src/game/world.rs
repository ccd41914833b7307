use super::field::{Cell, Field};
use super::snake::Snake;
use super::types::{Coord, Direction, NodeRole, Peer, PeerId, SnakeState, WorldSnapshot};
use crate::config::GameConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
  // Players whose live snake died this step, in peer-id order.
  pub died: Vec<PeerId>,
}

// Replicated game world. Only the coordinator calls `tick`; every
// other node replaces its copy wholesale via `apply_snapshot`.
#[derive(Debug)]
pub struct World {
  config: GameConfig,
  state_order: u64,
  peers: BTreeMap<PeerId, Peer>,
  snakes: BTreeMap<PeerId, Snake>,
  food: Vec<Coord>,
  steer_queue: Vec<(PeerId, Direction)>,
  rng: StdRng,
}

impl World {
  pub fn new(config: GameConfig) -> Self {
    Self::with_rng(config, StdRng::from_entropy())
  }

  pub fn with_seed(config: GameConfig, seed: u64) -> Self {
    Self::with_rng(config, StdRng::seed_from_u64(seed))
  }

  fn with_rng(config: GameConfig, rng: StdRng) -> Self {
    Self {
      config,
      state_order: 0,
      peers: BTreeMap::new(),
      snakes: BTreeMap::new(),
      food: Vec::new(),
      steer_queue: Vec::new(),
      rng,
    }
  }

  pub fn config(&self) -> &GameConfig {
    &self.config
  }

  pub fn state_order(&self) -> u64 {
    self.state_order
  }

  pub fn peers(&self) -> impl Iterator<Item = &Peer> {
    self.peers.values()
  }

  pub fn peer(&self, id: PeerId) -> Option<&Peer> {
    self.peers.get(&id)
  }

  pub fn peer_by_addr(&self, addr: SocketAddr) -> Option<&Peer> {
    self.peers.values().find(|peer| peer.addr == Some(addr))
  }

  pub fn peer_with_role(&self, role: NodeRole) -> Option<&Peer> {
    self.peers.values().find(|peer| peer.role == role)
  }

  pub fn max_peer_id(&self) -> PeerId {
    self.peers.keys().copied().max().unwrap_or(0)
  }

  pub fn set_role(&mut self, id: PeerId, role: NodeRole) -> bool {
    let Some(peer) = self.peers.get_mut(&id) else { return false };
    peer.role = role;
    true
  }

  pub fn snake(&self, id: PeerId) -> Option<&Snake> {
    self.snakes.get(&id)
  }

  pub fn snakes(&self) -> impl Iterator<Item = &Snake> {
    self.snakes.values()
  }

  pub fn food(&self) -> &[Coord] {
    &self.food
  }

  pub fn active_players(&self) -> usize {
    self.peers.values().filter(|peer| peer.role.is_active()).count()
  }

  pub fn field(&self) -> Field {
    let (width, height) = (self.config.width, self.config.height);
    let mut field = Field::new(width, height);
    for food in &self.food {
      field.set(*food, Cell::Food);
    }
    for snake in self.snakes.values() {
      for cell in snake.cells(width, height).into_iter().skip(1) {
        field.set(cell, Cell::Body(snake.player_id));
      }
    }
    for snake in self.snakes.values() {
      field.set(snake.head(), Cell::Head(snake.player_id));
    }
    field
  }

  pub fn try_spawn(&mut self, peer: Peer) -> bool {
    let Some(center) = self.field().find_spawn_center() else { return false };
    let direction = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];
    let snake = Snake::spawn(peer.id, center, direction);
    self.snakes.insert(peer.id, snake);
    self.peers.insert(peer.id, peer);
    true
  }

  pub fn queue_steer(&mut self, id: PeerId, direction: Direction) {
    self.steer_queue.push((id, direction));
  }

  pub fn pending_steers(&self) -> &[(PeerId, Direction)] {
    &self.steer_queue
  }

  pub fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
    let peer = self.peers.remove(&id)?;
    if let Some(snake) = self.snakes.get_mut(&id) {
      snake.state = SnakeState::Zombie;
    }
    Some(peer)
  }

  pub fn discard_snake(&mut self, id: PeerId) -> bool {
    self.snakes.remove(&id).is_some()
  }

  pub fn top_up_food(&mut self) {
    let target = self.config.target_food(self.active_players());
    if self.food.len() >= target {
      return;
    }
    let mut empty = self.field().empty_cells();
    let missing = (target - self.food.len()).min(empty.len());
    for _ in 0..missing {
      let pick = self.rng.gen_range(0..empty.len());
      self.food.push(empty.swap_remove(pick));
    }
  }

  pub fn tick(&mut self) -> TickOutcome {
    let (width, height) = (self.config.width, self.config.height);

    for (id, direction) in std::mem::take(&mut self.steer_queue) {
      let Some(snake) = self.snakes.get_mut(&id) else { continue };
      if snake.state == SnakeState::Alive {
        snake.try_steer(direction);
      }
    }

    let mut eaten: HashSet<Coord> = HashSet::new();
    for snake in self.snakes.values_mut() {
      let head = snake.advance(width, height);
      let on_food = self.food.contains(&head) && !eaten.contains(&head);
      if on_food {
        eaten.insert(head);
        if snake.state == SnakeState::Alive {
          if let Some(peer) = self.peers.get_mut(&snake.player_id) {
            peer.score += 1;
          }
        }
      } else {
        snake.shrink_tail();
      }
      if snake.state == SnakeState::Zombie {
        snake.shrink_tail();
      }
    }
    self.food.retain(|food| !eaten.contains(food));
    self.snakes
      .retain(|_, snake| !(snake.state == SnakeState::Zombie && snake.is_consumed()));

    let dead = self.find_collisions();
    let mut outcome = TickOutcome::default();
    for id in dead {
      if self.kill_snake(id) {
        outcome.died.push(id);
      }
    }

    self.top_up_food();
    self.state_order += 1;
    outcome
  }

  // Snakes whose head, after every body moved, sits on any body cell or on
  // another head. Evaluated in peer-id order.
  fn find_collisions(&self) -> Vec<PeerId> {
    let (width, height) = (self.config.width, self.config.height);
    let mut bodies: HashSet<Coord> = HashSet::new();
    let mut heads: HashMap<Coord, usize> = HashMap::new();
    for snake in self.snakes.values() {
      let cells = snake.cells(width, height);
      *heads.entry(cells[0]).or_default() += 1;
      bodies.extend(cells.into_iter().skip(1));
    }
    self.snakes
      .values()
      .filter(|snake| {
        let head = snake.head();
        bodies.contains(&head) || heads.get(&head).copied().unwrap_or(0) > 1
      })
      .map(|snake| snake.player_id)
      .collect()
  }

  fn kill_snake(&mut self, id: PeerId) -> bool {
    let Some(snake) = self.snakes.remove(&id) else { return false };
    let (width, height) = (self.config.width, self.config.height);
    let occupied: HashSet<Coord> = self
      .snakes
      .values()
      .flat_map(|other| other.cells(width, height))
      .collect();
    for cell in snake.cells(width, height).into_iter().skip(1) {
      if occupied.contains(&cell) || self.food.contains(&cell) {
        continue;
      }
      if self.rng.gen::<f32>() < self.config.dead_food_prob {
        self.food.push(cell);
      }
    }
    tracing::debug!(player_id = id, zombie = (snake.state == SnakeState::Zombie), "snake died");
    if snake.state != SnakeState::Alive {
      return false;
    }
    if let Some(peer) = self.peers.get_mut(&id) {
      peer.role = NodeRole::Viewer;
    }
    true
  }

  pub fn snapshot(&self) -> WorldSnapshot {
    WorldSnapshot {
      state_order: self.state_order,
      snakes: self.snakes.values().map(Snake::snapshot).collect(),
      food: self.food.clone(),
      players: self.peers.values().cloned().collect(),
    }
  }

  // Replaces the world with `snapshot` when it is strictly newer. Peers
  // without an address are assumed to live at `origin`.
  pub fn apply_snapshot(&mut self, snapshot: &WorldSnapshot, origin: SocketAddr) -> bool {
    if snapshot.state_order <= self.state_order {
      return false;
    }
    self.state_order = snapshot.state_order;
    self.snakes = snapshot
      .snakes
      .iter()
      .filter_map(Snake::from_snapshot)
      .map(|snake| (snake.player_id, snake))
      .collect();
    self.food = snapshot.food.clone();
    self.peers = snapshot
      .players
      .iter()
      .cloned()
      .map(|mut peer| {
        if peer.addr.is_none() {
          peer.addr = Some(origin);
        }
        (peer.id, peer)
      })
      .collect();
    true
  }

  #[cfg(test)]
  pub(crate) fn insert_snake(&mut self, snake: Snake) {
    self.snakes.insert(snake.player_id, snake);
  }

  #[cfg(test)]
  pub(crate) fn insert_peer(&mut self, peer: Peer) {
    self.peers.insert(peer.id, peer);
  }

  #[cfg(test)]
  pub(crate) fn set_food(&mut self, food: Vec<Coord>) {
    self.food = food;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn small_config() -> GameConfig {
    GameConfig {
      width: 10,
      height: 10,
      food_static: 3,
      food_per_player: 1.0,
      dead_food_prob: 0.0,
      ..GameConfig::default()
    }
  }

  fn make_peer(id: PeerId, role: NodeRole) -> Peer {
    Peer {
      id,
      name: format!("p{id}"),
      addr: None,
      role,
      score: 0,
    }
  }

  fn origin() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], 4000))
  }

  #[test]
  fn spawn_then_top_up_yields_target_food_off_the_snake() {
    let mut world = World::with_seed(small_config(), 7);
    assert!(world.try_spawn(make_peer(1, NodeRole::Master)));
    world.top_up_food();

    assert_eq!(world.food().len(), 4);
    let snake_cells = world.snake(1).expect("snake").cells(10, 10);
    assert_eq!(snake_cells[0], Coord::new(2, 2));
    for food in world.food() {
      assert!(!snake_cells.contains(food));
    }
    let distinct: HashSet<Coord> = world.food().iter().copied().collect();
    assert_eq!(distinct.len(), 4);
  }

  #[test]
  fn spawn_fails_without_mutation_when_field_is_full() {
    let mut world = World::with_seed(small_config(), 1);
    let mut blocked = Vec::new();
    for y in 0..10 {
      blocked.push(Coord::new(4, y));
      blocked.push(Coord::new(9, y));
    }
    world.set_food(blocked.clone());

    assert!(!world.try_spawn(make_peer(2, NodeRole::Normal)));
    assert!(world.peer(2).is_none());
    assert!(world.snake(2).is_none());
    assert_eq!(world.food(), blocked.as_slice());
  }

  #[test]
  fn tick_increments_state_order_by_one() {
    let mut world = World::with_seed(small_config(), 3);
    world.try_spawn(make_peer(1, NodeRole::Master));
    let before = world.state_order();
    world.tick();
    assert_eq!(world.state_order(), before + 1);
    world.tick();
    assert_eq!(world.state_order(), before + 2);
  }

  #[test]
  fn queued_reverse_steer_is_ignored() {
    let mut world = World::with_seed(small_config(), 3);
    world.insert_peer(make_peer(1, NodeRole::Master));
    world.insert_snake(Snake::spawn(1, Coord::new(5, 5), Direction::Up));
    world.queue_steer(1, Direction::Down);
    world.tick();
    let snake = world.snake(1).expect("snake");
    assert_eq!(snake.direction(), Direction::Up);
    assert_eq!(snake.head(), Coord::new(5, 4));
    assert!(world.pending_steers().is_empty());
  }

  #[test]
  fn eating_grows_snake_and_scores() {
    let mut world = World::with_seed(small_config(), 3);
    world.insert_peer(make_peer(1, NodeRole::Master));
    world.insert_snake(Snake::spawn(1, Coord::new(5, 5), Direction::Right));
    world.set_food(vec![Coord::new(6, 5)]);

    world.tick();

    let snake = world.snake(1).expect("snake");
    assert_eq!(snake.len(), 3);
    assert_eq!(world.peer(1).expect("peer").score, 1);
    assert!(!world.food().contains(&Coord::new(6, 5)));
    // replacement food keeps the target count
    assert_eq!(world.food().len(), 4);
  }

  #[test]
  fn head_into_body_kills_and_makes_viewer() {
    let mut world = World::with_seed(small_config(), 3);
    world.insert_peer(make_peer(1, NodeRole::Master));
    world.insert_peer(make_peer(2, NodeRole::Normal));
    // snake 1 runs along row 5 from (3,5) to (6,5), heading right
    let mut long = Snake::spawn(1, Coord::new(3, 5), Direction::Right);
    for _ in 0..3 {
      long.advance(10, 10);
    }
    world.insert_snake(long);
    // snake 2 heads down into (5,5)
    world.insert_snake(Snake::spawn(2, Coord::new(5, 4), Direction::Down));

    let outcome = world.tick();

    assert_eq!(outcome.died, vec![2]);
    assert!(world.snake(2).is_none());
    assert_eq!(world.peer(2).expect("peer").role, NodeRole::Viewer);
    assert!(world.snake(1).is_some());
  }

  #[test]
  fn head_on_collision_kills_both() {
    let mut world = World::with_seed(small_config(), 3);
    world.insert_peer(make_peer(1, NodeRole::Master));
    world.insert_peer(make_peer(2, NodeRole::Normal));
    world.insert_snake(Snake::spawn(1, Coord::new(3, 5), Direction::Right));
    world.insert_snake(Snake::spawn(2, Coord::new(5, 5), Direction::Left));

    let outcome = world.tick();

    assert_eq!(outcome.died, vec![1, 2]);
    assert_eq!(world.snakes().count(), 0);
  }

  #[test]
  fn dead_snake_drops_food_with_certain_probability() {
    let config = GameConfig {
      dead_food_prob: 1.0,
      food_static: 0,
      food_per_player: 0.0,
      ..small_config()
    };
    let mut world = World::with_seed(config, 3);
    world.insert_peer(make_peer(1, NodeRole::Master));
    world.insert_peer(make_peer(2, NodeRole::Normal));
    let mut long = Snake::spawn(1, Coord::new(3, 5), Direction::Right);
    for _ in 0..3 {
      long.advance(10, 10);
    }
    world.insert_snake(long);
    let mut victim = Snake::spawn(2, Coord::new(5, 2), Direction::Down);
    victim.advance(10, 10);
    victim.advance(10, 10);
    // victim occupies (5,4) (5,3) (5,2) (5,1); next step puts its head on (5,5)
    world.insert_snake(victim);

    world.tick();

    let mut food = world.food().to_vec();
    food.sort();
    assert_eq!(
      food,
      vec![Coord::new(5, 2), Coord::new(5, 3), Coord::new(5, 4)]
    );
  }

  #[test]
  fn departed_peer_leaves_a_shrinking_zombie() {
    let config = GameConfig {
      food_static: 0,
      food_per_player: 0.0,
      ..small_config()
    };
    let mut world = World::with_seed(config, 3);
    world.insert_peer(make_peer(2, NodeRole::Normal));
    let mut snake = Snake::spawn(2, Coord::new(5, 5), Direction::Right);
    snake.advance(10, 10);
    snake.advance(10, 10);
    world.insert_snake(snake);
    assert_eq!(world.snake(2).expect("snake").len(), 4);

    let removed = world.remove_peer(2).expect("peer removed");
    assert_eq!(removed.id, 2);
    assert_eq!(world.snake(2).expect("zombie").state, SnakeState::Zombie);

    world.tick();
    assert_eq!(world.snake(2).expect("zombie").len(), 3);
    world.tick();
    assert_eq!(world.snake(2).expect("zombie").len(), 2);
    world.tick();
    assert!(world.snake(2).is_none());
  }

  #[test]
  fn stale_snapshot_is_a_no_op() {
    let mut replica = World::with_seed(small_config(), 1);
    let mut master = World::with_seed(small_config(), 2);
    master.try_spawn(make_peer(1, NodeRole::Master));
    master.tick();
    master.tick();
    let newer = master.snapshot();
    assert!(replica.apply_snapshot(&newer, origin()));
    assert_eq!(replica.state_order(), 2);

    let mut older = newer.clone();
    older.state_order = 1;
    older.food.clear();
    assert!(!replica.apply_snapshot(&older, origin()));
    assert!(!replica.apply_snapshot(&newer, origin()));
    assert_eq!(replica.snapshot().food, newer.food);
  }

  #[test]
  fn applied_snapshot_fills_missing_master_address() {
    let mut master = World::with_seed(small_config(), 2);
    master.try_spawn(make_peer(1, NodeRole::Master));
    master.tick();

    let mut replica = World::with_seed(small_config(), 1);
    replica.apply_snapshot(&master.snapshot(), origin());
    assert_eq!(replica.peer(1).expect("master").addr, Some(origin()));
    assert_eq!(replica.peer_by_addr(origin()).map(|peer| peer.id), Some(1));
  }
}
