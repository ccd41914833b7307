use super::constants::SPAWN_REGION;
use super::types::{Coord, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
  Empty,
  Food,
  Body(PeerId),
  Head(PeerId),
}

#[derive(Debug, Clone)]
pub struct Field {
  width: i32,
  height: i32,
  cells: Vec<Cell>,
}

impl Field {
  pub fn new(width: i32, height: i32) -> Self {
    let len = (width.max(0) as usize) * (height.max(0) as usize);
    Self {
      width,
      height,
      cells: vec![Cell::Empty; len],
    }
  }

  fn index(&self, coord: Coord) -> usize {
    let coord = coord.wrapped(self.width, self.height);
    coord.y as usize * self.width as usize + coord.x as usize
  }

  pub fn get(&self, coord: Coord) -> Cell {
    self.cells[self.index(coord)]
  }

  pub fn set(&mut self, coord: Coord, cell: Cell) {
    let index = self.index(coord);
    self.cells[index] = cell;
  }

  pub fn is_empty(&self, coord: Coord) -> bool {
    self.get(coord) == Cell::Empty
  }

  // Centre of the first fully empty spawn square, scanning rows top to
  // bottom and each row left to right. Squares never wrap the edges.
  pub fn find_spawn_center(&self) -> Option<Coord> {
    for top in 0..=(self.height - SPAWN_REGION) {
      for left in 0..=(self.width - SPAWN_REGION) {
        if self.region_is_empty(left, top) {
          let half = SPAWN_REGION / 2;
          return Some(Coord::new(left + half, top + half));
        }
      }
    }
    None
  }

  fn region_is_empty(&self, left: i32, top: i32) -> bool {
    (top..top + SPAWN_REGION)
      .all(|y| (left..left + SPAWN_REGION).all(|x| self.is_empty(Coord::new(x, y))))
  }

  pub fn empty_cells(&self) -> Vec<Coord> {
    let mut out = Vec::new();
    for y in 0..self.height {
      for x in 0..self.width {
        let coord = Coord::new(x, y);
        if self.is_empty(coord) {
          out.push(coord);
        }
      }
    }
    out
  }
}
