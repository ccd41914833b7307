use super::types::Direction;

pub fn parse_direction(value: &str) -> Option<Direction> {
  match value.trim().to_ascii_lowercase().as_str() {
    "w" | "up" => Some(Direction::Up),
    "s" | "down" => Some(Direction::Down),
    "a" | "left" => Some(Direction::Left),
    "d" | "right" => Some(Direction::Right),
    _ => None,
  }
}
