use crate::game::types::NodeRole;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoleError {
  #[error("illegal role transition {from:?} -> {to:?}")]
  Illegal { from: NodeRole, to: NodeRole },
}

impl NodeRole {
  // Every role change a node may make goes through here. Staying in the
  // same role is always allowed; a viewer never plays again.
  pub fn transition_to(self, next: NodeRole) -> Result<NodeRole, RoleError> {
    use NodeRole::*;
    match (self, next) {
      (from, to) if from == to => Ok(to),
      (Normal, Deputy)
      | (Deputy, Master)
      | (Master, Viewer)
      | (Normal, Viewer)
      | (Deputy, Viewer) => Ok(next),
      (from, to) => Err(RoleError::Illegal { from, to }),
    }
  }

  pub fn coordinates(self) -> bool {
    self == NodeRole::Master
  }
}
