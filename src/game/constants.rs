pub const SPAWN_REGION: i32 = 5;
pub const MAX_DATAGRAM: usize = 65_507;
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_ANNOUNCE_MS: u64 = 1000;
pub const DEFAULT_MULTICAST_GROUP: ([u8; 4], u16) = ([239, 192, 0, 4], 9192);
pub const SENDER_IDLE_POLL_MS: u64 = 10;
pub const JOIN_REJECTED_NO_ROOM: &str = "no room for a new snake";
pub const JOIN_REJECTED_NOT_COORDINATOR: &str = "this node does not coordinate the game";
