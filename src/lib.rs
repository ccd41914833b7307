pub mod config;
pub mod game;
pub mod node;
pub mod presentation;
pub mod protocol;
pub mod shared;
pub mod transport;
