pub mod constants;
pub mod field;
pub mod input;
pub mod snake;
pub mod types;
pub mod world;
