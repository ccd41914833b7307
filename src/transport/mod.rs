pub mod discovery;
pub mod receiver;
pub mod sender;
