mod client;
mod election;
pub mod err;
pub mod log;
pub mod message;
pub mod replica;
mod replication;

pub use err::Error;
pub use message::{Body, Message};
pub use replica::{Replica, Role};
