pub mod client;
pub mod message;
pub mod peers;
pub mod processor;
pub mod store;
pub mod tally;

pub use client::*;
pub use message::*;
pub use peers::*;
pub use processor::*;
pub use store::*;
pub use tally::*;
