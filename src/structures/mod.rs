pub mod bus;
pub mod message;
pub mod network;
pub mod node;
pub mod testing;
