pub mod cli;
pub mod client;
pub mod mock;
pub mod types;
