pub mod api;
pub mod aptos;
pub mod error;
pub mod market_data;
pub mod trading;
pub mod utils;
