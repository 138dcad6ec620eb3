pub mod feed;
pub mod models;
pub mod parser;
pub mod portfolio;
pub mod store;
