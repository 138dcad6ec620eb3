pub mod decoder;
pub mod flow;
pub mod payload;
pub mod requester;
pub mod units;

pub use flow::TradeService;
pub use requester::TransactionRequester;
