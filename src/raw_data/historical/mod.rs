pub mod eth_calls;
pub mod logs;
pub mod ranges;
