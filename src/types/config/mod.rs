pub mod contract;
pub mod eth_call;
pub mod indexer;
pub mod rpc;
