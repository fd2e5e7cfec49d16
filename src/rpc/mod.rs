pub mod concurrent;
pub mod ledger;
mod rpc;

pub use concurrent::{execute_settled, spawn_settled, Settlement};
pub use ledger::{ContractLedger, Ledger, LogFilter};
pub use rpc::{RateLimitConfig, RetryConfig, RpcClient, RpcClientConfig, RpcError};
