mod addresses;
mod balances;
pub mod formatted;

pub use addresses::extract_addresses;
pub use balances::filter_nonzero_balances;
pub use formatted::format_events;
