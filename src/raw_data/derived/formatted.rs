use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use crate::raw_data::decoding::{CanonicalValue, LogRecord};

/// Compact, human-oriented projection of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedEvent {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub event: Option<String>,
    pub signature: Option<String>,
    pub args: Vec<CanonicalValue>,
}

/// Project records into block order. The stream itself is in completion order.
pub fn format_events(records: &[LogRecord]) -> Vec<FormattedEvent> {
    let mut formatted: Vec<FormattedEvent> = records
        .iter()
        .map(|r| FormattedEvent {
            block_number: r.block_number,
            transaction_hash: r.transaction_hash,
            log_index: r.log_index,
            event: r.event.clone(),
            signature: r.event_signature.clone(),
            args: r.args.clone(),
        })
        .collect();
    formatted.sort_by_key(|e| (e.block_number, e.log_index));
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloy::primitives::{Address, Bytes};

    fn record(block: u64, log_index: u64) -> LogRecord {
        LogRecord {
            block_number: block,
            block_hash: B256::ZERO,
            transaction_index: 0,
            transaction_hash: B256::with_last_byte(block as u8),
            log_index,
            removed: false,
            address: Address::ZERO,
            topics: Vec::new(),
            data: Bytes::new(),
            args: vec![CanonicalValue::text("1")],
            arg_names: vec!["amount".into()],
            event: Some("Deposit".into()),
            event_signature: Some("Deposit(address,uint256,address)".into()),
        }
    }

    #[test]
    fn test_sorted_by_block_then_log_index() {
        let formatted = format_events(&[record(9, 0), record(3, 2), record(3, 1)]);
        let keys: Vec<_> = formatted.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, vec![(3, 1), (3, 2), (9, 0)]);
        assert_eq!(
            formatted[0].signature.as_deref(),
            Some("Deposit(address,uint256,address)")
        );
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(format_events(&[record(1, 0)])).unwrap();
        let first = &json[0];
        assert_eq!(first["blockNumber"], 1);
        assert_eq!(first["event"], "Deposit");
        assert_eq!(first["args"], serde_json::json!(["1"]));
    }
}
