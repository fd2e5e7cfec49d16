use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event_parsing::{EventRegistry, ParsedEvent};
use super::values::{normalize_value, CanonicalValue, SerializationConfig};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Log is missing {0} (pending log?)")]
    MissingField(&'static str),

    #[error("Event {event}: expected {expected} topics, got {actual}")]
    TopicCount {
        event: String,
        expected: usize,
        actual: usize,
    },

    #[error("Event {event}: failed to decode {part}: {message}")]
    Decode {
        event: String,
        part: String,
        message: String,
    },
}

/// A log in its canonical, serialization-safe form. One JSON line per record
/// in the events stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_index: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Decoded arguments in declaration order. Empty for unrecognized events.
    #[serde(default)]
    pub args: Vec<CanonicalValue>,
    #[serde(default)]
    pub arg_names: Vec<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub event_signature: Option<String>,
}

/// Normalize a raw RPC log against the job's known events.
///
/// Logs whose topic0 is not registered are kept with no decoded arguments.
/// A log that is still pending, or whose payload does not match its event,
/// is an error.
pub fn normalize_log(
    log: &Log,
    events: &EventRegistry,
    serialization: &SerializationConfig,
) -> Result<LogRecord, NormalizeError> {
    let block_number = log
        .block_number
        .ok_or(NormalizeError::MissingField("blockNumber"))?;
    let block_hash = log.block_hash.ok_or(NormalizeError::MissingField("blockHash"))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(NormalizeError::MissingField("transactionHash"))?;
    let transaction_index = log
        .transaction_index
        .ok_or(NormalizeError::MissingField("transactionIndex"))?;
    let log_index = log.log_index.ok_or(NormalizeError::MissingField("logIndex"))?;

    let topics = log.inner.data.topics().to_vec();
    let data = log.inner.data.data.clone();

    let mut record = LogRecord {
        block_number,
        block_hash,
        transaction_index,
        transaction_hash,
        log_index,
        removed: log.removed,
        address: log.inner.address,
        topics,
        data,
        args: Vec::new(),
        arg_names: Vec::new(),
        event: None,
        event_signature: None,
    };

    let Some(event) = record.topics.first().and_then(|t| events.by_topic0(t)) else {
        tracing::debug!(
            "Unrecognized log at block {} index {}",
            record.block_number,
            record.log_index
        );
        return Ok(record);
    };

    record.args = decode_args(event, &record.topics, &record.data, serialization)?;
    record.arg_names = event.input_names();
    record.event = Some(event.name.clone());
    record.event_signature = Some(event.canonical_signature.clone());

    Ok(record)
}

fn decode_args(
    event: &ParsedEvent,
    topics: &[B256],
    data: &[u8],
    serialization: &SerializationConfig,
) -> Result<Vec<CanonicalValue>, NormalizeError> {
    let expected = 1 + event.indexed_inputs().count();
    if topics.len() != expected {
        return Err(NormalizeError::TopicCount {
            event: event.canonical_signature.clone(),
            expected,
            actual: topics.len(),
        });
    }

    let data_types: Vec<DynSolType> = event.data_inputs().map(|p| p.sol_type.clone()).collect();
    let data_values = if data_types.is_empty() {
        Vec::new()
    } else {
        match DynSolType::Tuple(data_types).abi_decode_params(data) {
            Ok(DynSolValue::Tuple(values)) => values,
            Ok(other) => vec![other],
            Err(e) => {
                return Err(NormalizeError::Decode {
                    event: event.canonical_signature.clone(),
                    part: "data".to_string(),
                    message: e.to_string(),
                })
            }
        }
    };
    let mut data_values = data_values.into_iter();

    let mut topic_iter = topics[1..].iter();
    let mut args = Vec::with_capacity(event.inputs.len());

    for input in &event.inputs {
        let value = if input.indexed {
            // Count was checked above.
            let Some(topic) = topic_iter.next() else {
                break;
            };
            if input.is_hashed_topic() {
                CanonicalValue::Text(topic.to_string())
            } else {
                let decoded = input.sol_type.abi_decode(topic.as_slice()).map_err(|e| {
                    NormalizeError::Decode {
                        event: event.canonical_signature.clone(),
                        part: format!("topic '{}'", input.name),
                        message: e.to_string(),
                    }
                })?;
                normalize_value(&decoded, serialization)
            }
        } else {
            let decoded = data_values.next().ok_or_else(|| NormalizeError::Decode {
                event: event.canonical_signature.clone(),
                part: format!("data '{}'", input.name),
                message: "missing value".to_string(),
            })?;
            normalize_value(&decoded, serialization)
        };
        args.push(value);
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloy::primitives::{address, LogData, U256};

    use crate::types::config::contract::EventConfig;

    const DEPOSIT: &str = "Deposit(address indexed user, uint256 amount, address recipient)";

    fn registry() -> EventRegistry {
        EventRegistry::from_configs(&[EventConfig {
            signature: DEPOSIT.to_string(),
        }])
        .unwrap()
    }

    fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address!("5954ab967bc958940b7eb73ee84797dc8a2afbb9"),
                data: LogData::new_unchecked(topics, data.into()),
            },
            block_hash: Some(B256::repeat_byte(0x11)),
            block_number: Some(14_400_600),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x22)),
            transaction_index: Some(3),
            log_index: Some(7),
            removed: false,
        }
    }

    fn deposit_log(amount: U256) -> Log {
        let event = ParsedEvent::from_signature(DEPOSIT).unwrap();
        let user = address!("00000000000000000000000000000000000000aa");
        let recipient = address!("00000000000000000000000000000000000000bb");
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(amount, 256),
            DynSolValue::Address(recipient),
        ])
        .abi_encode_params();
        raw_log(vec![event.topic0, user.into_word()], data)
    }

    #[test]
    fn test_decodes_known_event() {
        let amount = U256::from(12_345_678_901_234_567_890u128);
        let record =
            normalize_log(&deposit_log(amount), &registry(), &SerializationConfig::default())
                .unwrap();

        assert_eq!(record.event.as_deref(), Some("Deposit"));
        assert_eq!(
            record.event_signature.as_deref(),
            Some("Deposit(address,uint256,address)")
        );
        assert_eq!(record.arg_names, vec!["user", "amount", "recipient"]);
        assert_eq!(
            record.args.first(),
            Some(&CanonicalValue::text(
                address!("00000000000000000000000000000000000000aa").to_checksum(None)
            ))
        );
        assert_eq!(
            record.args.get(1),
            Some(&CanonicalValue::text("12345678901234567890"))
        );
        assert_eq!(record.block_number, 14_400_600);
        assert_eq!(record.log_index, 7);
    }

    #[test]
    fn test_large_quantity_survives_json_round_trip() {
        let amount = U256::from(12_345_678_901_234_567_890u128);
        let record =
            normalize_log(&deposit_log(amount), &registry(), &SerializationConfig::default())
                .unwrap();

        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains(r#""12345678901234567890""#));
        assert!(line.contains(r#""blockNumber":14400600"#));

        let back: LogRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.args.get(1).and_then(CanonicalValue::as_quantity), Some(amount));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let log = deposit_log(U256::from(5u64));
        let events = registry();
        let config = SerializationConfig::default();

        let first = normalize_log(&log, &events, &config).unwrap();
        let second = normalize_log(&log, &events, &config).unwrap();
        assert_eq!(first, second);

        let reparsed: LogRecord =
            serde_json::from_str(&serde_json::to_string(&first).unwrap()).unwrap();
        assert_eq!(
            serde_json::to_string(&reparsed).unwrap(),
            serde_json::to_string(&first).unwrap()
        );
    }

    #[test]
    fn test_unknown_event_is_kept_undecoded() {
        let log = raw_log(vec![B256::repeat_byte(0x99)], vec![1, 2, 3]);
        let record = normalize_log(&log, &registry(), &SerializationConfig::default()).unwrap();
        assert!(record.event.is_none());
        assert!(record.args.is_empty());
        assert_eq!(record.data.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_pending_log_is_malformed() {
        let mut log = deposit_log(U256::from(1u64));
        log.block_hash = None;
        assert!(matches!(
            normalize_log(&log, &registry(), &SerializationConfig::default()),
            Err(NormalizeError::MissingField("blockHash"))
        ));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let event = ParsedEvent::from_signature(DEPOSIT).unwrap();
        let log = raw_log(vec![event.topic0, B256::ZERO], vec![0u8; 16]);
        assert!(matches!(
            normalize_log(&log, &registry(), &SerializationConfig::default()),
            Err(NormalizeError::Decode { .. })
        ));

        let log = raw_log(vec![event.topic0], vec![0u8; 64]);
        assert!(matches!(
            normalize_log(&log, &registry(), &SerializationConfig::default()),
            Err(NormalizeError::TopicCount { expected: 2, actual: 1, .. })
        ));
    }
}
