use std::collections::HashMap;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{keccak256, Address, Bytes};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use thiserror::Error;

use crate::raw_data::decoding::event_parsing::{canonical_type, parse_param_list};
use crate::raw_data::decoding::{CanonicalValue, EventRegistry};
use crate::raw_data::historical::ranges::BlockRange;
use crate::rpc::{RpcClient, RpcError};
use crate::types::config::eth_call::EthCallConfig;
use crate::types::task::CallTask;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unknown event '{0}' in log filter")]
    UnknownEvent(String),

    #[error("Named log filter lists no events")]
    EmptyFilter,

    #[error("Invalid call signature '{0}': {1}")]
    CallSignature(String, String),

    #[error("Duplicate call method '{0}'")]
    DuplicateMethod(String),
}

/// Which logs of the contract a fetch task asks for.
#[derive(Debug, Clone)]
pub enum LogFilter {
    /// Every log emitted by the contract.
    All,
    /// Only logs whose topic0 belongs to one of the named events.
    Named(Vec<String>),
    /// A filter computed from the registered events. Address and block range
    /// are applied on top.
    Derived(fn(&EventRegistry) -> Filter),
}

impl LogFilter {
    pub fn build(&self, address: Address, events: &EventRegistry) -> Result<Filter, LedgerError> {
        let filter = match self {
            LogFilter::All => Filter::new(),
            LogFilter::Named(names) => {
                if names.is_empty() {
                    return Err(LedgerError::EmptyFilter);
                }
                let mut topic0s = Vec::new();
                for name in names {
                    let before = topic0s.len();
                    topic0s.extend(events.by_name(name).map(|e| e.topic0));
                    if topic0s.len() == before {
                        return Err(LedgerError::UnknownEvent(name.clone()));
                    }
                }
                Filter::new().event_signature(topic0s)
            }
            LogFilter::Derived(derive) => derive(events),
        };
        Ok(filter.address(address))
    }
}

/// The minimal ledger surface the engine needs.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Current chain height.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Raw logs of the job's contract in one inclusive window.
    async fn get_logs(&self, range: BlockRange) -> Result<Vec<Log>, RpcError>;

    /// Invoke a read-only method and return its decoded result.
    async fn call(&self, task: &CallTask) -> Result<DynSolValue, RpcError>;
}

/// A read-only method resolved from its signature and declared output type.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub name: String,
    pub canonical_signature: String,
    pub selector: [u8; 4],
    pub inputs: Vec<DynSolType>,
    pub output: DynSolType,
}

impl ParsedCall {
    pub fn from_config(config: &EthCallConfig) -> Result<Self, LedgerError> {
        let invalid = |msg: String| LedgerError::CallSignature(config.function.clone(), msg);

        let function = config.function.trim();
        let open = function
            .find('(')
            .ok_or_else(|| invalid("missing parameter list".to_string()))?;
        let name = function[..open].trim();
        if name.is_empty() {
            return Err(invalid("missing function name".to_string()));
        }

        let close = function
            .rfind(')')
            .filter(|&close| close > open)
            .ok_or_else(|| invalid("unterminated parameter list".to_string()))?;
        let inputs: Vec<DynSolType> = parse_param_list(&function[open + 1..close], function)
            .map_err(|e| invalid(e.to_string()))?
            .into_iter()
            .map(|param| param.sol_type)
            .collect();
        let output = canonical_type(&config.output_type)
            .ok()
            .and_then(|ty| DynSolType::parse(&ty).ok())
            .ok_or_else(|| invalid(format!("invalid output type {}", config.output_type)))?;

        let types: Vec<String> = inputs.iter().map(|t| t.sol_type_name().into_owned()).collect();
        let canonical_signature = format!("{}({})", name, types.join(","));

        Ok(Self {
            name: name.to_string(),
            selector: compute_function_selector(&canonical_signature),
            canonical_signature,
            inputs,
            output,
        })
    }

    pub fn encode(&self, args: &[CanonicalValue]) -> Result<Bytes, RpcError> {
        if args.len() != self.inputs.len() {
            return Err(RpcError::InvalidCall(format!(
                "{} expects {} arguments, got {}",
                self.canonical_signature,
                self.inputs.len(),
                args.len()
            )));
        }

        let values = self
            .inputs
            .iter()
            .zip(args)
            .map(|(ty, arg)| to_sol_value(ty, arg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut calldata = self.selector.to_vec();
        calldata.extend(DynSolValue::Tuple(values).abi_encode_params());
        Ok(calldata.into())
    }

    pub fn decode(&self, output: &[u8]) -> Result<DynSolValue, RpcError> {
        let decoded = DynSolType::Tuple(vec![self.output.clone()])
            .abi_decode_params(output)
            .map_err(|e| RpcError::Decode(format!("{}: {}", self.canonical_signature, e)))?;

        match decoded {
            DynSolValue::Tuple(mut values) if values.len() == 1 => Ok(values.remove(0)),
            other => Err(RpcError::Decode(format!(
                "{}: unexpected shape {:?}",
                self.canonical_signature, other
            ))),
        }
    }
}

fn compute_function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[0..4]);
    selector
}

fn to_sol_value(ty: &DynSolType, value: &CanonicalValue) -> Result<DynSolValue, RpcError> {
    let mismatch = || {
        RpcError::InvalidCall(format!(
            "cannot coerce {:?} to {}",
            value,
            ty.sol_type_name()
        ))
    };

    match (ty, value) {
        (DynSolType::Bool, CanonicalValue::Bool(b)) => Ok(DynSolValue::Bool(*b)),
        (_, CanonicalValue::Text(s)) => ty.coerce_str(s).map_err(|_| mismatch()),
        (DynSolType::Array(inner), CanonicalValue::List(items)) => Ok(DynSolValue::Array(
            items
                .iter()
                .map(|item| to_sol_value(inner, item))
                .collect::<Result<_, _>>()?,
        )),
        (DynSolType::FixedArray(inner, len), CanonicalValue::List(items))
            if items.len() == *len =>
        {
            Ok(DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| to_sol_value(inner, item))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (DynSolType::Tuple(types), CanonicalValue::List(items)) if items.len() == types.len() => {
            Ok(DynSolValue::Tuple(
                types
                    .iter()
                    .zip(items)
                    .map(|(t, item)| to_sol_value(t, item))
                    .collect::<Result<_, _>>()?,
            ))
        }
        _ => Err(mismatch()),
    }
}

/// Production ledger: one contract behind a JSON-RPC endpoint.
#[derive(Debug)]
pub struct ContractLedger {
    client: Arc<RpcClient>,
    address: Address,
    filter: Filter,
    calls: HashMap<String, ParsedCall>,
}

impl ContractLedger {
    pub fn new(
        client: Arc<RpcClient>,
        address: Address,
        events: &EventRegistry,
        filter: &LogFilter,
        calls: &[EthCallConfig],
    ) -> Result<Self, LedgerError> {
        let filter = filter.build(address, events)?;

        let mut parsed_calls = HashMap::new();
        for config in calls {
            let call = ParsedCall::from_config(config)?;
            if parsed_calls.contains_key(&call.name) {
                return Err(LedgerError::DuplicateMethod(call.name));
            }
            parsed_calls.insert(call.name.clone(), call);
        }

        Ok(Self {
            client,
            address,
            filter,
            calls: parsed_calls,
        })
    }
}

#[async_trait]
impl Ledger for ContractLedger {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.client.get_block_number().await
    }

    async fn get_logs(&self, range: BlockRange) -> Result<Vec<Log>, RpcError> {
        let filter = self.filter.clone().from_block(range.start).to_block(range.end);
        self.client.get_logs(&filter).await
    }

    async fn call(&self, task: &CallTask) -> Result<DynSolValue, RpcError> {
        let call = self
            .calls
            .get(&task.method)
            .ok_or_else(|| RpcError::InvalidCall(format!("unknown method '{}'", task.method)))?;

        let tx = TransactionRequest::default()
            .to(self.address)
            .input(call.encode(&task.args)?.into());

        let output = self.client.call(&tx, None).await?;
        call.decode(&output)
    }
}
