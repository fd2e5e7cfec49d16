use std::collections::HashMap;

use alloy::dyn_abi::DynSolType;
use alloy::primitives::{keccak256, B256};
use thiserror::Error;

use crate::types::config::contract::EventConfig;

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Invalid event signature: {0}")]
    InvalidSignature(String),
    #[error("Failed to parse type '{0}': {1}")]
    TypeParse(String, String),
    #[error("Unbalanced parentheses in '{0}'")]
    Unbalanced(String),
    #[error("Duplicate event '{0}'")]
    Duplicate(String),
}

/// One parameter of an event or function, in declaration order.
#[derive(Debug, Clone)]
pub struct AbiParam {
    pub name: String,
    pub sol_type: DynSolType,
    pub type_string: String,
    pub indexed: bool,
}

impl AbiParam {
    /// Indexed inputs of reference type are stored as a keccak256 hash in the
    /// topic and cannot be recovered.
    pub fn is_hashed_topic(&self) -> bool {
        self.indexed
            && !matches!(
                self.sol_type,
                DynSolType::Address
                    | DynSolType::Bool
                    | DynSolType::Int(_)
                    | DynSolType::Uint(_)
                    | DynSolType::FixedBytes(_)
                    | DynSolType::Function
            )
    }
}

/// An event parsed from a human-readable signature such as
/// `"Deposit(address indexed user, uint256 amount, address recipient)"`.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub name: String,
    pub canonical_signature: String,
    pub topic0: B256,
    pub inputs: Vec<AbiParam>,
}

impl ParsedEvent {
    pub fn from_signature(signature: &str) -> Result<Self, EventParseError> {
        let signature = signature.trim();
        let signature = signature.strip_prefix("event ").unwrap_or(signature).trim();

        let open = signature
            .find('(')
            .ok_or_else(|| EventParseError::InvalidSignature(signature.to_string()))?;
        let name = signature[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(EventParseError::InvalidSignature(signature.to_string()));
        }

        let close = signature
            .rfind(')')
            .filter(|close| *close > open)
            .ok_or_else(|| EventParseError::Unbalanced(signature.to_string()))?;

        let inputs = parse_param_list(&signature[open + 1..close], signature)?;

        let types: Vec<&str> = inputs.iter().map(|p| p.type_string.as_str()).collect();
        let canonical_signature = format!("{}({})", name, types.join(","));
        let topic0 = keccak256(canonical_signature.as_bytes());

        Ok(ParsedEvent {
            name: name.to_string(),
            canonical_signature,
            topic0,
            inputs,
        })
    }

    pub fn indexed_inputs(&self) -> impl Iterator<Item = &AbiParam> {
        self.inputs.iter().filter(|p| p.indexed)
    }

    pub fn data_inputs(&self) -> impl Iterator<Item = &AbiParam> {
        self.inputs.iter().filter(|p| !p.indexed)
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if p.name.is_empty() {
                    format!("param_{}", i)
                } else {
                    p.name.clone()
                }
            })
            .collect()
    }
}

/// Parse a comma-separated parameter list such as
/// `"address indexed user, (uint256 a, uint256 b)[] positions"`.
pub(crate) fn parse_param_list(
    params: &str,
    signature: &str,
) -> Result<Vec<AbiParam>, EventParseError> {
    split_top_level(params, signature)?
        .into_iter()
        .map(parse_param)
        .collect()
}

/// Split a parameter list on commas that are not nested inside a tuple.
fn split_top_level<'a>(
    params: &'a str,
    signature: &str,
) -> Result<Vec<&'a str>, EventParseError> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut part_start = 0;

    for (i, c) in params.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(EventParseError::Unbalanced(signature.to_string()));
                }
            }
            ',' if depth == 0 => {
                parts.push(params[part_start..i].trim());
                part_start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(EventParseError::Unbalanced(signature.to_string()));
    }

    let last = params[part_start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(EventParseError::InvalidSignature(format!(
            "empty parameter in {}",
            signature
        )));
    }
    Ok(parts)
}

/// Split `"<type> <rest>"`. Tuple types may contain spaces, so a leading
/// tuple runs up to its last closing parenthesis plus any array suffix.
fn split_type(param: &str) -> (&str, &str) {
    let param = param.trim();
    let type_end = if param.starts_with('(') {
        param
            .rfind(')')
            .map(|i| {
                param[i + 1..]
                    .find(char::is_whitespace)
                    .map_or(param.len(), |ws| i + 1 + ws)
            })
            .unwrap_or(param.len())
    } else {
        param.find(char::is_whitespace).unwrap_or(param.len())
    };
    (param[..type_end].trim(), param[type_end..].trim())
}

/// Rewrite a type into its canonical form: tuple component names and
/// whitespace removed, e.g. `"(uint256 a, uint256 b)[]"` to `"(uint256,uint256)[]"`.
pub(crate) fn canonical_type(ty: &str) -> Result<String, EventParseError> {
    let ty = ty.trim();
    if !ty.starts_with('(') {
        return Ok(ty.to_string());
    }

    let mut depth = 0i32;
    let mut close = None;
    for (i, c) in ty.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close.ok_or_else(|| EventParseError::Unbalanced(ty.to_string()))?;

    let components = split_top_level(&ty[1..close], ty)?
        .into_iter()
        .map(|component| canonical_type(split_type(component).0))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!("({}){}", components.join(","), ty[close + 1..].trim()))
}

/// Parse `"<type> [indexed] [name]"`.
fn parse_param(param: &str) -> Result<AbiParam, EventParseError> {
    let (type_string, rest) = split_type(param);

    let words: Vec<&str> = rest.split_whitespace().collect();
    let (indexed, name) = match words.as_slice() {
        [] => (false, ""),
        ["indexed"] => (true, ""),
        ["indexed", name] => (true, *name),
        [name] => (false, *name),
        _ => {
            return Err(EventParseError::InvalidSignature(format!(
                "invalid parameter: {}",
                param
            )))
        }
    };

    let canonical = canonical_type(type_string)?;
    let sol_type = DynSolType::parse(&canonical)
        .map_err(|e| EventParseError::TypeParse(type_string.to_string(), e.to_string()))?;

    Ok(AbiParam {
        name: name.to_string(),
        type_string: sol_type.sol_type_name().into_owned(),
        sol_type,
        indexed,
    })
}

/// The set of events a job knows how to decode, keyed by topic0.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    by_topic0: HashMap<B256, ParsedEvent>,
}

impl EventRegistry {
    pub fn from_configs(configs: &[EventConfig]) -> Result<Self, EventParseError> {
        let mut registry = Self::default();
        for config in configs {
            registry.insert(ParsedEvent::from_signature(&config.signature)?)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, event: ParsedEvent) -> Result<(), EventParseError> {
        if self.by_topic0.contains_key(&event.topic0) {
            return Err(EventParseError::Duplicate(event.canonical_signature));
        }
        self.by_topic0.insert(event.topic0, event);
        Ok(())
    }

    pub fn by_topic0(&self, topic0: &B256) -> Option<&ParsedEvent> {
        self.by_topic0.get(topic0)
    }

    /// All events with the given name (overloads included).
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ParsedEvent> + 'a {
        self.by_topic0.values().filter(move |e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.by_topic0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_event() {
        let sig = "Transfer(address indexed from, address indexed to, uint256 value)";
        let parsed = ParsedEvent::from_signature(sig).unwrap();

        assert_eq!(parsed.name, "Transfer");
        assert_eq!(parsed.canonical_signature, "Transfer(address,address,uint256)");
        assert_eq!(parsed.inputs.len(), 3);
        assert_eq!(parsed.indexed_inputs().count(), 2);
        assert_eq!(parsed.data_inputs().count(), 1);
        assert_eq!(parsed.input_names(), vec!["from", "to", "value"]);

        // Known keccak256 of "Transfer(address,address,uint256)"
        let expected =
            hex::decode("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
                .unwrap();
        assert_eq!(parsed.topic0.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_parse_unnamed_and_empty_params() {
        let parsed = ParsedEvent::from_signature("Paused()").unwrap();
        assert!(parsed.inputs.is_empty());
        assert_eq!(parsed.canonical_signature, "Paused()");

        let parsed = ParsedEvent::from_signature("event Claim(address indexed, uint256)").unwrap();
        assert_eq!(parsed.canonical_signature, "Claim(address,uint256)");
        assert!(parsed.inputs[0].indexed);
        assert_eq!(parsed.input_names(), vec!["param_0", "param_1"]);
    }

    #[test]
    fn test_parse_tuple_param() {
        let sig = "Staked((uint256 poolId, uint256 tokenId)[] positions, address indexed user)";
        let parsed = ParsedEvent::from_signature(sig).unwrap();

        assert_eq!(parsed.canonical_signature, "Staked((uint256,uint256)[],address)");
        assert_eq!(parsed.inputs[0].name, "positions");
        assert!(!parsed.inputs[0].indexed);
        assert!(parsed.inputs[1].indexed);
    }

    #[test]
    fn test_canonical_type() {
        assert_eq!(canonical_type("uint256").unwrap(), "uint256");
        assert_eq!(
            canonical_type("(uint256 a, (address b, bool) c)[2]").unwrap(),
            "(uint256,(address,bool))[2]"
        );
        assert!(canonical_type("(uint256").is_err());
    }

    #[test]
    fn test_hashed_topics() {
        let parsed =
            ParsedEvent::from_signature("Named(string indexed label, uint256 indexed id)").unwrap();
        assert!(parsed.inputs[0].is_hashed_topic());
        assert!(!parsed.inputs[1].is_hashed_topic());
    }

    #[test]
    fn test_rejects_malformed_signatures() {
        assert!(ParsedEvent::from_signature("Deposit").is_err());
        assert!(ParsedEvent::from_signature("(uint256)").is_err());
        assert!(ParsedEvent::from_signature("Deposit(uint256,,address)").is_err());
        assert!(ParsedEvent::from_signature("Deposit(notatype x)").is_err());
        assert!(ParsedEvent::from_signature("Deposit(uint256 a b c)").is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_finds_by_name() {
        let configs = vec![
            EventConfig {
                signature: "Deposit(address indexed user, uint256 amount, address recipient)".into(),
            },
            EventConfig {
                signature: "Withdraw(address indexed user, uint256 amount, address recipient)".into(),
            },
        ];
        let registry = EventRegistry::from_configs(&configs).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_name("Deposit").count(), 1);
        assert_eq!(registry.by_name("Missing").count(), 0);

        let mut registry = registry;
        let dup =
            ParsedEvent::from_signature("Deposit(address user, uint256 a, address b)").unwrap();
        assert!(matches!(registry.insert(dup), Err(EventParseError::Duplicate(_))));
    }
}
