use serde::Deserialize;

/// A read-only contract method.
///
/// `function` is the signature used to compute the selector, e.g.
/// `"getAllStakes(address)"`; `output_type` is the Solidity return type, e.g.
/// `"(uint256,uint256,uint256,uint256,uint256,(uint256,uint256))[]"`.
#[derive(Debug, Clone, Deserialize)]
pub struct EthCallConfig {
    pub function: String,
    pub output_type: String,
}

impl EthCallConfig {
    pub fn method_name(&self) -> &str {
        self.function
            .split_once('(')
            .map_or(self.function.as_str(), |(name, _)| name)
            .trim()
    }
}
