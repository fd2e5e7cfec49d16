use std::fmt;

use serde::{Deserialize, Serialize};

use crate::raw_data::decoding::CanonicalValue;
use crate::raw_data::historical::ranges::BlockRange;

/// Fetch all logs of the job's contract in one block window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchTask {
    pub range: BlockRange,
}

/// Invoke a read-only contract method with positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallTask {
    pub method: String,
    pub args: Vec<CanonicalValue>,
}

impl CallTask {
    pub fn new(method: impl Into<String>, args: Vec<CanonicalValue>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

impl fmt::Display for CallTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                CanonicalValue::Text(s) => write!(f, "{}", s)?,
                other => write!(f, "{:?}", other)?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_display() {
        let call = CallTask::new("getAllStakes", vec![CanonicalValue::text("0xabc")]);
        assert_eq!(call.to_string(), "getAllStakes(0xabc)");

        let nested = CallTask::new(
            "f",
            vec![CanonicalValue::text("1"), CanonicalValue::Bool(true)],
        );
        assert_eq!(nested.to_string(), "f(1, Bool(true))");
    }

    #[test]
    fn test_task_json_shape() {
        let fetch = FetchTask {
            range: BlockRange { start: 1, end: 2 },
        };
        assert_eq!(
            serde_json::to_value(fetch).unwrap(),
            serde_json::json!({"range": {"start": 1, "end": 2}})
        );

        let call = CallTask::new("getAllStakes", vec![CanonicalValue::text("0xabc")]);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"method": "getAllStakes", "args": ["0xabc"]})
        );
        assert_eq!(serde_json::from_value::<CallTask>(json).unwrap(), call);
    }
}
