pub mod event_parsing;
mod normalize;
pub mod values;

pub use event_parsing::EventRegistry;
pub use normalize::{normalize_log, LogRecord, NormalizeError};
pub use values::{normalize_value, CanonicalValue, FieldSelector, SerializationConfig};
