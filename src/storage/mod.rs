pub mod error;
mod jsonl;
mod snapshot;

pub use error::SinkError;
pub use jsonl::JsonLinesSink;
pub use snapshot::SnapshotSink;
