pub mod decoding;
pub mod derived;
pub mod historical;
pub mod pipeline;
