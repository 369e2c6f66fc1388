//! Host-facing NDJSON contract and the stdio bridge that serves it.

pub mod contract;
pub mod stdio;
