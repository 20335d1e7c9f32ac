//! verity: a content validation pipeline with parallel checks and a
//! human-in-the-loop gate.
//!
//! A submitted URL is fetched, routed to a set of checks that run
//! concurrently, and aggregated into an overall verdict. The run then
//! suspends durably until a reviewer approves or rejects it; progress is
//! observable as a typed SSE event stream.

pub mod checks;
pub mod content;
pub mod errors;
pub mod pipeline;
pub mod server;
pub mod settings;
pub mod store;
