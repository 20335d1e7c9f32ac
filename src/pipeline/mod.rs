//! The validation pipeline: state model, routing, parallel check
//! execution, aggregation, events, and the orchestrator that drives a run
//! from submission to its terminal state.

pub mod aggregate;
pub mod events;
pub mod orchestrator;
pub mod router;
pub mod state;
pub mod steps;
