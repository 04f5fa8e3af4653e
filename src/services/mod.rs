//! Orchestration services: synchronous payment initiation, the shared
//! settlement path, and the idempotent finalizer.

pub mod finalizer;
pub mod initiator;
pub mod settlement;
