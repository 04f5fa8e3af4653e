//! Long-lived background loops: charge submission and status polling.
//!
//! Both run for the lifetime of the process, tick on a fixed interval,
//! and exit cleanly on the shared shutdown signal. All coordination with
//! other workers and other process instances goes through conditional
//! database writes; the loops hold no in-process locks.

pub mod poller;
pub mod submission;
