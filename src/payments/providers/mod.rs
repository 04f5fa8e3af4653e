//! Gateway provider implementations.

pub mod momo;
