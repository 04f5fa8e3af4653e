//! Mobile-money gateway integration
//!
//! `traits` defines the gateway seam the workers depend on, `types` the
//! request/response shapes plus phone and status normalization, and
//! `providers` the HTTP client for the aggregator.

pub mod providers;
pub mod traits;
pub mod types;
