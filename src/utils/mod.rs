//! Shared utilities.

pub mod decimal;

pub use decimal::{dec_from_f64, dec_to_f64, round_to_cents, safe_div};
