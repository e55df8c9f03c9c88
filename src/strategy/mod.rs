//! Anti-correlation allocation strategy.
//!
//! Contains the core logic for:
//! - Rolling price windows with gap repair
//! - Windowed cross-correlation and claim-based weight transfer
//! - Chunked buys and FIFO lot exits toward target weights
//! - Bar-driven orchestration and order confirmation handling

mod anticor;
mod driver;
mod ledger;
mod rebalancer;
mod window;

pub use anticor::{claim_matrix, column_means, cross_correlation, uniform_weights, AnticorEngine};
pub use driver::{ClosedTrade, DriverState, StrategyDriver, TickOutcome};
pub use ledger::{Lot, PositionLedger};
pub use rebalancer::{OrderIntent, Rebalancer};
pub use window::{interpolate_gaps, relative_prices, PriceWindow};
