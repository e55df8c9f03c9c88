//! Account and order primitives the strategy trades against.
//!
//! Implementations deliver fills and cancellations back to the strategy as
//! [`OrderEvent`](super::OrderEvent) values; the strategy never assumes an
//! order filled until that callback arrives.

use super::types::{LotId, OrderId};
use anyhow::Result;

/// Broker/account interface consumed by the strategy driver.
pub trait Broker {
    /// Available cash.
    fn cash(&self) -> f64;

    /// Shares currently held for an instrument.
    fn shares(&self, instrument: &str) -> u64;

    /// Cash plus marked-to-market holdings.
    fn equity(&self) -> f64;

    /// Submit a market buy.
    fn enter_long(&mut self, instrument: &str, quantity: u64, use_adjusted: bool) -> Result<OrderId>;

    /// Submit a market sell closing one lot in full.
    fn exit_market(&mut self, instrument: &str, lot: LotId, quantity: u64) -> Result<OrderId>;
}
