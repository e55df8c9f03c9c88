//! Broker seam: the account/order interface the strategy trades against,
//! the fill and cancel callbacks it reacts to, and a simulated broker for
//! backtesting.

mod simulated;
mod traits;
mod types;

pub use simulated::SimulatedBroker;
pub use traits::Broker;
pub use types::{Fill, LotId, OrderEvent, OrderId, Side};
