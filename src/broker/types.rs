//! Order identifiers and fill/cancel callbacks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order-{}", self.0)
    }
}

/// Identifier of one recorded purchase in the position ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotId(pub u64);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lot-{}", self.0)
    }
}

/// Order confirmation delivered by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// A buy order filled.
    EntryFilled {
        order: OrderId,
        instrument: String,
        quantity: u64,
        price: f64,
        date: NaiveDate,
    },
    /// A buy order was canceled before filling.
    EntryCanceled { order: OrderId, instrument: String },
    /// An exit order for a lot filled.
    ExitFilled {
        order: OrderId,
        lot: LotId,
        price: f64,
        date: NaiveDate,
    },
    /// An exit order for a lot was canceled.
    ExitCanceled { order: OrderId, lot: LotId },
}

impl OrderEvent {
    pub fn order(&self) -> OrderId {
        match self {
            OrderEvent::EntryFilled { order, .. }
            | OrderEvent::EntryCanceled { order, .. }
            | OrderEvent::ExitFilled { order, .. }
            | OrderEvent::ExitCanceled { order, .. } => *order,
        }
    }
}

/// A completed fill recorded by the simulated broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order: OrderId,
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
    pub price: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_order_id() {
        let event = OrderEvent::ExitCanceled {
            order: OrderId(7),
            lot: LotId(3),
        };
        assert_eq!(event.order(), OrderId(7));
        assert_eq!(OrderId(7).to_string(), "order-7");
        assert_eq!(LotId(3).to_string(), "lot-3");
    }
}
