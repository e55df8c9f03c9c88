//! Translation of target weights into bounded buy and exit intents.

use super::ledger::{Lot, PositionLedger};
use tracing::debug;

/// An order the strategy wants submitted.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderIntent {
    /// Buy `quantity` units of the instrument at index `instrument`.
    Buy { instrument: usize, quantity: u64 },
    /// Sell a whole lot.
    Exit { lot: Lot },
}

/// Moves holdings toward target weights without oversized single orders.
///
/// Buys are split into chunks of `order_size / chunk_divisor` (at least one
/// unit); sells shed whole lots oldest first.
#[derive(Debug, Clone, Copy)]
pub struct Rebalancer {
    chunk_divisor: usize,
}

impl Rebalancer {
    /// Create a rebalancer chunking buys by the engine's window length.
    pub fn new(window_size: usize) -> Self {
        Self {
            chunk_divisor: window_size.max(1),
        }
    }

    /// Split an order into chunks that sum exactly to `order_size`.
    ///
    /// Every chunk is `max(1, order_size / chunk_divisor)` except the last,
    /// which may be smaller but is never zero.
    pub fn chunk_order(&self, order_size: u64) -> Vec<u64> {
        let chunk = (order_size / self.chunk_divisor as u64).max(1);
        let mut chunks = Vec::new();
        let mut ordered = 0;
        while ordered < order_size {
            let quantity = chunk.min(order_size - ordered);
            chunks.push(quantity);
            ordered += quantity;
        }
        chunks
    }

    /// Whole units affordable within the gap between budget and current value.
    ///
    /// Zero unless the gap exceeds one unit's price.
    pub fn buy_quantity(budget: f64, current_value: f64, price: f64) -> u64 {
        let gap = budget - current_value;
        if price <= 0.0 || price >= gap {
            return 0;
        }
        (gap / price).floor() as u64
    }

    /// Plan the intents for one rebalance tick.
    ///
    /// `prices[i]` is `None` when instrument `i` has no quote this bar; such
    /// instruments are left untouched. Lots chosen for exit are moved to the
    /// ledger's exiting set.
    pub fn plan(
        &self,
        targets: &[f64],
        total_value: f64,
        prices: &[Option<f64>],
        ledger: &mut PositionLedger,
    ) -> Vec<OrderIntent> {
        let mut intents = Vec::new();

        for (instrument, (&target, price)) in targets.iter().zip(prices.iter()).enumerate() {
            let Some(price) = price.filter(|p| *p > 0.0) else {
                continue;
            };

            let budget = total_value * target;
            let mut current_value = ledger.open_quantity(instrument) as f64 * price;

            let order_size = Self::buy_quantity(budget, current_value, price);
            if order_size > 0 {
                let chunks = self.chunk_order(order_size);
                debug!(
                    instrument,
                    budget,
                    current_value,
                    order_size,
                    chunks = chunks.len(),
                    "Planning buy"
                );
                intents.extend(
                    chunks
                        .into_iter()
                        .map(|quantity| OrderIntent::Buy { instrument, quantity }),
                );
            }

            while current_value > budget {
                let Some(lot) = ledger.pop_front_for_exit(instrument) else {
                    break;
                };
                current_value -= lot.quantity as f64 * price;
                debug!(
                    instrument,
                    lot = %lot.id,
                    quantity = lot.quantity,
                    remaining_value = current_value,
                    budget,
                    "Planning exit"
                );
                intents.push(OrderIntent::Exit { lot });
            }
        }

        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderId;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 5, 2).unwrap()
    }

    fn bought(intents: &[OrderIntent], instrument: usize) -> Vec<u64> {
        intents
            .iter()
            .filter_map(|intent| match intent {
                OrderIntent::Buy { instrument: i, quantity } if *i == instrument => Some(*quantity),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_chunks_sum_to_order_size() {
        for divisor in 1..12usize {
            let rebalancer = Rebalancer::new(divisor);
            for order_size in 0..200u64 {
                let chunks = rebalancer.chunk_order(order_size);
                assert_eq!(chunks.iter().sum::<u64>(), order_size);
                assert!(chunks.iter().all(|c| *c > 0));

                if let Some((last, rest)) = chunks.split_last() {
                    let size = rest.first().copied().unwrap_or(*last);
                    assert!(rest.iter().all(|c| *c == size));
                    assert!(*last <= size);
                }
            }
        }
    }

    #[test]
    fn test_chunk_sizes() {
        let rebalancer = Rebalancer::new(9);
        assert_eq!(rebalancer.chunk_order(20), vec![2; 10]);
        assert_eq!(rebalancer.chunk_order(23), vec![2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1]);
        assert_eq!(rebalancer.chunk_order(4), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_buy_quantity_requires_room_for_one_unit() {
        assert_eq!(Rebalancer::buy_quantity(1000.0, 0.0, 30.0), 33);
        assert_eq!(Rebalancer::buy_quantity(1000.0, 970.0, 30.0), 0);
        assert_eq!(Rebalancer::buy_quantity(1000.0, 0.0, 0.0), 0);
    }

    #[test]
    fn test_plan_buys_toward_budget() {
        let rebalancer = Rebalancer::new(3);
        let mut ledger = PositionLedger::new(2);

        let intents = rebalancer.plan(&[0.5, 0.5], 1000.0, &[Some(10.0), Some(100.0)], &mut ledger);

        assert_eq!(bought(&intents, 0), vec![16, 16, 16, 2]);
        assert_eq!(bought(&intents, 1), vec![1; 5]);
    }

    #[test]
    fn test_plan_skips_missing_price() {
        let rebalancer = Rebalancer::new(3);
        let mut ledger = PositionLedger::new(2);
        let intents = rebalancer.plan(&[0.5, 0.5], 1000.0, &[None, Some(100.0)], &mut ledger);
        assert!(bought(&intents, 0).is_empty());
    }

    #[test]
    fn test_plan_exits_oldest_lots_first() {
        let rebalancer = Rebalancer::new(3);
        let mut ledger = PositionLedger::new(1);
        let l1 = ledger.push_lot(0, 10, 10.0, OrderId(1), day());
        let l2 = ledger.push_lot(0, 10, 10.0, OrderId(2), day());
        let l3 = ledger.push_lot(0, 10, 10.0, OrderId(3), day());

        // Holding 300 against a budget of 150: shed L1 then L2.
        let intents = rebalancer.plan(&[0.15], 1000.0, &[Some(10.0)], &mut ledger);
        let exited: Vec<_> = intents
            .iter()
            .filter_map(|intent| match intent {
                OrderIntent::Exit { lot } => Some(lot.id),
                _ => None,
            })
            .collect();

        assert_eq!(exited, vec![l1, l2]);
        assert_eq!(ledger.open_lots(0).map(|l| l.id).collect::<Vec<_>>(), vec![l3]);
        assert_eq!(ledger.exiting_count(), 2);
    }

    #[test]
    fn test_plan_stops_when_ledger_empty() {
        let rebalancer = Rebalancer::new(3);
        let mut ledger = PositionLedger::new(1);
        ledger.push_lot(0, 5, 10.0, OrderId(1), day());

        let intents = rebalancer.plan(&[0.0], 1000.0, &[Some(10.0)], &mut ledger);
        assert_eq!(intents.len(), 1);
        assert_eq!(ledger.open_quantity(0), 0);
    }
}
