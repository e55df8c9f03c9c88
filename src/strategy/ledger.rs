//! Per-instrument FIFO ledger of open lots.

use crate::broker::{LotId, OrderId};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// A single confirmed purchase, tracked until fully exited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lot {
    pub id: LotId,
    pub instrument: usize,
    pub quantity: u64,
    pub entry_price: f64,
    pub entry_order: OrderId,
    pub opened_on: NaiveDate,
}

/// Open lots per instrument, oldest first.
///
/// Lots handed to an exit order leave the open queue but stay in the ledger
/// until the exit fill is confirmed, so the total quantity always matches the
/// broker's share count once callbacks are applied.
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    open: Vec<VecDeque<Lot>>,
    exiting: BTreeMap<LotId, Lot>,
    next_lot_id: u64,
}

impl PositionLedger {
    pub fn new(instrument_count: usize) -> Self {
        Self {
            open: vec![VecDeque::new(); instrument_count],
            exiting: BTreeMap::new(),
            next_lot_id: 1,
        }
    }

    pub fn instrument_count(&self) -> usize {
        self.open.len()
    }

    /// Append a filled purchase to the back of the instrument's queue.
    pub fn push_lot(
        &mut self,
        instrument: usize,
        quantity: u64,
        entry_price: f64,
        entry_order: OrderId,
        opened_on: NaiveDate,
    ) -> LotId {
        let id = LotId(self.next_lot_id);
        self.next_lot_id += 1;
        self.open[instrument].push_back(Lot {
            id,
            instrument,
            quantity,
            entry_price,
            entry_order,
            opened_on,
        });
        id
    }

    /// Take the oldest open lot and mark it as exiting.
    pub fn pop_front_for_exit(&mut self, instrument: usize) -> Option<Lot> {
        let lot = self.open.get_mut(instrument)?.pop_front()?;
        self.exiting.insert(lot.id, lot.clone());
        Some(lot)
    }

    /// Remove an exiting lot once its exit has filled.
    pub fn confirm_exit(&mut self, lot: LotId) -> Option<Lot> {
        self.exiting.remove(&lot)
    }

    /// Return an exiting lot to the open queue after its exit could not be placed.
    ///
    /// The lot goes back in entry order, ahead of every lot bought after it.
    pub fn restore_open(&mut self, lot: LotId) -> Option<&Lot> {
        let lot = self.exiting.remove(&lot)?;
        let queue = self.open.get_mut(lot.instrument)?;
        let at = queue.partition_point(|open| open.id < lot.id);
        queue.insert(at, lot);
        queue.get(at)
    }

    pub fn exiting_lot(&self, lot: LotId) -> Option<&Lot> {
        self.exiting.get(&lot)
    }

    pub fn open_lots(&self, instrument: usize) -> impl Iterator<Item = &Lot> {
        self.open.get(instrument).into_iter().flatten()
    }

    /// Quantity still available to sell.
    pub fn open_quantity(&self, instrument: usize) -> u64 {
        self.open_lots(instrument).map(|lot| lot.quantity).sum()
    }

    pub fn exiting_quantity(&self, instrument: usize) -> u64 {
        self.exiting
            .values()
            .filter(|lot| lot.instrument == instrument)
            .map(|lot| lot.quantity)
            .sum()
    }

    /// Open plus exiting quantity; equals the broker's share count once reconciled.
    pub fn total_quantity(&self, instrument: usize) -> u64 {
        self.open_quantity(instrument) + self.exiting_quantity(instrument)
    }

    pub fn exiting_count(&self) -> usize {
        self.exiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exiting.is_empty() && self.open.iter().all(|queue| queue.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 2, 1).unwrap()
    }

    #[test]
    fn test_fifo_exit_order() {
        let mut ledger = PositionLedger::new(1);
        let l1 = ledger.push_lot(0, 10, 5.0, OrderId(1), day());
        let l2 = ledger.push_lot(0, 20, 6.0, OrderId(2), day());
        let l3 = ledger.push_lot(0, 30, 7.0, OrderId(3), day());

        assert_eq!(ledger.pop_front_for_exit(0).unwrap().id, l1);
        assert_eq!(ledger.pop_front_for_exit(0).unwrap().id, l2);
        assert_eq!(ledger.pop_front_for_exit(0).unwrap().id, l3);
        assert!(ledger.pop_front_for_exit(0).is_none());
    }

    #[test]
    fn test_exiting_lots_count_until_confirmed() {
        let mut ledger = PositionLedger::new(2);
        ledger.push_lot(1, 10, 5.0, OrderId(1), day());
        ledger.push_lot(1, 15, 5.5, OrderId(2), day());

        let lot = ledger.pop_front_for_exit(1).unwrap();
        assert_eq!(ledger.open_quantity(1), 15);
        assert_eq!(ledger.exiting_quantity(1), 10);
        assert_eq!(ledger.total_quantity(1), 25);
        assert!(ledger.exiting_lot(lot.id).is_some());

        let closed = ledger.confirm_exit(lot.id).unwrap();
        assert_eq!(closed.quantity, 10);
        assert_eq!(ledger.total_quantity(1), 15);
        assert!(ledger.confirm_exit(lot.id).is_none());
    }

    #[test]
    fn test_restored_lots_keep_fifo_order() {
        let mut ledger = PositionLedger::new(1);
        let l1 = ledger.push_lot(0, 10, 5.0, OrderId(1), day());
        let l2 = ledger.push_lot(0, 20, 6.0, OrderId(2), day());
        let l3 = ledger.push_lot(0, 30, 7.0, OrderId(3), day());

        ledger.pop_front_for_exit(0).unwrap();
        ledger.pop_front_for_exit(0).unwrap();
        assert_eq!(ledger.open_quantity(0), 30);

        assert_eq!(ledger.restore_open(l1).unwrap().quantity, 10);
        assert_eq!(ledger.restore_open(l2).unwrap().quantity, 20);
        assert!(ledger.restore_open(l2).is_none());

        let order: Vec<LotId> = ledger.open_lots(0).map(|lot| lot.id).collect();
        assert_eq!(order, vec![l1, l2, l3]);
        assert_eq!(ledger.exiting_quantity(0), 0);
        assert_eq!(ledger.total_quantity(0), 60);
    }

    #[test]
    fn test_unknown_instrument() {
        let mut ledger = PositionLedger::new(1);
        assert!(ledger.pop_front_for_exit(5).is_none());
        assert_eq!(ledger.open_quantity(5), 0);
        assert!(ledger.is_empty());
    }
}
