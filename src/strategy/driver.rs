//! Bar-driven orchestration of window, engine, rebalancer and ledger.

use super::anticor::{uniform_weights, AnticorEngine};
use super::ledger::{Lot, PositionLedger};
use super::rebalancer::{OrderIntent, Rebalancer};
use super::window::{relative_prices, PriceWindow};
use crate::broker::{Broker, LotId, OrderEvent, OrderId};
use crate::config::StrategyConfig;
use crate::error::AllocationError;
use crate::market::Bar;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    WarmingUp,
    Ready,
}

/// What the driver did with one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not enough history yet.
    WarmingUp { seen: usize, required: usize },
    /// Ready, waiting for the next rebalance tick.
    Holding { counter: usize },
    /// Rebalance tick skipped; previous weights kept.
    Skipped { reason: AllocationError },
    /// New weights computed and orders submitted.
    ///
    /// `rejected` counts intents the broker refused; refused exits are back
    /// in the open queue for the next rebalance.
    Rebalanced {
        weights: Vec<f64>,
        buys: usize,
        exits: usize,
        rejected: usize,
    },
}

/// A lot whose exit has filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub instrument: String,
    pub quantity: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_on: NaiveDate,
    pub closed_on: NaiveDate,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    instrument: usize,
    quantity: u64,
}

/// Orchestrates one strategy run over a fixed instrument set.
pub struct StrategyDriver {
    instruments: Vec<String>,
    index: HashMap<String, usize>,
    window: PriceWindow,
    engine: AnticorEngine,
    rebalancer: Rebalancer,
    ledger: PositionLedger,
    weights: Vec<f64>,
    state: DriverState,
    rebalance_counter: usize,
    rebalance_frequency: usize,
    use_adjusted_values: bool,
    fill_with_adjusted_values: bool,
    pending_entries: HashMap<OrderId, PendingEntry>,
    pending_exits: HashMap<OrderId, LotId>,
}

impl StrategyDriver {
    /// Create a driver with uniform prior weights.
    pub fn new(instruments: Vec<String>, config: &StrategyConfig) -> Result<Self> {
        anyhow::ensure!(!instruments.is_empty(), "Instrument set must not be empty");

        let index: HashMap<String, usize> = instruments
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.clone(), i))
            .collect();
        anyhow::ensure!(
            index.len() == instruments.len(),
            "Instrument identifiers must be distinct"
        );

        let n = instruments.len();
        Ok(Self {
            window: PriceWindow::new(instruments.clone(), config.window_size),
            engine: AnticorEngine::new(config.window_size),
            rebalancer: Rebalancer::new(config.window_size),
            ledger: PositionLedger::new(n),
            weights: uniform_weights(n),
            state: DriverState::WarmingUp,
            rebalance_counter: 0,
            rebalance_frequency: config.rebalance_frequency,
            use_adjusted_values: config.use_adjusted_values,
            fill_with_adjusted_values: config.fill_with_adjusted_values,
            pending_entries: HashMap::new(),
            pending_exits: HashMap::new(),
            instruments,
            index,
        })
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Current target weight vector.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn window(&self) -> &PriceWindow {
        &self.window
    }

    pub fn pending_entries(&self) -> usize {
        self.pending_entries.len()
    }

    pub fn pending_exits(&self) -> usize {
        self.pending_exits.len()
    }

    /// Seed the weight vector from history without trading.
    ///
    /// Every bar is pushed into the window; once enough history exists the
    /// engine is stepped on each bar. Returns the number of engine steps taken.
    pub fn prime(&mut self, history: &[Bar]) -> usize {
        let mut steps = 0;
        for bar in history {
            self.push_bar(bar);
            if !self.window.is_ready() {
                continue;
            }
            self.state = DriverState::Ready;
            match self.compute_weights() {
                Ok((weights, _)) => {
                    self.weights = weights;
                    steps += 1;
                }
                Err(e) => debug!(date = %bar.date, error = %e, "Priming step skipped"),
            }
        }

        if steps > 0 {
            info!(steps, weights = ?self.weights, "Seeded weights from history");
        }
        steps
    }

    /// Process one new bar.
    pub fn on_bar<B: Broker>(&mut self, bar: &Bar, broker: &mut B) -> Result<TickOutcome> {
        self.push_bar(bar);

        if self.state == DriverState::WarmingUp {
            if !self.window.is_ready() {
                return Ok(TickOutcome::WarmingUp {
                    seen: self.window.len(),
                    required: self.window.capacity(),
                });
            }
            info!(date = %bar.date, "Warm-up complete");
            self.state = DriverState::Ready;
        }

        self.rebalance_counter += 1;
        if self.rebalance_counter <= self.rebalance_frequency {
            return Ok(TickOutcome::Holding {
                counter: self.rebalance_counter,
            });
        }
        self.rebalance_counter = 0;

        Ok(self.rebalance(bar, broker))
    }

    fn push_bar(&mut self, bar: &Bar) {
        self.window.append(&bar.prices(self.use_adjusted_values));
    }

    /// New weights and the newest repaired price row they were computed from.
    fn compute_weights(&self) -> Result<(Vec<f64>, Vec<f64>), AllocationError> {
        let prices = self.window.repaired_matrix()?;
        let marks = prices.last().cloned().ok_or(AllocationError::NotReady {
            seen: 0,
            required: self.window.capacity(),
        })?;
        let relative = relative_prices(&prices);
        let weights = self.engine.step(&relative, &self.weights)?;
        Ok((weights, marks))
    }

    fn rebalance<B: Broker>(&mut self, bar: &Bar, broker: &mut B) -> TickOutcome {
        let (weights, marks) = match self.compute_weights() {
            Ok(computed) => computed,
            Err(reason) => {
                if reason.is_data_gap() {
                    info!(date = %bar.date, %reason, "Skipping rebalance, keeping previous weights");
                } else {
                    warn!(date = %bar.date, %reason, "Skipping rebalance, keeping previous weights");
                }
                return TickOutcome::Skipped { reason };
            }
        };
        self.weights = weights;

        let total_value = broker.cash()
            + self
                .instruments
                .iter()
                .zip(marks.iter())
                .map(|(symbol, price)| broker.shares(symbol) as f64 * price)
                .sum::<f64>();

        let prices: Vec<Option<f64>> = self
            .instruments
            .iter()
            .map(|symbol| bar.quote(symbol).map(|q| q.price(self.use_adjusted_values)))
            .collect();

        let intents = self
            .rebalancer
            .plan(&self.weights, total_value, &prices, &mut self.ledger);

        let mut buys = 0;
        let mut exits = 0;
        let mut rejected = 0;
        for intent in intents {
            let placed = match intent {
                OrderIntent::Buy { instrument, quantity } => {
                    let placed = self.submit_entry(broker, instrument, quantity);
                    buys += usize::from(placed);
                    placed
                }
                OrderIntent::Exit { lot } => {
                    let placed = self.submit_exit(broker, &lot);
                    exits += usize::from(placed);
                    placed
                }
            };
            rejected += usize::from(!placed);
        }

        info!(
            date = %bar.date,
            total_value,
            buys,
            exits,
            rejected,
            weights = ?self.weights,
            "Rebalanced"
        );

        TickOutcome::Rebalanced {
            weights: self.weights.clone(),
            buys,
            exits,
            rejected,
        }
    }

    /// Submit a buy chunk. A refused buy is logged and dropped.
    fn submit_entry<B: Broker>(&mut self, broker: &mut B, instrument: usize, quantity: u64) -> bool {
        let symbol = &self.instruments[instrument];
        match broker.enter_long(symbol, quantity, self.fill_with_adjusted_values) {
            Ok(order) => {
                self.pending_entries
                    .insert(order, PendingEntry { instrument, quantity });
                true
            }
            Err(e) => {
                warn!(instrument = %symbol, quantity, error = %format!("{:#}", e), "Buy rejected by broker");
                false
            }
        }
    }

    /// Submit an exit for a lot in the exiting set.
    ///
    /// A refused exit puts the lot back in the open queue so the next
    /// rebalance offers it again.
    fn submit_exit<B: Broker>(&mut self, broker: &mut B, lot: &Lot) -> bool {
        let symbol = &self.instruments[lot.instrument];
        match broker.exit_market(symbol, lot.id, lot.quantity) {
            Ok(order) => {
                self.pending_exits.insert(order, lot.id);
                true
            }
            Err(e) => {
                warn!(
                    instrument = %symbol,
                    lot = %lot.id,
                    quantity = lot.quantity,
                    error = %format!("{:#}", e),
                    "Exit rejected by broker, lot returned to open queue"
                );
                self.ledger.restore_open(lot.id);
                false
            }
        }
    }

    /// Apply one order confirmation.
    ///
    /// Returns the closed round trip when an exit fills. Canceled exits are
    /// re-submitted; canceled entries are dropped from tracking. A re-submit
    /// the broker refuses returns the lot to the open queue.
    pub fn on_order_event<B: Broker>(
        &mut self,
        event: OrderEvent,
        broker: &mut B,
    ) -> Result<Option<ClosedTrade>> {
        match event {
            OrderEvent::EntryFilled {
                order,
                instrument,
                quantity,
                price,
                date,
            } => {
                let index = match self.pending_entries.remove(&order) {
                    Some(pending) => {
                        if pending.quantity != quantity {
                            warn!(%order, expected = pending.quantity, filled = quantity, "Fill quantity differs from order");
                        }
                        pending.instrument
                    }
                    None => {
                        warn!(%order, %instrument, "Fill for untracked order");
                        *self
                            .index
                            .get(&instrument)
                            .with_context(|| format!("Fill for unknown instrument {}", instrument))?
                    }
                };
                let lot = self.ledger.push_lot(index, quantity, price, order, date);
                debug!(%instrument, %lot, quantity, price, "Lot opened");
                Ok(None)
            }
            OrderEvent::EntryCanceled { order, instrument } => {
                if self.pending_entries.remove(&order).is_some() {
                    info!(%order, %instrument, "Entry canceled, dropped from tracking");
                }
                Ok(None)
            }
            OrderEvent::ExitFilled {
                order,
                lot,
                price,
                date,
            } => {
                self.pending_exits.remove(&order);
                let Some(closed) = self.ledger.confirm_exit(lot) else {
                    warn!(%order, %lot, "Exit fill for unknown lot");
                    return Ok(None);
                };
                Ok(Some(ClosedTrade {
                    instrument: self.instruments[closed.instrument].clone(),
                    quantity: closed.quantity,
                    entry_price: closed.entry_price,
                    exit_price: price,
                    opened_on: closed.opened_on,
                    closed_on: date,
                }))
            }
            OrderEvent::ExitCanceled { order, lot } => {
                self.pending_exits.remove(&order);
                let Some(exiting) = self.ledger.exiting_lot(lot).cloned() else {
                    warn!(%order, %lot, "Exit cancel for unknown lot");
                    return Ok(None);
                };
                info!(%order, %lot, "Exit canceled, re-submitting");
                self.submit_exit(broker, &exiting);
                Ok(None)
            }
        }
    }
}
