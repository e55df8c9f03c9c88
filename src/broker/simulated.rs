//! Simulated broker for backtesting.
//!
//! Market orders submitted while processing bar `t` fill at the open of bar
//! `t + 1`. Cash and commissions are accounted in `Decimal`.

use super::traits::Broker;
use super::types::{Fill, LotId, OrderEvent, OrderId, Side};
use crate::config::BrokerConfig;
use crate::market::{Bar, Quote};
use crate::utils::{dec_from_f64, dec_to_f64, round_to_cents};
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
enum OrderKind {
    Entry { use_adjusted: bool },
    Exit { lot: LotId },
}

#[derive(Debug, Clone)]
struct PendingOrder {
    id: OrderId,
    instrument: String,
    quantity: u64,
    kind: OrderKind,
}

/// Simulated account with a flat per-trade commission.
#[derive(Debug)]
pub struct SimulatedBroker {
    initial_cash: Decimal,
    cash: Decimal,
    commission: Decimal,
    holdings: HashMap<String, u64>,
    /// Whether each instrument is valued on adjusted prices
    adjusted_basis: HashMap<String, bool>,
    last_quotes: HashMap<String, Quote>,
    pending: Vec<PendingOrder>,
    next_order_id: u64,
    fills: Vec<Fill>,
    total_commission: Decimal,
}

impl SimulatedBroker {
    /// Create a new simulated broker with starting cash and a flat commission.
    pub fn new(initial_cash: Decimal, commission_per_trade: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            commission: commission_per_trade,
            holdings: HashMap::new(),
            adjusted_basis: HashMap::new(),
            last_quotes: HashMap::new(),
            pending: Vec::new(),
            next_order_id: 1,
            fills: Vec::new(),
            total_commission: Decimal::ZERO,
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.initial_cash, config.commission_per_trade)
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn cash_balance(&self) -> Decimal {
        self.cash
    }

    pub fn commission_per_trade(&self) -> Decimal {
        self.commission
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.len()
    }

    /// Marked-to-market value of all holdings.
    pub fn holdings_value(&self) -> Decimal {
        self.holdings
            .iter()
            .map(|(symbol, &shares)| dec_from_f64(self.mark_price(symbol) * shares as f64))
            .sum()
    }

    fn mark_price(&self, instrument: &str) -> f64 {
        let adjusted = self.adjusted_basis.get(instrument).copied().unwrap_or(false);
        self.last_quotes
            .get(instrument)
            .map(|q| q.price(adjusted))
            .unwrap_or(0.0)
    }

    fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    /// Fill or cancel every pending order against this bar, then mark to its closes.
    ///
    /// Exits are processed before entries so sale proceeds fund the buys.
    pub fn process_bar(&mut self, bar: &Bar) -> Vec<OrderEvent> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|order| matches!(order.kind, OrderKind::Entry { .. }));

        let events: Vec<OrderEvent> = pending
            .into_iter()
            .map(|order| self.execute(order, bar))
            .collect();

        for (symbol, quote) in &bar.quotes {
            self.last_quotes.insert(symbol.clone(), *quote);
        }

        events
    }

    fn execute(&mut self, order: PendingOrder, bar: &Bar) -> OrderEvent {
        let Some(quote) = bar.quote(&order.instrument).copied() else {
            debug!(instrument = %order.instrument, order = %order.id, "No quote, canceling order");
            return Self::canceled(order);
        };

        match order.kind {
            OrderKind::Entry { use_adjusted } => {
                let price = if use_adjusted { quote.adjusted_open() } else { quote.open };
                let cost = round_to_cents(dec_from_f64(price * order.quantity as f64)) + self.commission;

                if price <= 0.0 || cost > self.cash {
                    debug!(
                        instrument = %order.instrument,
                        quantity = order.quantity,
                        %cost,
                        cash = %self.cash,
                        "Insufficient cash, canceling entry"
                    );
                    return Self::canceled(order);
                }

                self.cash -= cost;
                self.total_commission += self.commission;
                *self.holdings.entry(order.instrument.clone()).or_insert(0) += order.quantity;
                self.adjusted_basis.insert(order.instrument.clone(), use_adjusted);
                self.record_fill(&order, Side::Buy, price, bar);

                info!(
                    instrument = %order.instrument,
                    quantity = order.quantity,
                    price,
                    "BUY filled"
                );

                OrderEvent::EntryFilled {
                    order: order.id,
                    instrument: order.instrument,
                    quantity: order.quantity,
                    price,
                    date: bar.date,
                }
            }
            OrderKind::Exit { lot } => {
                let held = self.holdings.get(&order.instrument).copied().unwrap_or(0);
                if held < order.quantity {
                    return Self::canceled(order);
                }

                let adjusted = self
                    .adjusted_basis
                    .get(&order.instrument)
                    .copied()
                    .unwrap_or(false);
                let price = if adjusted { quote.adjusted_open() } else { quote.open };
                let proceeds = round_to_cents(dec_from_f64(price * order.quantity as f64)) - self.commission;

                self.cash += proceeds;
                self.total_commission += self.commission;
                let remaining = held - order.quantity;
                if remaining == 0 {
                    self.holdings.remove(&order.instrument);
                } else {
                    self.holdings.insert(order.instrument.clone(), remaining);
                }
                self.record_fill(&order, Side::Sell, price, bar);

                info!(
                    instrument = %order.instrument,
                    quantity = order.quantity,
                    price,
                    %lot,
                    "SELL filled"
                );

                OrderEvent::ExitFilled {
                    order: order.id,
                    lot,
                    price,
                    date: bar.date,
                }
            }
        }
    }

    fn record_fill(&mut self, order: &PendingOrder, side: Side, price: f64, bar: &Bar) {
        self.fills.push(Fill {
            order: order.id,
            instrument: order.instrument.clone(),
            side,
            quantity: order.quantity,
            price,
            date: bar.date,
        });
    }

    fn canceled(order: PendingOrder) -> OrderEvent {
        match order.kind {
            OrderKind::Entry { .. } => OrderEvent::EntryCanceled {
                order: order.id,
                instrument: order.instrument,
            },
            OrderKind::Exit { lot } => OrderEvent::ExitCanceled { order: order.id, lot },
        }
    }

    fn submit(&mut self, instrument: &str, quantity: u64, kind: OrderKind) -> Result<OrderId> {
        anyhow::ensure!(quantity > 0, "Order quantity must be positive");
        anyhow::ensure!(!instrument.is_empty(), "Order instrument must not be empty");

        let id = self.next_order_id();
        self.pending.push(PendingOrder {
            id,
            instrument: instrument.to_string(),
            quantity,
            kind,
        });
        Ok(id)
    }
}

impl Broker for SimulatedBroker {
    fn cash(&self) -> f64 {
        dec_to_f64(self.cash)
    }

    fn shares(&self, instrument: &str) -> u64 {
        self.holdings.get(instrument).copied().unwrap_or(0)
    }

    fn equity(&self) -> f64 {
        dec_to_f64(self.cash + self.holdings_value())
    }

    fn enter_long(&mut self, instrument: &str, quantity: u64, use_adjusted: bool) -> Result<OrderId> {
        self.submit(instrument, quantity, OrderKind::Entry { use_adjusted })
    }

    fn exit_market(&mut self, instrument: &str, lot: LotId, quantity: u64) -> Result<OrderId> {
        self.submit(instrument, quantity, OrderKind::Exit { lot })
    }
}
