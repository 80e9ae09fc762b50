use crate::signals::core::Direction;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Fully parameterized order, ready for submission. Never mutated after
/// creation; a new cycle builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    /// Idempotency token reused across submission retries.
    pub client_order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    /// Reference price the stop distance was measured from.
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub created_at: DateTime<Utc>,
}

/// Confirmed execution of a [`SizedOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub trade_id: String,
    pub client_order_id: String,
    pub direction: Direction,
    pub volume: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Signal,
}

/// A fully closed trade. The outcome report handed to the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub trade_id: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Realized profit or loss in account currency, costs included.
    pub pnl: f64,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order: SizedOrder,
    pub status: OrderStatus,
    pub trade_id: Option<String>,
}

/// Issues client order ids and remembers what happened to each order.
pub struct OrderManager {
    orders: Vec<OrderRecord>,
    next_order_id: u64,
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderManager {
    pub fn new() -> Self {
        Self {
            orders: Vec::new(),
            next_order_id: 1000,
        }
    }

    pub fn next_client_order_id(&mut self, symbol: &str) -> String {
        let id = format!("{}-{}", symbol, self.next_order_id);
        self.next_order_id += 1;
        id
    }

    pub fn record(&mut self, order: &SizedOrder) {
        info!(
            "Created order {}: {:?} {} {} (SL {:.5}, TP {:.5})",
            order.client_order_id,
            order.direction,
            order.volume,
            order.symbol,
            order.stop_loss,
            order.take_profit
        );
        self.orders.push(OrderRecord {
            order: order.clone(),
            status: OrderStatus::Pending,
            trade_id: None,
        });
    }

    pub fn mark_filled(&mut self, client_order_id: &str, trade_id: &str) -> Result<()> {
        let record = self.find_mut(client_order_id)?;
        record.status = OrderStatus::Filled;
        record.trade_id = Some(trade_id.to_string());
        info!("Order {} filled as trade {}", client_order_id, trade_id);
        Ok(())
    }

    pub fn mark_rejected(&mut self, client_order_id: &str) -> Result<()> {
        self.find_mut(client_order_id)?.status = OrderStatus::Rejected;
        info!("Order {} status updated to Rejected", client_order_id);
        Ok(())
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<&OrderRecord> {
        self.orders
            .iter()
            .find(|r| r.order.client_order_id == client_order_id)
    }

    pub fn get_pending_orders(&self) -> Vec<&OrderRecord> {
        self.orders
            .iter()
            .filter(|r| r.status == OrderStatus::Pending)
            .collect()
    }

    /// Forget filled and rejected orders; pending ones are kept.
    pub fn prune_settled(&mut self) -> usize {
        let before = self.orders.len();
        self.orders.retain(|r| r.status == OrderStatus::Pending);
        let pruned = before - self.orders.len();
        if pruned > 0 {
            info!("Pruned {} settled order(s)", pruned);
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn find_mut(&mut self, client_order_id: &str) -> Result<&mut OrderRecord> {
        match self
            .orders
            .iter_mut()
            .find(|r| r.order.client_order_id == client_order_id)
        {
            Some(record) => Ok(record),
            None => anyhow::bail!("Order {} not found", client_order_id),
        }
    }
}
