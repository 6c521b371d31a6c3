//! Core data types for grid trading

use std::fmt;

use serde::{Deserialize, Serialize};

use super::monitor::MonitorHandle;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Convert to exchange side string
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type accepted by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Time in force for limit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till cancelled
    Gtc,
}

/// A single price point of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Index of this level (0 = lowest price)
    pub index: u32,
    /// Price at this level
    pub price: f64,
}

impl GridLevel {
    pub fn new(index: u32, price: f64) -> Self {
        Self { index, price }
    }

    /// Side of the resting order for this level given the current price
    pub fn side_for(&self, current_price: f64) -> OrderSide {
        if self.price < current_price {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// Request to place an order on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    /// Resting GTC limit order
    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
        }
    }

    /// Market order
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
        }
    }
}

/// Fill event from exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridFill {
    /// Exchange order ID
    pub order_id: String,
    /// Fill price
    pub price: f64,
    /// Fill size
    pub quantity: f64,
}

impl GridFill {
    pub fn new(order_id: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            order_id: order_id.into(),
            price,
            quantity,
        }
    }
}

/// Position information as reported by the exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Position size (positive = long, negative = short)
    pub size: f64,
    /// Entry price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<f64>,
    /// Leverage currently in effect
    pub leverage: u32,
}

/// How a monitored position ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloseOutcome {
    Profit,
    Loss,
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseOutcome::Profit => f.write_str("PROFIT"),
            CloseOutcome::Loss => f.write_str("LOSS"),
        }
    }
}

/// Lifecycle status of a tracked order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Limit order resting on the book
    Resting,
    /// Fill received, opposite order being posted
    Filled,
    /// Position is being watched against the thresholds
    Monitoring,
    /// Flattening market order in flight
    Closing,
}

impl OrderStatus {
    /// Whether a position exists behind this order
    pub fn has_position(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Monitoring)
    }
}

/// An order owned by the order manager
///
/// Not `Clone`: the monitor handle is unique, and dropping the record
/// cancels the watch task bound to it.
#[derive(Debug)]
pub struct TrackedOrder {
    pub id: String,
    pub side: OrderSide,
    /// Limit price the order was placed at
    pub reference_price: f64,
    pub quantity: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub status: OrderStatus,
    pub last_fill_price: Option<f64>,
    monitor: Option<MonitorHandle>,
}

impl TrackedOrder {
    pub fn new(
        id: impl Into<String>,
        side: OrderSide,
        reference_price: f64,
        quantity: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Self {
        Self {
            id: id.into(),
            side,
            reference_price,
            quantity,
            take_profit,
            stop_loss,
            status: OrderStatus::Resting,
            last_fill_price: None,
            monitor: None,
        }
    }

    /// Mark as filled
    pub fn mark_filled(&mut self, fill_price: f64) {
        self.status = OrderStatus::Filled;
        self.last_fill_price = Some(fill_price);
    }

    /// Attach the watch handle and move to monitoring
    pub fn attach_monitor(&mut self, handle: MonitorHandle) {
        self.monitor = Some(handle);
        self.status = OrderStatus::Monitoring;
    }

    /// Whether a live watch is bound to this order
    pub fn is_monitored(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| !m.is_cancelled())
    }

    /// Realized PnL if the position were closed at `exit_price`
    pub fn realized_pnl(&self, exit_price: f64) -> f64 {
        realized_pnl(self.side, self.reference_price, exit_price, self.quantity)
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            id: self.id.clone(),
            side: self.side,
            reference_price: self.reference_price,
            quantity: self.quantity,
            status: self.status,
            last_fill_price: self.last_fill_price,
            monitored: self.is_monitored(),
        }
    }
}

/// Read-only copy of a tracked order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub side: OrderSide,
    pub reference_price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    pub last_fill_price: Option<f64>,
    pub monitored: bool,
}

/// Result of a completed close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub order_id: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub outcome: CloseOutcome,
    /// Exchange id of the flattening market order
    pub flatten_order_id: String,
}

/// PnL of a position entered on `side` at `entry` and exited at `exit`
pub fn realized_pnl(side: OrderSide, entry: f64, exit: f64, quantity: f64) -> f64 {
    match side {
        OrderSide::Buy => (exit - entry) * quantity,
        OrderSide::Sell => (entry - exit) * quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_level_side_for_price() {
        let level = GridLevel::new(0, 95.0);
        assert_eq!(level.side_for(100.0), OrderSide::Buy);
        assert_eq!(level.side_for(95.0), OrderSide::Sell);
        assert_eq!(level.side_for(90.0), OrderSide::Sell);
    }

    #[test]
    fn test_pnl_sign() {
        // Long gains when price rises
        assert!((realized_pnl(OrderSide::Buy, 100.0, 111.0, 2.0) - 22.0).abs() < 1e-9);
        assert!((realized_pnl(OrderSide::Buy, 100.0, 94.0, 2.0) + 12.0).abs() < 1e-9);

        // Short gains when price falls
        assert!(realized_pnl(OrderSide::Sell, 100.0, 90.0, 1.0) > 0.0);
        assert!(realized_pnl(OrderSide::Sell, 100.0, 110.0, 1.0) < 0.0);
        assert_eq!(realized_pnl(OrderSide::Sell, 100.0, 100.0, 1.0), 0.0);
    }

    #[test]
    fn test_tracked_order_lifecycle() {
        let mut order = TrackedOrder::new("1", OrderSide::Buy, 100.0, 2.0, 110.0, 95.0);
        assert_eq!(order.status, OrderStatus::Resting);
        assert!(!order.status.has_position());
        assert!(!order.is_monitored());

        order.mark_filled(99.5);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.last_fill_price, Some(99.5));
        assert!(order.status.has_position());
        assert!((order.realized_pnl(111.0) - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_request_builders() {
        let limit = OrderRequest::limit("BTCUSDT", OrderSide::Buy, 0.5, 100.0);
        assert_eq!(limit.order_type, OrderType::Limit);
        assert_eq!(limit.price, Some(100.0));
        assert_eq!(limit.time_in_force, Some(TimeInForce::Gtc));

        let market = OrderRequest::market("BTCUSDT", OrderSide::Sell, 0.5);
        assert_eq!(market.order_type, OrderType::Market);
        assert_eq!(market.price, None);

        let json = serde_json::to_string(&market).unwrap();
        assert!(json.contains("\"MARKET\""));
        assert!(!json.contains("price"));
    }
}
