//! Paper exchange - simulated venue for running the bot without real funds
//!
//! Resting limit orders fill when a later price update crosses them. Market
//! orders fill immediately at the current price. Fills are delivered to the
//! subscriber over an unbounded channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{GridError, GridResult};
use super::executor::{FillFeed, GridExchange};
use super::types::{GridFill, OrderRequest, OrderSide, OrderType, PositionInfo};

const MAX_LEVERAGE: u32 = 100;

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Price the simulation starts from
    #[serde(default = "default_initial_price")]
    pub initial_price: f64,

    /// Largest relative move per tick (0.002 = 0.2%)
    #[serde(default = "default_volatility")]
    pub volatility: f64,

    /// Milliseconds between simulated price updates
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Fixed seed for a reproducible walk
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_price() -> f64 {
    100.0
}

fn default_volatility() -> f64 {
    0.002
}

fn default_tick_interval() -> u64 {
    1000
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_price: default_initial_price(),
            volatility: default_volatility(),
            tick_interval_ms: default_tick_interval(),
            seed: None,
        }
    }
}

impl PaperConfig {
    pub fn validate(&self) -> GridResult<()> {
        if !self.initial_price.is_finite() || self.initial_price <= 0.0 {
            return Err(GridError::InvalidConfig(
                "paper.initial_price must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.volatility) {
            return Err(GridError::InvalidConfig(
                "paper.volatility must be in [0, 1)".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(GridError::InvalidConfig(
                "paper.tick_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Simulated net position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperPosition {
    /// Positive = long, negative = short
    pub size: f64,
    /// Average entry price, 0 when flat
    pub entry_price: f64,
    pub realized_pnl: f64,
}

impl PaperPosition {
    fn apply_fill(&mut self, side: OrderSide, qty: f64, price: f64) {
        let is_buy = side == OrderSide::Buy;
        let signed_qty = if is_buy { qty } else { -qty };

        if self.size == 0.0 {
            self.size = signed_qty;
            self.entry_price = price;
            return;
        }

        if (self.size > 0.0) == is_buy {
            // Adding to position
            let total_value = self.entry_price * self.size.abs() + price * qty;
            self.size += signed_qty;
            self.entry_price = total_value / self.size.abs();
            return;
        }

        let close_qty = qty.min(self.size.abs());
        self.realized_pnl += if self.size > 0.0 {
            (price - self.entry_price) * close_qty
        } else {
            (self.entry_price - price) * close_qty
        };

        let remaining = qty - close_qty;
        self.size += signed_qty;

        if remaining > 0.0 {
            // Flipped through zero, the remainder opens at this price
            self.entry_price = price;
        } else if self.size.abs() < f64::EPSILON {
            self.size = 0.0;
            self.entry_price = 0.0;
        }
    }
}

/// Crossing rule for a resting limit order
fn crosses(side: OrderSide, limit_price: f64, price: f64) -> bool {
    match side {
        OrderSide::Buy => price <= limit_price,
        OrderSide::Sell => price >= limit_price,
    }
}

/// One random-walk step, kept strictly positive
pub fn next_price<R: Rng>(rng: &mut R, price: f64, volatility: f64) -> f64 {
    let step = price * volatility * rng.gen_range(-1.0..=1.0);
    (price + step).max(f64::EPSILON)
}

struct PaperState {
    connected: bool,
    price: f64,
    leverage: u32,
    resting: HashMap<String, OrderRequest>,
    position: PaperPosition,
    fill_sender: Option<UnboundedSender<GridFill>>,
}

/// In-process venue for a single instrument
pub struct PaperExchange {
    symbol: String,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(symbol: impl Into<String>, initial_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            state: Mutex::new(PaperState {
                connected: false,
                price: initial_price,
                leverage: 1,
                resting: HashMap::new(),
                position: PaperPosition::default(),
                fill_sender: None,
            }),
        }
    }

    fn check_symbol(&self, symbol: &str) -> GridResult<()> {
        if symbol != self.symbol {
            return Err(GridError::Exchange(format!("unknown symbol {symbol}")));
        }
        Ok(())
    }

    /// Move the simulated price and fill every crossed resting order
    ///
    /// Crossed orders fill at their limit price. Returns the fills in the
    /// order they were sent.
    pub async fn update_price(&self, price: f64) -> Vec<GridFill> {
        let mut state = self.state.lock().await;
        state.price = price;

        let mut crossed: Vec<String> = state
            .resting
            .iter()
            .filter(|(_, order)| {
                order
                    .price
                    .is_some_and(|limit| crosses(order.side, limit, price))
            })
            .map(|(id, _)| id.clone())
            .collect();
        crossed.sort();

        let mut fills = Vec::with_capacity(crossed.len());
        for id in crossed {
            let Some(order) = state.resting.remove(&id) else {
                continue;
            };
            let fill_price = order.price.unwrap_or(price);
            state.position.apply_fill(order.side, order.quantity, fill_price);

            info!(
                "Paper fill: {} {} {} @ {} (id={})",
                order.side, order.quantity, order.symbol, fill_price, id
            );
            fills.push(GridFill::new(id, fill_price, order.quantity));
        }

        let subscriber_gone = match &state.fill_sender {
            Some(sender) => fills.iter().any(|fill| sender.send(fill.clone()).is_err()),
            None => false,
        };
        if subscriber_gone {
            warn!("Paper fill subscriber dropped");
            state.fill_sender = None;
        }

        fills
    }

    pub async fn current_price(&self) -> f64 {
        self.state.lock().await.price
    }

    pub async fn resting_count(&self) -> usize {
        self.state.lock().await.resting.len()
    }

    pub async fn position(&self) -> PaperPosition {
        self.state.lock().await.position.clone()
    }

    /// Drive the price with a random walk until `shutdown` fires
    pub fn spawn_random_walk(
        self: &Arc<Self>,
        config: &PaperConfig,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let exchange = self.clone();
        let volatility = config.volatility;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut ticker = tokio::time::interval(config.tick_interval());

        tokio::spawn(async move {
            info!(
                "Paper price walk started for {} (volatility={}, every {:?})",
                exchange.symbol,
                volatility,
                ticker.period()
            );
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = exchange.current_price().await;
                let price = next_price(&mut rng, current, volatility);
                debug!("Paper price {} -> {:.6}", current, price);
                exchange.update_price(price).await;
            }
            info!("Paper price walk stopped");
        })
    }
}

#[async_trait]
impl GridExchange for PaperExchange {
    async fn connect(&self) -> GridResult<()> {
        self.state.lock().await.connected = true;
        info!("Connected to paper exchange ({})", self.symbol);
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GridResult<()> {
        self.check_symbol(symbol)?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(GridError::Connectivity("paper exchange not connected".into()));
        }
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(GridError::Exchange(format!(
                "leverage {leverage} outside 1..={MAX_LEVERAGE}"
            )));
        }
        state.leverage = leverage;
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> GridResult<PositionInfo> {
        self.check_symbol(symbol)?;
        let state = self.state.lock().await;
        if !state.connected {
            return Err(GridError::Connectivity("paper exchange not connected".into()));
        }
        Ok(PositionInfo {
            size: state.position.size,
            entry_price: (state.position.size != 0.0).then_some(state.position.entry_price),
            leverage: state.leverage,
        })
    }

    async fn get_ticker(&self, symbol: &str) -> GridResult<f64> {
        self.check_symbol(symbol)?;
        let state = self.state.lock().await;
        if !state.connected {
            return Err(GridError::Connectivity("paper exchange not connected".into()));
        }
        Ok(state.price)
    }

    async fn create_order(&self, order: &OrderRequest) -> GridResult<String> {
        self.check_symbol(&order.symbol)?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(GridError::Connectivity("paper exchange not connected".into()));
        }
        if order.quantity <= 0.0 {
            return Err(GridError::OrderRejected(format!(
                "quantity {} must be positive",
                order.quantity
            )));
        }

        let id = Uuid::new_v4().to_string();
        match order.order_type {
            OrderType::Market => {
                let price = state.price;
                state.position.apply_fill(order.side, order.quantity, price);
                info!(
                    "Paper market {} {} {} @ {} (id={})",
                    order.side, order.quantity, order.symbol, price, id
                );
            }
            OrderType::Limit => {
                let price = order
                    .price
                    .filter(|p| *p > 0.0)
                    .ok_or_else(|| GridError::OrderRejected("limit order without a positive price".into()))?;
                debug!(
                    "Paper limit {} {} {} @ {} resting (id={})",
                    order.side, order.quantity, order.symbol, price, id
                );
                state.resting.insert(id.clone(), order.clone());
            }
        }

        Ok(id)
    }
}

#[async_trait]
impl FillFeed for PaperExchange {
    async fn subscribe(&self) -> GridResult<UnboundedReceiver<GridFill>> {
        let (tx, rx) = unbounded_channel();
        self.state.lock().await.fill_sender = Some(tx);
        Ok(rx)
    }
}
