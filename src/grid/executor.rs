//! Exchange abstraction for grid trading - enables mocking for tests

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc::UnboundedReceiver;

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::types::{GridFill, OrderRequest, PositionInfo};

/// Exchange operations trait - can be mocked for testing
#[async_trait]
pub trait GridExchange: Send + Sync {
    /// Establish connectivity
    async fn connect(&self) -> GridResult<()>;

    /// Update leverage for the instrument
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GridResult<()>;

    /// Get current position and leverage
    async fn get_position(&self, symbol: &str) -> GridResult<PositionInfo>;

    /// Get last traded price
    async fn get_ticker(&self, symbol: &str) -> GridResult<f64>;

    /// Submit an order and return the exchange-assigned id
    async fn create_order(&self, order: &OrderRequest) -> GridResult<String>;
}

/// Source of fill notifications
#[async_trait]
pub trait FillFeed: Send + Sync {
    /// Start receiving fills. Delivery is at-least-once.
    async fn subscribe(&self) -> GridResult<UnboundedReceiver<GridFill>>;
}

/// Upper bound on a single backoff sleep
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Timeout and retry wrapper applied to every exchange call
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl CallPolicy {
    /// Single attempt bounded by `timeout`
    pub fn best_effort(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            retry_base_delay: Duration::from_millis(0),
        }
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            max_attempts: config.max_call_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Sleep before retry number `attempt` (1-based), doubling up to [`MAX_RETRY_DELAY`]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }

    /// Run `operation` with the timeout, retrying with exponential backoff
    pub async fn run<T, F, Fut>(&self, operation_name: &str, operation: F) -> GridResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        let mut attempts = 0;

        loop {
            let result = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(GridError::Timeout {
                    operation: operation_name.to_string(),
                    after: self.timeout,
                }),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempts += 1;
            if attempts >= self.max_attempts {
                if self.max_attempts == 1 {
                    return Err(err);
                }
                return Err(GridError::CallFailed {
                    operation: operation_name.to_string(),
                    attempts,
                    reason: err.to_string(),
                });
            }

            let delay = self.backoff_delay(attempts);
            warn!(
                "{} failed (attempt {}/{}), retrying in {:?}: {}",
                operation_name, attempts, self.max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock exchange for testing grid bots without a real exchange connection.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::sync::Mutex;

    use crate::grid::types::OrderType;

    /// Mock exchange for testing
    pub struct MockExchange {
        pub orders: Arc<Mutex<Vec<OrderRequest>>>,
        pub ticker: Arc<Mutex<f64>>,
        pub leverage: Arc<Mutex<u32>>,
        pub ticker_calls: AtomicU64,
        /// Limit prices the mock refuses
        pub rejected_prices: Arc<Mutex<Vec<f64>>>,
        pub fail_connect: Arc<Mutex<bool>>,
        pub fail_leverage: Arc<Mutex<bool>>,
        pub fail_ticker: Arc<Mutex<bool>>,
        pub fail_market_orders: Arc<Mutex<bool>>,
        /// Latency applied to market orders before they resolve
        pub market_delay: Arc<Mutex<Duration>>,
        /// Make `get_ticker` never resolve
        pub hang_ticker: Arc<Mutex<bool>>,
        next_id: AtomicU64,
    }

    impl MockExchange {
        pub fn new(ticker: f64) -> Self {
            Self {
                orders: Arc::new(Mutex::new(Vec::new())),
                ticker: Arc::new(Mutex::new(ticker)),
                leverage: Arc::new(Mutex::new(1)),
                ticker_calls: AtomicU64::new(0),
                rejected_prices: Arc::new(Mutex::new(Vec::new())),
                fail_connect: Arc::new(Mutex::new(false)),
                fail_leverage: Arc::new(Mutex::new(false)),
                fail_ticker: Arc::new(Mutex::new(false)),
                fail_market_orders: Arc::new(Mutex::new(false)),
                market_delay: Arc::new(Mutex::new(Duration::ZERO)),
                hang_ticker: Arc::new(Mutex::new(false)),
                next_id: AtomicU64::new(1),
            }
        }

        pub async fn set_ticker(&self, price: f64) {
            *self.ticker.lock().await = price;
        }

        pub async fn reject_price(&self, price: f64) {
            self.rejected_prices.lock().await.push(price);
        }

        pub async fn set_fail_ticker(&self, fail: bool) {
            *self.fail_ticker.lock().await = fail;
        }

        pub async fn set_fail_leverage(&self, fail: bool) {
            *self.fail_leverage.lock().await = fail;
        }

        pub async fn set_fail_market_orders(&self, fail: bool) {
            *self.fail_market_orders.lock().await = fail;
        }

        pub async fn set_market_delay(&self, delay: Duration) {
            *self.market_delay.lock().await = delay;
        }

        pub async fn set_fail_connect(&self, fail: bool) {
            *self.fail_connect.lock().await = fail;
        }

        pub async fn set_hang_ticker(&self, hang: bool) {
            *self.hang_ticker.lock().await = hang;
        }

        /// Accepted limit orders, in submission order
        pub async fn limit_orders(&self) -> Vec<OrderRequest> {
            self.orders
                .lock()
                .await
                .iter()
                .filter(|o| o.order_type == OrderType::Limit)
                .cloned()
                .collect()
        }

        /// Accepted market orders, in submission order
        pub async fn market_orders(&self) -> Vec<OrderRequest> {
            self.orders
                .lock()
                .await
                .iter()
                .filter(|o| o.order_type == OrderType::Market)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl GridExchange for MockExchange {
        async fn connect(&self) -> GridResult<()> {
            if *self.fail_connect.lock().await {
                return Err(GridError::Connectivity("Mock failure".into()));
            }
            Ok(())
        }

        async fn set_leverage(&self, _symbol: &str, leverage: u32) -> GridResult<()> {
            if *self.fail_leverage.lock().await {
                return Err(GridError::Exchange("Mock leverage failure".into()));
            }
            *self.leverage.lock().await = leverage;
            Ok(())
        }

        async fn get_position(&self, _symbol: &str) -> GridResult<PositionInfo> {
            Ok(PositionInfo {
                size: 0.0,
                entry_price: None,
                leverage: *self.leverage.lock().await,
            })
        }

        async fn get_ticker(&self, _symbol: &str) -> GridResult<f64> {
            self.ticker_calls.fetch_add(1, Ordering::SeqCst);
            if *self.hang_ticker.lock().await {
                std::future::pending::<()>().await;
            }
            if *self.fail_ticker.lock().await {
                return Err(GridError::Exchange("Mock ticker failure".into()));
            }
            Ok(*self.ticker.lock().await)
        }

        async fn create_order(&self, order: &OrderRequest) -> GridResult<String> {
            if order.order_type == OrderType::Market {
                let delay = *self.market_delay.lock().await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if *self.fail_market_orders.lock().await {
                    return Err(GridError::OrderRejected("Mock market failure".into()));
                }
            }
            if let Some(price) = order.price {
                let rejected = self.rejected_prices.lock().await;
                if rejected.iter().any(|p| (p - price).abs() < 1e-9) {
                    return Err(GridError::OrderRejected(format!("Mock reject at {price}")));
                }
            }

            self.orders.lock().await.push(order.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("mock-{id}"))
        }
    }

    /// Mock fill feed - tests push fills through `sender`
    #[derive(Default)]
    pub struct MockFillFeed {
        sender: Mutex<Option<UnboundedSender<GridFill>>>,
    }

    impl MockFillFeed {
        pub fn new() -> Self {
            Self::default()
        }

        /// Deliver a fill to the subscriber
        pub async fn push(&self, fill: GridFill) -> GridResult<()> {
            let sender = self.sender.lock().await;
            let sender = sender
                .as_ref()
                .ok_or_else(|| GridError::ChannelClosed("no subscriber".into()))?;
            sender
                .send(fill)
                .map_err(|e| GridError::ChannelClosed(e.to_string()))
        }

        /// Drop the sender so the subscriber sees end of stream
        pub async fn close(&self) {
            self.sender.lock().await.take();
        }
    }

    #[async_trait]
    impl FillFeed for MockFillFeed {
        async fn subscribe(&self) -> GridResult<UnboundedReceiver<GridFill>> {
            let (tx, rx) = unbounded_channel();
            *self.sender.lock().await = Some(tx);
            Ok(rx)
        }
    }
}
