//! Position monitoring - one polling task per filled order
//!
//! Every watch is a child of a single root token and runs on a shared
//! task tracker, so `shutdown` reaches all of them. The per-order
//! [`MonitorHandle`] cancels its task when dropped; the order manager stores
//! it inside the tracked order, which ties the task's lifetime to the record.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::{CallPolicy, GridExchange};
use super::types::{CloseOutcome, ClosedPosition, OrderSide};

/// Closes a position once a threshold is crossed
#[async_trait]
pub trait PositionCloser: Send + Sync {
    /// Close `order_id` at `current_price`. `Ok(None)` if it is no longer open.
    ///
    /// `GridError::CloseInProgress` means another close is in flight and the
    /// caller should keep watching.
    async fn close_position(
        &self,
        order_id: &str,
        current_price: f64,
        outcome: CloseOutcome,
    ) -> GridResult<Option<ClosedPosition>>;
}

/// Cancels the watch task when dropped
pub struct MonitorHandle {
    token: CancellationToken,
    _guard: DropGuard,
}

impl MonitorHandle {
    fn new(token: CancellationToken) -> Self {
        Self {
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What a watch compares against
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub order_id: String,
    pub side: OrderSide,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Threshold check for one price observation
///
/// Long: at or above take-profit is a profit, at or below stop-loss a loss.
/// Short: the comparisons invert. Take-profit is checked first.
pub fn evaluate(side: OrderSide, price: f64, take_profit: f64, stop_loss: f64) -> Option<CloseOutcome> {
    match side {
        OrderSide::Buy => {
            if price >= take_profit {
                Some(CloseOutcome::Profit)
            } else if price <= stop_loss {
                Some(CloseOutcome::Loss)
            } else {
                None
            }
        }
        OrderSide::Sell => {
            if price <= take_profit {
                Some(CloseOutcome::Profit)
            } else if price >= stop_loss {
                Some(CloseOutcome::Loss)
            } else {
                None
            }
        }
    }
}

/// Registry and spawner of position watches
pub struct PositionMonitor<E: GridExchange> {
    exchange: Arc<E>,
    symbol: String,
    poll_interval: Duration,
    policy: CallPolicy,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl<E: GridExchange + 'static> PositionMonitor<E> {
    pub fn new(exchange: Arc<E>, symbol: impl Into<String>, poll_interval: Duration, policy: CallPolicy) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            poll_interval,
            policy,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(exchange: Arc<E>, config: &GridConfig) -> Self {
        Self::new(
            exchange,
            config.symbol.clone(),
            config.poll_interval(),
            CallPolicy::from_config(config),
        )
    }

    /// Start watching a filled order. Dropping the handle stops the watch.
    pub fn watch(&self, target: WatchTarget, closer: Arc<dyn PositionCloser>) -> MonitorHandle {
        let token = self.root.child_token();

        info!(
            "Watching {} position {}: take_profit={}, stop_loss={}, every {:?}",
            target.side, target.order_id, target.take_profit, target.stop_loss, self.poll_interval
        );

        self.tracker.spawn(watch_loop(
            self.exchange.clone(),
            self.symbol.clone(),
            self.policy,
            self.poll_interval,
            target,
            closer,
            token.clone(),
        ));

        MonitorHandle::new(token)
    }

    /// Number of watch tasks still running
    pub fn active_watches(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every watch and wait for the tasks to finish
    pub async fn shutdown(&self) {
        let active = self.tracker.len();
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Position monitor stopped ({} watches cancelled)", active);
    }
}

async fn watch_loop<E: GridExchange>(
    exchange: Arc<E>,
    symbol: String,
    policy: CallPolicy,
    poll_interval: Duration,
    target: WatchTarget,
    closer: Arc<dyn PositionCloser>,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let price = tokio::select! {
            () = token.cancelled() => break,
            result = policy.run("get_ticker", || exchange.get_ticker(&symbol)) => match result {
                Ok(price) => price,
                Err(e) => {
                    warn!("Skipping check of {}: {}", target.order_id, e);
                    continue;
                }
            },
        };

        let Some(outcome) = evaluate(target.side, price, target.take_profit, target.stop_loss) else {
            debug!("{} {} at {}: within thresholds", target.side, target.order_id, price);
            continue;
        };

        info!(
            "{} position {} hit {} threshold at {}",
            target.side, target.order_id, outcome, price
        );

        match closer.close_position(&target.order_id, price, outcome).await {
            Ok(Some(closed)) => {
                debug!("Watch for {} finished with pnl {:.4}", closed.order_id, closed.pnl);
                break;
            }
            Ok(None) => {
                debug!("Position {} already closed", target.order_id);
                break;
            }
            Err(GridError::CloseInProgress(_)) => {
                debug!("Close of {} already in flight; still watching", target.order_id);
            }
            Err(e) => {
                error!("Failed to close {}: {}; still watching", target.order_id, e);
            }
        }
    }

    debug!("Watch for {} stopped", target.order_id);
}
