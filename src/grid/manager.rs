//! Order lifecycle - ladder placement, fill handling and position close

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::{CallPolicy, GridExchange};
use super::monitor::{PositionCloser, PositionMonitor, WatchTarget};
use super::stats::StatsTracker;
use super::types::{
    realized_pnl, CloseOutcome, ClosedPosition, GridFill, GridLevel, OrderRequest, OrderSide,
    OrderSnapshot, OrderStatus, TrackedOrder,
};

/// What a fill notification led to
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub order_id: String,
    pub side: OrderSide,
    /// Id of the opposite-side order, if it was placed
    pub replacement_order_id: Option<String>,
    pub monitored: bool,
}

/// Counts of tracked orders by state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LadderSummary {
    pub resting_buys: usize,
    pub resting_sells: usize,
    pub monitored: usize,
    pub closing: usize,
}

/// Owns every tracked order
///
/// The order map lock is never held across an exchange call.
pub struct OrderManager<E: GridExchange> {
    config: Arc<GridConfig>,
    exchange: Arc<E>,
    policy: CallPolicy,
    monitor: Arc<PositionMonitor<E>>,
    stats: Arc<StatsTracker>,
    orders: Mutex<HashMap<String, TrackedOrder>>,
}

impl<E: GridExchange + 'static> OrderManager<E> {
    pub fn new(
        config: Arc<GridConfig>,
        exchange: Arc<E>,
        monitor: Arc<PositionMonitor<E>>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            policy: CallPolicy::from_config(&config),
            config,
            exchange,
            monitor,
            stats,
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// Place a limit order and track it
    async fn place_limit(&self, side: OrderSide, price: f64) -> GridResult<String> {
        let request = OrderRequest::limit(&self.config.symbol, side, self.config.quantity, price);
        debug!("Placing {} limit {} @ {}", side, request.quantity, price);

        let id = self
            .policy
            .run("create_order", || self.exchange.create_order(&request))
            .await?;

        let order = TrackedOrder::new(
            id.clone(),
            side,
            price,
            self.config.quantity,
            self.config.take_profit_price,
            self.config.stop_loss_price,
        );
        self.orders.lock().await.insert(id.clone(), order);

        info!("Order placed: {} {} @ {} (id={})", side, self.config.quantity, price, id);
        Ok(id)
    }

    /// Place one limit order per level: BUY below the current price, SELL at or above
    ///
    /// A level whose placement fails is logged and skipped.
    pub async fn place_initial_ladder(&self, levels: &[GridLevel], current_price: f64) -> Vec<String> {
        let mut placed = Vec::with_capacity(levels.len());

        for level in levels {
            let side = level.side_for(current_price);
            match self.place_limit(side, level.price).await {
                Ok(id) => placed.push(id),
                Err(e) => {
                    error!(
                        "Failed to place {} at level {} ({}): {}",
                        side, level.index, level.price, e
                    );
                }
            }
        }

        info!(
            "Placed {}/{} ladder orders around {}",
            placed.len(),
            levels.len(),
            current_price
        );
        placed
    }

    /// Handle a fill notification
    ///
    /// Unknown ids and repeated fills for an order that is no longer resting
    /// are ignored. Otherwise exactly one opposite-side order is posted and
    /// the filled order is handed to the position monitor; it stays tracked
    /// until its position is closed.
    pub async fn on_fill(self: &Arc<Self>, fill: &GridFill) -> Option<FillOutcome> {
        let (side, reference_price) = {
            let mut orders = self.orders.lock().await;
            let Some(order) = orders.get_mut(&fill.order_id) else {
                debug!("Ignoring fill for unknown order {}", fill.order_id);
                return None;
            };
            if order.status != OrderStatus::Resting {
                debug!(
                    "Ignoring repeated fill for {} ({:?})",
                    fill.order_id, order.status
                );
                return None;
            }
            order.mark_filled(fill.price);
            (order.side, order.reference_price)
        };

        info!(
            "Fill received: {} {} ref={} fill={} qty={}",
            side, fill.order_id, reference_price, fill.price, fill.quantity
        );

        let replacement_price = self.config.reladder_price(side, reference_price);
        let replacement_order_id = if replacement_price > 0.0 {
            match self.place_limit(side.opposite(), replacement_price).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!(
                        "Failed to re-ladder {} @ {} after fill of {}: {}",
                        side.opposite(),
                        replacement_price,
                        fill.order_id,
                        e
                    );
                    None
                }
            }
        } else {
            error!(
                "Re-ladder price {} for {} is not positive, skipping replacement",
                replacement_price, fill.order_id
            );
            None
        };

        let monitored = {
            let mut orders = self.orders.lock().await;
            match orders.get_mut(&fill.order_id) {
                Some(order) => {
                    let closer: Arc<dyn PositionCloser> = self.clone();
                    let handle = self.monitor.watch(
                        WatchTarget {
                            order_id: order.id.clone(),
                            side: order.side,
                            take_profit: order.take_profit,
                            stop_loss: order.stop_loss,
                        },
                        closer,
                    );
                    order.attach_monitor(handle);
                    true
                }
                None => false,
            }
        };

        Some(FillOutcome {
            order_id: fill.order_id.clone(),
            side,
            replacement_order_id,
            monitored,
        })
    }

    /// Flatten the position behind `order_id` and record the result
    ///
    /// Returns `Ok(None)` when the order is unknown or holds no position, and
    /// `CloseInProgress` while another close of the same order is in flight.
    /// The watch stays alive during the flatten and is cancelled only once
    /// the record is removed. If the market order fails the record is
    /// restored and the error returned, so its watch evaluates again on the
    /// next tick.
    pub async fn close_order(
        &self,
        order_id: &str,
        current_price: f64,
        outcome: CloseOutcome,
    ) -> GridResult<Option<ClosedPosition>> {
        let (side, entry_price, quantity, previous_status) = {
            let mut orders = self.orders.lock().await;
            let Some(order) = orders.get_mut(order_id) else {
                debug!("Ignoring close for unknown order {}", order_id);
                return Ok(None);
            };
            if order.status == OrderStatus::Closing {
                return Err(GridError::CloseInProgress(order_id.to_string()));
            }
            if !order.status.has_position() {
                debug!("Ignoring close for {} ({:?})", order_id, order.status);
                return Ok(None);
            }
            let previous = order.status;
            order.status = OrderStatus::Closing;
            (order.side, order.reference_price, order.quantity, previous)
        };

        let pnl = realized_pnl(side, entry_price, current_price, quantity);
        let request = OrderRequest::market(&self.config.symbol, side.opposite(), quantity);

        let flatten_order_id = match self
            .policy
            .run("create_order", || self.exchange.create_order(&request))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Flatten order for {} failed: {}", order_id, e);
                if let Some(order) = self.orders.lock().await.get_mut(order_id) {
                    order.status = previous_status;
                }
                return Err(e);
            }
        };

        // Dropping the record cancels its watch
        self.orders.lock().await.remove(order_id);

        self.stats.record_close(pnl, outcome).await;

        info!(
            "Closed {} position {} as {}: entry={} exit={} qty={} pnl={:.4} (flatten id={})",
            side, order_id, outcome, entry_price, current_price, quantity, pnl, flatten_order_id
        );
        info!("Stats: {}", self.stats.report().await);

        Ok(Some(ClosedPosition {
            order_id: order_id.to_string(),
            side,
            entry_price,
            exit_price: current_price,
            quantity,
            pnl,
            outcome,
            flatten_order_id,
        }))
    }

    /// Snapshot of one tracked order
    pub async fn order(&self, order_id: &str) -> Option<OrderSnapshot> {
        self.orders.lock().await.get(order_id).map(TrackedOrder::snapshot)
    }

    pub async fn order_count(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn summary(&self) -> LadderSummary {
        let orders = self.orders.lock().await;
        let mut summary = LadderSummary::default();

        for order in orders.values() {
            match (order.status, order.side) {
                (OrderStatus::Resting, OrderSide::Buy) => summary.resting_buys += 1,
                (OrderStatus::Resting, OrderSide::Sell) => summary.resting_sells += 1,
                (OrderStatus::Filled | OrderStatus::Monitoring, _) => summary.monitored += 1,
                (OrderStatus::Closing, _) => summary.closing += 1,
            }
        }

        summary
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }
}

#[async_trait]
impl<E: GridExchange + 'static> PositionCloser for OrderManager<E> {
    async fn close_position(
        &self,
        order_id: &str,
        current_price: f64,
        outcome: CloseOutcome,
    ) -> GridResult<Option<ClosedPosition>> {
        self.close_order(order_id, current_price, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::config::ReladderStep;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::levels::compute_levels;
    use std::time::Duration;

    struct Harness {
        manager: Arc<OrderManager<MockExchange>>,
        exchange: Arc<MockExchange>,
        monitor: Arc<PositionMonitor<MockExchange>>,
        stats: Arc<StatsTracker>,
    }

    fn test_config() -> GridConfig {
        // Levels 90, 95, 100, 105, 110; take-profit 110, stop-loss 95
        GridConfig::new("BTCUSDT", 90.0, 110.0, 5, 2.0, 5, 110.0, 95.0)
    }

    fn harness(config: GridConfig, ticker: f64) -> Harness {
        let config = Arc::new(config);
        let exchange = Arc::new(MockExchange::new(ticker));
        let monitor = Arc::new(PositionMonitor::from_config(exchange.clone(), &config));
        let stats = Arc::new(StatsTracker::new(config.leverage));
        let manager = Arc::new(OrderManager::new(
            config,
            exchange.clone(),
            monitor.clone(),
            stats.clone(),
        ));
        Harness {
            manager,
            exchange,
            monitor,
            stats,
        }
    }

    fn levels() -> Vec<GridLevel> {
        compute_levels(90.0, 110.0, 5).unwrap()
    }

    /// Id of the ladder order resting at `price`
    async fn id_at(h: &Harness, ids: &[String], price: f64) -> String {
        for id in ids {
            if let Some(order) = h.manager.order(id).await {
                if (order.reference_price - price).abs() < 1e-9 {
                    return id.clone();
                }
            }
        }
        panic!("no order at {price}");
    }

    #[tokio::test]
    async fn test_place_initial_ladder() {
        let h = harness(test_config(), 100.0);

        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        assert_eq!(ids.len(), 5);
        assert_eq!(h.manager.order_count().await, 5);

        let orders = h.exchange.limit_orders().await;
        let sides: Vec<_> = orders.iter().map(|o| (o.price.unwrap(), o.side)).collect();
        assert_eq!(
            sides,
            vec![
                (90.0, OrderSide::Buy),
                (95.0, OrderSide::Buy),
                (100.0, OrderSide::Sell),
                (105.0, OrderSide::Sell),
                (110.0, OrderSide::Sell),
            ]
        );
        assert!(orders.iter().all(|o| o.quantity == 2.0));

        let summary = h.manager.summary().await;
        assert_eq!(summary.resting_buys, 2);
        assert_eq!(summary.resting_sells, 3);
    }

    #[tokio::test]
    async fn test_partial_ladder_on_rejection() {
        let h = harness(test_config(), 100.0);
        h.exchange.reject_price(95.0).await;

        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;

        assert_eq!(ids.len(), 4);
        assert_eq!(h.manager.order_count().await, 4);
        assert!(h
            .exchange
            .limit_orders()
            .await
            .iter()
            .all(|o| o.price != Some(95.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_fill_posts_one_sell_and_keeps_order() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let buy_id = id_at(&h, &ids, 95.0).await;

        let outcome = h
            .manager
            .on_fill(&GridFill::new(buy_id.clone(), 95.0, 2.0))
            .await
            .unwrap();

        assert_eq!(outcome.side, OrderSide::Buy);
        assert!(outcome.monitored);
        let replacement = outcome.replacement_order_id.unwrap();
        let replacement = h.manager.order(&replacement).await.unwrap();
        assert_eq!(replacement.side, OrderSide::Sell);
        assert!((replacement.reference_price - 100.0).abs() < 1e-9);
        assert_eq!(replacement.status, OrderStatus::Resting);

        // Filled order is still tracked, now watched
        let filled = h.manager.order(&buy_id).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Monitoring);
        assert_eq!(filled.last_fill_price, Some(95.0));
        assert!(filled.monitored);
        assert_eq!(h.manager.order_count().await, 6);
        assert_eq!(h.exchange.limit_orders().await.len(), 6);
        assert_eq!(h.monitor.active_watches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_fill_posts_buy_below() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let sell_id = id_at(&h, &ids, 105.0).await;

        let outcome = h
            .manager
            .on_fill(&GridFill::new(sell_id, 105.0, 2.0))
            .await
            .unwrap();

        let replacement = h
            .manager
            .order(&outcome.replacement_order_id.unwrap())
            .await
            .unwrap();
        assert_eq!(replacement.side, OrderSide::Buy);
        assert!((replacement.reference_price - 100.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_and_unknown_fills_are_ignored() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let buy_id = id_at(&h, &ids, 90.0).await;

        assert!(h.manager.on_fill(&GridFill::new("nope", 90.0, 2.0)).await.is_none());

        let fill = GridFill::new(buy_id, 90.0, 2.0);
        assert!(h.manager.on_fill(&fill).await.is_some());
        assert!(h.manager.on_fill(&fill).await.is_none());

        // 5 ladder orders + 1 replacement
        assert_eq!(h.exchange.limit_orders().await.len(), 6);
        assert_eq!(h.monitor.active_watches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_profit_scenario() {
        // BUY entry at 100, qty 2, take-profit 110, stop-loss 95
        let h = harness(test_config(), 102.0);
        let ids = h.manager.place_initial_ladder(&levels(), 102.0).await;
        let buy_id = id_at(&h, &ids, 100.0).await;

        h.manager.on_fill(&GridFill::new(buy_id.clone(), 100.0, 2.0)).await.unwrap();
        h.exchange.set_ticker(111.0).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(h.manager.order(&buy_id).await.is_none());

        let markets = h.exchange.market_orders().await;
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].side, OrderSide::Sell);
        assert_eq!(markets[0].quantity, 2.0);

        let stats = h.stats.snapshot().await;
        assert!((stats.total_pnl - 22.0).abs() < 1e-9);
        assert_eq!(stats.profit_trades, 1);
        assert_eq!(stats.loss_trades, 0);
        assert_eq!(h.monitor.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_loss_scenario() {
        let h = harness(test_config(), 102.0);
        let ids = h.manager.place_initial_ladder(&levels(), 102.0).await;
        let buy_id = id_at(&h, &ids, 100.0).await;

        h.manager.on_fill(&GridFill::new(buy_id.clone(), 100.0, 2.0)).await.unwrap();
        h.exchange.set_ticker(94.0).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(h.manager.order(&buy_id).await.is_none());
        let stats = h.stats.snapshot().await;
        assert!((stats.total_pnl + 12.0).abs() < 1e-9);
        assert_eq!(stats.loss_trades, 1);
        assert_eq!(stats.total_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_position_pnl_sign() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let sell_id = id_at(&h, &ids, 105.0).await;
        h.manager.on_fill(&GridFill::new(sell_id.clone(), 105.0, 2.0)).await.unwrap();

        let closed = h
            .manager
            .close_order(&sell_id, 101.0, CloseOutcome::Profit)
            .await
            .unwrap()
            .unwrap();

        assert!((closed.pnl - 8.0).abs() < 1e-9);
        assert_eq!(h.exchange.market_orders().await[0].side, OrderSide::Buy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flatten_restores_order() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let buy_id = id_at(&h, &ids, 95.0).await;
        h.manager.on_fill(&GridFill::new(buy_id.clone(), 95.0, 2.0)).await.unwrap();

        h.exchange.set_fail_market_orders(true).await;
        let result = h.manager.close_order(&buy_id, 111.0, CloseOutcome::Profit).await;
        assert!(result.is_err());

        let order = h.manager.order(&buy_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Monitoring);
        assert!(order.monitored);
        assert_eq!(h.stats.snapshot().await.total_trades, 0);

        h.exchange.set_fail_market_orders(false).await;
        let closed = h.manager.close_order(&buy_id, 111.0, CloseOutcome::Profit).await.unwrap();
        assert!(closed.is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.monitor.active_watches(), 0);
        assert_eq!(h.stats.snapshot().await.total_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_survives_concurrent_failed_close() {
        let h = harness(test_config(), 111.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let buy_id = id_at(&h, &ids, 95.0).await;
        h.manager.on_fill(&GridFill::new(buy_id.clone(), 95.0, 2.0)).await.unwrap();

        // Flatten takes 3s and then fails
        h.exchange.set_market_delay(Duration::from_secs(3)).await;
        h.exchange.set_fail_market_orders(true).await;

        // External close in flight from t=4 to t=7; the watch ticks at t=5
        tokio::time::sleep(Duration::from_secs(4)).await;
        let external = {
            let manager = h.manager.clone();
            let id = buy_id.clone();
            tokio::spawn(async move { manager.close_order(&id, 111.0, CloseOutcome::Profit).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            h.manager.close_order(&buy_id, 111.0, CloseOutcome::Profit).await,
            Err(GridError::CloseInProgress(_))
        ));

        assert!(external.await.unwrap().is_err());
        let order = h.manager.order(&buy_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Monitoring);
        assert_eq!(h.monitor.active_watches(), 1);

        // Next tick at t=10 closes once the exchange recovers
        h.exchange.set_fail_market_orders(false).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(h.manager.order(&buy_id).await.is_none());
        assert_eq!(h.monitor.active_watches(), 0);
        let stats = h.stats.snapshot().await;
        assert_eq!(stats.total_trades, 1);
        assert!((stats.total_pnl - 32.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ignores_unknown_and_resting() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;

        assert!(h
            .manager
            .close_order("missing", 100.0, CloseOutcome::Loss)
            .await
            .unwrap()
            .is_none());
        assert!(h
            .manager
            .close_order(&ids[0], 100.0, CloseOutcome::Loss)
            .await
            .unwrap()
            .is_none());
        assert!(h.exchange.market_orders().await.is_empty());
        assert_eq!(h.manager.order_count().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_after_close_is_noop() {
        let h = harness(test_config(), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let buy_id = id_at(&h, &ids, 95.0).await;
        let fill = GridFill::new(buy_id.clone(), 95.0, 2.0);

        h.manager.on_fill(&fill).await.unwrap();
        h.manager.close_order(&buy_id, 96.0, CloseOutcome::Profit).await.unwrap();
        let orders_before = h.exchange.orders.lock().await.len();

        assert!(h.manager.on_fill(&fill).await.is_none());
        assert!(h.manager.on_fill(&fill).await.is_none());

        assert_eq!(h.exchange.orders.lock().await.len(), orders_before);
        assert_eq!(h.stats.snapshot().await.total_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_level_count_step_skips_non_positive_replacement() {
        let h = harness(test_config().with_reladder_step(ReladderStep::LevelCount), 100.0);
        let ids = h.manager.place_initial_ladder(&levels(), 100.0).await;
        let sell_id = id_at(&h, &ids, 105.0).await;

        let outcome = h
            .manager
            .on_fill(&GridFill::new(sell_id, 105.0, 2.0))
            .await
            .unwrap();

        assert!(outcome.replacement_order_id.is_none());
        assert!(outcome.monitored);
        assert_eq!(h.exchange.limit_orders().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fills_and_closes() {
        let h = harness(test_config(), 100.0);
        let ladder = compute_levels(90.0, 110.0, 5).unwrap();
        let ids = h.manager.place_initial_ladder(&ladder, 111.0).await;
        assert_eq!(ids.len(), 5);

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let manager = h.manager.clone();
                let fill = GridFill::new(id.clone(), 100.0, 2.0);
                tokio::spawn(async move { manager.on_fill(&fill).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }

        assert_eq!(h.monitor.active_watches(), 5);
        assert_eq!(h.exchange.limit_orders().await.len(), 10);

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let manager = h.manager.clone();
                let id = id.clone();
                tokio::spawn(async move { manager.close_order(&id, 94.0, CloseOutcome::Loss).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }

        let stats = h.stats.snapshot().await;
        assert_eq!(stats.total_trades, 5);
        assert_eq!(stats.total_trades, stats.profit_trades + stats.loss_trades);
        assert_eq!(h.manager.summary().await.monitored, 0);
    }
}
