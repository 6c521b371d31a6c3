//! Grid bot runner - wires the ladder, order manager and monitor together

use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use super::config::GridConfig;
use super::errors::GridResult;
use super::executor::{CallPolicy, FillFeed, GridExchange};
use super::levels::compute_levels;
use super::manager::{FillOutcome, OrderManager};
use super::monitor::PositionMonitor;
use super::stats::{StatsReport, StatsTracker};
use super::types::{GridFill, GridLevel};

/// Outcome of [`GridBot::initialize`]
#[derive(Debug, Clone, PartialEq)]
pub struct InitSummary {
    pub levels: Vec<GridLevel>,
    /// Ids of the ladder orders that were accepted
    pub placed: Vec<String>,
    /// `None` if the price could not be fetched and no ladder was placed
    pub current_price: Option<f64>,
}

/// Perpetual-futures grid bot
pub struct GridBot<E: GridExchange> {
    config: Arc<GridConfig>,
    exchange: Arc<E>,
    policy: CallPolicy,
    monitor: Arc<PositionMonitor<E>>,
    stats: Arc<StatsTracker>,
    manager: Arc<OrderManager<E>>,
}

impl<E: GridExchange + 'static> GridBot<E> {
    /// Build a bot; fails with `InvalidConfig` before touching the exchange
    pub fn new(config: GridConfig, exchange: Arc<E>) -> GridResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let policy = CallPolicy::from_config(&config);
        let monitor = Arc::new(PositionMonitor::from_config(exchange.clone(), &config));
        let stats = Arc::new(StatsTracker::new(config.leverage));
        let manager = Arc::new(OrderManager::new(
            config.clone(),
            exchange.clone(),
            monitor.clone(),
            stats.clone(),
        ));

        Ok(Self {
            config,
            exchange,
            policy,
            monitor,
            stats,
            manager,
        })
    }

    /// Set leverage, compute the ladder and place it
    ///
    /// Leverage and position failures are logged and startup continues. If
    /// the current price is unavailable no ladder is placed.
    pub async fn initialize(&self) -> GridResult<InitSummary> {
        let symbol = &self.config.symbol;
        info!(
            "Initializing grid for {}: {} levels in [{}, {}], qty={}, leverage={}x, testnet={}",
            symbol,
            self.config.grid_size,
            self.config.lower_price,
            self.config.upper_price,
            self.config.quantity,
            self.config.leverage,
            self.config.testnet
        );

        match self
            .policy
            .run("set_leverage", || self.exchange.set_leverage(symbol, self.config.leverage))
            .await
        {
            Ok(()) => info!("Leverage set to {}x", self.config.leverage),
            Err(e) => error!("Failed to set leverage to {}x: {}", self.config.leverage, e),
        }

        match self.policy.run("get_position", || self.exchange.get_position(symbol)).await {
            Ok(position) => info!(
                "Current position: size={} entry={:?} leverage={}x",
                position.size, position.entry_price, position.leverage
            ),
            Err(e) => warn!("Failed to query position: {}", e),
        }

        let levels = compute_levels(
            self.config.lower_price,
            self.config.upper_price,
            self.config.grid_size,
        )?;

        let current_price = match self.policy.run("get_ticker", || self.exchange.get_ticker(symbol)).await {
            Ok(price) => price,
            Err(e) => {
                error!("Failed to fetch current price, not placing ladder: {}", e);
                return Ok(InitSummary {
                    levels,
                    placed: Vec::new(),
                    current_price: None,
                });
            }
        };
        info!("Current price: {}", current_price);

        let placed = self.manager.place_initial_ladder(&levels, current_price).await;

        Ok(InitSummary {
            levels,
            placed,
            current_price: Some(current_price),
        })
    }

    /// Dispatch one fill notification
    pub async fn handle_fill(&self, fill: &GridFill) -> Option<FillOutcome> {
        let outcome = self.manager.on_fill(fill).await;
        if outcome.is_some() {
            let summary = self.manager.summary().await;
            info!(
                "Ladder: {} resting buys, {} resting sells, {} monitored, {} closing",
                summary.resting_buys, summary.resting_sells, summary.monitored, summary.closing
            );
        }
        outcome
    }

    /// Connect, initialize and process fills until `shutdown` fires or the feed ends
    pub async fn run<F: FillFeed>(&self, fill_feed: &F, shutdown: CancellationToken) -> GridResult<()> {
        if let Err(e) = self.policy.run("connect", || self.exchange.connect()).await {
            error!("Failed to connect: {}", e);
            return Err(e);
        }

        // Subscribe before placing orders so no ladder fill is missed
        let mut fills = fill_feed.subscribe().await?;

        let summary = self.initialize().await?;
        info!(
            "Grid initialized: {}/{} orders placed",
            summary.placed.len(),
            summary.levels.len()
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                fill = fills.recv() => match fill {
                    Some(fill) => {
                        self.handle_fill(&fill).await;
                    }
                    None => {
                        warn!("Fill feed closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop every position watch and log the final statistics
    pub async fn shutdown(&self) -> StatsReport {
        self.monitor.shutdown().await;
        let report = self.stats.report().await;
        info!("Final stats: {}", report);
        report
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<OrderManager<E>> {
        &self.manager
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub fn monitor(&self) -> &Arc<PositionMonitor<E>> {
        &self.monitor
    }
}
