//! Realized performance tracking

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::types::CloseOutcome;

/// Aggregate of every closed position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_pnl: f64,
    pub total_trades: u32,
    pub profit_trades: u32,
    pub loss_trades: u32,
}

impl Stats {
    /// Add a completed trade
    pub fn record(&mut self, pnl: f64, outcome: CloseOutcome) {
        self.total_pnl += pnl;
        self.total_trades += 1;
        match outcome {
            CloseOutcome::Profit => self.profit_trades += 1,
            CloseOutcome::Loss => self.loss_trades += 1,
        }
    }

    /// Percentage of profitable closes, `None` before the first close
    pub fn win_rate(&self) -> Option<f64> {
        if self.total_trades > 0 {
            Some(self.profit_trades as f64 / self.total_trades as f64 * 100.0)
        } else {
            None
        }
    }
}

/// Point-in-time statistics for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub leverage: u32,
    pub total_pnl: f64,
    pub total_trades: u32,
    pub profit_trades: u32,
    pub loss_trades: u32,
    pub win_rate: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let win_rate = match self.win_rate {
            Some(rate) => format!("{rate:.2}%"),
            None => "n/a".to_string(),
        };
        write!(
            f,
            "leverage={}x total_pnl={:.4} trades={} (profit={}, loss={}) win_rate={}",
            self.leverage, self.total_pnl, self.total_trades, self.profit_trades, self.loss_trades, win_rate
        )
    }
}

/// Single mutation point for [`Stats`]
pub struct StatsTracker {
    leverage: u32,
    stats: Mutex<Stats>,
}

impl StatsTracker {
    pub fn new(leverage: u32) -> Self {
        Self {
            leverage,
            stats: Mutex::new(Stats::default()),
        }
    }

    pub async fn record_close(&self, pnl: f64, outcome: CloseOutcome) {
        self.stats.lock().await.record(pnl, outcome);
    }

    pub async fn snapshot(&self) -> Stats {
        self.stats.lock().await.clone()
    }

    pub async fn report(&self) -> StatsReport {
        let stats = self.stats.lock().await;
        StatsReport {
            leverage: self.leverage,
            total_pnl: stats.total_pnl,
            total_trades: stats.total_trades,
            profit_trades: stats.profit_trades,
            loss_trades: stats.loss_trades,
            win_rate: stats.win_rate(),
            generated_at: Utc::now(),
        }
    }
}
