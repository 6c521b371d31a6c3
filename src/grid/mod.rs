//! Grid Trading Module for a single perpetual futures instrument
//!
//! Places a ladder of limit orders across a price range, answers every fill
//! with an opposite-side order, and watches each filled order's position
//! until a take-profit or stop-loss price closes it at market.
//!
//! # Architecture
//!
//! - [`config`] - Grid configuration and validation
//! - [`types`] - Core data types (GridLevel, OrderSide, TrackedOrder, etc.)
//! - [`errors`] - Grid-specific error types
//! - [`levels`] - Ladder price computation
//! - [`executor`] - Exchange abstraction (mockable for testing)
//! - [`manager`] - Order lifecycle: placement, fills, closes
//! - [`monitor`] - Per-position threshold polling
//! - [`stats`] - Realized PnL and win rate
//! - [`paper`] - Simulated exchange
//! - [`runner`] - Startup, fill dispatch and shutdown
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use perp_grid_bot::grid::{GridBot, GridConfig, PaperExchange};
//! use tokio_util::sync::CancellationToken;
//!
//! // Levels 90, 95, 100, 105, 110; 2 contracts each at 5x
//! let config = GridConfig::new("BTCUSDT", 90.0, 110.0, 5, 2.0, 5, 110.0, 95.0);
//! let exchange = Arc::new(PaperExchange::new("BTCUSDT", 100.0));
//!
//! let bot = GridBot::new(config, exchange.clone())?;
//! bot.run(exchange.as_ref(), CancellationToken::new()).await?;
//! ```
//!
//! # Testing
//!
//! ```rust,ignore
//! use perp_grid_bot::grid::executor::mock::{MockExchange, MockFillFeed};
//!
//! let exchange = MockExchange::new(100.0);
//! let fill_feed = MockFillFeed::new();
//! ```

pub mod config;
pub mod errors;
pub mod executor;
pub mod levels;
pub mod manager;
pub mod monitor;
pub mod paper;
pub mod runner;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::{GridConfig, ReladderStep};
pub use errors::{GridError, GridResult};
pub use executor::{CallPolicy, FillFeed, GridExchange};
pub use levels::compute_levels;
pub use manager::{FillOutcome, LadderSummary, OrderManager};
pub use monitor::{PositionCloser, PositionMonitor};
pub use paper::{PaperConfig, PaperExchange};
pub use runner::{GridBot, InitSummary};
pub use stats::{Stats, StatsReport, StatsTracker};
pub use types::{
    CloseOutcome, ClosedPosition, GridFill, GridLevel, OrderRequest, OrderSide, OrderSnapshot,
    OrderStatus, PositionInfo,
};
