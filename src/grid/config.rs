//! Grid trading configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::levels::level_interval;
use super::types::OrderSide;

/// Upper bound on `max_call_attempts`
pub const MAX_CALL_ATTEMPTS: u32 = 10;

/// How far from a filled order its replacement is posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReladderStep {
    /// One ladder spacing: (upper - lower) / (grid_size - 1)
    #[default]
    GridInterval,
    /// `reladder_fraction` of the reference price
    Fraction,
    /// The level count itself used as a price fraction: reference * (1 ± grid_size)
    ///
    /// Kept for parity with earlier deployments. With any grid_size >= 1 a
    /// SELL fill yields a non-positive price and its replacement is skipped.
    LevelCount,
}

/// Grid bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Instrument to trade (e.g., "BTCUSDT")
    pub symbol: String,

    /// Number of price levels in the ladder
    pub grid_size: u32,

    /// Lower price boundary for the grid
    pub lower_price: f64,

    /// Upper price boundary for the grid
    pub upper_price: f64,

    /// Order quantity for every level
    pub quantity: f64,

    /// Leverage to request at startup
    pub leverage: u32,

    /// Absolute take-profit price shared by every position
    pub take_profit_price: f64,

    /// Absolute stop-loss price shared by every position
    pub stop_loss_price: f64,

    /// Trade against the exchange testnet
    #[serde(default = "default_testnet")]
    pub testnet: bool,

    /// Re-ladder formula
    #[serde(default)]
    pub reladder_step: ReladderStep,

    /// Price fraction used by `ReladderStep::Fraction`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reladder_fraction: Option<f64>,

    /// Seconds between threshold checks of a monitored position
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single exchange call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per exchange call (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_call_attempts: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_testnet() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_base_delay() -> u64 {
    100
}

impl GridConfig {
    /// Create a new grid configuration with required parameters
    ///
    /// # Arguments
    /// * `symbol` - Instrument to trade
    /// * `lower_price` / `upper_price` - Ladder bounds
    /// * `grid_size` - Number of levels
    /// * `quantity` - Order size per level
    /// * `leverage` - Leverage to set at startup
    /// * `take_profit_price` / `stop_loss_price` - Absolute close thresholds
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        lower_price: f64,
        upper_price: f64,
        grid_size: u32,
        quantity: f64,
        leverage: u32,
        take_profit_price: f64,
        stop_loss_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            grid_size,
            lower_price,
            upper_price,
            quantity,
            leverage,
            take_profit_price,
            stop_loss_price,
            testnet: default_testnet(),
            reladder_step: ReladderStep::default(),
            reladder_fraction: None,
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            max_call_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }

    /// Builder: set re-ladder formula
    pub fn with_reladder_step(mut self, step: ReladderStep) -> Self {
        self.reladder_step = step;
        self
    }

    /// Builder: re-ladder by a fixed fraction of the reference price
    pub fn with_reladder_fraction(mut self, fraction: f64) -> Self {
        self.reladder_step = ReladderStep::Fraction;
        self.reladder_fraction = Some(fraction);
        self
    }

    /// Builder: set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Builder: set retry parameters
    pub fn with_retry_config(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_call_attempts = max_attempts;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.symbol.is_empty() {
            return Err(GridError::InvalidConfig("symbol cannot be empty".into()));
        }

        let prices = [
            ("lower_price", self.lower_price),
            ("upper_price", self.upper_price),
            ("quantity", self.quantity),
            ("take_profit_price", self.take_profit_price),
            ("stop_loss_price", self.stop_loss_price),
        ];
        if let Some((name, value)) = prices.iter().find(|(_, v)| !v.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "{name} must be a finite number, got {value}"
            )));
        }
        if let Some(fraction) = self.reladder_fraction.filter(|f| !f.is_finite()) {
            return Err(GridError::InvalidConfig(format!(
                "reladder_fraction must be a finite number, got {fraction}"
            )));
        }

        if self.grid_size < 2 {
            return Err(GridError::InvalidConfig(
                "grid_size must be at least 2".into(),
            ));
        }

        if self.lower_price >= self.upper_price {
            return Err(GridError::InvalidConfig(
                "lower_price must be less than upper_price".into(),
            ));
        }

        if self.lower_price <= 0.0 {
            return Err(GridError::InvalidConfig(
                "lower_price must be positive".into(),
            ));
        }

        if self.quantity <= 0.0 {
            return Err(GridError::InvalidConfig("quantity must be positive".into()));
        }

        if self.leverage == 0 {
            return Err(GridError::InvalidConfig("leverage must be at least 1".into()));
        }

        if self.take_profit_price <= 0.0 || self.stop_loss_price <= 0.0 {
            return Err(GridError::InvalidConfig(
                "take_profit_price and stop_loss_price must be positive".into(),
            ));
        }

        if self.take_profit_price == self.stop_loss_price {
            return Err(GridError::InvalidConfig(
                "take_profit_price and stop_loss_price must differ".into(),
            ));
        }

        if self.poll_interval_secs == 0 || self.request_timeout_secs == 0 {
            return Err(GridError::InvalidConfig(
                "poll_interval_secs and request_timeout_secs must be non-zero".into(),
            ));
        }

        if self.max_call_attempts == 0 || self.max_call_attempts > MAX_CALL_ATTEMPTS {
            return Err(GridError::InvalidConfig(format!(
                "max_call_attempts must be in 1..={MAX_CALL_ATTEMPTS}"
            )));
        }

        if self.reladder_step == ReladderStep::Fraction {
            match self.reladder_fraction {
                Some(f) if f > 0.0 && f < 1.0 => {}
                _ => {
                    return Err(GridError::InvalidConfig(
                        "reladder_fraction must be in (0, 1) when reladder_step = fraction".into(),
                    ))
                }
            }
        }

        Ok(())
    }

    /// Price spacing between adjacent levels
    pub fn level_interval(&self) -> f64 {
        level_interval(self.lower_price, self.upper_price, self.grid_size)
    }

    /// Price of the replacement order after an order on `filled_side` fills
    ///
    /// A BUY fill is answered above the reference price, a SELL fill below it.
    pub fn reladder_price(&self, filled_side: OrderSide, reference_price: f64) -> f64 {
        let direction = match filled_side {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        };

        match self.reladder_step {
            ReladderStep::GridInterval => reference_price + direction * self.level_interval(),
            ReladderStep::Fraction => {
                let fraction = self.reladder_fraction.unwrap_or(0.0);
                reference_price * (1.0 + direction * fraction)
            }
            ReladderStep::LevelCount => {
                reference_price * (1.0 + direction * self.grid_size as f64)
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load config from JSON file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GridConfig {
        GridConfig::new("BTCUSDT", 90.0, 110.0, 5, 2.0, 5, 110.0, 95.0)
    }

    #[test]
    fn test_config_validation() {
        assert!(base().validate().is_ok());

        // Invalid: lower >= upper
        let mut config = base();
        config.lower_price = 110.0;
        assert!(config.validate().is_err());

        // Invalid: grid_size < 2
        let mut config = base();
        config.grid_size = 1;
        assert!(config.validate().is_err());

        // Invalid: quantity <= 0
        let mut config = base();
        config.quantity = 0.0;
        assert!(config.validate().is_err());

        // Invalid: leverage 0
        let mut config = base();
        config.leverage = 0;
        assert!(config.validate().is_err());

        // Invalid: identical thresholds
        let mut config = base();
        config.stop_loss_price = config.take_profit_price;
        assert!(config.validate().is_err());

        // Invalid: fraction mode without a usable fraction
        let config = base().with_reladder_step(ReladderStep::Fraction);
        assert!(config.validate().is_err());
        let config = base().with_reladder_fraction(1.5);
        assert!(config.validate().is_err());
        let config = base().with_reladder_fraction(0.01);
        assert!(config.validate().is_ok());

        // Invalid: too many attempts per call
        let config = base().with_retry_config(40, 0);
        assert!(config.validate().is_err());
        let config = base().with_retry_config(MAX_CALL_ATTEMPTS, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let mut config = base();
        config.upper_price = f64::NAN;
        assert!(matches!(config.validate(), Err(GridError::InvalidConfig(_))));

        let mut config = base();
        config.lower_price = f64::NEG_INFINITY;
        assert!(config.validate().is_err());

        let mut config = base();
        config.quantity = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = base();
        config.take_profit_price = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = base();
        config.stop_loss_price = f64::NAN;
        assert!(config.validate().is_err());

        let config = base().with_reladder_fraction(f64::NAN);
        assert!(config.validate().is_err());

        // Checked even when the fraction is unused
        let mut config = base();
        config.reladder_fraction = Some(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_interval() {
        assert!((base().level_interval() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_reladder_grid_interval() {
        let config = base();
        assert!((config.reladder_price(OrderSide::Buy, 95.0) - 100.0).abs() < 1e-9);
        assert!((config.reladder_price(OrderSide::Sell, 105.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_reladder_fraction() {
        let config = base().with_reladder_fraction(0.01);
        assert!((config.reladder_price(OrderSide::Buy, 100.0) - 101.0).abs() < 1e-9);
        assert!((config.reladder_price(OrderSide::Sell, 100.0) - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_reladder_level_count() {
        let config = base().with_reladder_step(ReladderStep::LevelCount);
        // 5 levels: 100 * (1 + 5) and 100 * (1 - 5)
        assert!((config.reladder_price(OrderSide::Buy, 100.0) - 600.0).abs() < 1e-9);
        assert!(config.reladder_price(OrderSide::Sell, 100.0) <= 0.0);
    }

    #[test]
    fn test_defaults_from_json() {
        let json = r#"{
            "symbol": "ETHUSDT",
            "grid_size": 10,
            "lower_price": 1800.0,
            "upper_price": 2200.0,
            "quantity": 0.1,
            "leverage": 3,
            "take_profit_price": 2300.0,
            "stop_loss_price": 1700.0
        }"#;
        let config: GridConfig = serde_json::from_str(json).unwrap();
        assert!(config.testnet);
        assert_eq!(config.reladder_step, ReladderStep::GridInterval);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_call_attempts, 1);
        assert!(config.validate().is_ok());
    }
}
