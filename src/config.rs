//! Controller configuration
//! Loaded from a TOML file (path via CLI or CLMM_LP_CONFIG env var).
//!
//! All percentage-like fields are RATIOS in (0, 1), not percent points:
//! 0.01 means 1%. Values given as percent points (e.g. 12 for "12%") are
//! rejected at load time.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be >= 0")]
    Negative { field: &'static str },
    #[error("{field} must be < 1 (use a ratio, e.g. 0.01 for 1%)")]
    NotARatio { field: &'static str },
    #[error("{field} must be > 0 and < 1")]
    OutOfRange { field: &'static str },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Which venue the pool lives on; decides range alignment and ratio clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolVenue {
    UniswapV3,
    Meteora,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    // Identity and venue
    pub id: String,
    pub venue: PoolVenue,
    pub connector_name: String,
    pub router_connector: String,
    /// Strategy orientation, "BASE-QUOTE"
    pub trading_pair: String,
    /// On-chain token order when it differs from the strategy orientation
    #[serde(default)]
    pub pool_trading_pair: Option<String>,
    pub pool_address: String,

    // Entry trigger (0 = always enter)
    #[serde(default)]
    pub target_price: Decimal,
    #[serde(default = "default_true")]
    pub trigger_above: bool,

    // Budget
    /// Capital cap in quote units; the anchor never exceeds it
    #[serde(default)]
    pub position_value_quote: Decimal,

    // Range construction
    /// Range width ratio, (0, 1)
    #[serde(default = "default_position_width")]
    pub position_width_pct: Decimal,
    /// v3 only: price clamp for the deposit ratio, in tick-spacing multiples
    #[serde(default = "default_one")]
    pub ratio_clamp_tick_multiplier: i64,
    /// Meteora only: price clamp as a fraction of the range
    #[serde(default = "default_edge_buffer")]
    pub ratio_edge_buffer_pct: Decimal,
    /// Meteora only: strategy type forwarded to the LP executor
    #[serde(default)]
    pub meteora_strategy_type: Option<i64>,

    // Rebalancing
    #[serde(default = "default_true")]
    pub rebalance_enabled: bool,
    /// Seconds a position must stay out of range before a rebalance fires
    #[serde(default = "default_rebalance_seconds")]
    pub rebalance_seconds: u32,
    /// Deviation ratio below which out-of-range is ignored
    #[serde(default = "default_hysteresis")]
    pub hysteresis_pct: Decimal,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u32,
    /// 0 disables the hourly cap
    #[serde(default = "default_max_rebalances")]
    pub max_rebalances_per_hour: u32,
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_sec: u32,
    #[serde(default = "default_open_timeout")]
    pub open_timeout_sec: u32,

    // Inventory swaps
    #[serde(default = "default_true")]
    pub auto_swap_enabled: bool,
    /// Minimum swap value as a fraction of the effective budget
    #[serde(default = "default_swap_min_value")]
    pub swap_min_value_pct: Decimal,
    /// SELL size shave, guards against balance rounding
    #[serde(default = "default_swap_buffer")]
    pub swap_safety_buffer_pct: Decimal,
    /// Router slippage ratio
    #[serde(default = "default_swap_slippage")]
    pub swap_slippage_pct: Decimal,
    #[serde(default = "default_max_swap_attempts")]
    pub max_inventory_swap_attempts: u32,

    // Inventory normalization between retries
    /// 0 disables normalization
    #[serde(default)]
    pub inventory_drift_tolerance_pct: Decimal,
    #[serde(default)]
    pub normalization_min_value_pct: Decimal,
    #[serde(default = "default_cooldown_seconds")]
    pub normalization_cooldown_sec: u32,
    #[serde(default)]
    pub normalization_strict: bool,

    // Cost filter
    #[serde(default)]
    pub cost_filter_enabled: bool,
    #[serde(default)]
    pub cost_filter_fee_rate_bootstrap_quote_per_hour: Decimal,
    #[serde(default)]
    pub cost_filter_fixed_cost_quote: Decimal,
    #[serde(default = "default_payback_sec")]
    pub cost_filter_max_payback_sec: u32,

    // Exits
    /// 0 disables stop-loss
    #[serde(default)]
    pub stop_loss_pnl_pct: Decimal,
    /// 0 disables take-profit
    #[serde(default)]
    pub take_profit_pnl_pct: Decimal,
    #[serde(default = "default_stop_loss_pause")]
    pub stop_loss_pause_sec: u32,
    /// SELL residual base to quote after a stop-loss / take-profit close
    #[serde(default = "default_true")]
    pub exit_full_liquidation: bool,
    #[serde(default = "default_max_swap_attempts")]
    pub max_exit_swap_attempts: u32,
    #[serde(default = "default_max_refresh_attempts")]
    pub max_exit_balance_refresh_attempts: u32,
    #[serde(default = "default_true")]
    pub reenter_enabled: bool,
    #[serde(default)]
    pub manual_kill_switch: bool,

    // Wallet / balance plumbing
    #[serde(default)]
    pub budget_key: Option<String>,
    #[serde(default)]
    pub native_token_symbol: Option<String>,
    /// Base kept back from exit liquidation (gas reserve)
    #[serde(default)]
    pub min_native_balance: Decimal,
    #[serde(default = "default_balance_interval")]
    pub balance_refresh_interval_sec: u32,
    #[serde(default = "default_balance_timeout")]
    pub balance_refresh_timeout_sec: u32,
}

fn default_true() -> bool {
    true
}
fn default_one() -> i64 {
    1
}
fn default_position_width() -> Decimal {
    Decimal::from_parts(12, 0, 0, false, 2) // 0.12
}
fn default_edge_buffer() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 2) // 0.05
}
fn default_rebalance_seconds() -> u32 {
    60
}
fn default_hysteresis() -> Decimal {
    Decimal::from_parts(2, 0, 0, false, 3) // 0.002
}
fn default_cooldown_seconds() -> u32 {
    30
}
fn default_max_rebalances() -> u32 {
    20
}
fn default_reopen_delay() -> u32 {
    5
}
fn default_open_timeout() -> u32 {
    300
}
fn default_swap_min_value() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 3) // 0.005
}
fn default_swap_buffer() -> Decimal {
    Decimal::from_parts(2, 0, 0, false, 2) // 0.02
}
fn default_swap_slippage() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, 2) // 0.01
}
fn default_max_swap_attempts() -> u32 {
    3
}
fn default_max_refresh_attempts() -> u32 {
    3
}
fn default_payback_sec() -> u32 {
    3600
}
fn default_stop_loss_pause() -> u32 {
    1800
}
fn default_balance_interval() -> u32 {
    20
}
fn default_balance_timeout() -> u32 {
    30
}

impl ControllerConfig {
    /// Reject ratios given as percent points and malformed identities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Empty { field: "id" });
        }
        if self.trading_pair.is_empty() {
            return Err(ConfigError::Empty { field: "trading_pair" });
        }
        if self.position_value_quote < Decimal::ZERO {
            return Err(ConfigError::Negative {
                field: "position_value_quote",
            });
        }
        if self.min_native_balance < Decimal::ZERO {
            return Err(ConfigError::Negative {
                field: "min_native_balance",
            });
        }
        if self.position_width_pct <= Decimal::ZERO || self.position_width_pct >= Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                field: "position_width_pct",
            });
        }
        for (field, value) in [
            ("hysteresis_pct", self.hysteresis_pct),
            ("swap_min_value_pct", self.swap_min_value_pct),
            ("swap_safety_buffer_pct", self.swap_safety_buffer_pct),
            ("swap_slippage_pct", self.swap_slippage_pct),
            ("stop_loss_pnl_pct", self.stop_loss_pnl_pct),
            ("take_profit_pnl_pct", self.take_profit_pnl_pct),
            ("inventory_drift_tolerance_pct", self.inventory_drift_tolerance_pct),
            ("normalization_min_value_pct", self.normalization_min_value_pct),
            ("ratio_edge_buffer_pct", self.ratio_edge_buffer_pct),
        ] {
            if value < Decimal::ZERO {
                return Err(ConfigError::Negative { field });
            }
            if value >= Decimal::ONE {
                return Err(ConfigError::NotARatio { field });
            }
        }
        Ok(())
    }

    pub fn budget_key(&self) -> &str {
        self.budget_key.as_deref().unwrap_or(&self.id)
    }
}

/// Load and validate a controller config from a TOML file.
/// A `.env` file is honored for the CLMM_LP_CONFIG path override.
pub fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    dotenv::dotenv().ok();

    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var("CLMM_LP_CONFIG")
            .context("no config path given and CLMM_LP_CONFIG not set")?
            .into(),
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: ControllerConfig =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(config)
}
