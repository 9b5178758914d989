//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::persist::Settings;
use crate::strategy::SelectionMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub profit_target: ProfitTargetConfig,
    #[serde(default)]
    pub sell: SellConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WalletConfig {
    /// Keypair JSON file. Empty means fall back to `KEYPAIR_PATH`.
    #[serde(default)]
    pub keypair_path: String,
}

impl WalletConfig {
    /// Resolve the keypair path from config or environment
    pub fn resolve_keypair_path(&self) -> Option<String> {
        if !self.keypair_path.is_empty() {
            return Some(self.keypair_path.clone());
        }
        std::env::var("KEYPAIR_PATH").ok()
    }
}

/// Loop cadences and persisted state location
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Decision tick period
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Pending-credit watchdog period
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    /// Candidate ranking prefetch period
    #[serde(default = "default_prefetch_ms")]
    pub prefetch_ms: u64,
    /// Per-call timeout for quote, balance and panel lookups
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Liquidate any residual position when the engine stops
    #[serde(default = "default_true")]
    pub liquidate_on_stop: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: default_tick_ms(),
            watchdog_ms: default_watchdog_ms(),
            prefetch_ms: default_prefetch_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            state_path: default_state_path(),
            liquidate_on_stop: true,
        }
    }
}

/// Buy sizing and swap execution
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Fraction of native balance spent per buy
    #[serde(default = "default_buy_fraction")]
    pub buy_fraction: f64,
    #[serde(default = "default_min_buy_sol")]
    pub min_buy_sol: f64,
    #[serde(default = "default_max_buy_sol")]
    pub max_buy_sol: f64,
    /// Native balance always left untouched for fees and rent
    #[serde(default = "default_fee_reserve_sol")]
    pub fee_reserve_sol: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_swap_timeout_ms")]
    pub swap_timeout_ms: u64,
    /// Attempts to observe the debit after a sell
    #[serde(default = "default_debit_retries")]
    pub debit_retries: u32,
    #[serde(default = "default_debit_retry_ms")]
    pub debit_retry_ms: u64,
    #[serde(default = "default_priority_fee_sol")]
    pub priority_fee_sol: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_fraction: default_buy_fraction(),
            min_buy_sol: default_min_buy_sol(),
            max_buy_sol: default_max_buy_sol(),
            fee_reserve_sol: default_fee_reserve_sol(),
            slippage_bps: default_slippage_bps(),
            swap_timeout_ms: default_swap_timeout_ms(),
            debit_retries: default_debit_retries(),
            debit_retry_ms: default_debit_retry_ms(),
            priority_fee_sol: default_priority_fee_sol(),
        }
    }
}

/// Candidate selector weights and stickiness
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_sticky_ms")]
    pub sticky_ms: u64,
    /// A prefetched pick older than this is a cache miss
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    #[serde(default = "default_weight_badge")]
    pub weight_badge: f64,
    #[serde(default = "default_weight_score")]
    pub weight_score: f64,
    #[serde(default = "default_weight_liquidity")]
    pub weight_liquidity: f64,
    #[serde(default = "default_weight_volume")]
    pub weight_volume: f64,
    #[serde(default = "default_weight_readiness")]
    pub weight_readiness: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::default(),
            top_n: default_top_n(),
            sticky_ms: default_sticky_ms(),
            staleness_ms: default_staleness_ms(),
            weight_badge: default_weight_badge(),
            weight_score: default_weight_score(),
            weight_liquidity: default_weight_liquidity(),
            weight_volume: default_weight_volume(),
            weight_readiness: default_weight_readiness(),
        }
    }
}

/// Trigger evaluator thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Minimum samples before a trigger can fire
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Minimum wall-clock span of those samples
    #[serde(default = "default_min_span_secs")]
    pub min_span_secs: u64,
    #[serde(default = "default_slope_window")]
    pub slope_window: usize,
    /// Score slope (points per minute) that qualifies without a price slope
    #[serde(default = "default_min_score_slope")]
    pub min_score_slope: f64,
    #[serde(default)]
    pub allow_warm_ride: bool,
    /// Ring buffer capacity per asset
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Minimum spacing between stored samples of one asset
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Assets with no sample for this long are dropped from tracking
    #[serde(default = "default_history_horizon_secs")]
    pub history_horizon_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            min_span_secs: default_min_span_secs(),
            slope_window: default_slope_window(),
            min_score_slope: default_min_score_slope(),
            allow_warm_ride: false,
            history_capacity: default_history_capacity(),
            sample_interval_ms: default_sample_interval_ms(),
            history_horizon_secs: default_history_horizon_secs(),
        }
    }
}

/// Pre-buy gate, locks and bans
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    /// Refuse to buy above this risk severity
    #[serde(default = "default_max_buy_severity")]
    pub max_buy_severity: f64,
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    /// Max extra loss of a full-size quote versus a small probe quote
    #[serde(default = "default_max_price_impact_pct")]
    pub max_price_impact_pct: f64,
    #[serde(default = "default_asset_lock_ms")]
    pub asset_lock_ms: u64,
    #[serde(default = "default_buy_lock_ms")]
    pub buy_lock_ms: u64,
    #[serde(default = "default_router_cooldown_ms")]
    pub router_cooldown_ms: u64,
    #[serde(default = "default_blacklist_secs")]
    pub blacklist_secs: u64,
    #[serde(default = "default_reentry_ban_secs")]
    pub reentry_ban_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_buy_severity: default_max_buy_severity(),
            min_liquidity_usd: default_min_liquidity_usd(),
            max_price_impact_pct: default_max_price_impact_pct(),
            asset_lock_ms: default_asset_lock_ms(),
            buy_lock_ms: default_buy_lock_ms(),
            router_cooldown_ms: default_router_cooldown_ms(),
            blacklist_secs: default_blacklist_secs(),
            reentry_ban_secs: default_reentry_ban_secs(),
        }
    }
}

/// Round-trip edge estimation
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_platform_fee_bps")]
    pub platform_fee_bps: u16,
    #[serde(default = "default_network_fee_sol")]
    pub network_fee_sol: f64,
    /// One-time token account rent when the ATA does not exist yet
    #[serde(default = "default_ata_rent_sol")]
    pub ata_rent_sol: f64,
    /// Refuse buys whose simulated round trip loses more than this
    #[serde(default = "default_max_round_trip_loss_pct")]
    pub max_round_trip_loss_pct: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: default_platform_fee_bps(),
            network_fee_sol: default_network_fee_sol(),
            ata_rent_sol: default_ata_rent_sol(),
            max_round_trip_loss_pct: default_max_round_trip_loss_pct(),
        }
    }
}

/// Decaying profit target
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
pub struct ProfitTargetConfig {
    #[serde(default = "default_target_start_pct")]
    pub start_pct: f64,
    #[serde(default = "default_target_floor_pct")]
    pub floor_pct: f64,
    /// Target decay per `decay_period_mins`
    #[serde(default = "default_target_decay_pct")]
    pub decay_pct: f64,
    #[serde(default = "default_target_decay_period_mins")]
    pub decay_period_mins: f64,
    /// PnL at or below which the decay accelerates
    #[serde(default)]
    pub underperformance_pct: f64,
    /// Multiplier growth per PnL point below the threshold
    #[serde(default = "default_target_k_pnl")]
    pub k_pnl: f64,
    /// Multiplier growth per minute while underperforming
    #[serde(default = "default_target_k_time")]
    pub k_time: f64,
    #[serde(default = "default_target_max_multiplier")]
    pub max_multiplier: f64,
}

impl Default for ProfitTargetConfig {
    fn default() -> Self {
        Self {
            start_pct: default_target_start_pct(),
            floor_pct: default_target_floor_pct(),
            decay_pct: default_target_decay_pct(),
            decay_period_mins: default_target_decay_period_mins(),
            underperformance_pct: 0.0,
            k_pnl: default_target_k_pnl(),
            k_time: default_target_k_time(),
            max_multiplier: default_target_max_multiplier(),
        }
    }
}

/// Sell pipeline thresholds (percentages are PnL points)
#[derive(Debug, Clone, Deserialize)]
pub struct SellConfig {
    /// Risk severity that forces rug mode
    #[serde(default = "default_rug_severity")]
    pub rug_severity: f64,
    /// Tick-over-tick valuation drop that forces rug mode
    #[serde(default = "default_quote_shock_pct")]
    pub quote_shock_pct: f64,

    // Fade exit (calm + rug)
    #[serde(default = "default_fade_min_peak_pct")]
    pub fade_min_peak_pct: f64,
    /// Fraction of the peak given back before the fade exit fires
    #[serde(default = "default_fade_giveback_ratio")]
    pub fade_giveback_ratio: f64,

    // Early fade
    #[serde(default = "default_early_fade_drop_pct")]
    pub early_fade_drop_pct: f64,

    // Observer
    #[serde(default = "default_observer_drop_pct")]
    pub observer_drop_pct: f64,
    #[serde(default = "default_observer_samples")]
    pub observer_samples: usize,

    // Volatility guard
    #[serde(default = "default_volatility_swing_pct")]
    pub volatility_swing_pct: f64,

    // Fast exit ladder
    #[serde(default = "default_hard_stop_pct")]
    pub hard_stop_pct: f64,
    #[serde(default = "default_tp1_pct")]
    pub tp1_pct: f64,
    #[serde(default = "default_tp1_sell_pct")]
    pub tp1_sell_pct: f64,
    #[serde(default = "default_tp2_pct")]
    pub tp2_pct: f64,
    #[serde(default = "default_tp2_sell_pct")]
    pub tp2_sell_pct: f64,
    #[serde(default = "default_trail_arm_pct")]
    pub trail_arm_pct: f64,
    #[serde(default = "default_trail_pct")]
    pub trail_pct: f64,

    // Dynamic hard stop
    #[serde(default = "default_dynamic_stop_min_pct")]
    pub dynamic_stop_min_pct: f64,
    #[serde(default = "default_dynamic_stop_max_pct")]
    pub dynamic_stop_max_pct: f64,

    // Warming hold
    #[serde(default = "default_warming_min_pct")]
    pub warming_min_pct: f64,
    #[serde(default = "default_warming_decay_per_min")]
    pub warming_decay_per_min: f64,
    #[serde(default = "default_warming_max_secs")]
    pub warming_max_secs: u64,

    // Profit lock
    #[serde(default = "default_profit_lock_arm_pct")]
    pub profit_lock_arm_pct: f64,
    /// Share of the peak PnL that is locked once armed
    #[serde(default = "default_profit_lock_keep_ratio")]
    pub profit_lock_keep_ratio: f64,

    #[serde(default = "default_strike_limit")]
    pub strike_limit: u32,

    // Rebound gate
    #[serde(default = "default_rebound_max_defer_ms")]
    pub rebound_max_defer_ms: u64,
    /// Price-change slope (points per minute) counted as a strong reversal
    #[serde(default = "default_rebound_min_slope")]
    pub rebound_min_slope: f64,

    // Momentum guard
    #[serde(default = "default_slip_confirm_ticks")]
    pub slip_confirm_ticks: u32,

    /// Soft exits never realize a PnL below this
    #[serde(default)]
    pub profit_floor_pct: f64,
}

impl Default for SellConfig {
    fn default() -> Self {
        Self {
            rug_severity: default_rug_severity(),
            quote_shock_pct: default_quote_shock_pct(),
            fade_min_peak_pct: default_fade_min_peak_pct(),
            fade_giveback_ratio: default_fade_giveback_ratio(),
            early_fade_drop_pct: default_early_fade_drop_pct(),
            observer_drop_pct: default_observer_drop_pct(),
            observer_samples: default_observer_samples(),
            volatility_swing_pct: default_volatility_swing_pct(),
            hard_stop_pct: default_hard_stop_pct(),
            tp1_pct: default_tp1_pct(),
            tp1_sell_pct: default_tp1_sell_pct(),
            tp2_pct: default_tp2_pct(),
            tp2_sell_pct: default_tp2_sell_pct(),
            trail_arm_pct: default_trail_arm_pct(),
            trail_pct: default_trail_pct(),
            dynamic_stop_min_pct: default_dynamic_stop_min_pct(),
            dynamic_stop_max_pct: default_dynamic_stop_max_pct(),
            warming_min_pct: default_warming_min_pct(),
            warming_decay_per_min: default_warming_decay_per_min(),
            warming_max_secs: default_warming_max_secs(),
            profit_lock_arm_pct: default_profit_lock_arm_pct(),
            profit_lock_keep_ratio: default_profit_lock_keep_ratio(),
            strike_limit: default_strike_limit(),
            rebound_max_defer_ms: default_rebound_max_defer_ms(),
            rebound_min_slope: default_rebound_min_slope(),
            slip_confirm_ticks: default_slip_confirm_ticks(),
            profit_floor_pct: 0.0,
        }
    }
}

/// Pending-credit reconciler
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Grace TTL of a pending credit
    #[serde(default = "default_credit_ttl_secs")]
    pub credit_ttl_secs: u64,
    /// Absolute lifetime of one watchdog run
    #[serde(default = "default_watchdog_ceiling_secs")]
    pub watchdog_ceiling_secs: u64,
    /// Minimum spacing between polls of the same entry
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    /// Poll spacing multiplier after an upstream stress signal
    #[serde(default = "default_stress_backoff_factor")]
    pub stress_backoff_factor: u32,
    #[serde(default = "default_partial_fill_ratio")]
    pub partial_fill_ratio: f64,
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            credit_ttl_secs: default_credit_ttl_secs(),
            watchdog_ceiling_secs: default_watchdog_ceiling_secs(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            stress_backoff_factor: default_stress_backoff_factor(),
            partial_fill_ratio: default_partial_fill_ratio(),
            warmup_secs: default_warmup_secs(),
        }
    }
}

/// External HTTP service endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_dexscreener_url")]
    pub dexscreener_url: String,
    #[serde(default = "default_jupiter_url")]
    pub jupiter_url: String,
    #[serde(default)]
    pub jupiter_api_key: String,
    #[serde(default = "default_pumpportal_url")]
    pub pumpportal_url: String,
    /// 5m change of the leader above which momentum mode is on
    #[serde(default = "default_momentum_change_pct")]
    pub momentum_change_pct: f64,
    /// Simulated settlement lag of the paper book
    #[serde(default = "default_paper_credit_delay_ms")]
    pub paper_credit_delay_ms: u64,
    #[serde(default = "default_paper_balance_sol")]
    pub paper_balance_sol: f64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            dexscreener_url: default_dexscreener_url(),
            jupiter_url: default_jupiter_url(),
            jupiter_api_key: String::new(),
            pumpportal_url: default_pumpportal_url(),
            momentum_change_pct: default_momentum_change_pct(),
            paper_credit_delay_ms: default_paper_credit_delay_ms(),
            paper_balance_sol: default_paper_balance_sol(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_rpc_endpoint() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    1500
}

fn default_watchdog_ms() -> u64 {
    400
}

fn default_prefetch_ms() -> u64 {
    500
}

fn default_call_timeout_ms() -> u64 {
    8000
}

fn default_state_path() -> String {
    "sniper_state.json".to_string()
}

fn default_buy_fraction() -> f64 {
    0.25
}

fn default_min_buy_sol() -> f64 {
    0.01
}

fn default_max_buy_sol() -> f64 {
    0.1
}

fn default_fee_reserve_sol() -> f64 {
    0.02
}

fn default_slippage_bps() -> u16 {
    1500
}

fn default_swap_timeout_ms() -> u64 {
    20000
}

fn default_debit_retries() -> u32 {
    6
}

fn default_debit_retry_ms() -> u64 {
    1000
}

fn default_priority_fee_sol() -> f64 {
    0.0005
}

fn default_top_n() -> usize {
    10
}

fn default_sticky_ms() -> u64 {
    8000
}

fn default_staleness_ms() -> u64 {
    2000
}

fn default_weight_badge() -> f64 {
    1.0
}

fn default_weight_score() -> f64 {
    0.05
}

fn default_weight_liquidity() -> f64 {
    0.5
}

fn default_weight_volume() -> f64 {
    0.3
}

fn default_weight_readiness() -> f64 {
    2.0
}

fn default_min_samples() -> usize {
    4
}

fn default_min_span_secs() -> u64 {
    45
}

fn default_slope_window() -> usize {
    3
}

fn default_min_score_slope() -> f64 {
    0.5
}

fn default_history_capacity() -> usize {
    120
}

fn default_sample_interval_ms() -> u64 {
    1500
}

fn default_history_horizon_secs() -> u64 {
    300
}

fn default_max_buy_severity() -> f64 {
    0.6
}

fn default_min_liquidity_usd() -> f64 {
    5000.0
}

fn default_max_price_impact_pct() -> f64 {
    8.0
}

fn default_asset_lock_ms() -> u64 {
    20_000
}

fn default_buy_lock_ms() -> u64 {
    10_000
}

fn default_router_cooldown_ms() -> u64 {
    15_000
}

fn default_blacklist_secs() -> u64 {
    600
}

fn default_reentry_ban_secs() -> u64 {
    1200
}

fn default_platform_fee_bps() -> u16 {
    100
}

fn default_network_fee_sol() -> f64 {
    0.000_105
}

fn default_ata_rent_sol() -> f64 {
    0.002_039_28
}

fn default_max_round_trip_loss_pct() -> f64 {
    12.0
}

fn default_target_start_pct() -> f64 {
    7.0
}

fn default_target_floor_pct() -> f64 {
    2.0
}

fn default_target_decay_pct() -> f64 {
    1.0
}

fn default_target_decay_period_mins() -> f64 {
    3.0
}

fn default_target_k_pnl() -> f64 {
    0.1
}

fn default_target_k_time() -> f64 {
    0.05
}

fn default_target_max_multiplier() -> f64 {
    3.0
}

fn default_rug_severity() -> f64 {
    0.7
}

fn default_quote_shock_pct() -> f64 {
    15.0
}

fn default_fade_min_peak_pct() -> f64 {
    4.0
}

fn default_fade_giveback_ratio() -> f64 {
    0.5
}

fn default_early_fade_drop_pct() -> f64 {
    6.0
}

fn default_observer_drop_pct() -> f64 {
    2.0
}

fn default_observer_samples() -> usize {
    3
}

fn default_volatility_swing_pct() -> f64 {
    25.0
}

fn default_hard_stop_pct() -> f64 {
    25.0
}

fn default_tp1_pct() -> f64 {
    15.0
}

fn default_tp1_sell_pct() -> f64 {
    40.0
}

fn default_tp2_pct() -> f64 {
    35.0
}

fn default_tp2_sell_pct() -> f64 {
    50.0
}

fn default_trail_arm_pct() -> f64 {
    20.0
}

fn default_trail_pct() -> f64 {
    10.0
}

fn default_dynamic_stop_min_pct() -> f64 {
    8.0
}

fn default_dynamic_stop_max_pct() -> f64 {
    20.0
}

fn default_warming_min_pct() -> f64 {
    3.0
}

fn default_warming_decay_per_min() -> f64 {
    0.5
}

fn default_warming_max_secs() -> u64 {
    300
}

fn default_profit_lock_arm_pct() -> f64 {
    10.0
}

fn default_profit_lock_keep_ratio() -> f64 {
    0.5
}

fn default_strike_limit() -> u32 {
    3
}

fn default_rebound_max_defer_ms() -> u64 {
    6000
}

fn default_rebound_min_slope() -> f64 {
    3.0
}

fn default_slip_confirm_ticks() -> u32 {
    2
}

fn default_credit_ttl_secs() -> u64 {
    45
}

fn default_watchdog_ceiling_secs() -> u64 {
    180
}

fn default_min_poll_interval_ms() -> u64 {
    800
}

fn default_stress_backoff_factor() -> u32 {
    3
}

fn default_partial_fill_ratio() -> f64 {
    0.6
}

fn default_warmup_secs() -> u64 {
    8
}

fn default_dexscreener_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_jupiter_url() -> String {
    "https://quote-api.jup.ag/v6".to_string()
}

fn default_pumpportal_url() -> String {
    "https://pumpportal.fun/api/trade-local".to_string()
}

fn default_momentum_change_pct() -> f64 {
    5.0
}

fn default_paper_credit_delay_ms() -> u64 {
    2500
}

fn default_paper_balance_sol() -> f64 {
    1.0
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (SNIPER__SECTION__KEY)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Overlay persisted runtime settings on top of the file configuration
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.engine.enabled = settings.enabled;
        self.engine.tick_ms = settings.poll_ms;
        self.selection.mode = settings.selection_mode;
        self.trading.buy_fraction = settings.buy_fraction;
        self.trigger.min_score_slope = settings.min_score_slope;
        self.profit_target = settings.profit_target.clone();
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.trading.buy_fraction <= 0.0 || self.trading.buy_fraction > 1.0 {
            anyhow::bail!("buy_fraction must be in (0, 1]");
        }

        if self.trading.min_buy_sol <= 0.0 || self.trading.max_buy_sol < self.trading.min_buy_sol {
            anyhow::bail!("min_buy_sol must be positive and not above max_buy_sol");
        }

        if self.trading.slippage_bps > 10000 {
            anyhow::bail!("slippage_bps cannot exceed 10000 (100%)");
        }

        if self.engine.tick_ms == 0 || self.engine.watchdog_ms == 0 || self.engine.prefetch_ms == 0
        {
            anyhow::bail!("engine intervals must be non-zero");
        }

        if self.trigger.min_samples < 2 || self.trigger.slope_window < 2 {
            anyhow::bail!("trigger needs at least 2 samples and a slope window of 2");
        }

        if self.trigger.history_capacity < self.trigger.min_samples {
            anyhow::bail!("history_capacity must hold at least min_samples");
        }

        // The ring must be able to cover the trigger span at the sampling rate
        let coverable_ms =
            self.trigger.history_capacity.saturating_sub(1) as u64 * self.trigger.sample_interval_ms;
        if coverable_ms < self.trigger.min_span_secs * 1000 {
            anyhow::bail!(
                "history_capacity {} x sample_interval_ms {} cannot span min_span_secs {}",
                self.trigger.history_capacity,
                self.trigger.sample_interval_ms,
                self.trigger.min_span_secs
            );
        }
        if self.trigger.history_horizon_secs < self.trigger.min_span_secs {
            anyhow::bail!("history_horizon_secs must be at least min_span_secs");
        }

        let pt = &self.profit_target;
        if pt.floor_pct > pt.start_pct {
            anyhow::bail!(
                "profit target floor {}% above start {}%",
                pt.floor_pct,
                pt.start_pct
            );
        }
        if pt.decay_period_mins <= 0.0 || pt.max_multiplier < 1.0 {
            anyhow::bail!("decay_period_mins must be positive and max_multiplier >= 1");
        }

        if !(0.0..=1.0).contains(&self.safety.max_buy_severity)
            || !(0.0..=1.0).contains(&self.sell.rug_severity)
        {
            anyhow::bail!("severity thresholds must be within [0, 1]");
        }

        if self.reconciler.partial_fill_ratio <= 0.0 || self.reconciler.partial_fill_ratio > 1.0 {
            anyhow::bail!("partial_fill_ratio must be in (0, 1]");
        }

        if self.reconciler.credit_ttl_secs == 0 {
            anyhow::bail!("credit_ttl_secs must be non-zero");
        }

        if self.sell.tp1_sell_pct <= 0.0
            || self.sell.tp1_sell_pct >= 100.0
            || self.sell.tp2_sell_pct <= 0.0
            || self.sell.tp2_sell_pct >= 100.0
        {
            anyhow::bail!("partial take-profit sizes must be between 0 and 100");
        }

        if self.sell.dynamic_stop_min_pct > self.sell.dynamic_stop_max_pct {
            anyhow::bail!("dynamic_stop_min_pct above dynamic_stop_max_pct");
        }

        if self.sell.hard_stop_pct <= 0.0 {
            tracing::warn!("hard_stop_pct is not positive, the fast-exit hard stop is disabled");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Wallet:
    keypair: {}
  Engine:
    enabled: {}
    tick: {}ms  watchdog: {}ms  prefetch: {}ms
    state: {}
  Trading:
    buy_fraction: {}
    buy range: {} - {} SOL (reserve {} SOL)
    slippage: {}bps
  Selection:
    mode: {}
    top_n: {}  sticky: {}ms
  Trigger:
    samples >= {} over >= {}s, min score slope {}/min, warm ride {}
  Safety:
    max severity: {}  min liquidity: ${}  max impact: {}%
  Edge:
    platform fee: {}bps  max round trip loss: {}%
  Profit target:
    start {}%  floor {}%  decay {}% per {} min  x{} max
  Services:
    dexscreener: {}
    jupiter: {} (api key {})
    pumpportal: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.wallet
                .resolve_keypair_path()
                .unwrap_or_else(|| "(not set)".to_string()),
            self.engine.enabled,
            self.engine.tick_ms,
            self.engine.watchdog_ms,
            self.engine.prefetch_ms,
            self.engine.state_path,
            self.trading.buy_fraction,
            self.trading.min_buy_sol,
            self.trading.max_buy_sol,
            self.trading.fee_reserve_sol,
            self.trading.slippage_bps,
            self.selection.mode,
            self.selection.top_n,
            self.selection.sticky_ms,
            self.trigger.min_samples,
            self.trigger.min_span_secs,
            self.trigger.min_score_slope,
            self.trigger.allow_warm_ride,
            self.safety.max_buy_severity,
            self.safety.min_liquidity_usd,
            self.safety.max_price_impact_pct,
            self.edge.platform_fee_bps,
            self.edge.max_round_trip_loss_pct,
            self.profit_target.start_pct,
            self.profit_target.floor_pct,
            self.profit_target.decay_pct,
            self.profit_target.decay_period_mins,
            self.profit_target.max_multiplier,
            mask_url(&self.services.dexscreener_url),
            mask_url(&self.services.jupiter_url),
            if self.services.jupiter_api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            mask_url(&self.services.pumpportal_url),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.tick_ms, 1500);
        assert_eq!(config.trigger.min_samples, 4);
        assert_eq!(config.profit_target.start_pct, 7.0);
        assert_eq!(config.reconciler.credit_ttl_secs, 45);
    }

    #[test]
    fn test_validate_rejects_floor_above_start() {
        let mut config = Config::default();
        config.profit_target.floor_pct = 9.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_history_too_short_for_span() {
        let mut config = Config::default();
        config.trigger.history_capacity = 30;
        config.trigger.sample_interval_ms = 1500;
        // 29 gaps of 1.5s is 43.5s, under the 45s span
        assert!(config.validate().is_err());

        config.trigger.history_capacity = 31;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut config = Config::default();
        config.trading.buy_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.slippage_bps = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniper.toml");
        std::fs::write(
            &path,
            r#"
[selection]
mode = "leader"

[profit_target]
start_pct = 10.0
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.selection.mode, SelectionMode::Leader);
        assert_eq!(config.profit_target.start_pct, 10.0);
        assert_eq!(config.profit_target.floor_pct, 2.0);
    }

    #[test]
    fn test_settings_override() {
        let mut config = Config::default();
        let mut settings = Settings::from_config(&config);
        settings.buy_fraction = 0.5;
        settings.selection_mode = SelectionMode::Leader;
        settings.enabled = false;
        config.apply_settings(&settings);
        assert_eq!(config.trading.buy_fraction, 0.5);
        assert_eq!(config.selection.mode, SelectionMode::Leader);
        assert!(!config.engine.enabled);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }
}
