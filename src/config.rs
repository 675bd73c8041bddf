//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `settings.toml` and `universe.toml` from a config directory and
//! deserializes them into strongly-typed structs. Broker credentials are
//! never stored in the files; they come from `WS_EMAIL`, `WS_PASSWORD` and
//! `WS_OTP_SECRET` (a `.env` file is honoured by the binary).

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub stock_picker: StockPickerConfig,
    #[serde(default)]
    pub rebalancer: RebalancerConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Loaded from `universe.toml`, not from the settings file.
    #[serde(skip)]
    pub universe: Universe,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub token_lifetime_secs: u64,
    pub refresh_margin_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://trade-service.wealthsimple.com".to_string(),
            timeout_secs: 30,
            token_lifetime_secs: 900,
            refresh_margin_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TradingConfig {
    /// "dry_run" or "live".
    pub mode: String,
    /// Second switch required for live mode.
    pub live_mode_confirmation: bool,
    pub account_type: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: "dry_run".to_string(),
            live_mode_confirmation: false,
            account_type: "ca_tfsa".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    /// IANA time zone name for `run_times`.
    pub timezone: String,
    /// Three-letter lowercase weekday names.
    pub days: Vec<String>,
    /// "HH:MM" local run times.
    pub run_times: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Toronto".to_string(),
            days: ["mon", "tue", "wed", "thu", "fri"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            run_times: ["09:35", "11:30", "13:30", "15:30"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StockPickerConfig {
    pub num_picks: usize,
    pub lookback_days: u32,
    pub min_avg_volume: f64,
    /// Stocks with a known market cap below this are dropped. ETFs are exempt.
    pub min_market_cap_millions: f64,
    pub sector_diversity: bool,
    pub max_per_sector: usize,
    pub prefer_etfs: bool,
    pub risk_free_rate: f64,
}

impl Default for StockPickerConfig {
    fn default() -> Self {
        Self {
            num_picks: 7,
            lookback_days: 90,
            min_avg_volume: 100_000.0,
            min_market_cap_millions: 500.0,
            sector_diversity: true,
            max_per_sector: 2,
            prefer_etfs: true,
            risk_free_rate: 0.04,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RebalancerConfig {
    pub drift_threshold_pct: f64,
    pub min_trade_value_cad: f64,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            drift_threshold_pct: 5.0,
            min_trade_value_cad: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_single_trade_cad: f64,
    pub max_daily_trades: u32,
    pub rate_limit_per_hour: usize,
    pub rate_limit_window_seconds: u64,
    pub phase_pause_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_single_trade_cad: 5000.0,
            max_daily_trades: 20,
            rate_limit_per_hour: 6,
            rate_limit_window_seconds: 3600,
            phase_pause_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Candidate symbols, split the way `universe.toml` lists them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Universe {
    #[serde(default)]
    pub etfs: Vec<UniverseEntry>,
    #[serde(default)]
    pub stocks: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UniverseEntry {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    /// Market capitalisation in millions; omitted means unknown.
    #[serde(default)]
    pub market_cap_millions: Option<f64>,
}

/// A universe symbol with its resolved sector and ETF flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub sector: String,
    pub is_etf: bool,
    /// Zero when unknown.
    pub market_cap_millions: f64,
}

impl Universe {
    /// All candidates, ETFs first. ETFs are bucketed under the "ETF" sector;
    /// stocks without a sector fall under "Unknown".
    pub fn candidates(&self) -> Vec<Candidate> {
        let etfs = self.etfs.iter().map(|e| Candidate {
            symbol: e.symbol.clone(),
            sector: "ETF".to_string(),
            is_etf: true,
            market_cap_millions: e.market_cap_millions.unwrap_or(0.0),
        });
        let stocks = self.stocks.iter().map(|s| Candidate {
            symbol: s.symbol.clone(),
            sector: s.sector.clone().unwrap_or_else(|| "Unknown".to_string()),
            is_etf: false,
            market_cap_millions: s.market_cap_millions.unwrap_or(0.0),
        });
        etfs.chain(stocks).collect()
    }

    pub fn len(&self) -> usize {
        self.etfs.len() + self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Broker credentials resolved from the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
    /// Base32 TOTP secret; absent when the account has no 2FA.
    pub otp_secret: Option<SecretString>,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let email = AppConfig::resolve_env("WS_EMAIL")?;
        let password = AppConfig::resolve_env("WS_PASSWORD")?;
        if email.is_empty() {
            bail!("WS_EMAIL environment variable is required");
        }
        if password.is_empty() {
            bail!("WS_PASSWORD environment variable is required");
        }
        let otp_secret = std::env::var("WS_OTP_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::new);
        Ok(Self {
            email,
            password: SecretString::new(password),
            otp_secret,
        })
    }
}

impl AppConfig {
    /// Load `settings.toml` and `universe.toml` from a config directory.
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = config_dir.as_ref();
        let settings_path = dir.join("settings.toml");
        let contents = fs::read_to_string(&settings_path)
            .with_context(|| format!("Failed to read config file: {}", settings_path.display()))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", settings_path.display()))?;

        let universe_path = dir.join("universe.toml");
        let contents = fs::read_to_string(&universe_path).with_context(|| {
            format!("Failed to read universe file: {}", universe_path.display())
        })?;
        config.universe = toml::from_str(&contents).with_context(|| {
            format!("Failed to parse universe file: {}", universe_path.display())
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse settings from a TOML string (universe left empty).
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        let picks = self.stock_picker.num_picks;
        if !(5..=10).contains(&picks) {
            bail!("num_picks must be between 5 and 10, got {picks}");
        }
        if self.safety.rate_limit_per_hour == 0 {
            bail!("rate_limit_per_hour must be at least 1");
        }
        if self.rebalancer.drift_threshold_pct < 0.0 {
            bail!("drift_threshold_pct must not be negative");
        }
        Ok(())
    }

    /// Live mode needs both the mode switch and the explicit confirmation flag.
    pub fn is_live_mode(&self) -> bool {
        self.trading.mode == "live" && self.trading.live_mode_confirmation
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
