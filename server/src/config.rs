use crate::RateLimit;
use dicearena_execution::{
    Account, EngineConfig, Rules, SettlementPolicy, StartMode, TerminationPolicy, TieBreak,
};
use dicearena_types::dice::{
    BASIS_POINTS, DEFAULT_FEE_BPS, DEFAULT_REFERRAL_LEVEL_BPS, DEFAULT_REFERRAL_REWARD_BPS,
    HISTORY_COUNTER_SEED,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

/// Configuration for the [crate::Server], as read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,

    pub heartbeat_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub collaborator_timeout_ms: u64,

    pub fee_bps: u64,
    pub referral_reward_bps: u64,
    pub referral_level_bps: Vec<u64>,
    pub history_counter_seed: u64,

    pub tie_break: TieBreak,
    pub termination: TerminationPolicy,
    pub start_mode: StartMode,

    pub journal_directory: Option<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,

    pub accounts: Vec<Account>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            log_json: false,
            heartbeat_interval_ms: 30_000,
            read_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            collaborator_timeout_ms: 3_000,
            fee_bps: DEFAULT_FEE_BPS,
            referral_reward_bps: DEFAULT_REFERRAL_REWARD_BPS,
            referral_level_bps: DEFAULT_REFERRAL_LEVEL_BPS.to_vec(),
            history_counter_seed: HISTORY_COUNTER_SEED,
            tie_break: TieBreak::default(),
            termination: TerminationPolicy::default(),
            start_mode: StartMode::default(),
            journal_directory: None,
            rate_limit_per_second: 50,
            rate_limit_burst: 200,
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be at most {BASIS_POINTS} basis points (got {value})")]
    InvalidBasisPoints { field: &'static str, value: u64 },
    #[error("heartbeat_interval_ms ({heartbeat}) must be below read_timeout_ms ({read})")]
    HeartbeatTooSlow { heartbeat: u64, read: u64 },
    #[error("account wallet must not be empty")]
    EmptyWallet,
    #[error("duplicate account wallet: {wallet}")]
    DuplicateWallet { wallet: String },
}

/// Timing of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub port: u16,
    pub log_level: Level,
    pub log_json: bool,

    pub session: SessionConfig,
    pub engine: EngineConfig,

    pub referral_level_bps: Vec<u64>,
    pub history_counter_seed: u64,

    pub journal_directory: Option<PathBuf>,
    pub rate_limit: RateLimit,

    pub accounts: Vec<Account>,
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(value)
}

fn basis_points(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value > BASIS_POINTS {
        return Err(ConfigError::InvalidBasisPoints { field, value });
    }
    Ok(value)
}

impl Config {
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let heartbeat = non_zero("heartbeat_interval_ms", self.heartbeat_interval_ms)?;
        let read = non_zero("read_timeout_ms", self.read_timeout_ms)?;
        let write = non_zero("write_timeout_ms", self.write_timeout_ms)?;
        let collaborator = non_zero("collaborator_timeout_ms", self.collaborator_timeout_ms)?;
        if heartbeat >= read {
            return Err(ConfigError::HeartbeatTooSlow { heartbeat, read });
        }
        non_zero("rate_limit_per_second", self.rate_limit_per_second)?;
        non_zero("rate_limit_burst", self.rate_limit_burst as u64)?;

        let fee_bps = basis_points("fee_bps", self.fee_bps)?;
        let referral_reward_bps = basis_points("referral_reward_bps", self.referral_reward_bps)?;
        for level in &self.referral_level_bps {
            basis_points("referral_level_bps", *level)?;
        }

        let mut wallets = HashSet::new();
        for account in &self.accounts {
            if account.wallet.trim().is_empty() {
                return Err(ConfigError::EmptyWallet);
            }
            if !wallets.insert(account.wallet.as_str()) {
                return Err(ConfigError::DuplicateWallet {
                    wallet: account.wallet.clone(),
                });
            }
        }

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            port: self.port,
            log_level,
            log_json: self.log_json,
            session: SessionConfig {
                heartbeat_interval: Duration::from_millis(heartbeat),
                read_timeout: Duration::from_millis(read),
                write_timeout: Duration::from_millis(write),
            },
            engine: EngineConfig {
                rules: Rules {
                    tie_break: self.tie_break,
                    termination: self.termination,
                    start_mode: self.start_mode,
                },
                policy: SettlementPolicy {
                    fee_bps,
                    referral_reward_bps,
                },
                collaborator_timeout: Duration::from_millis(collaborator),
            },
            referral_level_bps: self.referral_level_bps,
            history_counter_seed: self.history_counter_seed,
            journal_directory: self.journal_directory.map(PathBuf::from),
            rate_limit: RateLimit {
                per_second: self.rate_limit_per_second,
                burst: self.rate_limit_burst,
            },
            accounts: self.accounts,
        })
    }
}
