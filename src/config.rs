//! Fleet Configuration - built once at process start, shared read-only

use crate::chain::FeeTier;
use bitcoin::secp256k1::XOnlyPublicKey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Headroom below the advertised maximum when no staking amount is configured.
pub const STAKING_AMOUNT_HEADROOM: u64 = 50_000;
pub const DEFAULT_STAKING_FEE_RATE: f64 = 20.0;
pub const DEFAULT_FUNDING_FEE_RATE: f64 = 1.5;
pub const DEFAULT_FUNDING_AMOUNT: u64 = 5_000_000 - 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network { Bitcoin, Testnet, #[default] Signet, Regtest }

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self { Network::Bitcoin => "bitcoin", Network::Testnet => "testnet", Network::Signet => "signet", Network::Regtest => "regtest" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" => Some(Network::Bitcoin),
            "testnet" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self { Network::Bitcoin => bitcoin::Network::Bitcoin, Network::Testnet => bitcoin::Network::Testnet, Network::Signet => bitcoin::Network::Signet, Network::Regtest => bitcoin::Network::Regtest }
    }

    pub fn default_mempool_url(&self) -> &'static str {
        match self {
            Network::Bitcoin => "https://mempool.space/api",
            Network::Testnet => "https://mempool.space/testnet/api",
            Network::Signet => "https://mempool.space/signet/api",
            Network::Regtest => "http://127.0.0.1:3002/api",
        }
    }
}

/// Where the fee rate comes from. Resolved once, before any pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeRateSetting {
    Fixed(f64),
    Recommended { tier: FeeTier, multiplier: f64 },
}

impl FeeRateSetting {
    /// `"20"`, `"1.5"`, `"fastest"`, `"hour*2"`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(rate) = value.parse::<f64>() {
            return is_positive_rate(rate).then_some(FeeRateSetting::Fixed(rate));
        }
        let (tier, multiplier) = match value.split_once('*') {
            Some((tier, m)) => (tier, m.trim().parse::<f64>().ok().filter(|m| is_positive_rate(*m))?),
            None => (value, 1.0),
        };
        Some(FeeRateSetting::Recommended { tier: FeeTier::from_str(tier)?, multiplier })
    }
}

/// Finite and strictly positive.
pub fn is_positive_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub build_delay: Duration,
    pub broadcast_delay: Duration,
    pub gate_poll_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            build_delay: Duration::from_secs(1),
            broadcast_delay: Duration::from_secs(3),
            gate_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Source wallet and amounts for the batch-funding run.
#[derive(Clone)]
pub struct FundingConfig {
    pub source_address: Option<String>,
    pub source_wif: Option<String>,
    pub amount_sat: u64,
    pub fee_rate: FeeRateSetting,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self { source_address: None, source_wif: None, amount_sat: DEFAULT_FUNDING_AMOUNT, fee_rate: FeeRateSetting::Fixed(DEFAULT_FUNDING_FEE_RATE) }
    }
}

impl std::fmt::Debug for FundingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingConfig")
            .field("source_address", &self.source_address)
            .field("source_wif", &self.source_wif.as_ref().map(|_| "<redacted>"))
            .field("amount_sat", &self.amount_sat)
            .field("fee_rate", &self.fee_rate)
            .finish()
    }
}

/// Fleet configuration. The binary constructs this; core logic only reads it.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub network: Network,
    pub mempool_url: String,
    pub params_url: Option<String>,
    pub activation_height: Option<u32>,
    pub finality_provider: Option<XOnlyPublicKey>,
    /// `None` means `max_staking_amount - STAKING_AMOUNT_HEADROOM`.
    pub staking_amount: Option<u64>,
    /// `None` means the advertised minimum staking time.
    pub staking_time: Option<u16>,
    pub fee_rate: FeeRateSetting,
    pub strict_policy: bool,
    pub data_embed: bool,
    pub retry: RetryConfig,
    pub wallets_path: PathBuf,
    pub txs_path: PathBuf,
    pub txids_path: PathBuf,
    pub funding: FundingConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let network = Network::default();
        Self {
            network,
            mempool_url: network.default_mempool_url().to_string(),
            params_url: None,
            activation_height: None,
            finality_provider: None,
            staking_amount: None,
            staking_time: None,
            fee_rate: FeeRateSetting::Fixed(DEFAULT_STAKING_FEE_RATE),
            strict_policy: true,
            data_embed: false,
            retry: RetryConfig::default(),
            wallets_path: PathBuf::from("wallets.json"),
            txs_path: PathBuf::from("txs.txt"),
            txids_path: PathBuf::from("txid.txt"),
            funding: FundingConfig::default(),
        }
    }
}

impl FleetConfig {
    pub fn new(network: Network) -> Self {
        Self { network, mempool_url: network.default_mempool_url().to_string(), ..Default::default() }
    }
    pub fn with_mempool_url(mut self, url: impl Into<String>) -> Self { self.mempool_url = url.into(); self }
    pub fn with_params_url(mut self, url: impl Into<String>) -> Self { self.params_url = Some(url.into()); self }
    pub fn with_activation_height(mut self, height: u32) -> Self { self.activation_height = Some(height); self }
    pub fn with_finality_provider(mut self, fp: XOnlyPublicKey) -> Self { self.finality_provider = Some(fp); self }
    pub fn with_staking_amount(mut self, sats: u64) -> Self { self.staking_amount = Some(sats); self }
    pub fn with_staking_time(mut self, blocks: u16) -> Self { self.staking_time = Some(blocks); self }
    pub fn with_fee_rate(mut self, setting: FeeRateSetting) -> Self { self.fee_rate = setting; self }
    pub fn with_strict_policy(mut self, strict: bool) -> Self { self.strict_policy = strict; self }
    pub fn with_data_embed(mut self, enabled: bool) -> Self { self.data_embed = enabled; self }
    pub fn with_retry(mut self, retry: RetryConfig) -> Self { self.retry = retry; self }
    pub fn with_wallets_path(mut self, path: impl Into<PathBuf>) -> Self { self.wallets_path = path.into(); self }
    pub fn with_txs_path(mut self, path: impl Into<PathBuf>) -> Self { self.txs_path = path.into(); self }
    pub fn with_txids_path(mut self, path: impl Into<PathBuf>) -> Self { self.txids_path = path.into(); self }
    pub fn with_funding(mut self, funding: FundingConfig) -> Self { self.funding = funding; self }

    /// Build from a key lookup (process environment, `.env`, or a map in tests).
    /// Unset or empty keys keep their defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let network = match get("STAKEFLEET_NETWORK") {
            Some(raw) => Network::from_str(&raw).ok_or_else(|| format!("Invalid network: {}", raw))?,
            None => Network::default(),
        };
        let mut config = FleetConfig::new(network);

        if let Some(url) = get("MEMPOOL_API_URL") {
            config.mempool_url = url;
        }
        config.params_url = get("BABYLON_API_URL");
        config.activation_height = parse_opt(get("BABYLON_ACTIVATION_HEIGHT"), "BABYLON_ACTIVATION_HEIGHT")?;
        if let Some(fp) = get("FINALITY_PROVIDER") {
            config.finality_provider = Some(
                XOnlyPublicKey::from_str(&fp).map_err(|e| format!("Invalid FINALITY_PROVIDER: {}", e))?,
            );
        }
        config.staking_amount = parse_opt(get("STAKING_AMOUNT"), "STAKING_AMOUNT")?;
        config.staking_time = parse_opt(get("STAKING_TIME"), "STAKING_TIME")?;
        if let Some(raw) = get("FEE_RATE") {
            config.fee_rate = FeeRateSetting::parse(&raw).ok_or_else(|| format!("Invalid FEE_RATE: {}", raw))?;
        }
        if let Some(raw) = get("STRICT_POLICY") {
            config.strict_policy = parse_flag(&raw).ok_or_else(|| format!("Invalid STRICT_POLICY: {}", raw))?;
        }
        if let Some(raw) = get("DATA_EMBED") {
            config.data_embed = parse_flag(&raw).ok_or_else(|| format!("Invalid DATA_EMBED: {}", raw))?;
        }
        if let Some(path) = get("WALLETS_PATH") { config.wallets_path = path.into(); }
        if let Some(path) = get("TXS_PATH") { config.txs_path = path.into(); }
        if let Some(path) = get("TXIDS_PATH") { config.txids_path = path.into(); }

        config.funding.source_address = get("ADDRESS");
        config.funding.source_wif = get("PRIVATE_KEY");
        if let Some(amount) = parse_opt(get("FUNDING_AMOUNT"), "FUNDING_AMOUNT")? {
            config.funding.amount_sat = amount;
        }
        if let Some(raw) = get("FUNDING_FEE_RATE") {
            config.funding.fee_rate = FeeRateSetting::parse(&raw).ok_or_else(|| format!("Invalid FUNDING_FEE_RATE: {}", raw))?;
        }

        Ok(config)
    }

    pub fn require_activation_height(&self) -> Result<u32, String> {
        self.activation_height.ok_or_else(|| "Undefined activation height (BABYLON_ACTIVATION_HEIGHT)".to_string())
    }
}

fn parse_opt<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>, String> {
    value
        .map(|v| v.parse::<T>().map_err(|_| format!("Invalid {}: {}", key, v)))
        .transpose()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
