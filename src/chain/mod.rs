//! Chain query collaborator - UTXOs, tip height, broadcast, fee recommendations
//!
//! # Architecture
//!
//! ```text
//! Pipeline / Builders / Gate
//!     │
//!     ▼
//! ChainClient (trait, async)
//!     │
//!     └── MempoolClient (esplora / mempool.space HTTP)
//!           ├── GET  /address/{addr}/utxo
//!           ├── GET  /blocks/tip/height
//!           ├── POST /tx
//!           └── GET  /v1/fees/recommended
//! ```

mod mempool;

pub use mempool::MempoolClient;

use crate::config::{is_positive_rate, FeeRateSetting};
use crate::error::ChainError;
use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};

/// Snapshot of one unspent output. Staleness is discovered at broadcast time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub confirmed: bool,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn txout(&self) -> TxOut {
        TxOut { value: self.value, script_pubkey: self.script_pubkey.clone() }
    }
}

/// Recommended fee rates in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendedFees {
    #[serde(rename = "fastestFee")]
    pub fastest: f64,
    #[serde(rename = "halfHourFee")]
    pub half_hour: f64,
    #[serde(rename = "hourFee")]
    pub hour: f64,
    #[serde(rename = "economyFee")]
    pub economy: f64,
    #[serde(rename = "minimumFee")]
    pub minimum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeTier { #[default] Fastest, HalfHour, Hour, Economy, Minimum }

impl FeeTier {
    pub fn as_str(&self) -> &'static str {
        match self { FeeTier::Fastest => "fastest", FeeTier::HalfHour => "half-hour", FeeTier::Hour => "hour", FeeTier::Economy => "economy", FeeTier::Minimum => "minimum" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fastest" | "fast" => Some(FeeTier::Fastest),
            "half-hour" | "halfhour" => Some(FeeTier::HalfHour),
            "hour" => Some(FeeTier::Hour),
            "economy" => Some(FeeTier::Economy),
            "minimum" | "min" => Some(FeeTier::Minimum),
            _ => None,
        }
    }
}

impl RecommendedFees {
    pub fn rate(&self, tier: FeeTier) -> f64 {
        match tier {
            FeeTier::Fastest => self.fastest,
            FeeTier::HalfHour => self.half_hour,
            FeeTier::Hour => self.hour,
            FeeTier::Economy => self.economy,
            FeeTier::Minimum => self.minimum,
        }
    }
}

/// Everything the core needs from the chain. Every call is a suspension point.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// All UTXOs paid to `address`, confirmed or not.
    async fn confirmed_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;
    async fn tip_height(&self) -> Result<u32, ChainError>;
    /// Returns the txid reported by the node, or `ChainError::Rejected`.
    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError>;
    async fn recommended_fees(&self) -> Result<RecommendedFees, ChainError>;
}

/// Resolve the configured fee rate to sat/vB. Only `Recommended` touches the network.
/// A rate that is not finite and positive is `InvalidFeeRate`.
pub async fn resolve_fee_rate(chain: &dyn ChainClient, setting: FeeRateSetting) -> Result<f64, ChainError> {
    let rate = match setting {
        FeeRateSetting::Fixed(rate) => rate,
        FeeRateSetting::Recommended { tier, multiplier } => {
            let fees = chain.recommended_fees().await?;
            let rate = fees.rate(tier) * multiplier;
            tracing::info!(tier = tier.as_str(), multiplier, rate, "Resolved fee rate");
            rate
        }
    };
    if !is_positive_rate(rate) {
        return Err(ChainError::InvalidFeeRate(rate));
    }
    Ok(rate)
}
