//! Protocol parameter collaborator - versioned global staking parameters
//!
//! ```text
//! GET {base}/v1/global-params
//!   → {"data": {"versions": [{version, activation_height, staking_cap, tag, covenant_pks, ...}]}}
//! ```
//!
//! Parameters are fetched once per run, validated, and shared read-only afterwards.

use crate::error::{ChainError, ParamsError};
use async_trait::async_trait;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::Amount;
use serde::{Deserialize, Serialize};

/// Length of the protocol tag carried in the data-embed output.
pub const TAG_LEN: usize = 4;

/// One protocol parameter version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStakingParams {
    pub version: u32,
    pub activation_height: u32,
    pub staking_cap: Amount,
    pub tag: Vec<u8>,
    pub covenant_keys: Vec<XOnlyPublicKey>,
    pub covenant_quorum: u32,
    pub unbonding_time: u32,
    pub unbonding_fee: Amount,
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub min_time: u32,
    pub max_time: u32,
    pub confirmation_depth: u32,
}

impl GlobalStakingParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        let invalid = |reason: String| ParamsError::Invalid { version: self.version, reason };

        if self.min_amount > self.max_amount {
            return Err(invalid(format!("min amount {} above max amount {}", self.min_amount, self.max_amount)));
        }
        if self.min_time > self.max_time {
            return Err(invalid(format!("min time {} above max time {}", self.min_time, self.max_time)));
        }
        if self.covenant_quorum as usize > self.covenant_keys.len() {
            return Err(invalid(format!(
                "quorum {} exceeds {} covenant keys",
                self.covenant_quorum,
                self.covenant_keys.len()
            )));
        }
        if self.tag.len() != TAG_LEN {
            return Err(invalid(format!("tag must be {} bytes, got {}", TAG_LEN, self.tag.len())));
        }
        Ok(())
    }

    pub fn amount_in_policy(&self, amount: Amount) -> bool {
        self.min_amount <= amount && amount <= self.max_amount
    }

    pub fn time_in_policy(&self, blocks: u32) -> bool {
        self.min_time <= blocks && blocks <= self.max_time
    }
}

/// Wire shape of one version as served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsVersionResponse {
    pub version: u32,
    pub activation_height: u32,
    pub staking_cap: u64,
    pub tag: String,
    pub covenant_pks: Vec<String>,
    pub covenant_quorum: u32,
    pub unbonding_time: u32,
    pub unbonding_fee: u64,
    pub max_staking_amount: u64,
    pub min_staking_amount: u64,
    pub max_staking_time: u32,
    pub min_staking_time: u32,
    pub confirmation_depth: u32,
}

#[derive(Deserialize)]
struct GlobalParamsEnvelope {
    data: GlobalParamsData,
}

#[derive(Deserialize)]
struct GlobalParamsData {
    versions: Vec<ParamsVersionResponse>,
}

/// Accepts a 33-byte compressed key or a 32-byte x-only key, both hex.
fn parse_covenant_key(version: u32, hex_key: &str) -> Result<XOnlyPublicKey, ParamsError> {
    let invalid = |reason: String| ParamsError::Invalid { version, reason };
    let bytes = hex::decode(hex_key.trim()).map_err(|e| invalid(format!("covenant key {}: {}", hex_key, e)))?;
    let x_only = match bytes.len() {
        33 => &bytes[1..],
        32 => &bytes[..],
        n => return Err(invalid(format!("covenant key {} has {} bytes", hex_key, n))),
    };
    XOnlyPublicKey::from_slice(x_only).map_err(|e| invalid(format!("covenant key {}: {}", hex_key, e)))
}

impl TryFrom<ParamsVersionResponse> for GlobalStakingParams {
    type Error = ParamsError;

    fn try_from(raw: ParamsVersionResponse) -> Result<Self, Self::Error> {
        let version = raw.version;
        let tag = hex::decode(raw.tag.trim())
            .map_err(|e| ParamsError::Invalid { version, reason: format!("tag {}: {}", raw.tag, e) })?;
        let covenant_keys = raw
            .covenant_pks
            .iter()
            .map(|pk| parse_covenant_key(version, pk))
            .collect::<Result<Vec<_>, _>>()?;

        let params = GlobalStakingParams {
            version,
            activation_height: raw.activation_height,
            staking_cap: Amount::from_sat(raw.staking_cap),
            tag,
            covenant_keys,
            covenant_quorum: raw.covenant_quorum,
            unbonding_time: raw.unbonding_time,
            unbonding_fee: Amount::from_sat(raw.unbonding_fee),
            min_amount: Amount::from_sat(raw.min_staking_amount),
            max_amount: Amount::from_sat(raw.max_staking_amount),
            min_time: raw.min_staking_time,
            max_time: raw.max_staking_time,
            confirmation_depth: raw.confirmation_depth,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Parse and validate the API response body.
pub fn parse_global_params(body: &str) -> Result<Vec<GlobalStakingParams>, ParamsError> {
    let envelope: GlobalParamsEnvelope =
        serde_json::from_str(body).map_err(|e| ChainError::Decode(e.to_string()))?;
    envelope.data.versions.into_iter().map(GlobalStakingParams::try_from).collect()
}

/// The version whose activation height equals `activation_height`.
pub fn select_version(
    versions: &[GlobalStakingParams],
    activation_height: u32,
) -> Result<&GlobalStakingParams, ParamsError> {
    versions
        .iter()
        .find(|v| v.activation_height == activation_height)
        .ok_or(ParamsError::UnknownActivationHeight(activation_height))
}

pub fn max_activation_height(versions: &[GlobalStakingParams]) -> Option<u32> {
    versions.iter().map(|v| v.activation_height).max()
}

#[async_trait]
pub trait ParamsClient: Send + Sync {
    async fn global_params(&self) -> Result<Vec<GlobalStakingParams>, ParamsError>;
}

pub struct BabylonApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl BabylonApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl ParamsClient for BabylonApiClient {
    async fn global_params(&self) -> Result<Vec<GlobalStakingParams>, ParamsError> {
        let url = format!("{}/v1/global-params", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ChainError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(ChainError::Status { status: status.as_u16(), body }.into());
        }

        let versions = parse_global_params(&body)?;
        tracing::debug!(count = versions.len(), "Fetched global params");
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn compressed_hex(seed: u8) -> String {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        hex::encode(sk.public_key(&secp).serialize())
    }

    fn body(quorum: u32, tag: &str) -> String {
        serde_json::json!({
            "data": {"versions": [
                {
                    "version": 0, "activation_height": 100, "staking_cap": 5_000_000_000u64,
                    "tag": tag, "covenant_pks": [compressed_hex(1), compressed_hex(2), compressed_hex(3)],
                    "covenant_quorum": quorum, "unbonding_time": 101, "unbonding_fee": 1000,
                    "max_staking_amount": 5_000_000, "min_staking_amount": 50_000,
                    "max_staking_time": 64_000, "min_staking_time": 64_000, "confirmation_depth": 10
                },
                {
                    "version": 1, "activation_height": 200, "staking_cap": 5_000_000_000u64,
                    "tag": tag, "covenant_pks": [compressed_hex(1), compressed_hex(2), compressed_hex(3)],
                    "covenant_quorum": quorum, "unbonding_time": 101, "unbonding_fee": 1000,
                    "max_staking_amount": 5_000_000, "min_staking_amount": 50_000,
                    "max_staking_time": 64_000, "min_staking_time": 150, "confirmation_depth": 10
                }
            ]}
        })
        .to_string()
    }

    #[test]
    fn parses_api_response() {
        let versions = parse_global_params(&body(2, "62627434")).unwrap();
        assert_eq!(versions.len(), 2);
        let v1 = select_version(&versions, 200).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.tag, b"bbt4".to_vec());
        assert_eq!(v1.covenant_keys.len(), 3);
        assert_eq!(hex::encode(v1.covenant_keys[0].serialize()), compressed_hex(1)[2..]);
        assert_eq!(v1.min_amount, Amount::from_sat(50_000));
        assert_eq!(max_activation_height(&versions), Some(200));
    }

    #[test]
    fn rejects_invalid_versions() {
        assert!(matches!(parse_global_params(&body(4, "62627434")), Err(ParamsError::Invalid { version: 0, .. })));
        assert!(matches!(parse_global_params(&body(2, "6262")), Err(ParamsError::Invalid { .. })));
        assert!(matches!(parse_global_params("{\"data\":{}}"), Err(ParamsError::Chain(ChainError::Decode(_)))));
    }

    #[test]
    fn unknown_activation_height() {
        let versions = parse_global_params(&body(2, "62627434")).unwrap();
        assert!(matches!(select_version(&versions, 150), Err(ParamsError::UnknownActivationHeight(150))));
    }

    #[test]
    fn policy_bounds() {
        let versions = parse_global_params(&body(2, "62627434")).unwrap();
        let v = &versions[1];
        assert!(v.amount_in_policy(Amount::from_sat(50_000)));
        assert!(!v.amount_in_policy(Amount::from_sat(49_999)));
        assert!(v.time_in_policy(150));
        assert!(!v.time_in_policy(64_001));
    }
}
