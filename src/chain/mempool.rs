//! Esplora / mempool.space HTTP client.

use super::{ChainClient, RecommendedFees, Utxo};
use crate::config::Network;
use crate::error::ChainError;
use async_trait::async_trait;
use bitcoin::{Address, Amount, ScriptBuf, Txid};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Deserialize)]
struct UtxoResponse {
    txid: String,
    vout: u32,
    value: u64,
    status: UtxoStatus,
}

#[derive(Deserialize)]
struct UtxoStatus {
    confirmed: bool,
}

pub struct MempoolClient {
    api_base: String,
    network: Network,
    client: reqwest::Client,
}

impl MempoolClient {
    pub fn new(api_base: impl Into<String>, network: Network) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { api_base, network, client: reqwest::Client::new() }
    }

    pub fn api_base(&self) -> &str { &self.api_base }

    fn address_script(&self, address: &str) -> Result<ScriptBuf, ChainError> {
        let addr = Address::from_str(address)
            .map_err(|e| ChainError::Decode(format!("address {}: {}", address, e)))?
            .require_network(self.network.to_bitcoin())
            .map_err(|e| ChainError::Decode(format!("address {}: {}", address, e)))?;
        Ok(addr.script_pubkey())
    }

    async fn get_text(&self, url: &str) -> Result<String, ChainError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Status { status, body });
        }

        response.text().await.map_err(|e| ChainError::Decode(e.to_string()))
    }
}

/// Pull the `message` field out of an API error body, falling back to the raw body.
fn rejection_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Server errors keep their status and stay retryable; any other refusal is a rejection.
fn broadcast_error(status: u16, body: String) -> ChainError {
    if status >= 500 {
        ChainError::Status { status, body }
    } else {
        ChainError::Rejected(rejection_reason(&body))
    }
}

#[async_trait]
impl ChainClient for MempoolClient {
    async fn confirmed_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let script_pubkey = self.address_script(address)?;
        let body = self.get_text(&format!("{}/address/{}/utxo", self.api_base, address)).await?;
        let raw: Vec<UtxoResponse> = serde_json::from_str(&body)
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        raw.into_iter()
            .map(|u| {
                let txid = Txid::from_str(&u.txid)
                    .map_err(|e| ChainError::Decode(format!("txid {}: {}", u.txid, e)))?;
                Ok(Utxo {
                    txid,
                    vout: u.vout,
                    value: Amount::from_sat(u.value),
                    script_pubkey: script_pubkey.clone(),
                    confirmed: u.status.confirmed,
                })
            })
            .collect()
    }

    async fn tip_height(&self) -> Result<u32, ChainError> {
        let body = self.get_text(&format!("{}/blocks/tip/height", self.api_base)).await?;
        body.trim()
            .parse()
            .map_err(|e| ChainError::Decode(format!("Invalid height {:?}: {}", body.trim(), e)))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError> {
        let response = self
            .client
            .post(format!("{}/tx", self.api_base))
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ChainError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(broadcast_error(status.as_u16(), body));
        }
        Ok(body.trim().to_string())
    }

    async fn recommended_fees(&self) -> Result<RecommendedFees, ChainError> {
        let body = self.get_text(&format!("{}/v1/fees/recommended", self.api_base)).await?;
        serde_json::from_str(&body).map_err(|e| ChainError::Decode(e.to_string()))
    }
}
