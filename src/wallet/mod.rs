//! Wallet module - one spending identity per record in the wallet file
//!
//! # Record Format
//!
//! The wallet file is a JSON array produced by the wallet generator. Only two keys are read,
//! everything else (mnemonic, xpriv, fingerprints) is ignored:
//!
//! | Key | Description |
//! |-----|-------------|
//! | `taprootAddressMaster` | Key-path taproot address of the master key |
//! | `wifMaster` | WIF-encoded master private key |

mod keys;

pub use keys::KeyMaterial;

use crate::config::Network;
use crate::error::WalletError;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, NetworkKind, PrivateKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub taproot_address_master: String,
    pub wif_master: String,
}

/// Wallet loaded for one run. `index` is its position in the wallet file.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub index: usize,
    pub address: Address,
    pub key: KeyMaterial,
}

impl Wallet {
    pub fn from_record(index: usize, record: &WalletRecord, network: Network) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let btc_network = network.to_bitcoin();

        let private_key = PrivateKey::from_wif(record.wif_master.trim())
            .map_err(|e| WalletError::Wif { index, reason: e.to_string() })?;
        if private_key.network != NetworkKind::from(btc_network) {
            return Err(WalletError::Wif {
                index,
                reason: format!("key is for a different network than {}", network.as_str()),
            });
        }
        let key = KeyMaterial::from_secret(&secp, private_key.inner);

        let raw = record.taproot_address_master.trim();
        let address = Address::from_str(raw)
            .and_then(|a| a.require_network(btc_network))
            .map_err(|e| WalletError::Address { index, address: raw.to_string(), reason: e.to_string() })?;

        if address.script_pubkey().is_p2tr() {
            let expected = Address::p2tr(&secp, key.x_only(), None, btc_network);
            if expected != address {
                return Err(WalletError::AddressMismatch { index, address: raw.to_string() });
            }
        }

        Ok(Self { index, address, key })
    }

    /// Watch-only wallet for `address`; signing will fail.
    pub fn watch_only(index: usize, address: Address, key: KeyMaterial) -> Self {
        Self { index, address, key }
    }

    pub fn is_taproot(&self) -> bool {
        self.address.script_pubkey().is_p2tr()
    }
}

pub fn parse_wallets(json: &str, network: Network) -> Result<Vec<Wallet>, WalletError> {
    let records: Vec<WalletRecord> = serde_json::from_str(json)?;
    records
        .iter()
        .enumerate()
        .map(|(index, record)| Wallet::from_record(index, record, network))
        .collect()
}

pub fn load_wallets(path: &Path, network: Network) -> Result<Vec<Wallet>, WalletError> {
    let json = std::fs::read_to_string(path)?;
    let wallets = parse_wallets(&json, network)?;
    tracing::info!(path = %path.display(), count = wallets.len(), "Loaded wallets");
    Ok(wallets)
}
