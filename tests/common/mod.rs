//! Shared fixtures: deterministic keys, wallets, parameters, and in-memory collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{Address, Amount, PrivateKey, Transaction, Txid};
use stakefleet::error::{ChainError, ParamsError};
use stakefleet::{ChainClient, GlobalStakingParams, Network, ParamsClient, RecommendedFees, Utxo, Wallet, WalletRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

pub fn secret(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).expect("valid scalar")
}

pub fn xonly(seed: u8) -> XOnlyPublicKey {
    secret(seed).x_only_public_key(&Secp256k1::new()).0
}

/// Record whose address is the key-path taproot address of `seed`.
pub fn record(seed: u8) -> WalletRecord {
    let secp = Secp256k1::new();
    WalletRecord {
        taproot_address_master: Address::p2tr(&secp, xonly(seed), None, bitcoin::Network::Signet).to_string(),
        wif_master: PrivateKey::new(secret(seed), bitcoin::Network::Signet).to_wif(),
    }
}

pub fn wallet(index: usize, seed: u8) -> Wallet {
    Wallet::from_record(index, &record(seed), Network::Signet).expect("wallet")
}

/// min=1000, max=5_000_000, minTime=10, maxTime=1000, activation 500, three covenants, quorum 2.
pub fn params() -> GlobalStakingParams {
    GlobalStakingParams {
        version: 1,
        activation_height: 500,
        staking_cap: Amount::from_sat(1_000_000_000),
        tag: b"bbt4".to_vec(),
        covenant_keys: vec![xonly(30), xonly(31), xonly(32)],
        covenant_quorum: 2,
        unbonding_time: 101,
        unbonding_fee: Amount::from_sat(1000),
        min_amount: Amount::from_sat(1000),
        max_amount: Amount::from_sat(5_000_000),
        min_time: 10,
        max_time: 1000,
        confirmation_depth: 10,
    }
}

pub fn params_at(version: u32, activation_height: u32) -> GlobalStakingParams {
    GlobalStakingParams { version, activation_height, ..params() }
}

pub fn finality_provider() -> XOnlyPublicKey {
    xonly(20)
}

pub fn utxo_for(wallet: &Wallet, n: u8, sats: u64, confirmed: bool) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([n; 32]),
        vout: u32::from(n),
        value: Amount::from_sat(sats),
        script_pubkey: wallet.address.script_pubkey(),
        confirmed,
    }
}

// =============================================================================
// MockChain
// =============================================================================

/// In-memory chain: scripted UTXOs, failure counters, recorded broadcasts.
#[derive(Default)]
pub struct MockChain {
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    utxo_failures: AtomicU32,
    broadcast_failures: AtomicU32,
    tip: AtomicU32,
    tip_step: AtomicU32,
    pub utxo_calls: AtomicU32,
    pub tip_calls: AtomicU32,
    pub broadcast_calls: AtomicU32,
    pub broadcasts: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self { Self::default() }

    pub fn with_utxos(self, wallet: &Wallet, utxos: Vec<Utxo>) -> Self {
        self.utxos.lock().unwrap().insert(wallet.address.to_string(), utxos);
        self
    }

    /// The next `n` UTXO queries fail with a transport error.
    pub fn failing_utxo_queries(self, n: u32) -> Self {
        self.utxo_failures.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` broadcasts are rejected.
    pub fn rejecting_broadcasts(self, n: u32) -> Self {
        self.broadcast_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Tip starts at `height` and grows by `step` on every query.
    pub fn with_tip(self, height: u32, step: u32) -> Self {
        self.tip.store(height, Ordering::SeqCst);
        self.tip_step.store(step, Ordering::SeqCst);
        self
    }

    pub fn total_calls(&self) -> u32 {
        self.utxo_calls.load(Ordering::SeqCst)
            + self.tip_calls.load(Ordering::SeqCst)
            + self.broadcast_calls.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait]
impl ChainClient for MockChain {
    async fn confirmed_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.utxo_failures) {
            return Err(ChainError::Transport("connection reset".into()));
        }
        Ok(self.utxos.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn tip_height(&self) -> Result<u32, ChainError> {
        self.tip_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.tip_step.load(Ordering::SeqCst);
        Ok(self.tip.fetch_add(step, Ordering::SeqCst))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError> {
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.broadcast_failures) {
            return Err(ChainError::Rejected("bad-txns-inputs-missingorspent".into()));
        }
        let bytes = hex::decode(tx_hex).map_err(|e| ChainError::Rejected(e.to_string()))?;
        let tx: Transaction =
            bitcoin::consensus::deserialize(&bytes).map_err(|e| ChainError::Rejected(e.to_string()))?;
        self.broadcasts.lock().unwrap().push(tx_hex.to_string());
        Ok(tx.compute_txid().to_string())
    }

    async fn recommended_fees(&self) -> Result<RecommendedFees, ChainError> {
        Ok(RecommendedFees { fastest: 12.0, half_hour: 9.0, hour: 7.0, economy: 3.0, minimum: 1.0 })
    }
}

// =============================================================================
// MockParams
// =============================================================================

/// Serves scripted parameter snapshots in order, repeating the last one.
pub struct MockParams {
    snapshots: Mutex<VecDeque<Result<Vec<GlobalStakingParams>, ChainError>>>,
    pub calls: AtomicU32,
}

impl MockParams {
    pub fn new(snapshots: Vec<Result<Vec<GlobalStakingParams>, ChainError>>) -> Self {
        Self { snapshots: Mutex::new(snapshots.into()), calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl ParamsClient for MockParams {
    async fn global_params(&self) -> Result<Vec<GlobalStakingParams>, ParamsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().unwrap();
        let next = if snapshots.len() > 1 { snapshots.pop_front() } else { snapshots.front().cloned() };
        match next {
            Some(Ok(versions)) => Ok(versions),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Vec::new()),
        }
    }
}
