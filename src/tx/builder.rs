use super::{SkippedDestination, TemplateSource, UnsignedTemplate};
use crate::chain::{ChainClient, Utxo};
use crate::config::{FleetConfig, Network, STAKING_AMOUNT_HEADROOM};
use crate::error::BuildError;
use crate::fee::estimate_fee;
use crate::params::GlobalStakingParams;
use crate::scripts::{unspendable_internal_key, ScriptSet};
use crate::selector::{select_utxos, total_value};
use crate::wallet::Wallet;
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{Secp256k1, XOnlyPublicKey};
use bitcoin::taproot::LeafVersion;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Select inputs covering `amount` plus the fee for however many inputs that takes.
///
/// Starts from one input and re-estimates whenever the selection needed more, so the returned
/// fee always matches the returned input count.
pub fn select_with_fee(
    candidates: &[Utxo],
    amount: Amount,
    fee_rate: f64,
    num_outputs: usize,
    op_return: bool,
) -> Result<(Vec<Utxo>, Amount), BuildError> {
    let mut num_inputs = 1;
    loop {
        let fee = estimate_fee(fee_rate, num_inputs, num_outputs, op_return);
        let target = amount
            .checked_add(fee)
            .ok_or_else(|| BuildError::InvalidParameters(format!("amount {} plus fee {} overflows", amount, fee)))?;
        let selected = select_utxos(candidates, target)?;
        if selected.len() <= num_inputs {
            return Ok((selected, fee));
        }
        num_inputs = selected.len();
    }
}

fn tx_input(outpoint: OutPoint, sequence: Sequence) -> TxIn {
    TxIn { previous_output: outpoint, script_sig: ScriptBuf::new(), sequence, witness: Witness::new() }
}

/// Change output, or `None` when the remainder is dust and goes to the fee instead.
fn change_output(remainder: Amount, script_pubkey: ScriptBuf) -> Option<TxOut> {
    (remainder >= script_pubkey.minimal_non_dust()).then_some(TxOut { value: remainder, script_pubkey })
}

fn into_template(
    tx: Transaction,
    selected: &[Utxo],
    internal_key: Option<XOnlyPublicKey>,
    skipped: Vec<SkippedDestination>,
) -> Result<UnsignedTemplate, BuildError> {
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::InvalidParameters(e.to_string()))?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(selected) {
        input.witness_utxo = Some(utxo.txout());
        input.tap_internal_key = internal_key;
    }

    let spent = total_value(selected);
    let paid: Amount = psbt.unsigned_tx.output.iter().map(|o| o.value).sum();
    let fee = spent
        .checked_sub(paid)
        .ok_or_else(|| BuildError::InvalidParameters(format!("outputs {} exceed inputs {}", paid, spent)))?;
    Ok(UnsignedTemplate { psbt, fee, skipped })
}

// =============================================================================
// Staking
// =============================================================================

/// Builds one staking transaction per wallet from a fixed parameter version.
pub struct StakingTxBuilder {
    chain: Arc<dyn ChainClient>,
    params: Arc<GlobalStakingParams>,
    finality_provider: XOnlyPublicKey,
    amount: Amount,
    staking_time: u32,
    fee_rate: f64,
    strict_policy: bool,
    data_embed: bool,
}

impl StakingTxBuilder {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        params: Arc<GlobalStakingParams>,
        finality_provider: XOnlyPublicKey,
        amount: Amount,
        staking_time: u32,
        fee_rate: f64,
    ) -> Self {
        Self { chain, params, finality_provider, amount, staking_time, fee_rate, strict_policy: true, data_embed: false }
    }

    /// Amount and time fall back to `max - 50_000` and the advertised minimum.
    pub fn from_config(
        chain: Arc<dyn ChainClient>,
        params: Arc<GlobalStakingParams>,
        config: &FleetConfig,
        fee_rate: f64,
    ) -> Result<Self, BuildError> {
        let finality_provider = config
            .finality_provider
            .ok_or_else(|| BuildError::InvalidParameters("no finality provider configured".to_string()))?;
        let amount = match config.staking_amount {
            Some(sats) => Amount::from_sat(sats),
            None => params
                .max_amount
                .checked_sub(Amount::from_sat(STAKING_AMOUNT_HEADROOM))
                .unwrap_or(params.min_amount),
        };
        let staking_time = config.staking_time.map(u32::from).unwrap_or(params.min_time);

        Ok(Self::new(chain, params, finality_provider, amount, staking_time, fee_rate)
            .with_strict_policy(config.strict_policy)
            .with_data_embed(config.data_embed))
    }

    pub fn with_strict_policy(mut self, strict: bool) -> Self { self.strict_policy = strict; self }
    pub fn with_data_embed(mut self, enabled: bool) -> Self { self.data_embed = enabled; self }

    pub fn amount(&self) -> Amount { self.amount }
    pub fn staking_time(&self) -> u32 { self.staking_time }

    fn check_policy(&self, wallet: &Wallet) -> Result<(), BuildError> {
        let params = &self.params;
        if !params.amount_in_policy(self.amount) {
            let reason = format!(
                "staking amount {} outside [{}, {}]",
                self.amount, params.min_amount, params.max_amount
            );
            if self.strict_policy {
                return Err(BuildError::OutOfPolicy(reason));
            }
            warn!(wallet = wallet.index, %reason, "Building out-of-policy staking transaction");
        }
        if !params.time_in_policy(self.staking_time) {
            let reason = format!(
                "staking time {} outside [{}, {}]",
                self.staking_time, params.min_time, params.max_time
            );
            if self.strict_policy {
                return Err(BuildError::OutOfPolicy(reason));
            }
            warn!(wallet = wallet.index, %reason, "Staking time out of policy");
        }
        Ok(())
    }

    pub async fn build_for(&self, wallet: &Wallet) -> Result<UnsignedTemplate, BuildError> {
        self.check_policy(wallet)?;

        let secp = Secp256k1::verification_only();
        let scripts = ScriptSet::build(wallet.key.x_only(), &[self.finality_provider], &self.params, self.staking_time)?;
        let staking_script = scripts.staking_output_script(&secp)?;

        let lock_height = self
            .params
            .activation_height
            .checked_sub(1)
            .ok_or_else(|| BuildError::InvalidParameters("activation height 0".to_string()))?;
        let lock_time =
            LockTime::from_height(lock_height).map_err(|e| BuildError::InvalidParameters(e.to_string()))?;

        let utxos = self.chain.confirmed_utxos(&wallet.address.to_string()).await?;
        let num_outputs = if self.data_embed { 3 } else { 2 };
        let (selected, fee) = select_with_fee(&utxos, self.amount, self.fee_rate, num_outputs, self.data_embed)?;

        let mut outputs = vec![TxOut { value: self.amount, script_pubkey: staking_script }];
        if self.data_embed {
            outputs.push(TxOut { value: Amount::ZERO, script_pubkey: scripts.data_embed.clone() });
        }
        let remainder = total_value(&selected) - self.amount - fee;
        match change_output(remainder, wallet.address.script_pubkey()) {
            Some(change) => outputs.push(change),
            None => debug!(wallet = wallet.index, remainder = remainder.to_sat(), "Dust change folded into fee"),
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time,
            input: selected.iter().map(|u| tx_input(u.outpoint(), Sequence::ENABLE_LOCKTIME_NO_RBF)).collect(),
            output: outputs,
        };
        let internal_key = wallet.is_taproot().then(|| wallet.key.x_only());
        let template = into_template(tx, &selected, internal_key, Vec::new())?;

        info!(
            wallet = wallet.index,
            inputs = selected.len(),
            amount = self.amount.to_sat(),
            fee = template.fee.to_sat(),
            lock_height,
            "Built staking template"
        );
        Ok(template)
    }
}

#[async_trait]
impl TemplateSource for StakingTxBuilder {
    async fn build(&self, wallet: &Wallet) -> Result<UnsignedTemplate, BuildError> {
        self.build_for(wallet).await
    }
}

// =============================================================================
// Batch funding
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: String,
    pub amount: Amount,
}

impl Destination {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self { address: address.into(), amount }
    }
}

/// Pays many destinations from one taproot source wallet in a single transaction.
pub struct FundingTxBuilder {
    chain: Arc<dyn ChainClient>,
    network: Network,
    destinations: Vec<Destination>,
    fee_rate: f64,
}

impl FundingTxBuilder {
    pub fn new(chain: Arc<dyn ChainClient>, network: Network, destinations: Vec<Destination>, fee_rate: f64) -> Self {
        Self { chain, network, destinations, fee_rate }
    }

    pub fn destinations(&self) -> &[Destination] { &self.destinations }

    fn parse_destinations(&self) -> (Vec<TxOut>, Vec<SkippedDestination>) {
        let mut included = Vec::new();
        let mut skipped = Vec::new();

        for (index, dest) in self.destinations.iter().enumerate() {
            let parsed = Address::from_str(dest.address.trim())
                .and_then(|a| a.require_network(self.network.to_bitcoin()))
                .map_err(|e| e.to_string())
                .and_then(|a| {
                    let script_pubkey = a.script_pubkey();
                    let dust = script_pubkey.minimal_non_dust();
                    if dest.amount < dust {
                        Err(format!("amount {} below dust limit {}", dest.amount, dust))
                    } else {
                        Ok(TxOut { value: dest.amount, script_pubkey })
                    }
                });

            match parsed {
                Ok(output) => included.push(output),
                Err(reason) => {
                    warn!(index, address = %dest.address, %reason, "Skipping funding destination");
                    skipped.push(SkippedDestination { index, address: dest.address.clone(), reason });
                }
            }
        }
        (included, skipped)
    }

    pub async fn build_from(&self, source: &Wallet) -> Result<UnsignedTemplate, BuildError> {
        if !source.is_taproot() {
            return Err(BuildError::NotTaprootAddress(source.address.to_string()));
        }

        let (mut outputs, skipped) = self.parse_destinations();
        if outputs.is_empty() {
            return Err(BuildError::InvalidParameters("no valid funding destinations".to_string()));
        }
        let total = outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, o| acc.checked_add(o.value))
            .ok_or_else(|| BuildError::InvalidParameters("funding total overflows".to_string()))?;
        let num_outputs = outputs.len() + 1;

        let utxos = self.chain.confirmed_utxos(&source.address.to_string()).await?;
        let (selected, fee) = select_with_fee(&utxos, total, self.fee_rate, num_outputs, false)?;

        let remainder = total_value(&selected) - total - fee;
        if let Some(change) = change_output(remainder, source.address.script_pubkey()) {
            outputs.push(change);
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: selected.iter().map(|u| tx_input(u.outpoint(), Sequence::MAX)).collect(),
            output: outputs,
        };
        let template = into_template(tx, &selected, Some(source.key.x_only()), skipped)?;

        info!(
            destinations = self.destinations.len() - template.skipped.len(),
            skipped = template.skipped.len(),
            inputs = selected.len(),
            total = total.to_sat(),
            fee = template.fee.to_sat(),
            "Built funding template"
        );
        Ok(template)
    }
}

#[async_trait]
impl TemplateSource for FundingTxBuilder {
    async fn build(&self, wallet: &Wallet) -> Result<UnsignedTemplate, BuildError> {
        self.build_from(wallet).await
    }
}

// =============================================================================
// Timelock withdrawal
// =============================================================================

/// Spend an expired staking output back to `destination` through the timelock leaf.
pub fn build_timelock_withdrawal(
    staking_outpoint: OutPoint,
    staking_output: &TxOut,
    scripts: &ScriptSet,
    staking_time: u16,
    destination: &Address,
    fee_rate: f64,
) -> Result<UnsignedTemplate, BuildError> {
    let secp = Secp256k1::verification_only();
    let spend_info = scripts.spend_info(&secp)?;
    if ScriptBuf::new_p2tr_tweaked(spend_info.output_key()) != staking_output.script_pubkey {
        return Err(BuildError::InvalidParameters("staking output does not commit to these scripts".to_string()));
    }

    let fee = estimate_fee(fee_rate, 1, 1, false);
    let script_pubkey = destination.script_pubkey();
    let value = staking_output
        .value
        .checked_sub(fee)
        .filter(|v| *v >= script_pubkey.minimal_non_dust())
        .ok_or_else(|| BuildError::InvalidParameters(format!("{} cannot cover fee {}", staking_output.value, fee)))?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![tx_input(staking_outpoint, Sequence::from_height(staking_time))],
        output: vec![TxOut { value, script_pubkey }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::InvalidParameters(e.to_string()))?;

    let control_block = scripts.timelock_control_block(&secp)?;
    let input = &mut psbt.inputs[0];
    input.witness_utxo = Some(staking_output.clone());
    input.tap_internal_key = Some(unspendable_internal_key()?);
    input.tap_merkle_root = spend_info.merkle_root();
    input.tap_scripts.insert(control_block, (scripts.timelock.clone(), LeafVersion::TapScript));

    Ok(UnsignedTemplate { psbt, fee: staking_output.value - value, skipped: Vec::new() })
}
