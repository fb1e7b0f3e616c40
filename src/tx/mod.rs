//! Transaction templates - build unsigned, sign, finalize, extract
//!
//! # Architecture
//!
//! ```text
//! TemplateSource (trait, async)
//!     │
//!     ├── StakingTxBuilder  → [staking output, (data embed), (change)]  locktime = activation - 1
//!     └── FundingTxBuilder  → [destination..., (change)]
//!                │
//!                ▼
//!        UnsignedTemplate (PSBT + fee + skipped destinations)
//!                │
//!                ▼
//!        signer::sign_template → SignedTransaction {tx, hex, txid}
//! ```
//!
//! `build_timelock_withdrawal` produces a template spending a staking output through its
//! timelock leaf; the signer picks the script path from the PSBT's `tap_scripts`.

mod builder;
mod signer;

pub use builder::{
    build_timelock_withdrawal, select_with_fee, Destination, FundingTxBuilder, StakingTxBuilder,
};
pub use signer::{finalize, sign_input, sign_template, tweak_keypair, SignedTransaction};

use crate::error::BuildError;
use crate::wallet::Wallet;
use async_trait::async_trait;
use bitcoin::{Amount, Psbt};

/// A destination left out of a funding batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDestination {
    pub index: usize,
    pub address: String,
    pub reason: String,
}

/// Unsigned transaction plus the metadata signing needs (in the PSBT inputs).
#[derive(Debug, Clone)]
pub struct UnsignedTemplate {
    pub psbt: Psbt,
    pub fee: Amount,
    pub skipped: Vec<SkippedDestination>,
}

impl UnsignedTemplate {
    pub fn input_total(&self) -> Amount {
        self.psbt.inputs.iter().filter_map(|i| i.witness_utxo.as_ref()).map(|o| o.value).sum()
    }

    pub fn output_total(&self) -> Amount {
        self.psbt.unsigned_tx.output.iter().map(|o| o.value).sum()
    }

    /// `inputs == outputs + fee`.
    pub fn is_balanced(&self) -> bool {
        self.output_total().checked_add(self.fee) == Some(self.input_total())
    }
}

/// Anything that can produce an unsigned template for one wallet.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn build(&self, wallet: &Wallet) -> Result<UnsignedTemplate, BuildError>;
}
