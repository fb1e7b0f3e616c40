//! Transaction Tests: staking and funding templates, signing, timelock withdrawal
//!
//! These tests verify:
//! 1. Staking template shape, locktime and balance
//! 2. Policy enforcement before any chain query
//! 3. Funding batches skip bad destinations and reject non-taproot sources
//! 4. Key-path and script-path signatures verify against the committed keys

mod common;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Message, Secp256k1, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxOut};
use common::*;
use stakefleet::error::{BuildError, SelectError};
use stakefleet::{
    build_timelock_withdrawal, sign_template, Destination, FundingTxBuilder, KeyMaterial, Network, ScriptSet,
    StakingTxBuilder, Wallet,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn staking_builder(chain: Arc<MockChain>, amount: u64) -> StakingTxBuilder {
    StakingTxBuilder::new(chain, Arc::new(params()), finality_provider(), Amount::from_sat(amount), 20, 1.0)
}

/// Verify a key-path spend of input `index` against the output key in its prevout.
fn verify_key_spend(tx: &Transaction, prevouts: &[TxOut], index: usize) {
    let secp = Secp256k1::verification_only();
    let witness = &tx.input[index].witness;
    assert_eq!(witness.len(), 1);
    let sig = schnorr::Signature::from_slice(&witness.to_vec()[0]).expect("64-byte signature");

    let sighash = SighashCache::new(tx)
        .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts), TapSighashType::Default)
        .expect("sighash");
    let output_key = XOnlyPublicKey::from_slice(&prevouts[index].script_pubkey.as_bytes()[2..]).expect("x-only");
    secp.verify_schnorr(&sig, &Message::from_digest(sighash.to_byte_array()), &output_key)
        .expect("signature verifies against output key");
}

mod staking_tests {
    use super::*;

    /// Test: one 6000 sat UTXO, 5000 staked at 1 sat/byte
    #[tokio::test]
    async fn single_utxo_template() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 6000, true)]));
        let template = staking_builder(chain, 5000).build_for(&w).await.expect("template");

        let tx = &template.psbt.unsigned_tx;
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.lock_time.to_consensus_u32(), 499);
        assert_eq!(tx.input[0].sequence, Sequence::ENABLE_LOCKTIME_NO_RBF);

        // staking output commits to the script tree
        let scripts = ScriptSet::build(w.key.x_only(), &[finality_provider()], &params(), 20).expect("scripts");
        let secp = Secp256k1::verification_only();
        assert_eq!(tx.output[0].value, Amount::from_sat(5000));
        assert_eq!(tx.output[0].script_pubkey, scripts.staking_output_script(&secp).expect("script"));

        // 6000 - 5000 - 259 = 741 back to the wallet
        assert_eq!(template.fee, Amount::from_sat(259));
        assert_eq!(tx.output[1].value, Amount::from_sat(741));
        assert_eq!(tx.output[1].script_pubkey, w.address.script_pubkey());
        assert!(template.is_balanced());
        assert_eq!(template.psbt.inputs[0].tap_internal_key, Some(w.key.x_only()));
    }

    /// Test: largest confirmed UTXOs first, unconfirmed ignored
    #[tokio::test]
    async fn selects_largest_confirmed_first() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(
            &w,
            vec![utxo_for(&w, 1, 3000, true), utxo_for(&w, 2, 5000, true), utxo_for(&w, 3, 50_000, false)],
        ));
        let template = staking_builder(chain, 6000).build_for(&w).await.expect("template");

        let spent: Vec<u32> = template.psbt.unsigned_tx.input.iter().map(|i| i.previous_output.vout).collect();
        assert_eq!(spent, vec![2, 1]);
        // two inputs: 2*180 + 2*34 + 10 + 2
        assert_eq!(template.fee, Amount::from_sat(440));
        assert!(template.is_balanced());
    }

    /// Test: data embed adds a zero-value OP_RETURN and the extra size allowance
    #[tokio::test]
    async fn data_embed_output() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 6000, true)]));
        let template = staking_builder(chain, 5000).with_data_embed(true).build_for(&w).await.expect("template");

        let tx = &template.psbt.unsigned_tx;
        assert_eq!(tx.output.len(), 3);
        assert!(tx.output[1].script_pubkey.is_op_return());
        assert_eq!(tx.output[1].value, Amount::ZERO);
        assert_eq!(template.fee, Amount::from_sat(333));
        assert_eq!(tx.output[2].value, Amount::from_sat(667));
    }

    /// Test: remainder below dust goes to the fee
    #[tokio::test]
    async fn dust_change_folds_into_fee() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 5400, true)]));
        let template = staking_builder(chain, 5000).build_for(&w).await.expect("template");

        assert_eq!(template.psbt.unsigned_tx.output.len(), 1);
        assert_eq!(template.fee, Amount::from_sat(400));
        assert!(template.is_balanced());
    }

    /// Test: exact cover is not enough (strictly greater than target)
    #[tokio::test]
    async fn exact_balance_is_insufficient() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 5259, true)]));
        let err = staking_builder(chain, 5000).build_for(&w).await.unwrap_err();
        assert!(matches!(err, BuildError::Select(SelectError::InsufficientFunds { .. })));
    }

    /// Test: strict policy rejects before touching the chain; lenient builds anyway
    #[tokio::test]
    async fn policy_enforcement() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 20_000_000, true)]));

        let err = staking_builder(chain.clone(), 10_000_000).build_for(&w).await.unwrap_err();
        assert!(matches!(err, BuildError::OutOfPolicy(_)));
        assert_eq!(chain.total_calls(), 0);

        let template = staking_builder(chain.clone(), 500)
            .with_strict_policy(false)
            .build_for(&w)
            .await
            .expect("lenient build");
        assert_eq!(template.psbt.unsigned_tx.output[0].value, Amount::from_sat(500));
        assert_eq!(chain.utxo_calls.load(Ordering::SeqCst), 1);
    }

    /// Test: signed staking transaction verifies on the key path
    #[tokio::test]
    async fn key_path_signature_verifies() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 3000, true), utxo_for(&w, 2, 4000, true)]));
        let template = staking_builder(chain, 5000).build_for(&w).await.expect("template");
        let prevouts: Vec<TxOut> =
            template.psbt.inputs.iter().map(|i| i.witness_utxo.clone().expect("prevout")).collect();

        let signed = sign_template(template, &w.key).expect("signed");
        assert_eq!(signed.tx.input.len(), 2);
        for index in 0..signed.tx.input.len() {
            verify_key_spend(&signed.tx, &prevouts, index);
        }
        assert_eq!(signed.txid, signed.tx.compute_txid());
        assert_eq!(signed.hex, bitcoin::consensus::encode::serialize_hex(&signed.tx));
    }

    /// Test: a watch-only wallet builds but cannot sign
    #[tokio::test]
    async fn watch_only_cannot_sign() {
        let w = wallet(0, 1);
        let watch = Wallet::watch_only(0, w.address.clone(), KeyMaterial::watch_only(w.key.public_key()));
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 6000, true)]));
        let template = staking_builder(chain, 5000).build_for(&watch).await.expect("template");
        assert!(sign_template(template, &watch.key).is_err());
    }
}

mod withdrawal_tests {
    use super::*;

    /// Test: expired staking output spends through the timelock leaf
    #[tokio::test]
    async fn timelock_script_path() {
        let w = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&w, vec![utxo_for(&w, 1, 6000, true)]));
        let staking = sign_template(staking_builder(chain, 5000).build_for(&w).await.expect("template"), &w.key)
            .expect("signed staking");

        let scripts = ScriptSet::build(w.key.x_only(), &[finality_provider()], &params(), 20).expect("scripts");
        let staking_output = staking.tx.output[0].clone();
        let template = build_timelock_withdrawal(
            OutPoint::new(staking.txid, 0),
            &staking_output,
            &scripts,
            20,
            &w.address,
            1.0,
        )
        .expect("withdrawal template");

        // 1 input, 1 output: 180 + 34 + 10 + 1
        assert_eq!(template.fee, Amount::from_sat(225));
        assert_eq!(template.psbt.unsigned_tx.input[0].sequence, Sequence::from_height(20));

        let signed = sign_template(template, &w.key).expect("signed withdrawal");
        let witness = signed.tx.input[0].witness.to_vec();
        assert_eq!(witness.len(), 3);
        assert_eq!(witness[1], scripts.timelock.as_bytes());
        assert_eq!(signed.tx.output[0].value, Amount::from_sat(4775));

        let leaf = TapLeafHash::from_script(&scripts.timelock, LeafVersion::TapScript);
        let sighash = SighashCache::new(&signed.tx)
            .taproot_script_spend_signature_hash(0, &Prevouts::All(&[staking_output]), leaf, TapSighashType::Default)
            .expect("sighash");
        let sig = schnorr::Signature::from_slice(&witness[0]).expect("signature");
        Secp256k1::verification_only()
            .verify_schnorr(&sig, &Message::from_digest(sighash.to_byte_array()), &w.key.x_only())
            .expect("staker signature verifies");
    }

    /// Test: scripts that do not match the output are refused
    #[test]
    fn rejects_foreign_scripts() {
        let scripts = ScriptSet::build(xonly(1), &[finality_provider()], &params(), 20).expect("scripts");
        let other = ScriptSet::build(xonly(2), &[finality_provider()], &params(), 20).expect("scripts");
        let secp = Secp256k1::verification_only();
        let output = TxOut { value: Amount::from_sat(5000), script_pubkey: other.staking_output_script(&secp).expect("spk") };

        let address = wallet(0, 1).address;
        let err = build_timelock_withdrawal(OutPoint::null(), &output, &scripts, 20, &address, 1.0).unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameters(_)));
    }
}

mod funding_tests {
    use super::*;
    use bitcoin::{Address, CompressedPublicKey};

    /// Test: a non-taproot source fails before any chain query
    #[tokio::test]
    async fn non_taproot_source_makes_no_calls() {
        let secp = Secp256k1::new();
        let public = secret(7).public_key(&secp);
        let address = Address::p2wpkh(&CompressedPublicKey(public), bitcoin::Network::Signet);
        let source = Wallet::watch_only(0, address, KeyMaterial::from_secret(&secp, secret(7)));

        let chain = Arc::new(MockChain::new());
        let dest = Destination::new(wallet(1, 2).address.to_string(), Amount::from_sat(10_000));
        let builder = FundingTxBuilder::new(chain.clone(), Network::Signet, vec![dest], 1.0);

        let err = builder.build_from(&source).await.unwrap_err();
        assert!(matches!(err, BuildError::NotTaprootAddress(_)));
        assert_eq!(chain.total_calls(), 0);
    }

    /// Test: malformed and dust destinations are skipped, the rest paid
    #[tokio::test]
    async fn skips_bad_destinations() {
        let source = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&source, vec![utxo_for(&source, 1, 100_000, true)]));
        let destinations = vec![
            Destination::new(wallet(1, 2).address.to_string(), Amount::from_sat(10_000)),
            Destination::new("not-an-address", Amount::from_sat(10_000)),
            Destination::new(wallet(3, 4).address.to_string(), Amount::from_sat(10_000)),
            Destination::new(wallet(4, 5).address.to_string(), Amount::from_sat(100)),
        ];
        let builder = FundingTxBuilder::new(chain, Network::Signet, destinations, 1.0);
        let template = builder.build_from(&source).await.expect("template");

        assert_eq!(template.skipped.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 3]);
        let outputs = &template.psbt.unsigned_tx.output;
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].script_pubkey, wallet(1, 2).address.script_pubkey());
        assert_eq!(outputs[1].script_pubkey, wallet(3, 4).address.script_pubkey());
        // 2 destinations + change: 180 + 3*34 + 10 + 1
        assert_eq!(template.fee, Amount::from_sat(293));
        assert_eq!(outputs[2].value, Amount::from_sat(100_000 - 20_000 - 293));
        assert!(template.is_balanced());

        let prevouts: Vec<TxOut> =
            template.psbt.inputs.iter().map(|i| i.witness_utxo.clone().expect("prevout")).collect();
        let signed = sign_template(template, &source.key).expect("signed");
        verify_key_spend(&signed.tx, &prevouts, 0);
    }

    /// Test: nothing valid to pay is an error, not an empty transaction
    #[tokio::test]
    async fn no_valid_destinations() {
        let source = wallet(0, 1);
        let chain = Arc::new(MockChain::new().with_utxos(&source, vec![utxo_for(&source, 1, 100_000, true)]));
        let builder = FundingTxBuilder::new(
            chain,
            Network::Signet,
            vec![Destination::new("bc1qnotsignet", Amount::from_sat(10_000))],
            1.0,
        );
        assert!(matches!(builder.build_from(&source).await, Err(BuildError::InvalidParameters(_))));
    }
}
