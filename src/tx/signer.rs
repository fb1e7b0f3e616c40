//! Signing engine.
//!
//! | Input | Key | Signature |
//! |-------|-----|-----------|
//! | P2TR, no `tap_scripts` | tweaked (BIP-341 key path) | `tap_key_sig` |
//! | P2TR with `tap_scripts` | raw | `tap_script_sigs` per leaf |
//! | P2WPKH / P2PKH | raw | ECDSA `partial_sigs` |

use super::UnsignedTemplate;
use crate::error::SignError;
use crate::wallet::KeyMaterial;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{All, Keypair, Message, Parity, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{self, TapLeafHash, TapTweakHash};
use bitcoin::{Psbt, Transaction, TxOut, Txid, Witness};

/// Terminal artifact of a pipeline run.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub hex: String,
    pub txid: Txid,
}

/// Key-path tweak: negate the scalar if its point has odd y, then add `TapTweak(P)`.
pub fn tweak_keypair(secp: &Secp256k1<All>, secret: &SecretKey) -> Result<Keypair, SignError> {
    let (internal, parity) = Keypair::from_secret_key(secp, secret).x_only_public_key();
    let even = if parity == Parity::Odd { secret.negate() } else { *secret };
    let tweak = TapTweakHash::from_key_and_tweak(internal, None).to_scalar();
    let tweaked = even.add_tweak(&tweak).map_err(|e| SignError::Tweaking(e.to_string()))?;
    Ok(Keypair::from_secret_key(secp, &tweaked))
}

fn prevouts(psbt: &Psbt) -> Result<Vec<TxOut>, SignError> {
    psbt.inputs
        .iter()
        .enumerate()
        .map(|(input, i)| i.witness_utxo.clone().ok_or(SignError::MissingPrevout { input }))
        .collect()
}

/// Sign one input in place. `key_path` selects the tweaked taproot key path; otherwise taproot
/// inputs are signed for every leaf in `tap_scripts` with the untweaked key.
pub fn sign_input(psbt: &mut Psbt, index: usize, key: &KeyMaterial, key_path: bool) -> Result<(), SignError> {
    let secp = Secp256k1::new();
    let missing = || SignError::Tweaking("no private key available for signer".to_string());
    let secret = key.secret().ok_or_else(missing)?;
    let prevouts = prevouts(psbt)?;
    let prevout = prevouts.get(index).ok_or(SignError::MissingPrevout { input: index })?.clone();
    let sighash_err = |e: &dyn std::fmt::Display| SignError::Sighash { input: index, reason: e.to_string() };

    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let spk = &prevout.script_pubkey;

    if spk.is_p2tr() && key_path {
        let tweaked = tweak_keypair(&secp, secret)?;
        if spk.as_bytes()[2..] != tweaked.x_only_public_key().0.serialize() {
            return Err(SignError::Tweaking(format!("input {} is not controlled by this key", index)));
        }
        let sighash = cache
            .taproot_key_spend_signature_hash(index, &Prevouts::All(prevouts.as_slice()), TapSighashType::Default)
            .map_err(|e| sighash_err(&e))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_schnorr_no_aux_rand(&msg, &tweaked);
        psbt.inputs[index].tap_key_sig = Some(taproot::Signature { signature, sighash_type: TapSighashType::Default });
    } else if spk.is_p2tr() {
        let keypair = key.keypair(&secp).ok_or_else(missing)?;
        let x_only = keypair.x_only_public_key().0;
        let leaves: Vec<TapLeafHash> = psbt.inputs[index]
            .tap_scripts
            .values()
            .map(|(script, version)| TapLeafHash::from_script(script, *version))
            .collect();
        if leaves.is_empty() {
            return Err(SignError::Sighash { input: index, reason: "no script leaf to sign".to_string() });
        }
        for leaf_hash in leaves {
            let sighash = cache
                .taproot_script_spend_signature_hash(index, &Prevouts::All(prevouts.as_slice()), leaf_hash, TapSighashType::Default)
                .map_err(|e| sighash_err(&e))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
            psbt.inputs[index]
                .tap_script_sigs
                .insert((x_only, leaf_hash), taproot::Signature { signature, sighash_type: TapSighashType::Default });
        }
    } else if spk.is_p2wpkh() || spk.is_p2pkh() {
        let digest = if spk.is_p2wpkh() {
            cache
                .p2wpkh_signature_hash(index, spk, prevout.value, EcdsaSighashType::All)
                .map_err(|e| sighash_err(&e))?
                .to_byte_array()
        } else {
            cache
                .legacy_signature_hash(index, spk, EcdsaSighashType::All.to_u32())
                .map_err(|e| sighash_err(&e))?
                .to_byte_array()
        };
        let signature = secp.sign_ecdsa(&Message::from_digest(digest), secret);
        psbt.inputs[index].partial_sigs.insert(
            bitcoin::PublicKey::new(key.public_key()),
            ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All },
        );
    } else {
        return Err(SignError::Sighash { input: index, reason: format!("unsupported script {}", spk) });
    }
    Ok(())
}

/// Turn collected signatures into final witnesses / scriptSigs and drop the signing metadata.
pub fn finalize(psbt: &mut Psbt) -> Result<(), SignError> {
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        let fail = |reason: &str| SignError::Finalization { input: index, reason: reason.to_string() };

        if let Some(sig) = input.tap_key_sig {
            input.final_script_witness = Some(Witness::p2tr_key_spend(&sig));
        } else if let Some((control_block, (script, version))) = input.tap_scripts.iter().find(|(_, (script, version))| {
            let leaf = TapLeafHash::from_script(script, *version);
            input.tap_script_sigs.keys().any(|(_, l)| *l == leaf)
        }) {
            let leaf = TapLeafHash::from_script(script, *version);
            let sig = input
                .tap_script_sigs
                .iter()
                .find(|((_, l), _)| *l == leaf)
                .map(|(_, sig)| *sig)
                .ok_or_else(|| fail("missing leaf signature"))?;
            let mut witness = Witness::new();
            witness.push(sig.to_vec());
            witness.push(script.as_bytes());
            witness.push(control_block.serialize());
            input.final_script_witness = Some(witness);
        } else if let Some((pubkey, sig)) = input.partial_sigs.iter().next().map(|(k, s)| (*k, *s)) {
            let spk = input.witness_utxo.as_ref().map(|o| o.script_pubkey.clone()).ok_or_else(|| fail("no previous output"))?;
            if spk.is_p2wpkh() {
                input.final_script_witness = Some(Witness::p2wpkh(&sig, &pubkey.inner));
            } else {
                let push = PushBytesBuf::try_from(sig.to_vec()).map_err(|e| fail(&e.to_string()))?;
                input.final_script_sig = Some(Builder::new().push_slice(push).push_key(&pubkey).into_script());
            }
        } else {
            return Err(fail("no satisfying signature"));
        }

        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        input.tap_key_sig = None;
        input.tap_script_sigs.clear();
        input.tap_scripts.clear();
        input.tap_key_origins.clear();
        input.tap_internal_key = None;
        input.tap_merkle_root = None;
    }
    Ok(())
}

/// Sign every input with `key`, finalize, and extract the network serialization.
pub fn sign_template(template: UnsignedTemplate, key: &KeyMaterial) -> Result<SignedTransaction, SignError> {
    let mut psbt = template.psbt;
    for index in 0..psbt.inputs.len() {
        let key_path = psbt.inputs[index].tap_scripts.is_empty();
        sign_input(&mut psbt, index, key, key_path)?;
    }
    finalize(&mut psbt)?;

    let tx = psbt
        .extract_tx()
        .map_err(|e| SignError::Finalization { input: 0, reason: e.to_string() })?;
    Ok(SignedTransaction { hex: serialize_hex(&tx), txid: tx.compute_txid(), tx })
}
