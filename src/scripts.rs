//! Staking script set - the locking scripts a staking output commits to
//!
//! Remote verifiers rebuild these scripts from the same inputs, so every byte is fixed:
//!
//! | Script | Layout |
//! |--------|--------|
//! | timelock | `<staker> CHECKSIGVERIFY <staking_time> CHECKSEQUENCEVERIFY` |
//! | unbonding | `<staker> CHECKSIGVERIFY` + covenant multisig |
//! | slashing | `<staker> CHECKSIGVERIFY` + finality provider multisig (1, verify) + covenant multisig |
//! | unbonding timelock | `<staker> CHECKSIGVERIFY <unbonding_time> CHECKSEQUENCEVERIFY` |
//! | data embed | `OP_RETURN <tag ‖ 0x00 ‖ staker ‖ finality_provider ‖ staking_time(u16 BE)>` |
//!
//! The staking output is a P2TR output with an unspendable internal key and the tree
//! `[slashing, [unbonding, timelock]]`.

use crate::error::{BuildError, ScriptError};
use crate::params::{GlobalStakingParams, TAG_LEN};
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY, OP_CSV, OP_NUMEQUAL, OP_NUMEQUALVERIFY, OP_RETURN,
};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::ScriptBuf;
use std::collections::HashSet;

/// x-only "nothing up my sleeve" point; nobody knows its discrete log, so the key path is dead.
pub const UNSPENDABLE_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// Version byte following the tag in the data-embed payload.
pub const DATA_EMBED_VERSION: u8 = 0;

pub fn unspendable_internal_key() -> Result<XOnlyPublicKey, BuildError> {
    XOnlyPublicKey::from_slice(&UNSPENDABLE_INTERNAL_KEY).map_err(|e| BuildError::Taproot(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSet {
    pub timelock: ScriptBuf,
    pub unbonding: ScriptBuf,
    pub slashing: ScriptBuf,
    pub unbonding_timelock: ScriptBuf,
    pub data_embed: ScriptBuf,
}

impl ScriptSet {
    /// Derive every script for one staker. Covenant keys, quorum, unbonding time, tag and the
    /// staking time bounds all come from `params`.
    pub fn build(
        staker: XOnlyPublicKey,
        finality_providers: &[XOnlyPublicKey],
        params: &GlobalStakingParams,
        staking_time: u32,
    ) -> Result<Self, ScriptError> {
        validate(staker, finality_providers, params, staking_time)?;

        let staker_prefix = Builder::new().push_x_only_key(&staker).push_opcode(OP_CHECKSIGVERIFY).into_script();
        let covenant = multisig(&params.covenant_keys, params.covenant_quorum, false)?;
        let providers = multisig(finality_providers, 1, true)?;

        Ok(Self {
            timelock: timelock_script(staker, staking_time),
            unbonding: concat(&[&staker_prefix, &covenant]),
            slashing: concat(&[&staker_prefix, &providers, &covenant]),
            unbonding_timelock: timelock_script(staker, params.unbonding_time),
            data_embed: data_embed_script(&params.tag, staker, finality_providers[0], staking_time)?,
        })
    }

    pub fn spend_info<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<TaprootSpendInfo, BuildError> {
        TaprootBuilder::new()
            .add_leaf(1, self.slashing.clone())
            .and_then(|b| b.add_leaf(2, self.unbonding.clone()))
            .and_then(|b| b.add_leaf(2, self.timelock.clone()))
            .map_err(|e| BuildError::Taproot(e.to_string()))?
            .finalize(secp, unspendable_internal_key()?)
            .map_err(|_| BuildError::Taproot("script tree is incomplete".to_string()))
    }

    /// P2TR script of the staking output.
    pub fn staking_output_script<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<ScriptBuf, BuildError> {
        Ok(ScriptBuf::new_p2tr_tweaked(self.spend_info(secp)?.output_key()))
    }

    pub fn timelock_control_block<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<ControlBlock, BuildError> {
        self.spend_info(secp)?
            .control_block(&(self.timelock.clone(), LeafVersion::TapScript))
            .ok_or_else(|| BuildError::Taproot("timelock leaf missing from tree".to_string()))
    }
}

fn validate(
    staker: XOnlyPublicKey,
    finality_providers: &[XOnlyPublicKey],
    params: &GlobalStakingParams,
    staking_time: u32,
) -> Result<(), ScriptError> {
    let invalid = |reason: String| -> Result<(), ScriptError> { Err(ScriptError::InvalidParameters(reason)) };

    if finality_providers.is_empty() {
        return invalid("no finality provider keys".to_string());
    }
    if params.covenant_keys.is_empty() {
        return invalid("no covenant keys".to_string());
    }
    if params.covenant_quorum == 0 || params.covenant_quorum as usize > params.covenant_keys.len() {
        return invalid(format!(
            "covenant quorum {} must be in 1..={}",
            params.covenant_quorum,
            params.covenant_keys.len()
        ));
    }

    let mut seen = HashSet::new();
    for key in std::iter::once(&staker).chain(finality_providers).chain(&params.covenant_keys) {
        if !seen.insert(key.serialize()) {
            return invalid(format!("duplicate key {}", key));
        }
    }

    for (name, blocks) in [("staking time", staking_time), ("unbonding time", params.unbonding_time)] {
        if blocks == 0 || blocks > u16::MAX as u32 {
            return invalid(format!("{} {} must be in 1..=65535", name, blocks));
        }
    }
    if !params.time_in_policy(staking_time) {
        return invalid(format!(
            "staking time {} outside [{}, {}]",
            staking_time, params.min_time, params.max_time
        ));
    }
    if params.tag.len() != TAG_LEN {
        return invalid(format!("tag must be {} bytes", TAG_LEN));
    }
    Ok(())
}

fn timelock_script(staker: XOnlyPublicKey, blocks: u32) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(&staker)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

/// `<k> CHECKSIG[VERIFY]` for one key, otherwise a CHECKSIGADD chain over the sorted keys.
fn multisig(keys: &[XOnlyPublicKey], threshold: u32, verify: bool) -> Result<ScriptBuf, ScriptError> {
    if keys.is_empty() {
        return Err(ScriptError::InvalidParameters("multisig without keys".to_string()));
    }
    if threshold as usize > keys.len() {
        return Err(ScriptError::InvalidParameters(format!(
            "threshold {} above key count {}",
            threshold,
            keys.len()
        )));
    }

    if keys.len() == 1 {
        let op = if verify { OP_CHECKSIGVERIFY } else { OP_CHECKSIG };
        return Ok(Builder::new().push_x_only_key(&keys[0]).push_opcode(op).into_script());
    }

    let mut sorted = keys.to_vec();
    sorted.sort_by_key(|k| k.serialize());
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(ScriptError::InvalidParameters("duplicate keys in multisig".to_string()));
    }

    let mut builder = Builder::new();
    for (i, key) in sorted.iter().enumerate() {
        builder = builder.push_x_only_key(key).push_opcode(if i == 0 { OP_CHECKSIG } else { OP_CHECKSIGADD });
    }
    let op = if verify { OP_NUMEQUALVERIFY } else { OP_NUMEQUAL };
    Ok(builder.push_int(threshold as i64).push_opcode(op).into_script())
}

fn data_embed_script(
    tag: &[u8],
    staker: XOnlyPublicKey,
    finality_provider: XOnlyPublicKey,
    staking_time: u32,
) -> Result<ScriptBuf, ScriptError> {
    let mut payload = Vec::with_capacity(TAG_LEN + 1 + 32 + 32 + 2);
    payload.extend_from_slice(tag);
    payload.push(DATA_EMBED_VERSION);
    payload.extend_from_slice(&staker.serialize());
    payload.extend_from_slice(&finality_provider.serialize());
    payload.extend_from_slice(&(staking_time as u16).to_be_bytes());

    let push = PushBytesBuf::try_from(payload).map_err(|e| ScriptError::InvalidParameters(e.to_string()))?;
    Ok(Builder::new().push_opcode(OP_RETURN).push_slice(push).into_script())
}

fn concat(parts: &[&ScriptBuf]) -> ScriptBuf {
    let bytes: Vec<u8> = parts.iter().flat_map(|s| s.as_bytes().iter().copied()).collect();
    ScriptBuf::from_bytes(bytes)
}
