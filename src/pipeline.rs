//! Per-wallet build → sign → broadcast pipeline
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Building ──► Signing ──► Broadcasting ──► Done
//!            │  ▲                      │  ▲
//!            └──┘ transient error      └──┘ any error
//!               (fixed delay)             (fixed delay)
//! ```
//!
//! | Job | Starts at | Ends after |
//! |-----|-----------|------------|
//! | `SignOnly` | Building | Signing (hex in report) |
//! | `Full` | Building | Broadcasting |
//! | `BroadcastOnly` | Broadcasting | Broadcasting |
//!
//! Building retries only transient chain errors: insufficient funds, bad parameters and
//! policy violations abort the wallet. Broadcasting retries every rejection without bound.

use crate::chain::ChainClient;
use crate::config::RetryConfig;
use crate::error::{BuildError, ChainError, PipelineError};
use crate::retry::{retry, RetryPolicy};
use crate::tx::{sign_template, TemplateSource};
use crate::wallet::Wallet;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState { Idle, Building, Signing, Broadcasting, Done }

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Building => "building",
            PipelineState::Signing => "signing",
            PipelineState::Broadcasting => "broadcasting",
            PipelineState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode { SignOnly, Full, BroadcastOnly }

/// One unit of work for the fleet.
#[derive(Debug, Clone)]
pub enum Job {
    SignOnly(Wallet),
    Full(Wallet),
    BroadcastOnly { index: usize, hex: String },
}

impl Job {
    pub fn index(&self) -> usize {
        match self {
            Job::SignOnly(w) | Job::Full(w) => w.index,
            Job::BroadcastOnly { index, .. } => *index,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        match self {
            Job::SignOnly(_) => PipelineMode::SignOnly,
            Job::Full(_) => PipelineMode::Full,
            Job::BroadcastOnly { .. } => PipelineMode::BroadcastOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub index: usize,
    pub state: PipelineState,
    pub build_attempts: u32,
    pub broadcast_attempts: u32,
    /// Signed transaction hex.
    pub signed: Option<String>,
    pub txid: Option<String>,
}

impl PipelineReport {
    fn new(index: usize) -> Self {
        Self { index, state: PipelineState::Idle, build_attempts: 0, broadcast_attempts: 0, signed: None, txid: None }
    }

    fn enter(&mut self, state: PipelineState) {
        debug!(wallet = self.index, from = self.state.as_str(), to = state.as_str(), "Pipeline transition");
        self.state = state;
    }
}

/// Serialises spends per source address within this process.
#[derive(Debug, Default)]
pub struct SpendGuard {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SpendGuard {
    pub fn new() -> Self { Self::default() }

    /// Held for the whole select → sign → broadcast of one run from `address`.
    pub async fn lock(&self, address: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(address.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Pipeline {
    chain: Arc<dyn ChainClient>,
    source: Arc<dyn TemplateSource>,
    build_policy: RetryPolicy<BuildError>,
    broadcast_policy: RetryPolicy<ChainError>,
    spend_guard: Option<Arc<SpendGuard>>,
}

impl Pipeline {
    pub fn new(chain: Arc<dyn ChainClient>, source: Arc<dyn TemplateSource>, retry: &RetryConfig) -> Self {
        Self {
            chain,
            source,
            build_policy: RetryPolicy::transient(retry.build_delay),
            broadcast_policy: RetryPolicy::forever(retry.broadcast_delay),
            spend_guard: None,
        }
    }

    pub fn with_broadcast_policy(mut self, policy: RetryPolicy<ChainError>) -> Self { self.broadcast_policy = policy; self }
    pub fn with_spend_guard(mut self, guard: Arc<SpendGuard>) -> Self { self.spend_guard = Some(guard); self }

    pub async fn run(&self, job: Job) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::new(job.index());

        let (wallet, broadcast) = match job {
            Job::BroadcastOnly { hex, .. } => return self.broadcast(report, hex).await,
            Job::SignOnly(wallet) => (wallet, false),
            Job::Full(wallet) => (wallet, true),
        };

        let _spend = match &self.spend_guard {
            Some(guard) => Some(guard.lock(&wallet.address.to_string()).await),
            None => None,
        };

        report.enter(PipelineState::Building);
        let label = format!("wallet {} build", wallet.index);
        let source = &self.source;
        let wallet_ref = &wallet;
        let outcome = retry(&self.build_policy, &label, move |attempt| {
            debug!(wallet = wallet_ref.index, attempt, "Building template");
            source.build(wallet_ref)
        })
        .await;
        report.build_attempts = outcome.attempts();
        let template = outcome.into_result()?;

        report.enter(PipelineState::Signing);
        let signed = sign_template(template, &wallet.key)?;
        info!(wallet = wallet.index, txid = %signed.txid, attempts = report.build_attempts, "Signed transaction");
        report.txid = Some(signed.txid.to_string());

        if !broadcast {
            report.signed = Some(signed.hex);
            report.enter(PipelineState::Done);
            return Ok(report);
        }
        self.broadcast(report, signed.hex).await
    }

    async fn broadcast(&self, mut report: PipelineReport, hex: String) -> Result<PipelineReport, PipelineError> {
        report.enter(PipelineState::Broadcasting);
        let label = format!("wallet {} broadcast", report.index);
        let chain = &self.chain;
        let tx_hex = &hex;
        let outcome = retry(&self.broadcast_policy, &label, move |_| chain.broadcast(tx_hex)).await;
        report.broadcast_attempts = outcome.attempts();
        let txid = outcome.into_result()?;

        info!(wallet = report.index, %txid, attempts = report.broadcast_attempts, "Broadcast accepted");
        report.txid = Some(txid);
        report.signed = Some(hex);
        report.enter(PipelineState::Done);
        Ok(report)
    }
}
