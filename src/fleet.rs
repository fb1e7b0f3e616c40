//! Fleet orchestrator - one task per wallet, joined, ordered by wallet index
//!
//! ```text
//! Fleet::run(jobs)
//!   ├── spawn ── Pipeline::run(job 0) ──┐
//!   ├── spawn ── Pipeline::run(job 1) ──┤  independent; one failure never cancels another
//!   └── spawn ── Pipeline::run(job n) ──┘
//!                                       ▼
//!                      Vec<WalletOutcome> (index order)
//! ```

use crate::error::PipelineError;
use crate::pipeline::{Job, Pipeline, PipelineReport};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug)]
pub struct WalletOutcome {
    pub index: usize,
    pub result: Result<PipelineReport, PipelineError>,
}

impl WalletOutcome {
    pub fn is_ok(&self) -> bool { self.result.is_ok() }
    pub fn report(&self) -> Option<&PipelineReport> { self.result.as_ref().ok() }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FleetSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Fleet {
    pipeline: Arc<Pipeline>,
}

impl Fleet {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }

    pub async fn run(&self, jobs: Vec<Job>) -> Vec<WalletOutcome> {
        info!(wallets = jobs.len(), "Starting fleet");

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let index = job.index();
                let pipeline = self.pipeline.clone();
                (index, tokio::spawn(async move { pipeline.run(job).await }))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(PipelineError::Aborted(join_error.to_string())),
            };
            if let Err(e) = &result {
                error!(wallet = index, error = %e, "Wallet pipeline failed");
            }
            outcomes.push(WalletOutcome { index, result });
        }

        outcomes.sort_by_key(|o| o.index);
        let summary = summarize(&outcomes);
        info!(succeeded = summary.succeeded, failed = summary.failed, "Fleet finished");
        outcomes
    }
}

pub fn summarize(outcomes: &[WalletOutcome]) -> FleetSummary {
    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    FleetSummary { succeeded, failed: outcomes.len() - succeeded }
}

/// Signed hex of every successful wallet, in index order.
pub fn signed_hexes(outcomes: &[WalletOutcome]) -> Vec<String> {
    outcomes.iter().filter_map(|o| o.report()?.signed.clone()).collect()
}

pub fn txids(outcomes: &[WalletOutcome]) -> Vec<String> {
    outcomes.iter().filter_map(|o| o.report()?.txid.clone()).collect()
}
