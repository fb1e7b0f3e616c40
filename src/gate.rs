//! Activation height gate.
//!
//! Blocks until the advertised parameter versions top out at the target activation height and
//! the chain tip has reached it. Poll errors are logged and retried after the poll interval.

use crate::chain::ChainClient;
use crate::params::{max_activation_height, select_version, GlobalStakingParams, ParamsClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub struct ActivationGate {
    params: Arc<dyn ParamsClient>,
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl ActivationGate {
    pub fn new(params: Arc<dyn ParamsClient>, chain: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self { params, chain, poll_interval }
    }

    /// Wait for the gate to open and return the parameter version activating at `target`.
    pub async fn wait(&self, target: u32) -> GlobalStakingParams {
        info!(target, "Waiting for activation parameters");
        let selected = loop {
            match self.params.global_params().await {
                Ok(versions) => {
                    let max = max_activation_height(&versions);
                    if max == Some(target) {
                        if let Ok(params) = select_version(&versions, target) {
                            break params.clone();
                        }
                    }
                    debug!(target, max_activation = ?max, "Activation height not advertised yet");
                }
                Err(e) => warn!(error = %e, "Parameter poll failed"),
            }
            sleep(self.poll_interval).await;
        };

        let tip = self.wait_for_tip(target).await;
        info!(target, tip, version = selected.version, "Activation gate open");
        selected
    }

    pub async fn wait_for_tip(&self, target: u32) -> u32 {
        wait_for_tip(self.chain.as_ref(), target, self.poll_interval).await
    }
}

/// Poll the chain tip until it is at least `target`; returns the observed tip.
pub async fn wait_for_tip(chain: &dyn ChainClient, target: u32, poll_interval: Duration) -> u32 {
    loop {
        match chain.tip_height().await {
            Ok(tip) if tip >= target => return tip,
            Ok(tip) => debug!(tip, target, "Tip below target"),
            Err(e) => warn!(error = %e, "Tip poll failed"),
        }
        sleep(poll_interval).await;
    }
}
