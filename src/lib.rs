//! Stakefleet: build, sign and broadcast timelocked staking transactions for a fleet of wallets.
//!
//! # Architecture
//!
//! ```text
//! FleetConfig (immutable, built once)
//!   │
//!   ├── ActivationGate ── ParamsClient (global params) + ChainClient (tip height)
//!   │
//!   └── Fleet (one tokio task per wallet)
//!         └── Pipeline: Idle → Building → Signing → Broadcasting → Done
//!               │
//!               ├── TemplateSource
//!               │     ├── StakingTxBuilder ── fee · selector · scripts
//!               │     └── FundingTxBuilder ── fee · selector
//!               │
//!               ├── signer (taproot tweak, script path, ECDSA)
//!               │
//!               └── ChainClient::broadcast
//! ```
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `fee` | Heuristic size/fee estimate |
//! | `selector` | Confirmed-only, largest-first UTXO selection |
//! | `scripts` | Staking script set and taproot tree |
//! | `tx` | Unsigned templates and the signing engine |
//! | `pipeline` | Per-wallet state machine with retry |
//! | `fleet` | Fan-out / join across wallets |
//! | `gate` | Activation height gate |
//! | `chain`, `params` | HTTP collaborators |
//! | `wallet`, `artifacts` | Wallet file and line-delimited outputs |
//!
//! # Usage
//!
//! ```ignore
//! use stakefleet::{Fleet, FleetConfig, Job, MempoolClient, Pipeline, StakingTxBuilder};
//!
//! let config = FleetConfig::from_lookup(|k| std::env::var(k).ok())?;
//! let chain = Arc::new(MempoolClient::new(&config.mempool_url, config.network));
//! let builder = StakingTxBuilder::from_config(chain.clone(), params, &config, 20.0)?;
//! let fleet = Fleet::new(Pipeline::new(chain, Arc::new(builder), &config.retry));
//! let outcomes = fleet.run(wallets.into_iter().map(Job::Full).collect()).await;
//! ```

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod error;
pub mod fee;
pub mod fleet;
pub mod gate;
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod retry;
pub mod scripts;
pub mod selector;
pub mod tx;
pub mod wallet;

pub use chain::{resolve_fee_rate, ChainClient, FeeTier, MempoolClient, RecommendedFees, Utxo};
pub use config::{FeeRateSetting, FleetConfig, FundingConfig, Network, RetryConfig};
pub use error::{
    ArtifactError, BuildError, ChainError, ParamsError, PipelineError, ScriptError, SelectError, SignError,
    WalletError,
};
pub use fee::estimate_fee;
pub use fleet::{Fleet, FleetSummary, WalletOutcome};
pub use gate::ActivationGate;
pub use params::{select_version, BabylonApiClient, GlobalStakingParams, ParamsClient};
pub use pipeline::{Job, Pipeline, PipelineMode, PipelineReport, PipelineState, SpendGuard};
pub use retry::{retry, RetryDecision, RetryOutcome, RetryPolicy};
pub use scripts::ScriptSet;
pub use selector::select_utxos;
pub use tx::{
    build_timelock_withdrawal, sign_template, Destination, FundingTxBuilder, SignedTransaction, StakingTxBuilder,
    TemplateSource, UnsignedTemplate,
};
pub use wallet::{load_wallets, KeyMaterial, Wallet, WalletRecord};
