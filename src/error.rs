//! Error taxonomy. Each layer owns one enum; the pipeline decides which ones are retried.

use bitcoin::Amount;

/// Chain query / broadcast / parameter API failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Broadcast rejected: {0}")]
    Rejected(String),
    #[error("Invalid fee rate: {0} sat/vB")]
    InvalidFeeRate(f64),
}

impl ChainError {
    /// Failures assumed to clear up on their own (network, server side, garbled payload).
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) | ChainError::Decode(_) => true,
            ChainError::Status { status, .. } => *status == 429 || *status >= 500,
            ChainError::Rejected(_) | ChainError::InvalidFeeRate(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Invalid script parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("Insufficient funds: need more than {needed}, confirmed balance {available}")]
    InsufficientFunds { needed: Amount, available: Amount },
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("Not a taproot address: {0}")]
    NotTaprootAddress(String),
    #[error("Out of protocol policy: {0}")]
    OutOfPolicy(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Taproot construction failed: {0}")]
    Taproot(String),
}

impl BuildError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BuildError::Chain(e) if e.is_transient())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("Tweaking failed: {0}")]
    Tweaking(String),
    #[error("Input {input} missing previous output")]
    MissingPrevout { input: usize },
    #[error("Sighash computation failed for input {input}: {reason}")]
    Sighash { input: usize, reason: String },
    #[error("Cannot finalize input {input}: {reason}")]
    Finalization { input: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Build failed: {0}")]
    Build(#[from] BuildError),
    #[error("Sign failed: {0}")]
    Sign(#[from] SignError),
    #[error("Broadcast failed: {0}")]
    Broadcast(#[from] ChainError),
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Failed to read wallet file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid wallet file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Wallet {index}: invalid WIF: {reason}")]
    Wif { index: usize, reason: String },
    #[error("Wallet {index}: invalid address {address}: {reason}")]
    Address { index: usize, address: String, reason: String },
    #[error("Wallet {index}: address {address} is not the key-path address of its key")]
    AddressMismatch { index: usize, address: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Invalid parameter version {version}: {reason}")]
    Invalid { version: u32, reason: String },
    #[error("No parameter version with activation height {0}")]
    UnknownActivationHeight(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact I/O on {path}: {source}")]
    Io { path: String, source: std::io::Error },
}
