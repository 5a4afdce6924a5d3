//! Error types and classification for batchflow.
//!
//! This crate provides:
//! - [`BfError`] - Top-level error enum for every pipeline failure
//! - Domain-specific errors ([`ProducerError`], [`TransferError`], [`RegistryError`])
//! - [`FailureStage`] naming the pipeline stage an error belongs to
//!
//! Nothing in batchflow retries internally. Producer and transfer failures
//! are fatal to the prefetch worker; cancellation is the expected way a
//! blocked wait ends during shutdown and is never reported as a failure.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for batchflow.
#[derive(Error, Debug)]
pub enum BfError {
    /// The batch producer could not fill a batch
    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    /// Host to device staging failed
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Component lookup or registration failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking wait was interrupted by shutdown
    #[error("Prefetch pipeline cancelled")]
    Cancelled,

    /// The prefetch worker terminated with a fatal error.
    ///
    /// Returned by every consumer call made after the failure was published.
    #[error("Prefetch worker failed during {stage}: {message}")]
    WorkerFailed {
        /// Stage in which the worker failed
        stage: FailureStage,
        /// Rendered message of the original error
        message: String,
    },

    /// The prefetch worker thread panicked
    #[error("Prefetch worker panicked")]
    WorkerPanicked,

    /// The worker did not stop within the shutdown timeout
    #[error("Prefetch worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// The consumer gave up waiting for a ready batch
    #[error("No batch became ready within {0:?}")]
    Timeout(Duration),

    /// Generic errors (wrapped anyhow)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Batch producer errors.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The input source has no more records
    #[error("Source exhausted: {0}")]
    Exhausted(String),

    /// A record could not be decoded
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// The produced shape does not fit the batch
    #[error("Shape error: {0}")]
    Shape(String),

    /// Any other producer-specific failure
    #[error("{0}")]
    Failed(String),
}

/// Host/device transfer errors.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Device memory could not be allocated
    #[error("Device allocation failed: {0}")]
    Allocation(String),

    /// A transfer stream could not be created
    #[error("Stream creation failed: {0}")]
    Stream(String),

    /// An asynchronous copy could not be issued or failed
    #[error("Copy failed: {0}")]
    Copy(String),

    /// Waiting for stream completion failed
    #[error("Synchronize failed: {0}")]
    Synchronize(String),
}

/// Registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The key is already registered
    #[error("{kind} type {key} already registered")]
    Duplicate {
        /// Kind of component held by the registry
        kind: String,
        /// Offending key
        key: String,
    },

    /// No constructor is registered under the key
    #[error("Unknown {kind} type: {key} (known types: {known})")]
    Unknown {
        /// Kind of component held by the registry
        kind: String,
        /// Requested key
        key: String,
        /// Comma separated list of registered keys
        known: String,
    },
}

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Construction, registry lookup, warm-up
    Setup,

    /// Filling a batch through the producer
    Produce,

    /// Staging a batch to device memory
    Transfer,

    /// Claiming a ready batch on the consumer side
    Consume,

    /// Stopping and joining the worker
    Shutdown,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "Setup"),
            Self::Produce => write!(f, "Produce"),
            Self::Transfer => write!(f, "Transfer"),
            Self::Consume => write!(f, "Consume"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl BfError {
    /// Create a configuration error with a custom message.
    pub fn config(msg: impl Into<String>) -> Self {
        BfError::Config(msg.into())
    }

    /// Create a generic producer failure with a custom message.
    pub fn producer(msg: impl Into<String>) -> Self {
        BfError::Producer(ProducerError::Failed(msg.into()))
    }

    /// Stage this error belongs to.
    pub fn stage(&self) -> FailureStage {
        match self {
            BfError::Producer(_) => FailureStage::Produce,
            BfError::Transfer(_) => FailureStage::Transfer,
            BfError::Registry(_) | BfError::Config(_) => FailureStage::Setup,
            BfError::WorkerFailed { stage, .. } => *stage,
            BfError::WorkerPanicked => FailureStage::Produce,
            BfError::Cancelled | BfError::ShutdownTimeout(_) => FailureStage::Shutdown,
            BfError::Timeout(_) => FailureStage::Consume,
            BfError::Other(_) => FailureStage::Produce,
        }
    }

    /// Whether this error is the expected interruption of a blocked wait.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BfError::Cancelled)
    }
}

/// Result type alias using BfError.
pub type Result<T> = std::result::Result<T, BfError>;
