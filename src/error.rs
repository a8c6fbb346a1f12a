//! Error types shared by the unlock engine.

use thiserror::Error;

/// Errors that end an unlock invocation before or outside the strategy chain.
#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The output verifier itself broke; this is fatal for the invocation.
    #[error("output verifier failed: {0}")]
    Verifier(String),

    #[error("worker exited before reporting a result")]
    WorkerLost,

    #[error("failed to start worker pool: {0}")]
    Pool(String),
}

/// Why a single strategy attempt did not produce a document.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("document requires a password and none was supplied")]
    NoPassword,

    #[error("the supplied password is incorrect")]
    IncorrectPassword,

    #[error("page {page} could not be read")]
    Unreadable { page: u32 },

    #[error("no readable pages")]
    NoPages,

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("output rejected: {0}")]
    Verification(#[from] VerifyError),

    #[error("strategy panicked: {0}")]
    Panicked(String),

    #[error("not applicable: {0}")]
    NotApplicable(&'static str),

    #[error("no candidate unlocked the document")]
    NoCandidate,

    #[error("candidate budget exhausted")]
    Budget,

    #[error("cancelled")]
    Cancelled,

    #[error("binary reconstruction failed: {0}")]
    Reconstruct(#[from] ReconstructError),

    #[error(transparent)]
    Parse(#[from] UnlockError),
}

impl StrategyError {
    /// Errors that stop the whole chain instead of moving to the next strategy.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StrategyError::Budget | StrategyError::Cancelled)
    }
}

/// Why the raw-byte reconstruction gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("no %PDF- header")]
    NotPdf,

    #[error("no trailer dictionary")]
    NoTrailer,

    #[error("trailer has no /Encrypt entry")]
    NoEncryptEntry,

    #[error("unbalanced dictionary at offset {0}")]
    Unbalanced(usize),

    #[error("reconstructed file is still encrypted")]
    StillEncrypted,
}

/// Reasons the output verifier rejects a candidate output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("output is empty")]
    Empty,

    #[error("output does not parse: {0}")]
    Unparseable(String),

    #[error("output is still encrypted")]
    StillEncrypted,

    #[error("output has no pages")]
    NoPages,

    #[error("page count changed between parses ({first} vs {second})")]
    Unstable { first: usize, second: usize },
}

/// Turns a caught panic payload into something printable.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
