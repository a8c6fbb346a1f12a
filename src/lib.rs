//! Removes password protection from PDF documents.
//!
//! An [`UnlockEngine`] takes the raw bytes of an upload, an optional password
//! and a candidate-sweep flag, and runs an ordered chain of strategies over
//! them. Every output is re-parsed by the [`OutputVerifier`] before it is
//! reported as [`UnlockAttemptResult::Success`].
//!
//! ```no_run
//! use pdf_unlock::{UnlockAttemptResult, UnlockEngine, UnlockRequest};
//!
//! let bytes = std::fs::read("invoice_march.pdf")?;
//! let request = UnlockRequest::new(bytes)
//!     .with_filename("invoice_march.pdf")
//!     .with_sweep(true);
//! match UnlockEngine::default().unlock(&request)?.result {
//!     UnlockAttemptResult::Success(document) => println!("{} pages", document.pages_recovered),
//!     other => println!("{other:?}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod candidates;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod strategy;
pub mod verifier;
pub mod worker;

pub use candidates::{CandidateGenerator, CandidateSource, PasswordCandidate};
pub use config::{CandidateBudget, GeneratorConfig, UnlockConfig};
pub use document::{EncryptedDocument, EncryptionState};
pub use engine::{
    EngineState, UnlockAttemptResult, UnlockEngine, UnlockOutcome, UnlockRequest,
    UnlockedDocument,
};
pub use error::{ReconstructError, StrategyError, UnlockError, VerifyError};
pub use strategy::{NoopObserver, StrategyKind, SweepObserver};
pub use verifier::{OutputVerifier, VerifiedOutput};
pub use worker::{CancellationToken, UnlockHandle, UnlockPool};
