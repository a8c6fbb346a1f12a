//! The unlock orchestrator: one invocation walks
//! `Received -> Inspecting -> {NeedsPassword | Unlocking} -> {Unlocked | Failed}`.

use crate::candidates::{PasswordCandidate, user_tier};
use crate::config::UnlockConfig;
use crate::document::EncryptedDocument;
use crate::error::{StrategyError, UnlockError};
use crate::strategy::{
    AttemptContext, ChainOutcome, ChainSuccess, NoopObserver, StrategyChain, StrategyKind,
    SweepObserver,
};
use crate::verifier::OutputVerifier;
use crate::worker::CancellationToken;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the caller hands the engine for one invocation.
#[derive(Clone)]
pub struct UnlockRequest {
    pub bytes: Arc<[u8]>,
    pub password: Option<String>,
    pub sweep: bool,
    /// Used only to derive password candidates.
    pub filename_hint: Option<String>,
}

impl UnlockRequest {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            password: None,
            sweep: false,
            filename_hint: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_sweep(mut self, sweep: bool) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename_hint = Some(filename.into());
        self
    }

    /// The supplied password, with an empty string counting as none.
    fn supplied_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|password| !password.is_empty())
    }
}

impl fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockRequest")
            .field("bytes", &self.bytes.len())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("sweep", &self.sweep)
            .field("filename_hint", &self.filename_hint)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Received,
    Inspecting,
    NeedsPassword,
    Unlocking,
    Unlocked,
    Failed,
}

/// An accepted, verified, unencrypted document.
#[derive(Debug)]
pub struct UnlockedDocument {
    pub bytes: Vec<u8>,
    pub strategy: StrategyKind,
    pub password: Option<PasswordCandidate>,
    pub pages_recovered: usize,
    pub pages_total: usize,
}

impl UnlockedDocument {
    pub fn is_partial(&self) -> bool {
        self.pages_recovered < self.pages_total
    }

    /// Human-readable note when pages were dropped.
    pub fn recovery_note(&self) -> Option<String> {
        self.is_partial().then(|| {
            format!(
                "recovered {} of {} pages; unreadable pages were omitted",
                self.pages_recovered, self.pages_total
            )
        })
    }

    /// True when the password came from a sampled tier. Such a hit is luck,
    /// not evidence about the password space.
    pub fn best_effort(&self) -> bool {
        self.password
            .as_ref()
            .is_some_and(|candidate| candidate.source().is_best_effort())
    }
}

#[derive(Debug)]
pub enum UnlockAttemptResult {
    Success(UnlockedDocument),
    NeedsPassword,
    IncorrectPassword,
    StructuralFailure(String),
    Exhausted,
}

impl UnlockAttemptResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UnlockAttemptResult::Success(_))
    }

    /// Same result kind, ignoring payloads.
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One invocation's result together with how it got there.
#[derive(Debug)]
pub struct UnlockOutcome {
    pub result: UnlockAttemptResult,
    pub state_trail: Vec<EngineState>,
    pub candidates_tried: usize,
    pub elapsed: Duration,
}

/// Runs the strategy chain for one request at a time. Holds no state between
/// invocations.
#[derive(Debug, Clone, Default)]
pub struct UnlockEngine {
    config: UnlockConfig,
    verifier: OutputVerifier,
}

impl UnlockEngine {
    pub fn new(config: UnlockConfig) -> Self {
        Self {
            config,
            verifier: OutputVerifier,
        }
    }

    pub fn unlock(&self, request: &UnlockRequest) -> Result<UnlockOutcome, UnlockError> {
        self.unlock_with(request, &CancellationToken::new(), &NoopObserver)
    }

    /// Run one invocation. `Err` is reserved for a failing verifier; every
    /// other problem is a result kind.
    pub fn unlock_with(
        &self,
        request: &UnlockRequest,
        cancel: &CancellationToken,
        observer: &dyn SweepObserver,
    ) -> Result<UnlockOutcome, UnlockError> {
        let started = Instant::now();
        let mut trail = vec![EngineState::Received, EngineState::Inspecting];
        let finish =
            |result: UnlockAttemptResult, trail: Vec<EngineState>, candidates_tried: usize| {
                UnlockOutcome {
                    result,
                    state_trail: trail,
                    candidates_tried,
                    elapsed: started.elapsed(),
                }
            };

        let mut document = match EncryptedDocument::parse(&request.bytes) {
            Ok(document) => document,
            Err(e) => {
                log::debug!("rejecting input: {e}");
                trail.push(EngineState::Failed);
                return Ok(finish(
                    UnlockAttemptResult::StructuralFailure(e.to_string()),
                    trail,
                    0,
                ));
            }
        };
        let state = document.encryption_state();
        log::debug!("encryption state {state:?}");

        let password = request.supplied_password();
        if document.is_protected() && password.is_none() && !request.sweep {
            trail.push(EngineState::NeedsPassword);
            return Ok(finish(UnlockAttemptResult::NeedsPassword, trail, 0));
        }
        trail.push(EngineState::Unlocking);

        let supplied = password
            .map(|password| user_tier(password, self.config.generator.max_user_variants))
            .unwrap_or_default();
        let chain = StrategyChain::for_state(state);
        let mut ctx = AttemptContext {
            document: &mut document,
            supplied: &supplied,
            filename_hint: request.filename_hint.as_deref(),
            sweep: request.sweep,
            config: &self.config,
            verifier: &self.verifier,
            cancel,
            observer,
            candidates_tried: 0,
        };
        let outcome = chain.run(&mut ctx)?;
        let candidates_tried = ctx.candidates_tried;

        let result = match outcome {
            ChainOutcome::Unlocked(success) => {
                trail.push(EngineState::Unlocked);
                UnlockAttemptResult::Success(unlocked(success))
            }
            ChainOutcome::Failed(failures) => {
                trail.push(EngineState::Failed);
                classify_failure(&failures, password.is_some(), cancel.is_cancelled())
            }
        };
        Ok(finish(result, trail, candidates_tried))
    }
}

fn unlocked(success: ChainSuccess) -> UnlockedDocument {
    let document = UnlockedDocument {
        bytes: success.output.bytes,
        strategy: success.strategy,
        password: success.output.password,
        pages_recovered: success.pages_recovered,
        pages_total: success.output.pages_total.max(success.pages_recovered),
    };
    match &document.password {
        Some(candidate) => log::info!(
            "unlocked via {} with {} candidate #{}",
            document.strategy,
            candidate.source(),
            candidate.ordinal()
        ),
        None => log::info!("unlocked via {}", document.strategy),
    }
    if document.best_effort() {
        log::info!("password found by sampling; no claim about password strength");
    }
    document
}

/// Map the chain's failures to the result a caller acts on.
fn classify_failure(
    failures: &[(StrategyKind, StrategyError)],
    password_supplied: bool,
    cancelled: bool,
) -> UnlockAttemptResult {
    let stopped = failures.iter().any(|(_, e)| e.is_terminal());
    let swept = failures.iter().any(|(kind, e)| {
        *kind == StrategyKind::CandidateSweep && !matches!(e, StrategyError::NotApplicable(_))
    });
    if cancelled || stopped || swept {
        return UnlockAttemptResult::Exhausted;
    }
    let wrong_password = failures
        .iter()
        .any(|(_, e)| matches!(e, StrategyError::IncorrectPassword));
    if password_supplied && wrong_password {
        return UnlockAttemptResult::IncorrectPassword;
    }

    let reason = failures
        .iter()
        .rev()
        .find(|(_, e)| !matches!(e, StrategyError::NotApplicable(_)))
        .map(|(kind, e)| format!("{kind}: {e}"))
        .unwrap_or_else(|| "no strategy applies to this document".to_string());
    UnlockAttemptResult::StructuralFailure(reason)
}
