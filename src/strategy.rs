//! The ordered chain of unlock strategies.
//!
//! Every strategy starts either from the shared parsed upload or from a fresh
//! parse of the immutable raw bytes, never from another strategy's output.
//! The chain verifies each output and stops at the first one accepted.

use crate::candidates::{CandidateGenerator, PasswordCandidate};
use crate::config::UnlockConfig;
use crate::document::{EncryptedDocument, EncryptionState};
use crate::error::{ReconstructError, StrategyError, UnlockError, panic_message};
use crate::fallback;
use crate::verifier::OutputVerifier;
use crate::worker::CancellationToken;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Reserialize,
    DirectDecrypt,
    RederiveDecrypt,
    PartialRecovery,
    CandidateSweep,
    BinaryFallback,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Reserialize => "re-serialize",
            StrategyKind::DirectDecrypt => "direct decrypt",
            StrategyKind::RederiveDecrypt => "re-derivation decrypt",
            StrategyKind::PartialRecovery => "partial-page recovery",
            StrategyKind::CandidateSweep => "candidate sweep",
            StrategyKind::BinaryFallback => "binary fallback",
        };
        f.write_str(name)
    }
}

/// Receives sweep progress. All methods default to doing nothing.
pub trait SweepObserver: Send + Sync {
    fn on_candidate(&self, _candidate: &PasswordCandidate) {}
    fn on_finish(&self) {}
}

/// Observer for callers that do not report progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SweepObserver for NoopObserver {}

/// What a strategy hands to the verifier.
#[derive(Debug)]
pub struct StrategyOutput {
    pub bytes: Vec<u8>,
    pub password: Option<PasswordCandidate>,
    pub pages_total: usize,
}

/// Everything a strategy may look at during one invocation.
pub struct AttemptContext<'a> {
    /// The upload as parsed on intake; direct decryption works on this copy.
    pub document: &'a mut EncryptedDocument,
    /// The user-supplied password and its variants, empty if none was given.
    pub supplied: &'a [PasswordCandidate],
    pub filename_hint: Option<&'a str>,
    pub sweep: bool,
    pub config: &'a UnlockConfig,
    pub verifier: &'a OutputVerifier,
    pub cancel: &'a CancellationToken,
    pub observer: &'a dyn SweepObserver,
    pub candidates_tried: usize,
}

pub trait UnlockStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError>;
}

/// Apply the supplied candidates in order until one opens `document`.
///
/// `Ok(None)` means the document was readable without any password.
fn open_with_supplied(
    document: &mut EncryptedDocument,
    supplied: &[PasswordCandidate],
) -> Result<Option<PasswordCandidate>, StrategyError> {
    if document.decrypt(None) {
        return Ok(None);
    }
    if supplied.is_empty() {
        return Err(StrategyError::NoPassword);
    }
    supplied
        .iter()
        .find(|candidate| document.decrypt(Some(candidate)))
        .cloned()
        .map(Some)
        .ok_or(StrategyError::IncorrectPassword)
}

/// With a sweep requested and no password supplied, an open with the empty
/// password belongs to the sweep as its first dictionary candidate.
fn leave_to_sweep(ctx: &AttemptContext<'_>) -> Result<(), StrategyError> {
    if ctx.sweep && ctx.supplied.is_empty() {
        return Err(StrategyError::NotApplicable("left to the candidate sweep"));
    }
    Ok(())
}

/// Writes an unencrypted document back out unchanged.
#[derive(Debug, Default)]
pub struct Reserialize;

impl UnlockStrategy for Reserialize {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reserialize
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        let pages = ctx.document.page_numbers();
        Ok(StrategyOutput {
            bytes: ctx.document.serialize(&pages)?,
            password: None,
            pages_total: pages.len(),
        })
    }
}

/// Decrypts the intake copy with the supplied password.
#[derive(Debug, Default)]
pub struct DirectDecrypt;

impl UnlockStrategy for DirectDecrypt {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectDecrypt
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        leave_to_sweep(ctx)?;
        let password = open_with_supplied(ctx.document, ctx.supplied)?;
        let pages = ctx.document.page_numbers();
        Ok(StrategyOutput {
            bytes: ctx.document.serialize(&pages)?,
            password,
            pages_total: pages.len(),
        })
    }
}

/// Same as [`DirectDecrypt`] on a fresh parse of the raw bytes.
#[derive(Debug, Default)]
pub struct RederiveDecrypt;

impl UnlockStrategy for RederiveDecrypt {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RederiveDecrypt
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        leave_to_sweep(ctx)?;
        let mut fresh = EncryptedDocument::parse(ctx.document.raw())?;
        let password = open_with_supplied(&mut fresh, ctx.supplied)?;
        let pages = fresh.page_numbers();
        Ok(StrategyOutput {
            bytes: fresh.serialize(&pages)?,
            password,
            pages_total: pages.len(),
        })
    }
}

/// Keeps only the pages that can be read; the rest are dropped.
#[derive(Debug, Default)]
pub struct PartialRecovery;

impl UnlockStrategy for PartialRecovery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PartialRecovery
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        leave_to_sweep(ctx)?;
        let mut fresh = EncryptedDocument::parse(ctx.document.raw())?;
        let password = open_with_supplied(&mut fresh, ctx.supplied)?;
        let total = fresh.page_numbers().len();
        let readable = fresh.readable_pages();
        if readable.is_empty() {
            return Err(StrategyError::NoPages);
        }
        if readable.len() < total {
            log::warn!("recovering {} of {} pages", readable.len(), total);
        }
        Ok(StrategyOutput {
            bytes: fresh.serialize(&readable)?,
            password,
            pages_total: total,
        })
    }
}

/// Walks the candidate sequence within the configured budget.
#[derive(Debug, Default)]
pub struct CandidateSweep;

impl UnlockStrategy for CandidateSweep {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CandidateSweep
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        if !ctx.sweep {
            return Err(StrategyError::NotApplicable("sweep not requested"));
        }
        if !matches!(
            ctx.document.encryption_state(),
            EncryptionState::UserRequired | EncryptionState::OwnerOnly
        ) {
            return Err(StrategyError::NotApplicable("no password to find"));
        }

        let result = sweep(ctx);
        ctx.observer.on_finish();
        result
    }
}

fn sweep(ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
    let budget = ctx.config.budget;
    let started = Instant::now();
    let user_password = ctx.supplied.first().map(PasswordCandidate::as_str);
    let generator =
        CandidateGenerator::new(&ctx.config.generator, user_password, ctx.filename_hint);

    for candidate in generator {
        if ctx.cancel.is_cancelled() {
            return Err(StrategyError::Cancelled);
        }
        if ctx.candidates_tried >= budget.max_candidates
            || started.elapsed() >= budget.max_duration
        {
            log::warn!(
                "sweep budget exhausted after {} candidates in {:.2?}",
                ctx.candidates_tried,
                started.elapsed()
            );
            return Err(StrategyError::Budget);
        }

        ctx.candidates_tried += 1;
        ctx.observer.on_candidate(&candidate);

        let document = &*ctx.document;
        let accepted = catch_unwind(AssertUnwindSafe(|| document.authenticates(&candidate)))
            .unwrap_or(false);
        if !accepted {
            continue;
        }

        log::debug!(
            "candidate #{} ({}) authenticates",
            candidate.ordinal(),
            candidate.source()
        );
        match unlock_with_candidate(ctx.document.raw(), &candidate, ctx.verifier) {
            Ok(output) => return Ok(output),
            Err(e) => log::debug!("candidate #{} rejected: {e}", candidate.ordinal()),
        }
    }

    Err(StrategyError::NoCandidate)
}

fn unlock_with_candidate(
    raw: &[u8],
    candidate: &PasswordCandidate,
    verifier: &OutputVerifier,
) -> Result<StrategyOutput, StrategyError> {
    let mut fresh = EncryptedDocument::parse(raw)?;
    if !fresh.decrypt(Some(candidate)) {
        return Err(StrategyError::IncorrectPassword);
    }
    let total = fresh.page_numbers().len();
    let readable = fresh.readable_pages();
    if readable.is_empty() {
        return Err(StrategyError::NoPages);
    }
    let bytes = fresh.serialize(&readable)?;
    verifier.verify(&bytes)?;
    Ok(StrategyOutput {
        bytes,
        password: Some(candidate.clone()),
        pages_total: total,
    })
}

/// Strips the encryption dictionary from the raw bytes and re-parses.
///
/// Only offered for documents whose content is not ciphertext; for a
/// user-password document the result would be unreadable.
#[derive(Debug, Default)]
pub struct BinaryFallback;

impl UnlockStrategy for BinaryFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BinaryFallback
    }

    fn attempt(&self, ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
        if !matches!(
            ctx.document.encryption_state(),
            EncryptionState::OwnerOnly | EncryptionState::Unknown
        ) {
            return Err(StrategyError::NotApplicable("content is encrypted"));
        }

        let rebuilt = fallback::excise_encryption(ctx.document.raw())?;
        let document = EncryptedDocument::parse(&rebuilt)?;
        if document.encryption_state() != EncryptionState::None {
            return Err(ReconstructError::StillEncrypted.into());
        }
        let total = document.page_numbers().len();
        let readable = document.readable_pages();
        if readable.is_empty() {
            return Err(StrategyError::NoPages);
        }
        Ok(StrategyOutput {
            bytes: document.serialize(&readable)?,
            password: None,
            pages_total: total,
        })
    }
}

/// A verified result from the chain.
#[derive(Debug)]
pub struct ChainSuccess {
    pub strategy: StrategyKind,
    pub output: StrategyOutput,
    pub pages_recovered: usize,
}

/// Result of running the chain once.
#[derive(Debug)]
pub enum ChainOutcome {
    Unlocked(ChainSuccess),
    Failed(Vec<(StrategyKind, StrategyError)>),
}

/// Ordered strategies, run strictly one after another.
pub struct StrategyChain {
    strategies: Vec<Box<dyn UnlockStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn UnlockStrategy>>) -> Self {
        Self { strategies }
    }

    /// The chain appropriate for a document's protection.
    ///
    /// Unencrypted documents only get re-serialized.
    pub fn for_state(state: EncryptionState) -> Self {
        match state {
            EncryptionState::None => Self::new(vec![Box::new(Reserialize)]),
            _ => Self::new(vec![
                Box::new(DirectDecrypt),
                Box::new(RederiveDecrypt),
                Box::new(PartialRecovery),
                Box::new(CandidateSweep),
                Box::new(BinaryFallback),
            ]),
        }
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Run until a strategy's output passes the verifier.
    ///
    /// Strategy failures and panics move on to the next strategy; only a
    /// panicking verifier is an error.
    pub fn run(&self, ctx: &mut AttemptContext<'_>) -> Result<ChainOutcome, UnlockError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let kind = strategy.kind();
            if ctx.cancel.is_cancelled() {
                failures.push((kind, StrategyError::Cancelled));
                break;
            }
            log::debug!("trying {kind}");

            let attempt = catch_unwind(AssertUnwindSafe(|| strategy.attempt(ctx)))
                .unwrap_or_else(|payload| Err(StrategyError::Panicked(panic_message(payload))));

            let output = match attempt {
                Ok(output) => output,
                Err(e) => {
                    log::debug!("{kind} failed: {e}");
                    let terminal = e.is_terminal();
                    failures.push((kind, e));
                    if terminal {
                        break;
                    }
                    continue;
                }
            };

            let verifier = ctx.verifier;
            let verdict = catch_unwind(AssertUnwindSafe(|| verifier.verify(&output.bytes)))
                .map_err(|payload| UnlockError::Verifier(panic_message(payload)))?;
            match verdict {
                Ok(verified) => {
                    return Ok(ChainOutcome::Unlocked(ChainSuccess {
                        strategy: kind,
                        output,
                        pages_recovered: verified.page_count,
                    }));
                }
                Err(e) => {
                    log::debug!("{kind} output rejected: {e}");
                    failures.push((kind, e.into()));
                }
            }
        }

        Ok(ChainOutcome::Failed(failures))
    }
}

impl fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateSource;
    use lopdf::{Document, Object, Stream, dictionary};

    struct Panics;

    impl UnlockStrategy for Panics {
        fn kind(&self) -> StrategyKind {
            StrategyKind::DirectDecrypt
        }

        fn attempt(&self, _ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
            panic!("parser exploded");
        }
    }

    struct Garbage;

    impl UnlockStrategy for Garbage {
        fn kind(&self) -> StrategyKind {
            StrategyKind::RederiveDecrypt
        }

        fn attempt(&self, _ctx: &mut AttemptContext<'_>) -> Result<StrategyOutput, StrategyError> {
            Ok(StrategyOutput {
                bytes: b"%PDF-1.4 claims success".to_vec(),
                password: None,
                pages_total: 1,
            })
        }
    }

    fn plain_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT (x) Tj ET".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn run(chain: &StrategyChain, document: &mut EncryptedDocument) -> ChainOutcome {
        let config = UnlockConfig::default();
        let verifier = OutputVerifier;
        let cancel = CancellationToken::new();
        let mut ctx = AttemptContext {
            document,
            supplied: &[],
            filename_hint: None,
            sweep: false,
            config: &config,
            verifier: &verifier,
            cancel: &cancel,
            observer: &NoopObserver,
            candidates_tried: 0,
        };
        chain.run(&mut ctx).unwrap()
    }

    #[test]
    fn test_unencrypted_chain_is_reserialize_only() {
        assert_eq!(
            StrategyChain::for_state(EncryptionState::None).kinds(),
            vec![StrategyKind::Reserialize]
        );
        assert_eq!(
            StrategyChain::for_state(EncryptionState::UserRequired).kinds(),
            vec![
                StrategyKind::DirectDecrypt,
                StrategyKind::RederiveDecrypt,
                StrategyKind::PartialRecovery,
                StrategyKind::CandidateSweep,
                StrategyKind::BinaryFallback,
            ]
        );
    }

    #[test]
    fn test_panic_is_contained_and_chain_moves_on() {
        let chain = StrategyChain::new(vec![Box::new(Panics), Box::new(Reserialize)]);
        let mut document = EncryptedDocument::parse(&plain_pdf()).unwrap();
        match run(&chain, &mut document) {
            ChainOutcome::Unlocked(success) => {
                assert_eq!(success.strategy, StrategyKind::Reserialize);
                assert_eq!(success.pages_recovered, 1);
            }
            ChainOutcome::Failed(failures) => panic!("unexpected failure: {failures:?}"),
        }
    }

    #[test]
    fn test_claimed_success_must_verify() {
        let chain = StrategyChain::new(vec![Box::new(Garbage)]);
        let mut document = EncryptedDocument::parse(&plain_pdf()).unwrap();
        match run(&chain, &mut document) {
            ChainOutcome::Failed(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(failures[0].1, StrategyError::Verification(_)));
            }
            ChainOutcome::Unlocked(_) => panic!("garbage output accepted"),
        }
    }

    #[test]
    fn test_cancelled_chain_stops() {
        let chain = StrategyChain::for_state(EncryptionState::None);
        let mut document = EncryptedDocument::parse(&plain_pdf()).unwrap();
        let config = UnlockConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = AttemptContext {
            document: &mut document,
            supplied: &[],
            filename_hint: None,
            sweep: false,
            config: &config,
            verifier: &OutputVerifier,
            cancel: &cancel,
            observer: &NoopObserver,
            candidates_tried: 0,
        };
        match chain.run(&mut ctx).unwrap() {
            ChainOutcome::Failed(failures) => {
                assert!(matches!(failures[0].1, StrategyError::Cancelled));
            }
            ChainOutcome::Unlocked(_) => panic!("cancelled chain unlocked"),
        }
    }

    #[test]
    fn test_open_with_supplied_skips_plain_document() {
        let mut document = EncryptedDocument::parse(&plain_pdf()).unwrap();
        let unused = [PasswordCandidate::new("x", CandidateSource::UserSupplied, 0)];
        assert!(open_with_supplied(&mut document, &unused).unwrap().is_none());
    }
}
