//! Worker pool running one unlock invocation per thread, plus cancellation.

use crate::engine::{UnlockEngine, UnlockOutcome, UnlockRequest};
use crate::error::UnlockError;
use crate::strategy::{NoopObserver, SweepObserver};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

/// Shared flag checked between candidates and between strategies.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Runs unlock invocations concurrently; each one stays on a single thread.
pub struct UnlockPool {
    pool: ThreadPool,
    engine: Arc<UnlockEngine>,
}

impl UnlockPool {
    pub fn new(threads: usize, engine: UnlockEngine) -> Result<Self, UnlockError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("pdf-unlock-{index}"))
            .build()
            .map_err(|e| UnlockError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            engine: Arc::new(engine),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn submit(&self, request: UnlockRequest) -> UnlockHandle {
        self.submit_observed(request, Arc::new(NoopObserver))
    }

    pub fn submit_observed(
        &self,
        request: UnlockRequest,
        observer: Arc<dyn SweepObserver>,
    ) -> UnlockHandle {
        let (sender, receiver) = mpsc::channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = Arc::clone(&self.engine);

        self.pool.spawn(move || {
            let outcome = engine.unlock_with(&request, &token, observer.as_ref());
            // The handle may have been dropped; nobody is waiting then.
            let _ = sender.send(outcome);
        });

        UnlockHandle { receiver, cancel }
    }
}

/// Caller's side of a submitted invocation.
pub struct UnlockHandle {
    receiver: mpsc::Receiver<Result<UnlockOutcome, UnlockError>>,
    cancel: CancellationToken,
}

impl UnlockHandle {
    /// Stop trying further candidates; the invocation finishes as exhausted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn wait(self) -> Result<UnlockOutcome, UnlockError> {
        self.receiver.recv().map_err(|_| UnlockError::WorkerLost)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_pool_reports_structural_failure() {
        let pool = UnlockPool::new(2, UnlockEngine::default()).unwrap();
        assert_eq!(pool.threads(), 2);
        let outcome = pool
            .submit(UnlockRequest::new(b"not a pdf".as_slice()))
            .wait()
            .unwrap();
        assert!(matches!(
            outcome.result,
            crate::engine::UnlockAttemptResult::StructuralFailure(_)
        ));
    }
}
