//! Tunables for the unlock engine.

use chrono::Datelike;
use std::time::Duration;

/// Hard limits for the candidate sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateBudget {
    /// Maximum number of candidates tried in one invocation.
    pub max_candidates: usize,
    /// Wall-clock limit for the sweep, checked between candidates.
    pub max_duration: Duration,
}

impl Default for CandidateBudget {
    fn default() -> Self {
        Self {
            max_candidates: 2_000,
            max_duration: Duration::from_secs(5),
        }
    }
}

/// Shape of the candidate sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Upper bound on re-encoded variants of the user-supplied password.
    pub max_user_variants: usize,
    pub numeric_min_len: usize,
    pub numeric_max_len: usize,
    /// Digit strings sampled for each numeric length.
    pub numeric_samples_per_len: usize,
    /// Highest counter appended to the pattern stems (inclusive).
    pub pattern_max_counter: u32,
    /// Seed for numeric sampling; a fixed seed keeps the sequence reproducible.
    pub seed: u64,
    /// Year used for filename suffixes (this year and the next).
    pub reference_year: i32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_user_variants: 5,
            numeric_min_len: 4,
            numeric_max_len: 8,
            numeric_samples_per_len: 50,
            pattern_max_counter: 99,
            seed: 0x5eed_cafe,
            reference_year: chrono::Local::now().year(),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockConfig {
    pub budget: CandidateBudget,
    pub generator: GeneratorConfig,
}

impl UnlockConfig {
    pub fn with_budget(mut self, max_candidates: usize, max_duration: Duration) -> Self {
        self.budget = CandidateBudget {
            max_candidates,
            max_duration,
        };
        self
    }
}
