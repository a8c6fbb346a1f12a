//! Password candidate generation.
//!
//! The sequence is deterministic for a given configuration, password and
//! filename, de-duplicated, and produced lazily in tier order:
//! user-supplied, dictionary, filename-derived, numeric samples, patterns.

use crate::config::GeneratorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Common passwords tried before anything derived.
const DICTIONARY: &[&str] = &[
    "", "1234", "0000", "12345", "123456", "1111", "111111", "000000", "1234567", "12345678",
    "123456789", "654321", "password", "Password", "pass", "admin", "qwerty", "abc123", "letmein",
    "welcome", "secret", "default", "changeme", "user", "test", "pdf", "owner",
];

/// Word stems combined with a counter in the last tier.
const PATTERN_STEMS: &[&str] = &[
    "password", "pass", "admin", "user", "pdf", "doc", "file", "secret",
];

/// Filename segments beyond this count are ignored.
const MAX_FILENAME_SEGMENTS: usize = 8;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    UserSupplied,
    Dictionary,
    FilenameDerived,
    NumericBruteForce,
    PatternBruteForce,
}

impl CandidateSource {
    /// Sampled tiers; a hit there says nothing about the password's strength.
    pub fn is_best_effort(self) -> bool {
        matches!(
            self,
            CandidateSource::NumericBruteForce | CandidateSource::PatternBruteForce
        )
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateSource::UserSupplied => "user-supplied",
            CandidateSource::Dictionary => "dictionary",
            CandidateSource::FilenameDerived => "filename",
            CandidateSource::NumericBruteForce => "numeric",
            CandidateSource::PatternBruteForce => "pattern",
        };
        f.write_str(name)
    }
}

/// A single password guess.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCandidate {
    secret: String,
    source: CandidateSource,
    ordinal: usize,
}

impl PasswordCandidate {
    pub fn new(secret: impl Into<String>, source: CandidateSource, ordinal: usize) -> Self {
        Self {
            secret: secret.into(),
            source,
            ordinal,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.secret
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }

    /// Zero-based position in the sequence of the invocation that produced it.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

// Keeps secrets out of logs and panic messages.
impl fmt::Debug for PasswordCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCandidate")
            .field("source", &self.source)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

/// The supplied password followed by up to `max_variants` re-encodings of it.
///
/// Variants cover stray whitespace and the two usual UTF-8/Latin-1 mix-ups
/// between a browser form and the tool that set the password.
pub fn user_tier(password: &str, max_variants: usize) -> Vec<PasswordCandidate> {
    let mut seen = HashSet::new();
    let mut secrets = vec![password.to_string()];
    seen.insert(password.to_string());

    let trimmed = password.trim();
    let variants = [
        Some(trimmed.to_string()),
        utf8_from_latin1_mojibake(password),
        latin1_mojibake_of(password),
        utf8_from_latin1_mojibake(trimmed),
        latin1_mojibake_of(trimmed),
    ];
    for variant in variants.into_iter().flatten() {
        if secrets.len() > max_variants {
            break;
        }
        if seen.insert(variant.clone()) {
            secrets.push(variant);
        }
    }

    secrets
        .into_iter()
        .enumerate()
        .map(|(ordinal, secret)| {
            PasswordCandidate::new(secret, CandidateSource::UserSupplied, ordinal)
        })
        .collect()
}

/// Reads the UTF-8 bytes of `s` as if they were Latin-1 ("é" becomes "Ã©").
fn latin1_mojibake_of(s: &str) -> Option<String> {
    if s.is_ascii() {
        return None;
    }
    Some(s.bytes().map(char::from).collect())
}

/// Undoes [`latin1_mojibake_of`] when every char fits in one byte and the
/// bytes form valid UTF-8.
fn utf8_from_latin1_mojibake(s: &str) -> Option<String> {
    if s.is_ascii() {
        return None;
    }
    let bytes = s
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok().filter(|repaired| repaired != s)
}

/// Tokens derived from a filename hint like `invoice_march.pdf`.
fn filename_tier(hint: &str, year: i32) -> Vec<String> {
    let stem = Path::new(hint)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    if stem.is_empty() {
        return Vec::new();
    }

    let segments: Vec<&str> = stem
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|segment| segment.chars().count() > 2)
        .take(MAX_FILENAME_SEGMENTS)
        .collect();

    let suffixes = ["123".to_string(), year.to_string(), (year + 1).to_string()];

    let mut tokens = vec![stem.clone()];
    tokens.extend(segments.iter().map(|segment| segment.to_string()));
    for segment in &segments {
        for suffix in &suffixes {
            tokens.push(format!("{segment}{suffix}"));
        }
    }
    tokens
}

/// Random digit strings, `samples` per length, from a seeded generator.
fn numeric_tier(config: &GeneratorConfig) -> impl Iterator<Item = String> + Send + use<> {
    let samples = config.numeric_samples_per_len;
    let seed = config.seed;
    (config.numeric_min_len..=config.numeric_max_len).flat_map(move |len| {
        let mut rng = StdRng::seed_from_u64(seed ^ len as u64);
        (0..samples).map(move |_| {
            (0..len)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect::<String>()
        })
    })
}

fn pattern_tier(max_counter: u32) -> impl Iterator<Item = String> + Send {
    PATTERN_STEMS
        .iter()
        .flat_map(move |stem| (0..=max_counter).map(move |n| format!("{stem}{n}")))
}

type Tier = Box<dyn Iterator<Item = (String, CandidateSource)> + Send>;

/// Lazy, de-duplicated candidate sequence.
pub struct CandidateGenerator {
    tiers: Tier,
    seen: HashSet<String>,
    next_ordinal: usize,
}

impl CandidateGenerator {
    pub fn new(
        config: &GeneratorConfig,
        user_password: Option<&str>,
        filename_hint: Option<&str>,
    ) -> Self {
        let user: Vec<(String, CandidateSource)> = user_password
            .map(|password| user_tier(password, config.max_user_variants))
            .unwrap_or_default()
            .into_iter()
            .map(|candidate| (candidate.secret, CandidateSource::UserSupplied))
            .collect();

        let dictionary = DICTIONARY
            .iter()
            .map(|word| (word.to_string(), CandidateSource::Dictionary));

        let filename: Vec<(String, CandidateSource)> = filename_hint
            .map(|hint| filename_tier(hint, config.reference_year))
            .unwrap_or_default()
            .into_iter()
            .map(|token| (token, CandidateSource::FilenameDerived))
            .collect();

        let numeric =
            numeric_tier(config).map(|digits| (digits, CandidateSource::NumericBruteForce));
        let patterns = pattern_tier(config.pattern_max_counter)
            .map(|word| (word, CandidateSource::PatternBruteForce));

        let tiers: Tier = Box::new(
            user.into_iter()
                .chain(dictionary)
                .chain(filename)
                .chain(numeric)
                .chain(patterns),
        );

        Self {
            tiers,
            seen: HashSet::new(),
            next_ordinal: 0,
        }
    }
}

impl Iterator for CandidateGenerator {
    type Item = PasswordCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        for (secret, source) in self.tiers.by_ref() {
            if !self.seen.insert(secret.clone()) {
                continue;
            }
            let candidate = PasswordCandidate::new(secret, source, self.next_ordinal);
            self.next_ordinal += 1;
            return Some(candidate);
        }
        None
    }
}

impl fmt::Debug for CandidateGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateGenerator")
            .field("yielded", &self.next_ordinal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            reference_year: 2024,
            ..GeneratorConfig::default()
        }
    }

    fn secrets(generator: CandidateGenerator) -> Vec<(String, CandidateSource)> {
        generator
            .map(|c| (c.as_str().to_string(), c.source()))
            .collect()
    }

    #[test]
    fn test_dictionary_is_small() {
        assert!(DICTIONARY.len() < 30);
        assert_eq!(DICTIONARY[0], "");
    }

    #[test]
    fn test_user_password_comes_first() {
        let mut generator = CandidateGenerator::new(&config(), Some(" hunter2 "), None);
        let first = generator.next().unwrap();
        assert_eq!(first.as_str(), " hunter2 ");
        assert_eq!(first.source(), CandidateSource::UserSupplied);
        assert_eq!(first.ordinal(), 0);

        let second = generator.next().unwrap();
        assert_eq!(second.as_str(), "hunter2");
        assert_eq!(second.source(), CandidateSource::UserSupplied);

        let third = generator.next().unwrap();
        assert_eq!(third.source(), CandidateSource::Dictionary);
        assert_eq!(third.as_str(), "");
    }

    #[test]
    fn test_user_tier_latin1_variants() {
        let tier = user_tier("café", 5);
        let values: Vec<&str> = tier.iter().map(|c| c.as_str()).collect();
        assert_eq!(values, vec!["café", "cafÃ©"]);

        let repaired = user_tier("cafÃ©", 5);
        assert!(repaired.iter().any(|c| c.as_str() == "café"));
    }

    #[test]
    fn test_user_tier_variant_cap() {
        let tier = user_tier("  ünï  ", 5);
        assert!(tier.len() <= 6);
        let tier = user_tier("  ünï  ", 1);
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_filename_tokens() {
        let tokens = filename_tier("scans/invoice_march.pdf", 2024);
        assert_eq!(
            tokens,
            vec![
                "invoice_march",
                "invoice",
                "march",
                "invoice123",
                "invoice2024",
                "invoice2025",
                "march123",
                "march2024",
                "march2025",
            ]
        );
    }

    #[test]
    fn test_filename_short_segments_skipped() {
        let tokens = filename_tier("a-b-report.pdf", 2024);
        assert_eq!(tokens[0], "a-b-report");
        assert!(!tokens.iter().any(|t| t == "a" || t == "b"));
        assert!(tokens.iter().any(|t| t == "report123"));
    }

    #[test]
    fn test_numeric_tier_ascending_lengths() {
        let cfg = config();
        let digits: Vec<String> = numeric_tier(&cfg).collect();
        assert_eq!(digits.len(), 5 * cfg.numeric_samples_per_len);
        let lengths: Vec<usize> = digits.iter().map(String::len).collect();
        let mut sorted = lengths.clone();
        sorted.sort();
        assert_eq!(lengths, sorted);
        assert!(digits.iter().all(|d| d.bytes().all(|b| b.is_ascii_digit())));
    }

    #[test]
    fn test_tier_order() {
        let all = secrets(CandidateGenerator::new(
            &config(),
            Some("pw"),
            Some("invoice_march.pdf"),
        ));
        let order: Vec<CandidateSource> = all.iter().map(|(_, source)| *source).collect();
        let rank = |source: &CandidateSource| match source {
            CandidateSource::UserSupplied => 0,
            CandidateSource::Dictionary => 1,
            CandidateSource::FilenameDerived => 2,
            CandidateSource::NumericBruteForce => 3,
            CandidateSource::PatternBruteForce => 4,
        };
        assert!(order.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));
        assert_eq!(all.last().unwrap().0, "secret99");
    }

    #[test]
    fn test_no_duplicates() {
        let all = secrets(CandidateGenerator::new(&config(), Some("1234"), Some("1234.pdf")));
        let unique: HashSet<&String> = all.iter().map(|(secret, _)| secret).collect();
        assert_eq!(unique.len(), all.len());
        // "1234" is claimed by the user tier, not the dictionary.
        assert_eq!(all[0], ("1234".to_string(), CandidateSource::UserSupplied));
        assert!(!all
            .iter()
            .any(|(s, src)| s == "1234" && *src == CandidateSource::Dictionary));
    }

    #[test]
    fn test_debug_hides_secret() {
        let candidate = PasswordCandidate::new("topsecret", CandidateSource::Dictionary, 3);
        let rendered = format!("{candidate:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("ordinal: 3"));
    }

    proptest! {
        #[test]
        fn prop_sequence_is_deterministic(
            password in proptest::option::of("\\PC{0,12}"),
            filename in proptest::option::of("[a-zA-Z0-9 _.-]{0,24}"),
        ) {
            let cfg = config();
            let first: Vec<(String, CandidateSource, usize)> =
                CandidateGenerator::new(&cfg, password.as_deref(), filename.as_deref())
                    .map(|c| (c.as_str().to_string(), c.source(), c.ordinal()))
                    .collect();
            let second: Vec<(String, CandidateSource, usize)> =
                CandidateGenerator::new(&cfg, password.as_deref(), filename.as_deref())
                    .map(|c| (c.as_str().to_string(), c.source(), c.ordinal()))
                    .collect();
            prop_assert_eq!(&first, &second);
            for (index, (_, _, ordinal)) in first.iter().enumerate() {
                prop_assert_eq!(index, *ordinal);
            }
        }
    }
}
