//! The single gate every strategy output passes before it counts as unlocked.

use crate::error::{VerifyError, panic_message};
use lopdf::Document;
use std::panic::catch_unwind;

/// Facts established about an accepted output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedOutput {
    pub page_count: usize,
}

/// Re-parses candidate bytes from scratch; writer state is never trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputVerifier;

impl OutputVerifier {
    pub fn verify(&self, bytes: &[u8]) -> Result<VerifiedOutput, VerifyError> {
        if bytes.is_empty() {
            return Err(VerifyError::Empty);
        }

        let first = load(bytes)?;
        if first.is_encrypted()
            || first.encryption_state.is_some()
            || first.trailer.get(b"Encrypt").is_ok()
        {
            return Err(VerifyError::StillEncrypted);
        }
        let page_count = first.get_pages().len();
        if page_count == 0 {
            return Err(VerifyError::NoPages);
        }

        let second = load(bytes)?.get_pages().len();
        if second != page_count {
            return Err(VerifyError::Unstable {
                first: page_count,
                second,
            });
        }

        Ok(VerifiedOutput { page_count })
    }
}

fn load(bytes: &[u8]) -> Result<Document, VerifyError> {
    catch_unwind(|| Document::load_mem(bytes))
        .map_err(|payload| VerifyError::Unparseable(panic_message(payload)))?
        .map_err(|e| VerifyError::Unparseable(e.to_string()))
}
