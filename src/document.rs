//! In-memory view of an uploaded PDF and its protection.

use crate::candidates::PasswordCandidate;
use crate::error::{StrategyError, UnlockError, panic_message};
use flate2::read::ZlibDecoder;
use lopdf::encryption::DecryptionError;
use lopdf::{Document, Error as LopdfError, Object, ObjectId, Stream};
use regex::bytes::Regex;
use std::collections::HashSet;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

static PDF_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)%PDF-").expect("valid header regex"));

static STARTXREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)startxref").expect("valid startxref regex"));

/// Readers accept the header anywhere in the first kilobyte.
const HEADER_WINDOW: usize = 1024;

/// How far a document's protection reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionState {
    /// No encryption dictionary at all.
    None,
    /// Encrypted, but the empty user password opens it.
    OwnerOnly,
    /// Content cannot be read without a password.
    UserRequired,
    /// Encrypted with something the standard handler cannot judge.
    Unknown,
}

/// Raw upload plus its parsed object table.
///
/// The raw bytes are never modified; strategies that need a clean slate
/// re-parse them with [`EncryptedDocument::parse`].
#[derive(Debug)]
pub struct EncryptedDocument {
    raw: Arc<[u8]>,
    parsed: Document,
    state: EncryptionState,
    decrypted: Option<Document>,
}

impl EncryptedDocument {
    /// Parse raw bytes. Malformed input is reported, never panics.
    pub fn parse(bytes: &[u8]) -> Result<Self, UnlockError> {
        check_container_markers(bytes).map_err(UnlockError::Parse)?;

        let parsed = catch_unwind(|| Document::load_mem(bytes))
            .map_err(|payload| UnlockError::Parse(panic_message(payload)))?
            .map_err(|e| UnlockError::Parse(e.to_string()))?;

        let state = classify(&parsed);
        let mut document = Self {
            raw: Arc::from(bytes),
            parsed,
            state,
            decrypted: None,
        };

        // The loader opens empty-user-password files by itself, but some keep
        // their /Encrypt entry; decrypt those explicitly.
        if state == EncryptionState::OwnerOnly && document.parsed.is_encrypted() {
            document.decrypted = load_with_password(&document.raw, "");
        }

        Ok(document)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn encryption_state(&self) -> EncryptionState {
        self.state
    }

    /// True when page content cannot be read without a password.
    pub fn is_protected(&self) -> bool {
        self.state == EncryptionState::UserRequired
    }

    /// Cheap password check against the encryption dictionary, without
    /// decrypting any objects.
    pub fn authenticates(&self, candidate: &PasswordCandidate) -> bool {
        match self.state {
            EncryptionState::None | EncryptionState::OwnerOnly => true,
            EncryptionState::UserRequired => self
                .parsed
                .authenticate_password(candidate.as_str())
                .is_ok(),
            EncryptionState::Unknown => false,
        }
    }

    /// Apply a candidate. Returns whether the pages are now readable.
    ///
    /// Only the in-memory decryption context changes.
    pub fn decrypt(&mut self, candidate: Option<&PasswordCandidate>) -> bool {
        if self.readable().is_some() {
            return true;
        }
        let Some(candidate) = candidate else {
            return false;
        };
        if self.state == EncryptionState::UserRequired && !self.authenticates(candidate) {
            return false;
        }
        self.decrypted = load_with_password(&self.raw, candidate.as_str());
        self.decrypted.is_some()
    }

    /// The document whose objects are plain text, if there is one yet.
    fn readable(&self) -> Option<&Document> {
        if let Some(document) = &self.decrypted {
            return Some(document);
        }
        match self.state {
            EncryptionState::None | EncryptionState::OwnerOnly if !self.parsed.is_encrypted() => {
                Some(&self.parsed)
            }
            _ => None,
        }
    }

    /// Page numbers (1-based) of the readable document, in order.
    pub fn page_numbers(&self) -> Vec<u32> {
        self.readable()
            .map(|document| document.get_pages().into_keys().collect())
            .unwrap_or_default()
    }

    /// Pages whose content streams resolve and decode.
    pub fn readable_pages(&self) -> Vec<u32> {
        let Some(document) = self.readable() else {
            return Vec::new();
        };
        document
            .get_pages()
            .into_iter()
            .filter(|(_, page_id)| check_page(document, *page_id).is_ok())
            .map(|(number, _)| number)
            .collect()
    }

    /// Write an unencrypted PDF holding exactly `pages`, in document order.
    pub fn serialize(&self, pages: &[u32]) -> Result<Vec<u8>, StrategyError> {
        let document = self.readable().ok_or(StrategyError::NoPassword)?;
        if pages.is_empty() {
            return Err(StrategyError::NoPages);
        }

        let all_pages = document.get_pages();
        for &page in pages {
            let page_id = all_pages
                .get(&page)
                .ok_or(StrategyError::Unreadable { page })?;
            if let Err(reason) = check_page(document, *page_id) {
                log::debug!("page {page} unreadable: {reason}");
                return Err(StrategyError::Unreadable { page });
            }
        }

        let keep: HashSet<u32> = pages.iter().copied().collect();
        let mut output = document.clone();

        // Delete from the back so page numbers stay valid.
        let mut doomed: Vec<u32> = all_pages
            .keys()
            .copied()
            .filter(|page| !keep.contains(page))
            .collect();
        doomed.reverse();
        for page in doomed {
            output.delete_pages(&[page]);
        }

        output.trailer.remove(b"Encrypt");
        output.encryption_state = None;
        output.prune_objects();

        let mut buffer = Vec::new();
        output
            .save_to(&mut buffer)
            .map_err(|e| StrategyError::Serialize(e.to_string()))?;
        Ok(buffer)
    }
}

/// Rejects buffers that cannot be a complete PDF before the parser sees them.
pub(crate) fn check_container_markers(bytes: &[u8]) -> Result<(), String> {
    if !has_pdf_header(bytes) {
        return Err("missing %PDF- header".into());
    }
    if !STARTXREF.is_match(bytes) {
        return Err("missing startxref; file is truncated".into());
    }
    Ok(())
}

pub(crate) fn has_pdf_header(bytes: &[u8]) -> bool {
    PDF_HEADER.is_match(&bytes[..bytes.len().min(HEADER_WINDOW)])
}

fn classify(document: &Document) -> EncryptionState {
    if !document.is_encrypted() {
        return if document.encryption_state.is_some() {
            EncryptionState::OwnerOnly
        } else {
            EncryptionState::None
        };
    }
    if document.encryption_state.is_some() {
        return EncryptionState::OwnerOnly;
    }

    let Ok(dictionary) = document.get_encrypted() else {
        return EncryptionState::Unknown;
    };
    let standard = dictionary
        .get(b"Filter")
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Standard");
    let complete = [b"R".as_slice(), b"O", b"U"]
        .iter()
        .all(|key| dictionary.get(key).is_ok());
    if !standard || !complete {
        return EncryptionState::Unknown;
    }

    let empty_password = catch_unwind(AssertUnwindSafe(|| document.authenticate_password("")));
    match empty_password {
        Ok(Ok(())) => EncryptionState::OwnerOnly,
        Ok(Err(e)) if is_incorrect_password(&e) => EncryptionState::UserRequired,
        _ => EncryptionState::Unknown,
    }
}

pub(crate) fn is_incorrect_password(error: &LopdfError) -> bool {
    matches!(
        error,
        LopdfError::Decryption(DecryptionError::IncorrectPassword) | LopdfError::InvalidPassword
    )
}

fn load_with_password(raw: &[u8], password: &str) -> Option<Document> {
    match catch_unwind(|| Document::load_mem_with_password(raw, password)) {
        Ok(Ok(document)) if !document.is_encrypted() => Some(document),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            if !is_incorrect_password(&e) {
                log::debug!("decryption failed: {e}");
            }
            None
        }
        Err(payload) => {
            log::warn!("parser panicked while decrypting: {}", panic_message(payload));
            None
        }
    }
}

/// A page is readable when every content stream resolves and its
/// compression decodes.
pub(crate) fn check_page(document: &Document, page_id: ObjectId) -> Result<(), String> {
    let page = document
        .get_dictionary(page_id)
        .map_err(|e| format!("page object: {e}"))?;
    let Ok(contents) = page.get(b"Contents") else {
        return Ok(());
    };

    match contents {
        Object::Reference(id) => check_content_ref(document, *id),
        Object::Array(items) => items.iter().try_for_each(|item| {
            let id = item
                .as_reference()
                .map_err(|e| format!("/Contents entry: {e}"))?;
            check_content_ref(document, id)
        }),
        Object::Stream(stream) => decode_content(stream).map(|_| ()),
        _ => Err("/Contents is not a stream".into()),
    }
}

fn check_content_ref(document: &Document, id: ObjectId) -> Result<(), String> {
    let stream = document
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|e| format!("content stream {} {}: {e}", id.0, id.1))?;
    decode_content(stream).map(|_| ())
}

/// Undo the compression filters we can verify. Unknown filters pass through.
fn decode_content(stream: &Stream) -> Result<Vec<u8>, String> {
    let filters: Vec<Vec<u8>> = match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(names)) => names
            .iter()
            .filter_map(|name| name.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    };

    let mut data = stream.content.clone();
    for filter in filters {
        match filter.as_slice() {
            b"FlateDecode" | b"Fl" => {
                if data.is_empty() {
                    continue;
                }
                let mut output = Vec::with_capacity(data.len() * 2);
                ZlibDecoder::new(data.as_slice())
                    .read_to_end(&mut output)
                    .map_err(|e| format!("FlateDecode: {e}"))?;
                data = output;
            }
            b"LZWDecode" | b"LZW" => {
                let mut single = stream.clone();
                single.dict.set("Filter", Object::Name(filter.clone()));
                single.content = data;
                data = single
                    .decompressed_content()
                    .map_err(|e| format!("LZWDecode: {e}"))?;
            }
            _ => break,
        }
    }
    Ok(data)
}
