//! Last-resort removal of the encryption dictionary from raw PDF bytes.
//!
//! Classic layout:
//! ```text
//! %PDF-1.x
//! ... objects ...
//! 7 0 obj << /Filter /Standard ... >> endobj
//! xref
//! 0 8
//! 0000000000 65535 f
//! ...
//! trailer
//! << /Root 1 0 R /Encrypt 7 0 R /Size 8 >>
//! startxref
//! OFFSET
//! %%EOF
//! ```
//!
//! With a cross-reference stream the trailer keys live in the dictionary of a
//! `/Type /XRef` stream object instead. That dictionary is never compressed,
//! only the stream data is.
//!
//! Every `/Encrypt` entry is overwritten with whitespace. In a classic table
//! the encryption object is blanked and its xref entry marked free; behind a
//! cross-reference stream the entry cannot be edited, so the object body is
//! replaced by `null` instead. Nothing moves, so every recorded byte offset
//! stays valid.

use crate::document::has_pdf_header;
use crate::error::ReconstructError;
use regex::bytes::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static TRAILER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)trailer\s*<<").expect("valid trailer regex"));

static XREF_STREAM_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Type\s*/XRef\b").expect("valid /XRef regex"));

static ENCRYPT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)/Encrypt\s*(\d+)\s+(\d+)\s+R").expect("valid /Encrypt regex")
});

static ENCRYPT_INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Encrypt\s*<<").expect("valid inline /Encrypt regex"));

static OBJECT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)(\d+)\s+(\d+)\s+obj").expect("valid object regex"));

static ENDOBJ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)endobj").expect("valid endobj regex"));

static XREF_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)(?:^|\s)(xref)\s").expect("valid xref regex"));

/// Object number and generation.
type ObjRef = (u32, u16);

/// Byte ranges of one top-level `N G obj ... endobj`.
struct ObjectSpan {
    whole: Range<usize>,
    /// Between `obj` and `endobj`.
    body: Range<usize>,
}

/// Return a copy of `raw` with the encryption dictionary excised.
///
/// The input is left untouched whatever the outcome.
pub fn excise_encryption(raw: &[u8]) -> Result<Vec<u8>, ReconstructError> {
    if !has_pdf_header(raw) {
        return Err(ReconstructError::NotPdf);
    }

    let mut dictionaries = trailer_dictionaries(raw)?;
    dictionaries.extend(xref_stream_dictionaries(raw));
    if dictionaries.is_empty() {
        return Err(ReconstructError::NoTrailer);
    }

    let mut output = raw.to_vec();
    let mut targets: Vec<ObjRef> = Vec::new();
    let mut found_entry = false;

    for trailer in &dictionaries {
        let dictionary = &raw[trailer.clone()];

        for captures in ENCRYPT_REF.captures_iter(dictionary) {
            let whole = captures.get(0).map(|m| m.range()).unwrap_or_default();
            let number = parse_number::<u32>(captures.get(1).map(|m| m.as_bytes()));
            let generation = parse_number::<u16>(captures.get(2).map(|m| m.as_bytes()));
            if let (Some(number), Some(generation)) = (number, generation) {
                if !targets.contains(&(number, generation)) {
                    targets.push((number, generation));
                }
            }
            blank(&mut output, shift(&whole, trailer.start));
            found_entry = true;
        }

        for key in ENCRYPT_INLINE.find_iter(dictionary) {
            let open = trailer.start + key.end() - 2;
            let end = dictionary_end(raw, open)?;
            blank(&mut output, trailer.start + key.start()..end);
            found_entry = true;
        }
    }

    if !found_entry {
        return Err(ReconstructError::NoEncryptEntry);
    }

    for &(number, generation) in &targets {
        let spans = object_spans(raw, number, generation);
        if spans.is_empty() {
            // Compressed into an object stream; the dangling object is harmless.
            log::debug!("encryption object {number} {generation} is not a top-level object");
            continue;
        }
        if free_xref_entry(&mut output, number) {
            for span in spans {
                blank(&mut output, span.whole);
            }
        } else {
            for span in spans {
                if !replace_with_null(&mut output, span.body) {
                    log::warn!("encryption object {number} {generation} too short to rewrite");
                }
            }
        }
    }

    Ok(output)
}

/// Dictionaries following each `trailer` keyword.
fn trailer_dictionaries(raw: &[u8]) -> Result<Vec<Range<usize>>, ReconstructError> {
    TRAILER
        .find_iter(raw)
        .map(|m| {
            let open = m.end() - 2;
            dictionary_end(raw, open).map(|end| open..end)
        })
        .collect()
}

/// Dictionaries of the `/Type /XRef` stream objects.
fn xref_stream_dictionaries(raw: &[u8]) -> Vec<Range<usize>> {
    let headers: Vec<usize> = OBJECT_HEADER.find_iter(raw).map(|m| m.end()).collect();
    let mut dictionaries: Vec<Range<usize>> = XREF_STREAM_TYPE
        .find_iter(raw)
        .filter_map(|m| {
            let index = headers.partition_point(|&end| end <= m.start());
            let header_end = *headers.get(index.checked_sub(1)?)?;
            let open = header_end
                + raw[header_end..]
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .count();
            if !raw[open..].starts_with(b"<<") {
                return None;
            }
            let end = dictionary_end(raw, open).ok()?;
            (m.start() < end).then_some(open..end)
        })
        .collect();
    dictionaries.dedup();
    dictionaries
}

fn parse_number<T: std::str::FromStr>(digits: Option<&[u8]>) -> Option<T> {
    std::str::from_utf8(digits?).ok()?.parse().ok()
}

fn shift(range: &Range<usize>, by: usize) -> Range<usize> {
    range.start + by..range.end + by
}

/// Overwrite a span with spaces, keeping line breaks.
fn blank(bytes: &mut [u8], span: Range<usize>) {
    for byte in &mut bytes[span] {
        if *byte != b'\n' && *byte != b'\r' {
            *byte = b' ';
        }
    }
}

/// Turn an object body into ` null ` padded with whitespace.
fn replace_with_null(bytes: &mut [u8], body: Range<usize>) -> bool {
    if body.len() < 6 {
        return false;
    }
    let start = body.start;
    blank(bytes, body);
    bytes[start..start + 6].copy_from_slice(b" null ");
    true
}

/// Index just past the `>>` matching the `<<` at `open`.
fn dictionary_end(bytes: &[u8], open: usize) -> Result<usize, ReconstructError> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'<' if bytes.get(i + 1) == Some(&b'<') => {
                depth += 1;
                i += 2;
            }
            b'>' if bytes.get(i + 1) == Some(&b'>') => {
                depth = depth.saturating_sub(1);
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            // Hex string.
            b'<' => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'>')
                    .map(|offset| i + offset + 1)
                    .ok_or(ReconstructError::Unbalanced(open))?;
            }
            b'(' => i = literal_string_end(bytes, i).ok_or(ReconstructError::Unbalanced(open))?,
            _ => i += 1,
        }
    }
    Err(ReconstructError::Unbalanced(open))
}

/// Index just past the `)` closing the literal string opened at `open`.
fn literal_string_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Every top-level `N G obj ... endobj` for the given reference.
fn object_spans(bytes: &[u8], number: u32, generation: u16) -> Vec<ObjectSpan> {
    OBJECT_HEADER
        .captures_iter(bytes)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            if whole.start() > 0 && !bytes[whole.start() - 1].is_ascii_whitespace() {
                return None;
            }
            let matches = parse_number::<u32>(captures.get(1).map(|m| m.as_bytes()))
                == Some(number)
                && parse_number::<u16>(captures.get(2).map(|m| m.as_bytes())) == Some(generation);
            if !matches {
                return None;
            }
            let endobj = ENDOBJ.find_at(bytes, whole.end())?;
            Some(ObjectSpan {
                whole: whole.start()..endobj.end(),
                body: whole.end()..endobj.start(),
            })
        })
        .collect()
}

/// Flip the `n` of object `number` to `f` in every classic xref section.
fn free_xref_entry(bytes: &mut [u8], number: u32) -> bool {
    let mut flips = Vec::new();

    for section in xref_keywords(bytes) {
        let mut cursor = section + 4;
        'subsections: loop {
            let Some(first) = next_token(bytes, &mut cursor) else {
                break;
            };
            let Some(start) = parse_number::<u32>(Some(&bytes[first.clone()])) else {
                break;
            };
            let Some(count) = next_token(bytes, &mut cursor)
                .and_then(|token| parse_number::<u32>(Some(&bytes[token])))
            else {
                break;
            };
            for index in 0..count {
                let (Some(_offset), Some(_generation), Some(kind)) = (
                    next_token(bytes, &mut cursor),
                    next_token(bytes, &mut cursor),
                    next_token(bytes, &mut cursor),
                ) else {
                    break 'subsections;
                };
                if start.checked_add(index) == Some(number) && &bytes[kind.clone()] == b"n" {
                    flips.push(kind.start);
                }
            }
        }
    }

    for &position in &flips {
        bytes[position] = b'f';
    }
    !flips.is_empty()
}

/// Offsets of `xref` keywords, excluding the tail of `startxref`.
fn xref_keywords(bytes: &[u8]) -> Vec<usize> {
    XREF_KEYWORD
        .captures_iter(bytes)
        .filter_map(|captures| captures.get(1).map(|m| m.start()))
        .collect()
}

fn next_token(bytes: &[u8], cursor: &mut usize) -> Option<Range<usize>> {
    while *cursor < bytes.len() && bytes[*cursor].is_ascii_whitespace() {
        *cursor += 1;
    }
    let start = *cursor;
    while *cursor < bytes.len() && !bytes[*cursor].is_ascii_whitespace() {
        *cursor += 1;
    }
    (start < *cursor).then_some(start..*cursor)
}
