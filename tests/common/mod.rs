//! PDF fixtures built in memory with lopdf.
#![allow(dead_code)]

use lopdf::{
    Document, EncryptionState, EncryptionVersion, Object, Permissions, Stream, dictionary,
};

/// Owner password for every encrypted fixture. Absent from every
/// candidate tier.
pub const OWNER_PASSWORD: &str = "owner-secret-9f";

/// Marker text drawn on page `n`.
pub fn page_marker(n: u32) -> String {
    format!("(Page {n})")
}

/// A document with `pages` pages. Pages listed in `broken` get a
/// FlateDecode stream that does not decompress.
pub fn build_document(pages: u32, broken: &[u32]) -> Document {
    let mut doc = Document::with_version("1.5");
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String((1u8..=16).collect(), lopdf::StringFormat::Literal),
            Object::String((1u8..=16).rev().collect(), lopdf::StringFormat::Literal),
        ]),
    );

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let kids: Vec<Object> = (1..=pages)
        .map(|n| {
            let content = if broken.contains(&n) {
                Stream::new(
                    dictionary! { "Filter" => "FlateDecode" },
                    b"definitely not zlib".to_vec(),
                )
            } else {
                let text = format!("BT /F1 12 Tf 100 700 Td {} Tj ET", page_marker(n));
                Stream::new(dictionary! {}, text.into_bytes())
            };
            let content_id = doc.add_object(content);
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

pub fn save(mut doc: Document) -> Vec<u8> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

pub fn plain_pdf(pages: u32) -> Vec<u8> {
    save(build_document(pages, &[]))
}

/// RC4-128 encrypted document; an empty `user` password gives owner-only
/// protection.
pub fn encrypted_pdf(pages: u32, user: &str, broken: &[u32]) -> Vec<u8> {
    let mut doc = build_document(pages, broken);
    let version = EncryptionVersion::V2 {
        document: &doc,
        owner_password: OWNER_PASSWORD,
        user_password: user,
        key_length: 128,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version).unwrap();
    doc.encrypt(&state).unwrap();
    save(doc)
}

/// Unencrypted content behind a trailer `/Encrypt` entry naming a handler
/// nobody implements.
pub fn foreign_handler_pdf(pages: u32) -> Vec<u8> {
    let mut doc = build_document(pages, &[]);
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "VendorLock",
        "V" => 9,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    save(doc)
}

/// Decoded content of each page in `bytes`, in page order.
pub fn page_texts(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let content = doc.get_page_content(page_id).unwrap();
            String::from_utf8_lossy(&content).into_owned()
        })
        .collect()
}
