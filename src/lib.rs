//! tnef-extract - a pure in-memory decoder for `winmail.dat`-style TNEF streams
//!
//! This crate turns a TNEF byte buffer produced by Microsoft Outlook/Exchange
//! into a flat list of extracted artifacts: the message body (in whichever
//! of plain/HTML/RTF formats it was carried in), named attachments, and
//! recursively nested embedded messages. Inline `cid:` image references in
//! HTML bodies are resolved against the attachment pool into self-contained
//! `data:` URIs; external `http(s)://` images can optionally be fetched and
//! inlined the same way, behind an SSRF-hardened fetch path.
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> Result<(), tnef_extract::ConvertError> {
//! let bytes = std::fs::read("winmail.dat").unwrap();
//! let outcome = tnef_extract::convert(&bytes)?;
//! for file in &outcome.files {
//!     println!("{} ({} bytes, {})", file.name, file.data.len(), file.kind_tag);
//! }
//! for warning in &outcome.warnings {
//!     eprintln!("recovered: {warning:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Scope
//!
//! This is the extraction core only: TNEF/MAPI parsing, LZFu decompression,
//! RTF-in-HTML de-encapsulation, and the image resolution pipeline. It does
//! not parse MIME envelopes, scan for malware, or persist anything; see
//! `DESIGN.md` for the full list of non-goals and how the ambient stack
//! (logging, errors, config-free operation) is wired up.

pub mod checksum;
pub mod codepage;
pub mod cursor;
pub mod error;
pub mod image_resolver;
pub mod lzfu;
pub mod mapi;
pub mod registry;
pub mod rtf_html;
pub mod shaping;
pub mod tnef;

use std::collections::{HashMap, HashSet};

pub use error::{ConvertError, ConvertResult, ConvertWarning};
pub use registry::{DecoderHandle, Registry};
pub use shaping::{Category, ConvertedFile};
pub use tnef::Disposition;

/// The result of a successful [`convert`] call.
///
/// `files` is always present, even when `warnings` is non-empty: a
/// `PartialStream` or `DepthExceeded` warning means the parse recovered from
/// something rather than producing nothing. A fully empty `files` on an
/// otherwise clean parse surfaces as [`ConvertError::NoContent`] instead.
#[derive(Debug, Clone, Default)]
pub struct ConvertOutcome {
    pub files: Vec<ConvertedFile>,
    pub warnings: Vec<ConvertWarning>,
}

/// Decode a TNEF byte buffer into its extracted artifacts.
///
/// This is the crate's single entry point (§6 operation 1): parses the outer
/// TNEF stream, resolves `cid:` image references against each message's own
/// attachment pool, and flattens the resulting tree into a linear,
/// name-deduplicated file list.
///
/// External image inlining (`http(s)://` sources) is not performed here —
/// that is always an explicit, separate step via [`inline_external_images`],
/// since it may perform network I/O. Callers that want both do:
///
/// ```no_run
/// # use std::collections::HashMap;
/// # fn main() -> Result<(), tnef_extract::ConvertError> {
/// # let bytes: &[u8] = &[];
/// let mut outcome = tnef_extract::convert(bytes)?;
/// let mut cache = HashMap::new();
/// for file in &mut outcome.files {
///     if file.kind_tag == "html" {
///         file.data = tnef_extract::inline_external_images(&file.data, &mut cache);
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// `convert` itself only ever decodes TNEF — [`Registry`]/[`detect`] exist
/// for a caller juggling more than one input format (e.g. the out-of-scope
/// HTTP server dispatching on a file name before it knows which decoder to
/// invoke); `convert` has no file name to go on, so it defers straight to
/// [`tnef::parse`], whose own signature check is what actually produces
/// [`ConvertError::NotTnef`].
pub fn convert(bytes: &[u8]) -> ConvertResult<ConvertOutcome> {
    let (mut message, mut warnings) = tnef::parse(bytes)?;
    resolve_inline_images(&mut message);

    let files = shaping::flatten(&message);
    if files.is_empty() {
        return Err(ConvertError::NoContent);
    }

    warnings.sort_by_key(warning_sort_key);
    Ok(ConvertOutcome { files, warnings })
}

/// A stable-ish ordering for display purposes; warnings carry no inherent
/// sequence since they are collected from an unordered recursive walk.
fn warning_sort_key(w: &ConvertWarning) -> u8 {
    match w {
        ConvertWarning::PartialStream => 0,
        ConvertWarning::ChecksumMismatch { .. } => 1,
        ConvertWarning::LzfuChecksumMismatch => 2,
        ConvertWarning::UnknownAttribute { .. } => 3,
        ConvertWarning::DepthExceeded { .. } => 4,
    }
}

/// Resolve `cid:` image references and mark attachment disposition for
/// `message` and every embedded message beneath it.
///
/// Each message node's HTML bodies are rewritten against *that node's own*
/// attachment pool, never a parent's or a sibling's — an embedded message is
/// a self-contained MIME-like unit (§4.G's "attachment pool of the enclosing
/// message").
fn resolve_inline_images(message: &mut tnef::Message) {
    let referenced = referenced_content_ids(message);

    let attachments: Vec<image_resolver::ImageAttachment<'_>> = message
        .attachments
        .iter()
        .filter_map(|a| {
            let content_id = a.content_id.as_deref()?;
            Some(image_resolver::ImageAttachment {
                content_id,
                mime_hint: a.mime_tag.as_deref().unwrap_or("application/octet-stream"),
                bytes: &a.bytes,
            })
        })
        .collect();

    for variant in message.body_variants.iter_mut() {
        if variant.format == tnef::BodyFormat::Html {
            variant.bytes = image_resolver::resolve_cid_images(&variant.bytes, &attachments);
        }
    }

    for attachment in message.attachments.iter_mut() {
        if let Some(cid) = attachment.content_id.as_deref() {
            if referenced.contains(&cid.to_ascii_lowercase()) {
                attachment.disposition = tnef::Disposition::Inline;
            }
        }
        if let Some(embedded) = attachment.embedded_message.as_mut() {
            resolve_inline_images(embedded);
        }
    }
}

fn referenced_content_ids(message: &tnef::Message) -> HashSet<String> {
    let mut set = HashSet::new();
    for variant in &message.body_variants {
        if variant.format == tnef::BodyFormat::Html {
            set.extend(image_resolver::referenced_cids(&variant.bytes));
        }
    }
    set
}

/// Detect which registered decoder recognizes `bytes` (§6 operation 2).
///
/// Exposed mainly so a caller assembling its own [`Registry`] (with
/// additional decoders beyond this crate's built-in TNEF one) can reuse the
/// same magic-then-extension rule this crate applies internally.
pub fn detect<'r>(registry: &'r Registry, name: &str, bytes: &[u8]) -> Option<&'r DecoderHandle> {
    registry.detect(name, bytes)
}

/// Register `decoder` into `registry` (§6 operation 4).
///
/// Process-init-time only, per §5/§6: `Registry` is an explicit value, not
/// global mutable state, so there is no re-entrancy hazard beyond the
/// ordinary one of mutating a value two callers both hold `&mut` to.
pub fn register(registry: &mut Registry, decoder: DecoderHandle) {
    registry.register(decoder);
}

/// Rewrite every external `http(s)://` `<img src>` in `html` into a `data:`
/// URI (§6 operation 3), behind the SSRF-hardened fetch path of
/// [`image_resolver`]. `cache` is caller-owned so repeated calls across a
/// session (or across the bodies of a single conversion) can reuse a fetch.
///
/// A no-op passthrough when the `external-images` feature is disabled.
#[cfg(feature = "external-images")]
pub fn inline_external_images(html: &[u8], cache: &mut HashMap<String, Option<String>>) -> Vec<u8> {
    image_resolver::inline_external_images(html, cache)
}

/// A no-op passthrough when the `external-images` feature is disabled: the
/// crate still compiles and `cid:` resolution still works, but no network
/// access is possible.
#[cfg(not(feature = "external-images"))]
pub fn inline_external_images(html: &[u8], _cache: &mut HashMap<String, Option<String>>) -> Vec<u8> {
    html.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(level: u8, id: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(level);
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&checksum::sum16(data).to_le_bytes());
        out
    }

    fn tnef_stream(attrs: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x223E_9F78u32.to_le_bytes());
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        for a in attrs {
            out.extend_from_slice(a);
        }
        out
    }

    #[test]
    fn non_tnef_input_is_rejected() {
        let err = convert(b"not a tnef stream at all").unwrap_err();
        assert_eq!(err, ConvertError::NotTnef);
    }

    #[test]
    fn minimal_attachment_converts() {
        let stream = tnef_stream(&[
            attribute(2, 0x0006_9002, &[]), // attAttachRenddata
            attribute(2, 0x0001_8010, b"hello.txt\0"), // attAttachTitle
            attribute(2, 0x0006_800F, b"hello\n"), // attAttachData
        ]);
        let outcome = convert(&stream).unwrap();
        assert_eq!(outcome.files.len(), 1);
        let file = &outcome.files[0];
        assert_eq!(file.name, "hello.txt");
        assert_eq!(file.data, b"hello\n");
        assert_eq!(file.category, Category::Attachment);
        assert_eq!(file.kind_tag, "text");
    }

    #[test]
    fn empty_stream_is_no_content() {
        let stream = tnef_stream(&[]);
        assert_eq!(convert(&stream).unwrap_err(), ConvertError::NoContent);
    }

    #[test]
    fn cid_image_is_resolved_and_attachment_still_listed_once() {
        use mapi::{PR_ATTACH_CONTENT_ID, PR_ATTACH_MIME_TAG};

        fn mapi_props(entries: &[(u16, &[u8])]) -> Vec<u8> {
            let mut data = Vec::new();
            data.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (tag, value) in entries {
                data.extend_from_slice(&0x001Eu16.to_le_bytes()); // String8
                data.extend_from_slice(&tag.to_le_bytes());
                data.extend_from_slice(&(value.len() as u32).to_le_bytes());
                data.extend_from_slice(value);
                let pad = (4 - (value.len() % 4)) % 4;
                data.extend(std::iter::repeat_n(0u8, pad));
            }
            data
        }

        let html = br#"<html><body><img src="cid:logo@x"></body></html>"#;
        let stream = tnef_stream(&[
            attribute(1, 0x0006_9003, &{
                // attMsgProps carrying PR_BODY_HTML as Binary
                let mut data = Vec::new();
                data.extend_from_slice(&1u32.to_le_bytes());
                data.extend_from_slice(&0x0102u16.to_le_bytes()); // Binary
                data.extend_from_slice(&mapi::PR_BODY_HTML.to_le_bytes());
                data.extend_from_slice(&(html.len() as u32).to_le_bytes());
                data.extend_from_slice(html);
                let pad = (4 - (html.len() % 4)) % 4;
                data.extend(std::iter::repeat_n(0u8, pad));
                data
            }),
            attribute(2, 0x0006_9002, &[]), // attAttachRenddata
            attribute(2, 0x0006_800F, b"\x89PNG\r\n"), // attAttachData
            attribute(
                2,
                0x0006_9005, // attAttachment
                &mapi_props(&[
                    (PR_ATTACH_CONTENT_ID, b"logo@x"),
                    (PR_ATTACH_MIME_TAG, b"image/png"),
                ]),
            ),
        ]);

        let outcome = convert(&stream).unwrap();
        let attachments: Vec<_> = outcome
            .files
            .iter()
            .filter(|f| f.category == Category::Attachment)
            .collect();
        assert_eq!(attachments.len(), 1, "attachment emitted exactly once");

        let body = outcome.files.iter().find(|f| f.name == "body.html").unwrap();
        let text = String::from_utf8(body.data.clone()).unwrap();
        assert!(text.contains("data:image/png;base64,"));
        assert!(!text.contains("cid:logo@x"));
    }

    /// `Disposition` never reaches `ConvertedFile` (it's dropped with the
    /// intermediate `Message`/`Attachment` tree per §3's lifecycle rule), so
    /// this exercises `resolve_inline_images` directly rather than through
    /// `convert`.
    #[test]
    fn referenced_attachment_is_marked_inline() {
        let mut message = tnef::Message::default();
        message.body_variants.push(tnef::BodyVariant {
            format: tnef::BodyFormat::Html,
            encoding: tnef::BodyEncoding::Unicode,
            bytes: br#"<img src="cid:Logo@X">"#.to_vec(),
        });
        message.attachments.push(tnef::Attachment {
            content_id: Some("logo@x".to_string()),
            bytes: b"\x89PNG".to_vec(),
            ..Default::default()
        });
        message.attachments.push(tnef::Attachment {
            content_id: Some("unreferenced@y".to_string()),
            bytes: b"other".to_vec(),
            ..Default::default()
        });

        resolve_inline_images(&mut message);

        assert_eq!(message.attachments[0].disposition, tnef::Disposition::Inline);
        assert_eq!(message.attachments[1].disposition, tnef::Disposition::Attachment);

        let html = std::str::from_utf8(&message.body_variants[0].bytes).unwrap();
        assert!(html.contains("data:application/octet-stream;base64,"));
    }
}
