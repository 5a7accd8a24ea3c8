//! Outer TNEF attribute stream parser and message/attachment model.
//!
//! Drives the attribute loop described by MS-OXTNEF: a `signature | key |
//! attributes...` framing where each attribute is tagged with a level
//! (message- or attachment-scoped) and an id that selects how its payload
//! is interpreted. This module owns the [`Message`]/[`Attachment`] value
//! types; [`crate::mapi`] decodes the MAPI property sub-format carried by a
//! handful of attribute ids, and [`crate::lzfu`]/[`crate::rtf_html`]
//! post-process compressed-RTF bodies into HTML or raw RTF.

use crate::cursor::Cursor;
use crate::error::{ConvertError, ConvertResult, ConvertWarning};
use crate::mapi::{self, Properties};
use smallvec::SmallVec;
use tracing::warn;

const TNEF_SIGNATURE: u32 = 0x223E_9F78;
const MAX_EMBED_DEPTH: u8 = 8;

const LVL_MESSAGE: u8 = 1;
const LVL_ATTACHMENT: u8 = 2;

// Attribute ids explicitly named by the spec this crate implements.
const ATT_MSG_PROPS: u32 = 0x0006_9003;
const ATT_BODY: u32 = 0x0000_8000;
const ATT_ATTACH_RENDDATA: u32 = 0x0006_9002;
const ATT_ATTACH_TITLE: u32 = 0x0001_8010;
const ATT_ATTACH_DATA: u32 = 0x0006_800F;
const ATT_ATTACHMENT: u32 = 0x0006_9005;

// Scalar message-level attributes. MS-OXTNEF does not assign these the
// same numeric family as the properties above in every edition; these
// values keep the component-type-in-high-word convention the spec's other
// constants use, picked to be collision-free with them (see DESIGN.md).
const ATT_SUBJECT: u32 = 0x0001_8004;
const ATT_DATE_SENT: u32 = 0x0003_8005;
const ATT_FROM: u32 = 0x0001_8009;
const ATT_MESSAGE_CLASS: u32 = 0x0007_8008;

/// Body content format, as received on the wire before any post-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Plain,
    Html,
    RtfRaw,
    RtfCompressed,
}

/// Text encoding a body variant's bytes were produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Codepage(u32),
    Windows1252,
    Unicode,
}

/// One body representation of a message.
#[derive(Debug, Clone)]
pub struct BodyVariant {
    pub format: BodyFormat,
    pub encoding: BodyEncoding,
    pub bytes: Vec<u8>,
}

/// Whether an attachment is referenced inline from a body's HTML (`cid:`) or
/// stands alone, per §3's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

/// An attachment to a [`Message`].
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub filename: Option<String>,
    pub short_filename: Option<String>,
    pub content_id: Option<String>,
    pub mime_tag: Option<String>,
    pub disposition: Disposition,
    pub bytes: Vec<u8>,
    pub embedded_message: Option<Box<Message>>,
    pub(crate) attach_method: Option<i32>,
}

impl Attachment {
    /// Preferred display name: long name wins over short, per §4.F.
    pub fn display_name(&self) -> Option<&str> {
        self.filename.as_deref().or(self.short_filename.as_deref())
    }
}

/// A parsed message node, possibly the root or an embedded message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
    pub message_class: Option<String>,
    pub body_variants: SmallVec<[BodyVariant; 4]>,
    pub attachments: Vec<Attachment>,
    pub codepage: Option<u32>,
}

impl Message {
    fn has_format(&self, fmt: BodyFormat) -> bool {
        self.body_variants.iter().any(|v| v.format == fmt)
    }
}

/// Parse a complete TNEF stream into a root [`Message`].
///
/// Returns the message alongside any recovered warnings. A bad signature or
/// a truncation before any attribute is read aborts with [`ConvertError`];
/// a truncation partway through the attribute loop instead returns the
/// attributes parsed so far with [`ConvertWarning::PartialStream`].
pub fn parse(bytes: &[u8]) -> ConvertResult<(Message, Vec<ConvertWarning>)> {
    let mut warnings = Vec::new();
    let message = parse_at_depth(bytes, 0, &mut warnings)?;
    Ok((message, warnings))
}

/// True if `bytes` begins with the TNEF signature, least effort way for
/// callers (notably the embedded-message check) to avoid a doomed parse.
pub fn looks_like_tnef(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == TNEF_SIGNATURE
}

fn parse_at_depth(bytes: &[u8], depth: u8, warnings: &mut Vec<ConvertWarning>) -> ConvertResult<Message> {
    let mut cursor = Cursor::new(bytes);
    let signature = cursor.read_u32_le()?;
    if signature != TNEF_SIGNATURE {
        return Err(ConvertError::NotTnef);
    }
    let _key = cursor.read_u16_le()?;

    let mut message = Message::default();
    let mut message_props = Properties::default();
    let mut current_attachment: Option<Attachment> = None;

    loop {
        if cursor.eof() {
            break;
        }
        let attr = match read_attribute(&mut cursor) {
            Ok(a) => a,
            Err(ConvertError::TruncatedStream) => {
                warn!("tnef stream truncated mid-attribute");
                warnings.push(ConvertWarning::PartialStream);
                break;
            }
            Err(e) => return Err(e),
        };

        let computed = crate::checksum::sum16(attr.data);
        if computed != attr.checksum {
            warn!(attribute_id = attr.id, declared = attr.checksum, computed, "attribute checksum mismatch");
            warnings.push(ConvertWarning::ChecksumMismatch { attribute_id: attr.id });
            continue;
        }

        match attr.level {
            LVL_MESSAGE => {
                apply_message_attribute(&attr, &mut message, &mut message_props, warnings);
            }
            LVL_ATTACHMENT => {
                apply_attachment_attribute(&attr, &mut current_attachment, &mut message.attachments, warnings);
            }
            other => {
                warn!(level = other, attribute_id = attr.id, "unknown attribute level, skipping");
                warnings.push(ConvertWarning::UnknownAttribute { id: attr.id });
            }
        }
    }

    if let Some(att) = current_attachment.take() {
        message.attachments.push(att);
    }

    message.codepage = message_props.codepage();
    finalize_message_properties(&mut message, &message_props);
    finalize_rtf_bodies(&mut message, warnings);
    resolve_embedded_messages(&mut message, depth, warnings);

    Ok(message)
}

struct RawAttribute<'a> {
    level: u8,
    id: u32,
    data: &'a [u8],
    checksum: u16,
}

fn read_attribute<'a>(cursor: &mut Cursor<'a>) -> ConvertResult<RawAttribute<'a>> {
    let level = cursor.read_u8()?;
    let id = cursor.read_u32_le()?;
    let length = cursor.read_u32_le()? as usize;
    let data = cursor.read_bytes(length)?;
    let checksum = cursor.read_u16_le()?;
    Ok(RawAttribute { level, id, data, checksum })
}

fn apply_message_attribute(
    attr: &RawAttribute<'_>,
    message: &mut Message,
    message_props: &mut Properties,
    warnings: &mut Vec<ConvertWarning>,
) {
    match attr.id {
        ATT_MSG_PROPS => match mapi::decode_properties(attr.data, warnings) {
            Ok(props) => message_props.merge(props),
            Err(_) => {
                warn!("failed to decode attMsgProps, skipping");
                warnings.push(ConvertWarning::UnknownAttribute { id: attr.id });
            }
        },
        ATT_BODY => message.body_variants.push(BodyVariant {
            format: BodyFormat::Plain,
            encoding: BodyEncoding::Windows1252,
            bytes: attr.data.to_vec(),
        }),
        ATT_SUBJECT => message.subject = Some(decode_scalar_string(attr.data)),
        ATT_FROM => message.from = Some(decode_scalar_string(attr.data)),
        ATT_DATE_SENT => message.date = decode_tnef_date(attr.data),
        ATT_MESSAGE_CLASS => message.message_class = Some(decode_scalar_string(attr.data)),
        _ => {
            warnings.push(ConvertWarning::UnknownAttribute { id: attr.id });
        }
    }
}

fn apply_attachment_attribute(
    attr: &RawAttribute<'_>,
    current: &mut Option<Attachment>,
    finished: &mut Vec<Attachment>,
    warnings: &mut Vec<ConvertWarning>,
) {
    if attr.id == ATT_ATTACH_RENDDATA {
        // A fresh attachment begins; the previous one (if any) is complete.
        if let Some(prev) = current.replace(Attachment::default()) {
            finished.push(prev);
        }
        return;
    }

    let Some(att) = current.as_mut() else {
        // Attachment-level attribute with no attAttachRenddata seen yet:
        // forward-compatible skip.
        warnings.push(ConvertWarning::UnknownAttribute { id: attr.id });
        return;
    };

    match attr.id {
        ATT_ATTACH_TITLE => att.short_filename = Some(decode_scalar_string(attr.data)),
        ATT_ATTACH_DATA => att.bytes = attr.data.to_vec(),
        ATT_ATTACHMENT => match mapi::decode_properties(attr.data, warnings) {
            Ok(props) => apply_attachment_properties(att, &props),
            Err(_) => {
                warn!("failed to decode attAttachment properties, skipping");
            }
        },
        _ => {
            warnings.push(ConvertWarning::UnknownAttribute { id: attr.id });
        }
    }
}

fn apply_attachment_properties(att: &mut Attachment, props: &Properties) {
    if let Some(name) = props.text(mapi::PR_ATTACH_LONG_FILENAME, None) {
        att.filename = Some(name);
    } else if att.filename.is_none() {
        if let Some(name) = props.text(mapi::PR_ATTACH_FILENAME, None) {
            att.filename = Some(name);
        }
    }
    if let Some(cid) = props.text(mapi::PR_ATTACH_CONTENT_ID, None) {
        att.content_id = Some(cid);
    }
    if let Some(mime) = props.text(mapi::PR_ATTACH_MIME_TAG, None) {
        att.mime_tag = Some(mime);
    }
    if let Some(data) = props.binary(mapi::PR_ATTACH_DATA) {
        if att.bytes.is_empty() {
            att.bytes = data.to_vec();
        }
    }
    att.attach_method = props.long(mapi::PR_ATTACH_METHOD);
}

fn decode_scalar_string(bytes: &[u8]) -> String {
    crate::codepage::decode_string8(bytes, None)
}

/// Decode the classic TNEF date structure: seven little-endian `u16`
/// fields — year, month, day, hour, minute, second, day-of-week.
fn decode_tnef_date(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 14 {
        return None;
    }
    let read = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    let (year, month, day, hour, minute, second) =
        (read(0), read(1), read(2), read(3), read(4), read(5));
    Some(format!(
        "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
    ))
}

fn finalize_message_properties(message: &mut Message, props: &Properties) {
    if let Some(subject) = props.text(mapi::PR_SUBJECT, message.codepage) {
        message.subject = Some(subject);
    }
    if let Some(class) = props.text(mapi::PR_MESSAGE_CLASS, message.codepage) {
        message.message_class = Some(class);
    }
    if let Some(body) = props.text(mapi::PR_BODY, message.codepage) {
        if !message.has_format(BodyFormat::Plain) {
            message.body_variants.push(BodyVariant {
                format: BodyFormat::Plain,
                encoding: codepage_encoding(message.codepage),
                bytes: body.into_bytes(),
            });
        }
    }
    if let Some(html) = props.binary(mapi::PR_BODY_HTML) {
        message.body_variants.push(BodyVariant {
            format: BodyFormat::Html,
            encoding: codepage_encoding(message.codepage),
            bytes: html.to_vec(),
        });
    }
    if let Some(compressed) = props.binary(mapi::PR_RTF_COMPRESSED) {
        message.body_variants.push(BodyVariant {
            format: BodyFormat::RtfCompressed,
            encoding: BodyEncoding::Unicode,
            bytes: compressed.to_vec(),
        });
    }
}

fn codepage_encoding(codepage: Option<u32>) -> BodyEncoding {
    match codepage {
        Some(cp) => BodyEncoding::Codepage(cp),
        None => BodyEncoding::Windows1252,
    }
}

/// Decompress any `rtf_compressed` variant and replace it with either the
/// recovered HTML (if `\fromhtml1` is present) or the raw decompressed RTF,
/// per §4.C/§4.D. A message never ends up with more than one variant per
/// format: an RTF-derived HTML body yields to an explicit `PR_BODY_HTML`
/// one that is already present.
fn finalize_rtf_bodies(message: &mut Message, warnings: &mut Vec<ConvertWarning>) {
    let compressed: Vec<Vec<u8>> = message
        .body_variants
        .iter()
        .filter(|v| v.format == BodyFormat::RtfCompressed)
        .map(|v| v.bytes.clone())
        .collect();
    message.body_variants.retain(|v| v.format != BodyFormat::RtfCompressed);

    for raw in compressed {
        let decompressed = match crate::lzfu::decompress(&raw, warnings) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to decompress rtf body, dropping");
                continue;
            }
        };

        if let Some(html) = crate::rtf_html::de_encapsulate(&decompressed) {
            if !message.has_format(BodyFormat::Html) {
                message.body_variants.push(BodyVariant {
                    format: BodyFormat::Html,
                    encoding: BodyEncoding::Unicode,
                    bytes: html,
                });
            }
        } else if !message.has_format(BodyFormat::RtfRaw) {
            message.body_variants.push(BodyVariant {
                format: BodyFormat::RtfRaw,
                encoding: BodyEncoding::Unicode,
                bytes: decompressed,
            });
        }
    }
}

fn resolve_embedded_messages(message: &mut Message, depth: u8, warnings: &mut Vec<ConvertWarning>) {
    let message_class_is_ipm = message
        .message_class
        .as_deref()
        .is_some_and(|c| c.starts_with("IPM."));

    for (index, att) in message.attachments.iter_mut().enumerate() {
        let is_embedded_method = att.attach_method == Some(0x0005);
        if !(is_embedded_method || message_class_is_ipm) {
            continue;
        }
        if !looks_like_tnef(&att.bytes) {
            continue;
        }
        if depth + 1 >= MAX_EMBED_DEPTH {
            warnings.push(ConvertWarning::DepthExceeded {
                path: format!("embedded_{depth}_{index}"),
            });
            continue;
        }
        match parse_at_depth(&att.bytes, depth + 1, warnings) {
            Ok(nested) => att.embedded_message = Some(Box::new(nested)),
            Err(e) => {
                warn!(error = %e, "embedded message failed to parse, keeping as opaque attachment");
            }
        }
    }
}
