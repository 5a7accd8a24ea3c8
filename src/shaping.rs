//! Flattens a parsed [`crate::tnef::Message`] tree into the caller-facing
//! [`ConvertedFile`] list: depth-first walk, deterministic naming, and
//! collision-safe file names.

use crate::tnef::{BodyFormat, Message};
use std::collections::HashSet;

/// Where a [`ConvertedFile`] came from in the message tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Body,
    Attachment,
    /// Any file belonging to a recursively-decoded embedded message,
    /// whether it is itself a body or an attachment of that sub-message.
    Embedded,
}

/// One extracted artifact of a [`crate::convert`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    pub name: String,
    pub data: Vec<u8>,
    pub category: Category,
    pub mime_hint: &'static str,
    pub kind_tag: &'static str,
}

/// Flatten `message` depth-first into the final file list.
pub fn flatten(message: &Message) -> Vec<ConvertedFile> {
    let mut used = HashSet::new();
    let mut out = Vec::new();
    flatten_node(message, "", Category::Body, 0, &mut used, &mut out);
    out
}

fn flatten_node(
    message: &Message,
    path_prefix: &str,
    category: Category,
    depth: u8,
    used: &mut HashSet<String>,
    out: &mut Vec<ConvertedFile>,
) {
    for variant in &message.body_variants {
        let ext = match variant.format {
            BodyFormat::Html => "html",
            BodyFormat::RtfRaw => "rtf",
            BodyFormat::Plain => "txt",
            // Never reaches this point: rtf_compressed is resolved into
            // html or rtf_raw before a message tree is flattened.
            BodyFormat::RtfCompressed => "rtf",
        };
        let name = unique_name(used, &format!("{path_prefix}body.{ext}"));
        out.push(ConvertedFile {
            name,
            data: variant.bytes.clone(),
            category,
            mime_hint: mime_hint_for_ext(ext),
            kind_tag: kind_tag_for_ext(ext),
        });
    }

    for (index, attachment) in message.attachments.iter().enumerate() {
        let raw_name = attachment
            .display_name()
            .map(sanitize_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("attachment_{}", index + 1));
        let name = unique_name(used, &format!("{path_prefix}{raw_name}"));
        let ext = extension_of(&name);

        if let Some(embedded) = &attachment.embedded_message {
            let sub_prefix = format!("{path_prefix}embedded_{depth}_{index}/");
            flatten_node(embedded, &sub_prefix, Category::Embedded, depth + 1, used, out);
        }

        out.push(ConvertedFile {
            name,
            data: attachment.bytes.clone(),
            category,
            mime_hint: mime_hint_for_ext(ext),
            kind_tag: kind_tag_for_ext(ext),
        });
    }
}

/// Strip path separators and control bytes, then cap the result to 255
/// bytes, per §4.I.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|&c| c != '/' && c != '\\')
        .filter(|&c| (c as u32) >= 0x20 && c as u32 != 0x7F)
        .collect();
    let mut truncated = cleaned;
    while truncated.len() > 255 {
        truncated.pop();
    }
    truncated
}

fn extension_of(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "",
    }
}

fn mime_hint_for_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn kind_tag_for_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "html",
        "txt" => "text",
        "rtf" => "rtf",
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "svg" => "image",
        "pdf" => "pdf",
        "doc" | "docx" | "odt" => "document",
        "xls" | "xlsx" | "ods" => "spreadsheet",
        _ => "file",
    }
}

/// Resolve `candidate` against `used`, appending `_2`, `_3`, ... before the
/// extension on collision, and record the chosen name.
fn unique_name(used: &mut HashSet<String>, candidate: &str) -> String {
    if used.insert(candidate.to_string()) {
        return candidate.to_string();
    }

    let (stem, ext) = match candidate.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (candidate, None),
    };

    let mut n = 2;
    loop {
        let attempt = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        if used.insert(attempt.clone()) {
            return attempt;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tnef::{Attachment, BodyEncoding, BodyVariant};

    fn msg_with_bodies(variants: Vec<(BodyFormat, &str)>) -> Message {
        let mut m = Message::default();
        m.body_variants = variants
            .into_iter()
            .map(|(format, text)| BodyVariant {
                format,
                encoding: BodyEncoding::Windows1252,
                bytes: text.as_bytes().to_vec(),
            })
            .collect();
        m
    }

    #[test]
    fn body_variants_get_distinct_extensions() {
        let message = msg_with_bodies(vec![(BodyFormat::Html, "<p>hi</p>"), (BodyFormat::Plain, "hi")]);
        let files = flatten(&message);
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"body.html"));
        assert!(names.contains(&"body.txt"));
    }

    #[test]
    fn empty_filename_is_synthesized() {
        let mut message = Message::default();
        message.attachments.push(Attachment {
            bytes: b"data".to_vec(),
            ..Default::default()
        });
        let files = flatten(&message);
        assert_eq!(files[0].name, "attachment_1");
    }

    #[test]
    fn colliding_names_get_suffixed() {
        let mut message = Message::default();
        for _ in 0..3 {
            message.attachments.push(Attachment {
                filename: Some("report.txt".to_string()),
                bytes: b"x".to_vec(),
                ..Default::default()
            });
        }
        let files = flatten(&message);
        let names: Vec<_> = files.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["report.txt", "report_2.txt", "report_3.txt"]);
    }

    #[test]
    fn embedded_attachment_files_are_prefixed_and_tagged() {
        let mut inner = Message::default();
        inner.attachments.push(Attachment {
            filename: Some("inner.txt".to_string()),
            bytes: b"nested".to_vec(),
            ..Default::default()
        });

        let mut outer = Message::default();
        outer.attachments.push(Attachment {
            filename: Some("msg.eml".to_string()),
            bytes: b"ignored, embedded_message wins".to_vec(),
            embedded_message: Some(Box::new(inner)),
            ..Default::default()
        });

        let files = flatten(&outer);
        let nested = files
            .iter()
            .find(|f| f.name == "embedded_0_0/inner.txt")
            .expect("nested attachment present with prefixed name");
        assert_eq!(nested.category, Category::Embedded);

        let outer_attachment = files.iter().find(|f| f.name == "msg.eml").unwrap();
        assert_eq!(outer_attachment.category, Category::Attachment);
    }

    #[test]
    fn path_separators_and_control_bytes_are_stripped() {
        let cleaned = sanitize_name("..\\..\\evil\u{7}.txt");
        assert!(!cleaned.contains('\\'));
        assert!(!cleaned.contains('/'));
        assert!(!cleaned.chars().any(|c| (c as u32) < 0x20));
    }
}
