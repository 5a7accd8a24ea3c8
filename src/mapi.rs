//! MAPI property list decoder.
//!
//! Decodes the typed property-value list carried inside a TNEF `attMsgProps`
//! / `attAttachment` attribute (MS-OXTNEF §2.6). Every property is surfaced
//! by tag in a [`Properties`] map; [`crate::tnef`] consults the handful of
//! tags it cares about by name.

use crate::cursor::Cursor;
use crate::error::{ConvertResult, ConvertWarning};
use std::collections::HashMap;
use tracing::warn;

// Well-known property tags consulted by the TNEF parser.
pub const PR_MESSAGE_CLASS: u16 = 0x001A;
pub const PR_SUBJECT: u16 = 0x0037;
pub const PR_BODY: u16 = 0x1000;
pub const PR_RTF_COMPRESSED: u16 = 0x1009;
pub const PR_BODY_HTML: u16 = 0x1013;
pub const PR_DISPLAY_NAME: u16 = 0x3001;
pub const PR_MESSAGE_CODEPAGE: u16 = 0x3FFD;
pub const PR_ATTACH_DATA: u16 = 0x3701;
pub const PR_ATTACH_FILENAME: u16 = 0x3704;
pub const PR_ATTACH_METHOD: u16 = 0x3705;
pub const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
pub const PR_ATTACH_TRANSPORT_NAME: u16 = 0x370C;
pub const PR_ATTACH_MIME_TAG: u16 = 0x370E;
pub const PR_ATTACH_CONTENT_ID: u16 = 0x3712;

const ATTACH_METHOD_EMBEDDED_MESSAGE: i32 = 0x0005;

const TYPE_SHORT: u16 = 0x0002;
const TYPE_LONG: u16 = 0x0003;
const TYPE_FLOAT: u16 = 0x0004;
const TYPE_DOUBLE: u16 = 0x0005;
const TYPE_APPTIME: u16 = 0x0007;
const TYPE_BOOLEAN: u16 = 0x000B;
const TYPE_OBJECT: u16 = 0x000D;
const TYPE_I8: u16 = 0x0014;
const TYPE_STRING8: u16 = 0x001E;
const TYPE_UNICODE: u16 = 0x001F;
const TYPE_SYSTIME: u16 = 0x0040;
const TYPE_CLSID: u16 = 0x0048;
const TYPE_BINARY: u16 = 0x0102;
const MV_FLAG: u16 = 0x1000;

/// A single decoded MAPI property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Short(i16),
    Long(i32),
    Fixed8([u8; 8]),
    Boolean(bool),
    /// Raw `String8` bytes; decode with [`crate::codepage::decode_string8`]
    /// once the message's code page (if any) is known.
    String8(Vec<u8>),
    Unicode(String),
    Clsid([u8; 16]),
    Binary(Vec<u8>),
    MultiValue(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(b) => Some(b),
            PropertyValue::String8(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_unicode(&self) -> Option<&str> {
        match self {
            PropertyValue::Unicode(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string8_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::String8(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i32> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::Short(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Decode this value as text regardless of whether it was transported
    /// as `String8` (using `codepage`) or `Unicode`.
    pub fn as_text(&self, codepage: Option<u32>) -> Option<String> {
        match self {
            PropertyValue::Unicode(s) => Some(s.clone()),
            PropertyValue::String8(b) => Some(crate::codepage::decode_string8(b, codepage)),
            _ => None,
        }
    }
}

/// A parsed property list, keyed by MAPI tag.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<u16, PropertyValue>,
}

impl Properties {
    pub fn get(&self, tag: u16) -> Option<&PropertyValue> {
        self.values.get(&tag)
    }

    pub fn text(&self, tag: u16, codepage: Option<u32>) -> Option<String> {
        self.values.get(&tag).and_then(|v| v.as_text(codepage))
    }

    pub fn binary(&self, tag: u16) -> Option<&[u8]> {
        self.values.get(&tag).and_then(|v| v.as_binary())
    }

    pub fn long(&self, tag: u16) -> Option<i32> {
        self.values.get(&tag).and_then(|v| v.as_long())
    }

    /// The message code page, if the property list carried one.
    pub fn codepage(&self) -> Option<u32> {
        self.long(PR_MESSAGE_CODEPAGE).map(|v| v as u32)
    }

    /// True if this property list marks its owning attachment as an
    /// embedded message (`PR_ATTACH_METHOD == 0x0005`).
    pub fn is_embedded_message_method(&self) -> bool {
        self.long(PR_ATTACH_METHOD) == Some(ATTACH_METHOD_EMBEDDED_MESSAGE)
    }

    fn insert(&mut self, tag: u16, value: PropertyValue) {
        self.values.insert(tag, value);
    }

    /// Merge `other` into `self`, with `other`'s values winning on conflict.
    pub fn merge(&mut self, other: Properties) {
        self.values.extend(other.values);
    }
}

/// Decode a MAPI property list from `data` (the payload of an `attMsgProps`
/// or attachment `attAttachment` TNEF attribute: `count:u32` followed by
/// that many typed entries).
pub fn decode_properties(data: &[u8], warnings: &mut Vec<ConvertWarning>) -> ConvertResult<Properties> {
    let mut cursor = Cursor::new(data);
    let count = cursor.read_u32_le()?;
    let mut props = Properties::default();

    for _ in 0..count {
        match decode_one(&mut cursor) {
            Ok(Some((tag, value))) => props.insert(tag, value),
            Ok(None) => {}
            Err(_) => {
                // A single malformed entry is recovered locally: stop this
                // list rather than risk misreading everything after it,
                // since a bad type/size desynchronizes the cursor.
                warn!("malformed MAPI property entry, truncating list");
                warnings.push(ConvertWarning::PartialStream);
                break;
            }
        }
    }

    Ok(props)
}

fn decode_one(cursor: &mut Cursor<'_>) -> ConvertResult<Option<(u16, PropertyValue)>> {
    let type_code = cursor.read_u16_le()?;
    let tag = cursor.read_u16_le()?;

    if tag >= 0x8000 {
        skip_named_property_header(cursor)?;
    }

    let base_type = type_code & !MV_FLAG;
    let value = if type_code & MV_FLAG != 0 {
        let outer_count = cursor.read_u32_le()?;
        let mut items = Vec::with_capacity(outer_count.min(4096) as usize);
        for _ in 0..outer_count {
            items.push(decode_value(cursor, base_type)?);
        }
        PropertyValue::MultiValue(items)
    } else {
        decode_value(cursor, base_type)?
    };

    Ok(Some((tag, value)))
}

fn skip_named_property_header(cursor: &mut Cursor<'_>) -> ConvertResult<()> {
    cursor.skip(16)?; // name_guid
    let named_kind = cursor.read_u32_le()?;
    if named_kind == 0 {
        // numeric named property: a 4-byte dispatch id
        cursor.skip(4)?;
    } else {
        // string named property: length-prefixed UTF-16LE name, padded to 4
        let len = cursor.read_u32_le()? as usize;
        cursor.skip(len)?;
        skip_padding(cursor, len)?;
    }
    Ok(())
}

fn skip_padding(cursor: &mut Cursor<'_>, count: usize) -> ConvertResult<()> {
    let pad = (4 - (count % 4)) % 4;
    if pad > 0 {
        cursor.skip(pad)?;
    }
    Ok(())
}

fn decode_value(cursor: &mut Cursor<'_>, base_type: u16) -> ConvertResult<PropertyValue> {
    match base_type {
        TYPE_SHORT => {
            let raw = cursor.read_u32_le()?; // 4 bytes, padded
            Ok(PropertyValue::Short(raw as i16))
        }
        TYPE_LONG => Ok(PropertyValue::Long(cursor.read_u32_le()? as i32)),
        TYPE_FLOAT | TYPE_DOUBLE | TYPE_APPTIME | TYPE_I8 | TYPE_SYSTIME => {
            let bytes = cursor.read_bytes(8)?;
            let mut fixed = [0u8; 8];
            fixed.copy_from_slice(bytes);
            Ok(PropertyValue::Fixed8(fixed))
        }
        TYPE_BOOLEAN => {
            let raw = cursor.read_u32_le()?;
            Ok(PropertyValue::Boolean(raw & 0xFF != 0))
        }
        TYPE_STRING8 => {
            let count = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(count)?.to_vec();
            skip_padding(cursor, count)?;
            Ok(PropertyValue::String8(bytes))
        }
        TYPE_UNICODE => {
            let count = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(count)?;
            let text = crate::codepage::decode_unicode(bytes);
            skip_padding(cursor, count)?;
            Ok(PropertyValue::Unicode(text))
        }
        TYPE_CLSID => {
            let bytes = cursor.read_bytes(16)?;
            let mut fixed = [0u8; 16];
            fixed.copy_from_slice(bytes);
            Ok(PropertyValue::Clsid(fixed))
        }
        TYPE_BINARY | TYPE_OBJECT => {
            let count = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(count)?.to_vec();
            skip_padding(cursor, count)?;
            Ok(PropertyValue::Binary(bytes))
        }
        other => {
            warn!(type_code = other, "unrecognized MAPI property type");
            Err(crate::error::ConvertError::TruncatedStream)
        }
    }
}
