//! Error and warning types for TNEF conversion.
//!
//! `ConvertError` covers the outer-framing failures that abort a parse
//! outright. Everything recoverable — a bad checksum, an unrecognized
//! attribute, a truncated embedded message — is reported as a
//! [`ConvertWarning`] instead and does not stop the conversion.

use thiserror::Error;

/// Errors that abort a [`crate::convert`] call entirely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The input's leading signature does not match the TNEF magic
    /// (`0x223E9F78`).
    #[error("not a TNEF stream")]
    NotTnef,

    /// The outer stream framing ended before a declared length was
    /// satisfied (signature, key, or an attribute header/body).
    #[error("truncated stream")]
    TruncatedStream,

    /// A compressed-RTF header's compression type field was neither
    /// `LZFu` nor `MELA`.
    #[error("unrecognized compressed-RTF magic: {0:?}")]
    UnknownLzfuMagic([u8; 4]),

    /// No registered decoder matched the input by magic or extension.
    #[error("no decoder registered for this input")]
    UnsupportedFormat,

    /// Parsing succeeded but produced zero artifacts.
    #[error("conversion produced no artifacts")]
    NoContent,
}

/// Result alias for fallible operations in this crate.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// A recoverable condition encountered during parsing.
///
/// Every warning is also emitted through `tracing` at the point it is
/// recorded, so a caller that does not inspect `ConvertOutcome::warnings`
/// still observes these through its log subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertWarning {
    /// An attribute's trailing checksum did not match the sum of its
    /// payload; the attribute was dropped.
    ChecksumMismatch {
        /// The TNEF attribute id/type word the checksum belonged to.
        attribute_id: u32,
    },
    /// The top-level attribute loop ended mid-attribute; attributes parsed
    /// so far are still returned.
    PartialStream,
    /// An embedded message nested past the recursion guard; its bytes were
    /// kept as an opaque attachment instead of being parsed further.
    DepthExceeded {
        /// Human-readable path identifying the offending node, e.g.
        /// `"embedded_1_0/embedded_2_0"`.
        path: String,
    },
    /// An attribute id was not recognized and was skipped (forward
    /// compatibility, not necessarily an error in the producing client).
    UnknownAttribute {
        /// The raw attribute id/type word.
        id: u32,
    },
    /// A LZFu payload's CRC32 did not match its declared header value.
    /// Decompression proceeded anyway (see `SPEC_FULL.md` §4.C).
    LzfuChecksumMismatch,
}
