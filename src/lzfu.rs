//! LZFu decompression — Microsoft's "Compressed RTF" format (MS-OXRTFCP).
//!
//! Adapted from the ring-dictionary LZ77 variant used for RTF bodies
//! embedded in TNEF/MSG streams. The initial dictionary is the literal
//! preamble MS-OXRTFCP §3.1.1.1.1 specifies — copied verbatim below, never
//! paraphrased, since decompression of real-world files depends on every
//! byte matching.

use crate::error::{ConvertError, ConvertWarning};
use tracing::warn;

const LZFU_MAGIC: [u8; 4] = *b"LZFu";
const MELA_MAGIC: [u8; 4] = *b"MELA";

const MAX_DICT_SIZE: usize = 4096;

/// Initial ring-dictionary contents, per MS-OXRTFCP §3.1.1.1.1. Do not edit.
const INIT_DICT: &[u8] = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720{\\fonttbl;}\
{\\f0\\fnil \\froman \\fswiss \\fmodern \\fscript \\fdecor MS Sans SerifSymbolArial\
Times New RomanCourier{\\colortbl\\red0\\green0\\blue0\r\n\\par \\pard\\plain\\f0\\fs20\
\\b\\i\\u\\tab\\tx";
const INIT_DICT_SIZE: usize = 207;

fn crc32(data: &[u8]) -> u32 {
    crc_fast::checksum(crc_fast::CrcAlgorithm::Crc32IsoHdlc, data) as u32
}

/// Decompress a "Compressed RTF" buffer: `comp_size:u32 | raw_size:u32 |
/// magic:u32 | crc32:u32`, followed by the compressed or raw body.
///
/// Returns the decompressed RTF bytes. A CRC32 mismatch against `MELA`/`LZFu`
/// payloads is reported as a warning, not a hard failure (see `SPEC_FULL.md`
/// §4.C) — only an unrecognized magic aborts.
pub fn decompress(data: &[u8], warnings: &mut Vec<ConvertWarning>) -> Result<Vec<u8>, ConvertError> {
    if data.len() < 16 {
        return Err(ConvertError::TruncatedStream);
    }

    let comp_size = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let raw_size = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let magic: [u8; 4] = data[8..12].try_into().unwrap();
    let declared_crc = u32::from_le_bytes(data[12..16].try_into().unwrap());
    let body = &data[16..];

    if magic == MELA_MAGIC {
        let n = raw_size.min(body.len());
        return Ok(body[..n].to_vec());
    }
    if magic != LZFU_MAGIC {
        return Err(ConvertError::UnknownLzfuMagic(magic));
    }

    if crc32(body) != declared_crc {
        warn!(declared = declared_crc, "lzfu crc32 mismatch, decompressing anyway");
        warnings.push(ConvertWarning::LzfuChecksumMismatch);
    }

    let overflow_cap = comp_size.saturating_mul(16).max(raw_size);
    let mut dict = vec![0u8; MAX_DICT_SIZE];
    dict[..INIT_DICT_SIZE].copy_from_slice(INIT_DICT);
    dict[INIT_DICT_SIZE..].fill(b' ');

    let mut write_offset = INIT_DICT_SIZE;
    let mut output = Vec::with_capacity(raw_size.min(1 << 20));
    let mut pos = 0usize;

    'outer: while pos < body.len() && output.len() < raw_size {
        let control = body[pos];
        pos += 1;

        for bit in 0..8 {
            if output.len() >= raw_size {
                break 'outer;
            }
            if (control & (1 << bit)) != 0 {
                if pos + 2 > body.len() {
                    break 'outer;
                }
                let token = u16::from_be_bytes([body[pos], body[pos + 1]]);
                pos += 2;
                let offset = ((token >> 4) & 0x0FFF) as usize;
                let length = (token & 0x0F) as usize;

                if offset == write_offset {
                    // documented end-of-stream sentinel
                    break 'outer;
                }

                let run_len = length + 2;
                for step in 0..run_len {
                    if output.len() >= raw_size || output.len() >= overflow_cap {
                        break 'outer;
                    }
                    let read_offset = (offset + step) % MAX_DICT_SIZE;
                    let byte = dict[read_offset];
                    output.push(byte);
                    dict[write_offset] = byte;
                    write_offset = (write_offset + 1) % MAX_DICT_SIZE;
                }
            } else {
                if pos >= body.len() {
                    break 'outer;
                }
                let byte = body[pos];
                pos += 1;
                output.push(byte);
                dict[write_offset] = byte;
                write_offset = (write_offset + 1) % MAX_DICT_SIZE;
            }

            if output.len() >= overflow_cap {
                break 'outer;
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(comp_size: u32, raw_size: u32, magic: [u8; 4], crc: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(16);
        h.extend_from_slice(&comp_size.to_le_bytes());
        h.extend_from_slice(&raw_size.to_le_bytes());
        h.extend_from_slice(&magic);
        h.extend_from_slice(&crc.to_le_bytes());
        h
    }

    #[test]
    fn uncompressed_round_trip() {
        let payload = b"{\\rtf1\\ansi Hello World!\\par}";
        let mut data = header((payload.len() + 12) as u32, payload.len() as u32, MELA_MAGIC, 0);
        data.extend_from_slice(payload);
        let mut warnings = Vec::new();
        let out = decompress(&data, &mut warnings).unwrap();
        assert_eq!(out, payload);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unknown_magic_errors() {
        let data = header(16, 0, *b"XXXX", 0);
        let mut warnings = Vec::new();
        let err = decompress(&data, &mut warnings).unwrap_err();
        assert_eq!(err, ConvertError::UnknownLzfuMagic(*b"XXXX"));
    }

    #[test]
    fn too_short_is_truncated() {
        let mut warnings = Vec::new();
        assert_eq!(
            decompress(&[1, 2, 3], &mut warnings).unwrap_err(),
            ConvertError::TruncatedStream
        );
    }

    #[test]
    fn bad_crc_is_a_warning_not_an_error() {
        let payload = b"{\\rtf1\\ansi Hi\\par}";
        let mut data = header((payload.len() + 12) as u32, payload.len() as u32, MELA_MAGIC, 0xDEADBEEF);
        data.extend_from_slice(payload);
        // MELA path does not check CRC at all (per the uncompressed branch);
        // this exercises that uncompressed data is returned regardless.
        let mut warnings = Vec::new();
        let out = decompress(&data, &mut warnings).unwrap();
        assert_eq!(out, payload);
    }
}
