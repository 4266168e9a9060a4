//! Byte-level character decoders.
//!
//! A [`ByteDecoder`] pulls one character at a time out of a raw byte buffer.
//! Decoders hold no state between calls: when a multi-byte sequence is cut
//! off by the end of the buffer they return [`Decoded::Incomplete`], and the
//! caller keeps the trailing bytes and retries from the same position once the
//! next chunk has arrived.
//!
//! ```
//! use sluice::decoder::{ByteDecoder, Decoded};
//!
//! let bytes = "a©".as_bytes();
//! let short = &bytes[..2];
//! assert_eq!(ByteDecoder::Utf8.get_char(short, 0).unwrap(), Decoded::Char { ch: 'a', width: 1 });
//! assert_eq!(ByteDecoder::Utf8.get_char(short, 1).unwrap(), Decoded::Incomplete);
//! assert_eq!(ByteDecoder::Utf8.get_char(bytes, 1).unwrap(), Decoded::Char { ch: '©', width: 2 });
//! ```

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A byte sequence that is not valid under the selected decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid byte 0x{byte:02x} at buffer offset {offset}")]
pub struct InvalidCharacter {
    /// The offending byte.
    pub byte: u8,
    /// Offset of the offending byte within the buffer passed to the decoder.
    pub offset: usize,
}

/// Outcome of a single decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// One character and the number of bytes it occupied.
    Char { ch: char, width: usize },
    /// The buffer ends before the character does. Not an error.
    Incomplete,
}

/// The supported input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteDecoder {
    #[serde(rename = "ascii")]
    Ascii,
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    Utf16Be,
}

const UTF8_BOM: &[u8] = &[0xef, 0xbb, 0xbf];
const UTF16_LE_BOM: &[u8] = &[0xff, 0xfe];
const UTF16_BE_BOM: &[u8] = &[0xfe, 0xff];

/// Longest byte order mark any decoder recognises.
pub const MAX_BOM_LEN: usize = 3;

impl ByteDecoder {
    /// Decode the character starting at `offset`.
    ///
    /// Never reads past `buf.len()` and never mutates `buf`. An `offset` at or
    /// beyond the end of the buffer (including any offset into an empty
    /// buffer) yields [`Decoded::Incomplete`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCharacter`] when the bytes at `offset` can never form a
    /// valid character, regardless of what follows.
    pub fn get_char(self, buf: &[u8], offset: usize) -> Result<Decoded, InvalidCharacter> {
        if offset >= buf.len() {
            return Ok(Decoded::Incomplete);
        }
        match self {
            Self::Ascii => decode_ascii(buf, offset),
            Self::Utf8 => decode_utf8(buf, offset),
            Self::Utf16Le => decode_utf16(buf, offset, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(buf, offset, u16::from_be_bytes),
        }
    }

    /// Append the encoded form of `ch` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Unencodable`] when this encoding cannot
    /// represent `ch` (only possible for ASCII).
    pub fn encode_char(self, ch: char, out: &mut Vec<u8>) -> crate::error::Result<()> {
        match self {
            Self::Ascii => {
                if !ch.is_ascii() {
                    return Err(IngestError::Unencodable(ch));
                }
                out.push(ch as u8);
            }
            Self::Utf8 => {
                let mut tmp = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
            }
            Self::Utf16Le | Self::Utf16Be => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units).iter() {
                    let bytes = if self == Self::Utf16Le {
                        unit.to_le_bytes()
                    } else {
                        unit.to_be_bytes()
                    };
                    out.extend_from_slice(&bytes);
                }
            }
        }
        Ok(())
    }

    /// The byte order mark for this encoding, if it has one.
    #[must_use]
    pub fn bom(self) -> Option<&'static [u8]> {
        match self {
            Self::Ascii => None,
            Self::Utf8 => Some(UTF8_BOM),
            Self::Utf16Le => Some(UTF16_LE_BOM),
            Self::Utf16Be => Some(UTF16_BE_BOM),
        }
    }

    /// Sniff the encoding from the first bytes of a file.
    ///
    /// Returns the detected decoder and the length of the byte order mark to
    /// skip. Without a recognised mark the input is assumed to be UTF-8.
    #[must_use]
    pub fn sniff(prefix: &[u8]) -> (Self, usize) {
        if prefix.starts_with(UTF8_BOM) {
            (Self::Utf8, UTF8_BOM.len())
        } else if prefix.starts_with(UTF16_LE_BOM) {
            (Self::Utf16Le, UTF16_LE_BOM.len())
        } else if prefix.starts_with(UTF16_BE_BOM) {
            (Self::Utf16Be, UTF16_BE_BOM.len())
        } else {
            (Self::Utf8, 0)
        }
    }

    /// Choose the decoder for a file given an optional configured encoding.
    ///
    /// A configured encoding wins over sniffing, but its own byte order mark is
    /// still skipped when present.
    #[must_use]
    pub fn resolve(configured: Option<Self>, prefix: &[u8]) -> (Self, usize) {
        match configured {
            None => Self::sniff(prefix),
            Some(dec) => {
                let skip = dec
                    .bom()
                    .filter(|bom| prefix.starts_with(bom))
                    .map_or(0, <[u8]>::len);
                (dec, skip)
            }
        }
    }

    /// Decode a complete buffer into a `String`.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid sequence, including one truncated by the end
    /// of the buffer.
    pub fn decode_all(self, buf: &[u8]) -> Result<String, InvalidCharacter> {
        let mut out = String::with_capacity(buf.len());
        let mut offset = 0;
        while offset < buf.len() {
            match self.get_char(buf, offset)? {
                Decoded::Char { ch, width } => {
                    out.push(ch);
                    offset += width;
                }
                Decoded::Incomplete => {
                    return Err(InvalidCharacter {
                        byte: buf[offset],
                        offset,
                    });
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for ByteDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ascii => "ascii",
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
        })
    }
}

impl FromStr for ByteDecoder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf16le" | "utf-16" => Ok(Self::Utf16Le),
            "utf-16be" | "utf16be" => Ok(Self::Utf16Be),
            other => Err(format!("unsupported encoding: {other}")),
        }
    }
}

fn decode_ascii(buf: &[u8], offset: usize) -> Result<Decoded, InvalidCharacter> {
    let byte = buf[offset];
    if byte.is_ascii() {
        Ok(Decoded::Char {
            ch: char::from(byte),
            width: 1,
        })
    } else {
        Err(InvalidCharacter { byte, offset })
    }
}

/// Sequence width announced by a UTF-8 lead byte, or `None` when the byte
/// cannot start a sequence.
const fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7f => Some(1),
        0xc2..=0xdf => Some(2),
        0xe0..=0xef => Some(3),
        0xf0..=0xf4 => Some(4),
        _ => None,
    }
}

fn decode_utf8(buf: &[u8], offset: usize) -> Result<Decoded, InvalidCharacter> {
    let lead = buf[offset];
    let width = utf8_width(lead).ok_or(InvalidCharacter { byte: lead, offset })?;
    if width == 1 {
        return Ok(Decoded::Char {
            ch: char::from(lead),
            width,
        });
    }

    // Reject a broken continuation as soon as it is visible, even when the
    // sequence is also truncated.
    let end = (offset + width).min(buf.len());
    if let Some(pos) = (offset + 1..end).find(|&i| buf[i] & 0xc0 != 0x80) {
        return Err(InvalidCharacter {
            byte: buf[pos],
            offset: pos,
        });
    }
    if offset + width > buf.len() {
        return Ok(Decoded::Incomplete);
    }

    // Overlong forms and surrogate code points pass the checks above.
    std::str::from_utf8(&buf[offset..offset + width])
        .ok()
        .and_then(|s| s.chars().next())
        .map(|ch| Decoded::Char { ch, width })
        .ok_or(InvalidCharacter { byte: lead, offset })
}

fn decode_utf16(
    buf: &[u8],
    offset: usize,
    unit_of: fn([u8; 2]) -> u16,
) -> Result<Decoded, InvalidCharacter> {
    let unit_at = |at: usize| -> Option<u16> {
        let bytes = buf.get(at..at + 2)?;
        Some(unit_of([bytes[0], bytes[1]]))
    };

    let Some(first) = unit_at(offset) else {
        return Ok(Decoded::Incomplete);
    };
    match first {
        0xd800..=0xdbff => {
            let Some(second) = unit_at(offset + 2) else {
                return Ok(Decoded::Incomplete);
            };
            if !(0xdc00..=0xdfff).contains(&second) {
                return Err(InvalidCharacter {
                    byte: buf[offset + 2],
                    offset: offset + 2,
                });
            }
            let cp = 0x10000 + ((u32::from(first) - 0xd800) << 10) + (u32::from(second) - 0xdc00);
            char::from_u32(cp)
                .map(|ch| Decoded::Char { ch, width: 4 })
                .ok_or(InvalidCharacter {
                    byte: buf[offset],
                    offset,
                })
        }
        0xdc00..=0xdfff => Err(InvalidCharacter {
            byte: buf[offset],
            offset,
        }),
        _ => char::from_u32(u32::from(first))
            .map(|ch| Decoded::Char { ch, width: 2 })
            .ok_or(InvalidCharacter {
                byte: buf[offset],
                offset,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_width_table() {
        assert_eq!(utf8_width(b'a'), Some(1));
        assert_eq!(utf8_width(0xc2), Some(2));
        assert_eq!(utf8_width(0xe2), Some(3));
        assert_eq!(utf8_width(0xf0), Some(4));
        assert_eq!(utf8_width(0x80), None);
        assert_eq!(utf8_width(0xc0), None);
        assert_eq!(utf8_width(0xf5), None);
    }

    #[test]
    fn resolve_skips_matching_bom_only() {
        let prefix = [0xef, 0xbb, 0xbf, b'a'];
        assert_eq!(ByteDecoder::resolve(None, &prefix), (ByteDecoder::Utf8, 3));
        assert_eq!(
            ByteDecoder::resolve(Some(ByteDecoder::Utf8), &prefix),
            (ByteDecoder::Utf8, 3)
        );
        assert_eq!(
            ByteDecoder::resolve(Some(ByteDecoder::Utf16Le), &prefix),
            (ByteDecoder::Utf16Le, 0)
        );
    }
}
