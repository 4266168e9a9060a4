//! Transparent decompression of uploaded inputs.
//!
//! Clients sometimes upload compressed files under a plain `.csv` key, so
//! detection looks at the key extension first and falls back to the magic
//! bytes at the start of the stream.
//!
//! | Codec | Extensions | Feature |
//! |-------|-----------|---------|
//! | gzip  | `.gz`, `.gzip` | `compression-gzip` |
//! | zstd  | `.zst`, `.zstd` | `compression-zstd` |
//! | bzip2 | `.bz2`, `.bzip2` | `compression-bzip2` |
//! | xz    | `.xz` | `compression-xz` |
//!
//! A codec whose feature is disabled is still detected, and opening it fails
//! with an `Unsupported` I/O error instead of feeding compressed bytes to the
//! text decoder.

use std::io::{BufRead, BufReader, Read};

/// Compression applied to an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCompression {
    None,
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

const CODECS: &[InputCompression] = &[
    InputCompression::Gzip,
    InputCompression::Zstd,
    InputCompression::Bzip2,
    InputCompression::Xz,
];

impl InputCompression {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Gzip => &[".gz", ".gzip"],
            Self::Zstd => &[".zst", ".zstd"],
            Self::Bzip2 => &[".bz2", ".bzip2"],
            Self::Xz => &[".xz"],
        }
    }

    fn matches_magic(self, prefix: &[u8]) -> bool {
        match self {
            Self::None => false,
            Self::Gzip => prefix.starts_with(&[0x1f, 0x8b]),
            Self::Zstd => prefix.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]),
            // `BZh` is plain text, so also require the block size digit and
            // a block or end-of-stream magic.
            Self::Bzip2 => {
                prefix.len() >= 10
                    && prefix.starts_with(b"BZh")
                    && (b'1'..=b'9').contains(&prefix[3])
                    && matches!(&prefix[4..10], b"1AY&SY" | b"\x17rE8P\x90")
            }
            Self::Xz => prefix.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
        }
    }

    /// Detect a codec from an object key's extension.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        let key = key.to_ascii_lowercase();
        CODECS
            .iter()
            .copied()
            .find(|codec| codec.extensions().iter().any(|ext| key.ends_with(ext)))
            .unwrap_or(Self::None)
    }

    /// Detect a codec from the first bytes of a stream.
    #[must_use]
    pub fn from_magic(prefix: &[u8]) -> Self {
        CODECS
            .iter()
            .copied()
            .find(|codec| codec.matches_magic(prefix))
            .unwrap_or(Self::None)
    }

    fn wrap(self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        match self {
            Self::None => Ok(reader),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => {
                zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
            }
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2 => Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader))),
            #[cfg(feature = "compression-xz")]
            Self::Xz => Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader))),
            #[allow(unreachable_patterns)]
            other => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("{} input support is not compiled in", other.name()),
            )),
        }
    }
}

/// Wrap `reader` with a decompressor when the key or content says so.
///
/// Returns the reader along with the detected codec.
///
/// # Errors
///
/// Returns an error if peeking at the stream fails or the detected codec is
/// not compiled in.
pub fn decompress_reader(
    reader: Box<dyn Read + Send>,
    key: &str,
) -> std::io::Result<(Box<dyn Read + Send>, InputCompression)> {
    let by_key = InputCompression::from_key(key);
    if by_key != InputCompression::None {
        return by_key.wrap(reader).map(|r| (r, by_key));
    }

    let mut buffered = BufReader::new(reader);
    let by_magic = InputCompression::from_magic(buffered.fill_buf()?);
    by_magic.wrap(Box::new(buffered)).map(|r| (r, by_magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension_case_insensitively() {
        assert_eq!(InputCompression::from_key("a/b/data.CSV.GZ"), InputCompression::Gzip);
        assert_eq!(InputCompression::from_key("data.csv.zst"), InputCompression::Zstd);
        assert_eq!(InputCompression::from_key("data.csv"), InputCompression::None);
    }

    #[test]
    fn detects_by_magic() {
        assert_eq!(InputCompression::from_magic(&[0x1f, 0x8b, 0x08]), InputCompression::Gzip);
        assert_eq!(InputCompression::from_magic(b"name,age\n"), InputCompression::None);
        assert_eq!(InputCompression::from_magic(&[]), InputCompression::None);
    }

    #[test]
    fn bzip2_magic_needs_block_header() {
        assert_eq!(InputCompression::from_magic(b"BZh91AY&SY\x00"), InputCompression::Bzip2);
        assert_eq!(InputCompression::from_magic(b"BZhours,id\n1,2\n"), InputCompression::None);
        assert_eq!(InputCompression::from_magic(b"BZh9"), InputCompression::None);
    }
}
