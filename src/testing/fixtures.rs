//! Generated inputs for ingestion tests.

use crate::decoder::ByteDecoder;

const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Alan", "Edsger", "Barbara", "Ken", "Frances"];
const CITIES: &[&str] = &["London", "New York", "Zürich", "São Paulo", "Kyoto"];

/// Builder for delimited text fixtures.
///
/// # Example
///
/// ```
/// use sluice::testing::CsvFixture;
///
/// let csv = CsvFixture::new(&["id", "name"])
///     .row(&["1", "Ada"])
///     .row(&["2", "Grace"])
///     .build();
/// assert_eq!(csv, "id,name\n1,Ada\n2,Grace\n");
/// ```
#[derive(Debug, Clone)]
pub struct CsvFixture {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    delimiter: char,
    line_ending: &'static str,
}

impl CsvFixture {
    #[must_use]
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
            delimiter: ',',
            line_ending: "\n",
        }
    }

    /// `Name, Age, City` followed by `rows` generated people.
    #[must_use]
    pub fn people(rows: usize) -> Self {
        let mut fixture = Self::new(&["Name", " Age", " City"]);
        for i in 0..rows {
            let age = (20 + i % 50).to_string();
            fixture = fixture.row(&[
                FIRST_NAMES[i % FIRST_NAMES.len()],
                &age,
                CITIES[i % CITIES.len()],
            ]);
        }
        fixture
    }

    /// Append a row. Fields containing the delimiter, a quote or a line
    /// break are quoted.
    #[must_use]
    pub fn row(mut self, fields: &[&str]) -> Self {
        self.rows.push(fields.iter().map(ToString::to_string).collect());
        self
    }

    /// Replace row `index` (0-based, header excluded).
    ///
    /// # Panics
    ///
    /// Panics if there is no such row.
    #[must_use]
    pub fn replace_row(mut self, index: usize, fields: &[&str]) -> Self {
        self.rows[index] = fields.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn crlf(mut self) -> Self {
        self.line_ending = "\r\n";
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::new();
        for record in std::iter::once(&self.header).chain(&self.rows) {
            let fields: Vec<String> = record.iter().map(|f| self.quote(f)).collect();
            out.push_str(&fields.join(&self.delimiter.to_string()));
            out.push_str(self.line_ending);
        }
        out
    }

    fn quote(&self, field: &str) -> String {
        if field.contains([self.delimiter, '"', '\n', '\r']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }
}

/// Encode `text` with `decoder`, prefixed with its byte order mark when `bom` is set.
///
/// # Panics
///
/// Panics if `text` is not representable in the encoding.
#[must_use]
pub fn encode_text(decoder: ByteDecoder, text: &str, bom: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    if bom && let Some(mark) = decoder.bom() {
        out.extend_from_slice(mark);
    }
    for ch in text.chars() {
        decoder
            .encode_char(ch, &mut out)
            .unwrap_or_else(|e| panic!("{e} as {decoder}"));
    }
    out
}

/// Split `bytes` into chunks of `size` bytes. The last chunk may be shorter.
#[must_use]
pub fn chunked(bytes: &[u8], size: usize) -> Vec<&[u8]> {
    bytes.chunks(size.max(1)).collect()
}

/// Split `bytes` at the given offsets.
///
/// ```
/// use sluice::testing::split_at_offsets;
///
/// let parts = split_at_offsets(b"abcdef", &[2, 3]);
/// assert_eq!(parts, vec![&b"ab"[..], &b"c"[..], &b"def"[..]]);
/// ```
#[must_use]
pub fn split_at_offsets<'a>(bytes: &'a [u8], offsets: &[usize]) -> Vec<&'a [u8]> {
    let mut parts = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0;
    for &offset in offsets {
        let end = offset.clamp(start, bytes.len());
        parts.push(&bytes[start..end]);
        start = end;
    }
    parts.push(&bytes[start..]);
    parts
}
