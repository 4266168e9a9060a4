//! Identifier hygiene for table, column and file names.
//!
//! Raw headers and upload names are user-controlled. Everything that ends up
//! in an object key or a query goes through [`clean_column_name`], whose output
//! only ever contains `[a-z0-9_]`, never starts with `_`, and is stable under
//! repeated cleaning.
//!
//! ```
//! use sluice::column_name::clean_column_name;
//!
//! assert_eq!(clean_column_name("Order Date (UTC)"), "order_date_utc_");
//! assert_eq!(clean_column_name("  Net-Amount"), "net_amount");
//! assert_eq!(clean_column_name("2024"), "invalid_2024");
//! ```

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static UNDERSCORE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("_{2,}").expect("valid underscore regex"));

const FALLBACK_PREFIX: &str = "invalid_";

/// Normalize a raw header string into a safe column identifier.
///
/// Lowercases, maps whitespace and `-`, `(`, `)` to `_`, drops every other
/// character outside `[a-z0-9_]`, collapses runs of `_` and strips leading
/// `_`. A result that is empty or made only of digits and underscores is
/// replaced by `invalid_<cleaned>`.
///
/// Distinct inputs can clean to the same name; callers that need unique
/// names must check for collisions (see [`dedupe_names`]).
#[must_use]
pub fn clean_column_name(raw: &str) -> String {
    let sanitized = sanitize(raw);
    if is_numeric_looking(&sanitized) {
        format!("{FALLBACK_PREFIX}{sanitized}")
    } else {
        sanitized
    }
}

/// Clean a table name. Tables follow the column rules.
#[must_use]
pub fn clean_table_name(raw: &str) -> String {
    clean_column_name(raw)
}

/// Extensions dropped from upload names, compared case-insensitively.
const FILE_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "txt", "gz", "gzip", "zst", "zstd", "bz2", "bzip2", "xz",
];

/// Clean an uploaded file name, dropping its text and compression extensions.
///
/// Other dots are kept as `_`, so `"sales.2023.csv"` and `"sales.2024.csv"`
/// stay distinct. `"Q3 Sales.csv.gz"` becomes `"q3_sales"`.
#[must_use]
pub fn clean_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let mut stem = base;
    while let Some((rest, ext)) = stem.rsplit_once('.')
        && !rest.is_empty()
        && FILE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known))
    {
        stem = rest;
    }
    clean_column_name(&stem.replace('.', "_"))
}

/// Make cleaned names unique by appending `_2`, `_3`, ... to repeats.
///
/// The first occurrence keeps its name. Generated names never collide with
/// a name that appears anywhere in the input.
#[must_use]
pub fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let originals: HashSet<String> = names.iter().cloned().collect();
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if used.insert(name.clone()) {
            out.push(name);
            continue;
        }
        let mut n = 2;
        let candidate = loop {
            let candidate = format!("{name}_{n}");
            if !used.contains(&candidate) && !originals.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            '-' | '(' | ')' | '_' => Some('_'),
            'a'..='z' | '0'..='9' => Some(c),
            _ => None,
        })
        .collect();
    UNDERSCORE_RUNS
        .replace_all(&mapped, "_")
        .trim_start_matches('_')
        .to_string()
}

fn is_numeric_looking(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit() || c == '_')
}
