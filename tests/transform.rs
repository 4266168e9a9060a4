//! Tests for the streaming file transformer.

use sluice::decoder::ByteDecoder;
use sluice::error::IngestError;
use sluice::field_type::FieldType;
use sluice::testing::*;
use sluice::transform::{
    FileInformation, FileTarget, FileTransformer, Row, TransformState, transform_reader,
};
use sluice::IngestConfig;
use std::sync::{Arc, Mutex};

fn target(file_name: &str) -> FileTarget {
    FileTarget {
        file_name: file_name.to_string(),
        table_name: "People Table".to_string(),
        output_directory: "client/ws/proj/columnar/people_table/".to_string(),
    }
}

fn run_chunks(
    chunks: &[&[u8]],
    config: &IngestConfig,
) -> sluice::Result<(FileInformation, Vec<Row>)> {
    let mut transformer = FileTransformer::new(target("people.csv"), config);
    let mut rows: Vec<Row> = Vec::new();
    for chunk in chunks {
        transformer.push_chunk(chunk, &mut rows)?;
    }
    let info = transformer.finish(&mut rows)?;
    Ok((info, rows))
}

fn run(bytes: &[u8], chunk_size: usize) -> sluice::Result<(FileInformation, Vec<Row>)> {
    run_chunks(&chunked(bytes, chunk_size), &IngestConfig::default())
}

fn cell(row: &Row, i: usize) -> Option<&str> {
    row.values[i].as_deref()
}

#[test]
fn test_hundred_rows_with_one_short_row() -> anyhow::Result<()> {
    let csv = CsvFixture::people(100).replace_row(41, &["Ada", "33"]).build();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    let mut transformer = FileTransformer::new(target("people.csv"), &IngestConfig::default())
        .on_error(Box::new(move |e: &IngestError| {
            seen.lock().unwrap().push(e.to_string());
        }));
    let mut rows: Vec<Row> = Vec::new();
    for chunk in chunked(csv.as_bytes(), 13) {
        transformer.push_chunk(chunk, &mut rows)?;
    }
    assert_eq!(transformer.state(), TransformState::StreamingRows);
    let info = transformer.finish(&mut rows)?;
    assert!(errors.lock().unwrap().is_empty());

    assert_eq!(info.number_of_rows, 100);
    assert_eq!(info.number_of_columns, 3);
    assert_eq!(info.padded_rows, 1);
    assert_eq!(info.truncated_rows, 0);
    assert!(info.is_degraded());
    assert_columns(
        &info,
        &[
            ("name", FieldType::String),
            ("age", FieldType::Integer),
            ("city", FieldType::String),
        ],
    );
    let raw: Vec<&str> = info.columns.iter().map(|c| c.raw_name.as_str()).collect();
    assert_eq!(raw, vec!["Name", "Age", "City"]);

    assert_eq!(rows.len(), 100);
    assert_eq!(rows[41].values.len(), 3);
    assert_eq!(cell(&rows[41], 1), Some("33"));
    assert_eq!(cell(&rows[41], 2), None);
    Ok(())
}

#[test]
fn test_long_row_is_truncated() -> anyhow::Result<()> {
    let (info, rows) = run(b"a,b\n1,2,3,4\n5,6\n", 64)?;
    assert_eq!(info.number_of_rows, 2);
    assert_eq!(info.truncated_rows, 1);
    assert_eq!(info.padded_rows, 0);
    assert_eq!(rows[0].values, vec![Some("1".to_string()), Some("2".to_string())]);
    Ok(())
}

#[test]
fn test_rows_keep_input_order_under_any_chunking() -> anyhow::Result<()> {
    let csv = CsvFixture::people(25).build();
    let (reference, reference_rows) = run(csv.as_bytes(), csv.len())?;
    for size in [1, 2, 3, 5, 8, 64] {
        let (info, rows) = run(csv.as_bytes(), size)?;
        assert_eq!(info, reference, "chunk size {size}");
        assert_eq!(rows, reference_rows, "chunk size {size}");
    }
    let indices: Vec<u64> = reference_rows.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..25).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_character_split_across_chunks() -> anyhow::Result<()> {
    let bytes = "city\nZürich\nSão Paulo\n".as_bytes();
    // 'ü' starts at byte 6
    let parts = split_at_offsets(bytes, &[6, 7]);
    let (info, rows) = run_chunks(&parts, &IngestConfig::default())?;
    assert_eq!(info.number_of_rows, 2);
    assert_eq!(cell(&rows[0], 0), Some("Zürich"));
    assert_eq!(cell(&rows[1], 0), Some("São Paulo"));
    Ok(())
}

#[test]
fn test_invalid_byte_is_fatal() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&errors);
    let mut transformer = FileTransformer::new(target("bad.csv"), &IngestConfig::default())
        .on_error(Box::new(move |e: &IngestError| {
            seen.lock().unwrap().push(e.to_string());
        }));
    let mut rows: Vec<Row> = Vec::new();

    let err = transformer
        .push_chunk(b"a,b\n1,\xff\n", &mut rows)
        .unwrap_err();
    match err {
        IngestError::InvalidCharacter { byte, offset, row } => {
            assert_eq!(byte, 0xff);
            assert_eq!(offset, 6);
            assert_eq!(row, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transformer.state(), TransformState::Failed);
    assert_eq!(errors.lock().unwrap().len(), 1);

    assert!(matches!(
        transformer.push_chunk(b"2,3\n", &mut rows),
        Err(IngestError::TransformerClosed(_))
    ));
    assert!(matches!(
        transformer.finish(&mut rows),
        Err(IngestError::TransformerClosed(_))
    ));
    assert!(rows.is_empty());
}

#[test]
fn test_input_ending_mid_character_is_fatal() {
    let err = run(b"a\nb\xc3", 64).unwrap_err();
    assert!(matches!(
        err,
        IngestError::InvalidCharacter { byte: 0xc3, offset: 3, row: 2 }
    ));
}

#[test]
fn test_ascii_rejects_non_ascii() {
    let config = IngestConfig {
        encoding: Some(ByteDecoder::Ascii),
        ..Default::default()
    };
    let err = run_chunks(&["id\nZürich\n".as_bytes()], &config).unwrap_err();
    assert!(err.is_decode_error());
}

#[test]
fn test_utf16_with_bom_matches_utf8() -> anyhow::Result<()> {
    let csv = CsvFixture::new(&["Name", "Note"])
        .row(&["Ada", "smile 😀"])
        .row(&["Grace", "naïve, \"quoted\""])
        .build();
    let (utf8_info, utf8_rows) = run(csv.as_bytes(), 64)?;

    for decoder in [ByteDecoder::Utf16Le, ByteDecoder::Utf16Be] {
        let bytes = encode_text(decoder, &csv, true);
        for size in [1, 3, 64] {
            let (info, rows) = run(&bytes, size)?;
            assert_eq!(info.encoding, decoder);
            assert_eq!(info.columns, utf8_info.columns);
            assert_eq!(rows, utf8_rows, "{decoder} chunk size {size}");
        }
    }
    Ok(())
}

#[test]
fn test_utf8_bom_is_skipped() -> anyhow::Result<()> {
    let bytes = encode_text(ByteDecoder::Utf8, "id,name\n1,Ada\n", true);
    let (info, _) = run(&bytes, 1)?;
    assert_eq!(info.columns[0].name, "id");
    assert_eq!(info.columns[0].raw_name, "id");
    assert_eq!(info.file_size_bytes, bytes.len() as u64);
    Ok(())
}

#[test]
fn test_configured_encoding_skips_its_own_bom() -> anyhow::Result<()> {
    let config = IngestConfig {
        encoding: Some(ByteDecoder::Utf16Be),
        ..Default::default()
    };
    let with_bom = encode_text(ByteDecoder::Utf16Be, "x\n1\n", true);
    let without_bom = encode_text(ByteDecoder::Utf16Be, "x\n1\n", false);
    let (a, _) = run_chunks(&[with_bom.as_slice()], &config)?;
    let (b, _) = run_chunks(&[without_bom.as_slice()], &config)?;
    assert_eq!(a.columns, b.columns);
    assert_eq!(a.number_of_rows, 1);
    Ok(())
}

#[test]
fn test_quoting_and_custom_delimiter() -> anyhow::Result<()> {
    let config = IngestConfig {
        delimiter: ';',
        ..Default::default()
    };
    let csv = CsvFixture::new(&["id", "comment"])
        .delimiter(';')
        .crlf()
        .row(&["1", "multi\nline; with delimiter"])
        .row(&["2", ""])
        .build();
    let (info, rows) = run_chunks(&chunked(csv.as_bytes(), 4), &config)?;
    assert_eq!(info.number_of_rows, 2);
    assert_eq!(cell(&rows[0], 1), Some("multi\nline; with delimiter"));
    assert_eq!(cell(&rows[1], 1), None);
    assert_eq!(info.padded_rows + info.truncated_rows, 0);
    Ok(())
}

#[test]
fn test_duplicate_headers_are_deduplicated() -> anyhow::Result<()> {
    let (info, _) = run(b"Amount,amount,AMOUNT,Total\n1,2,3,4\n", 64)?;
    let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["amount", "amount_2", "amount_3", "total"]);
    Ok(())
}

#[test]
fn test_last_row_without_newline() -> anyhow::Result<()> {
    let (info, rows) = run(b"a,b\n1,2\n3,4", 3)?;
    assert_eq!(info.number_of_rows, 2);
    assert_eq!(cell(&rows[1], 1), Some("4"));
    Ok(())
}

#[test]
fn test_empty_and_header_only_inputs() -> anyhow::Result<()> {
    let (empty, rows) = run(b"", 16)?;
    assert_eq!(empty.number_of_rows, 0);
    assert_eq!(empty.number_of_columns, 0);
    assert!(rows.is_empty());

    let (header_only, _) = run(b"Name, Age\n", 16)?;
    assert_eq!(header_only.number_of_rows, 0);
    assert_columns(
        &header_only,
        &[("name", FieldType::Unknown), ("age", FieldType::Unknown)],
    );
    Ok(())
}

#[test]
fn test_file_information_emitted_once() -> anyhow::Result<()> {
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let sink_copy = Arc::clone(&emitted);
    let transformer = FileTransformer::new(target("Q3 Sales.csv"), &IngestConfig::default())
        .on_file_information(Box::new(move |info: &FileInformation| {
            sink_copy.lock().unwrap().push(info.clone());
        }));

    let csv = CsvFixture::people(10).build();
    let mut rows: Vec<Row> = Vec::new();
    let info = transform_reader(transformer, &mut csv.as_bytes(), 7, &mut rows)?;

    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0], info);
    assert_eq!(info.derived_file_name, "q3_sales.csv");
    assert_eq!(info.table_name, "people_table");
    Ok(())
}

#[test]
fn test_file_information_json() -> anyhow::Result<()> {
    let (info, _) = run(b"id,when\n1,2024-01-31\n", 64)?;
    let json: serde_json::Value = serde_json::from_str(&info.to_json()?)?;
    assert_eq!(json["fileName"], "people.csv");
    assert_eq!(json["derivedFileName"], "people.csv");
    assert_eq!(json["numberOfRows"], 1);
    assert_eq!(json["encoding"], "utf-8");
    assert_eq!(json["columns"][1]["fieldType"], "DATE");
    Ok(())
}
