//! Tests for ingestion jobs against an in-memory object store.

use sluice::error::IngestError;
use sluice::io::object_store::{MemoryObjectStore, ObjectStore};
use sluice::pipeline::{InputFile, JobContext, ingest_batch, ingest_file, stage_input};
use sluice::testing::*;
use sluice::{FieldType, IngestConfig};
use std::sync::{Arc, Mutex};

fn context(store: &Arc<MemoryObjectStore>, parallelism: usize) -> JobContext {
    let config = IngestConfig {
        row_group_size: 10,
        chunk_size: 32,
        parallelism: Some(parallelism),
        ..Default::default()
    };
    JobContext::new("ws", "proj", store.clone(), config)
}

fn stage(ctx: &JobContext, table: &str, file: &str, body: &[u8]) -> anyhow::Result<InputFile> {
    let input = InputFile::new(table, file);
    stage_input(ctx, &input, &mut &body[..])?;
    Ok(input)
}

#[test]
fn test_single_file_blocks_are_uploaded() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 1);
    let csv = CsvFixture::people(25).build();
    let input = stage(&ctx, "People", "Staff List.csv", csv.as_bytes())?;

    let info = ingest_file(&ctx, &input)?;
    assert_eq!(info.number_of_rows, 25);
    assert_eq!(info.row_groups, 3);
    assert_columns(
        &info,
        &[
            ("name", FieldType::String),
            ("age", FieldType::Integer),
            ("city", FieldType::String),
        ],
    );

    let blocks = store.list("client/ws/proj/columnar/people/")?;
    let keys: Vec<&str> = blocks.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "client/ws/proj/columnar/people/staff_list-part-00000.parquet",
            "client/ws/proj/columnar/people/staff_list-part-00001.parquet",
            "client/ws/proj/columnar/people/staff_list-part-00002.parquet",
        ]
    );
    assert!(blocks.iter().all(|m| m.content_type.as_deref() == Some("application/vnd.apache.parquet")));

    let mut rows = 0;
    for key in &keys {
        rows += total_rows(&read_parquet_block(&store.get_bytes(key)?)?);
    }
    assert_eq!(rows, 25);
    Ok(())
}

#[test]
fn test_parallel_batch_keeps_input_order() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 4);
    let mut inputs = Vec::new();
    for i in 0..6 {
        let csv = CsvFixture::people(5 + i).build();
        inputs.push(stage(&ctx, "people", &format!("part {i}.csv"), csv.as_bytes())?);
    }

    let report = ingest_batch(&ctx, &inputs)?;
    assert!(report.is_success());
    let files: Vec<&str> = report.outcomes.iter().map(|o| o.input.file_name.as_str()).collect();
    assert_eq!(files, vec!["part 0.csv", "part 1.csv", "part 2.csv", "part 3.csv", "part 4.csv", "part 5.csv"]);

    let infos = report.into_result()?;
    let counts: Vec<u64> = infos.iter().map(|i| i.number_of_rows).collect();
    assert_eq!(counts, vec![5, 6, 7, 8, 9, 10]);
    assert_eq!(store.list("client/ws/proj/columnar/people/")?.len(), 6);
    Ok(())
}

#[test]
fn test_failed_upload_fails_job_but_keeps_siblings() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 2);
    let good = stage(&ctx, "good", "a.csv", b"id\n1\n2\n")?;
    let bad = stage(&ctx, "bad", "b.csv", b"id\n3\n")?;
    store.fail_uploads_under(ctx.keys.columnar_dir("bad"));

    let report = ingest_batch(&ctx, &[good, bad])?;
    assert!(!report.is_success());
    assert_eq!(report.succeeded().count(), 1);
    let failures: Vec<_> = report.failed().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.table_name, "bad");
    assert!(matches!(failures[0].1, IngestError::Upload { .. }));

    assert!(store.exists("client/ws/proj/columnar/good/a-part-00000.parquet")?);
    assert!(matches!(
        report.into_result(),
        Err(IngestError::BatchFailed { failed: 1, total: 2 })
    ));
    Ok(())
}

#[test]
fn test_invalid_bytes_fail_only_that_file() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 2);
    let good = stage(&ctx, "t", "good.csv", b"id\n1\n")?;
    let bad = stage(&ctx, "t", "bad.csv", b"id\n\xfe\xfe\xfe\n")?;

    let report = ingest_batch(&ctx, &[good, bad])?;
    let failures: Vec<_> = report.failed().collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.is_decode_error());
    Ok(())
}

#[test]
fn test_missing_input_is_reported() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 1);
    let report = ingest_batch(&ctx, &[InputFile::new("t", "never staged.csv")])?;
    assert!(matches!(
        report.outcomes[0].result,
        Err(IngestError::Storage(_))
    ));
    Ok(())
}

#[test]
fn test_empty_batch_succeeds() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let report = ingest_batch(&context(&store, 4), &[])?;
    assert!(report.is_success());
    assert!(report.into_result()?.is_empty());
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn test_gzip_upload_is_decompressed() -> anyhow::Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let csv = CsvFixture::people(12).build();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(csv.as_bytes())?;
    let gz = encoder.finish()?;

    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 1);
    let input = stage(&ctx, "people", "people.csv", &gz)?;
    let info = ingest_file(&ctx, &input)?;
    assert_eq!(info.number_of_rows, 12);
    assert_eq!(info.row_groups, 2);
    Ok(())
}

#[test]
fn test_dotted_file_names_keep_separate_keys() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 2);
    let older = stage(&ctx, "sales", "sales.2023.csv", b"id\n1\n2\n3\n")?;
    let newer = stage(&ctx, "sales", "sales.2024.csv", b"id\n4\n")?;
    assert_eq!(older.key(&ctx.keys), "client/ws/proj/input/sales/sales_2023.csv");
    assert_eq!(newer.key(&ctx.keys), "client/ws/proj/input/sales/sales_2024.csv");

    let infos = ingest_batch(&ctx, &[older, newer])?.into_result()?;
    let counts: Vec<u64> = infos.iter().map(|i| i.number_of_rows).collect();
    assert_eq!(counts, vec![3, 1]);
    let blocks: Vec<String> = store
        .list("client/ws/proj/columnar/sales/")?
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(
        blocks,
        vec![
            "client/ws/proj/columnar/sales/sales_2023-part-00000.parquet",
            "client/ws/proj/columnar/sales/sales_2024-part-00000.parquet",
        ]
    );
    Ok(())
}

#[test]
fn test_inputs_sharing_a_key_fail_the_batch() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = context(&store, 2);
    let first = stage(&ctx, "t", "a b.csv", b"id\n1\n")?;
    let second = InputFile::new("t", "a_b.csv");
    assert_eq!(first.key(&ctx.keys), second.key(&ctx.keys));

    let report = ingest_batch(&ctx, &[first, second])?;
    assert!(report.outcomes[0].result.is_ok());
    assert!(matches!(
        report.outcomes[1].result,
        Err(IngestError::DuplicateInput { .. })
    ));
    assert!(report.into_result().is_err());
    Ok(())
}

#[test]
fn test_hooks_see_every_file_once() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let infos: Arc<Mutex<Vec<(String, u64)>>> = Arc::default();
    let errors: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let info_log = Arc::clone(&infos);
    let error_log = Arc::clone(&errors);
    let ctx = context(&store, 2)
        .with_file_information_hook(move |input, info| {
            info_log
                .lock()
                .unwrap()
                .push((input.file_name.clone(), info.number_of_rows));
        })
        .with_error_hook(move |input, err| {
            error_log
                .lock()
                .unwrap()
                .push((input.file_name.clone(), err.to_string()));
        });

    let good = stage(&ctx, "t", "good.csv", b"id\n1\n2\n")?;
    let bad = stage(&ctx, "t", "bad.csv", b"id\n\xfe\xfe\xfe\n")?;
    let missing = InputFile::new("t", "missing.csv");
    let report = ingest_batch(&ctx, &[good, bad, missing])?;
    assert_eq!(report.failed().count(), 2);

    assert_eq!(*infos.lock().unwrap(), vec![("good.csv".to_string(), 2)]);
    let mut failed: Vec<String> = errors.lock().unwrap().iter().map(|(f, _)| f.clone()).collect();
    failed.sort();
    assert_eq!(failed, vec!["bad.csv", "missing.csv"]);
    Ok(())
}

#[test]
fn test_upload_failure_reaches_error_hook_once() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let ctx = context(&store, 1).with_error_hook(move |_, err| {
        assert!(matches!(err, IngestError::Upload { .. }));
        *counter.lock().unwrap() += 1;
    });
    let input = stage(&ctx, "t", "f.csv", b"id\n1\n")?;
    store.fail_uploads_under(ctx.keys.columnar_dir("t"));

    assert!(ingest_file(&ctx, &input).is_err());
    assert_eq!(*calls.lock().unwrap(), 1);
    Ok(())
}
