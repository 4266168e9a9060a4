//! Tests for join query planning and result materialization.

use sluice::error::IngestError;
use sluice::io::object_store::{MemoryObjectStore, ObjectStore};
use sluice::pipeline::JobContext;
use sluice::planner::{
    JoinColumn, JoinTableDefinition, chain, define_chain_query, define_query, load_result,
    materialize,
};
use sluice::testing::MockQueryEngine;
use sluice::versioning::{FileEntry, MemoryHashStore};
use sluice::IngestConfig;
use std::sync::Arc;

fn orders() -> JoinTableDefinition {
    JoinTableDefinition::new("orders", "a")
        .column(JoinColumn::selected("id").joined())
        .column(JoinColumn::selected("name"))
}

fn payments() -> JoinTableDefinition {
    JoinTableDefinition::new("payments", "b")
        .column(JoinColumn::selected("id").joined())
        .column(JoinColumn::selected("amount"))
}

#[test]
fn test_two_table_join() -> anyhow::Result<()> {
    let a = orders().join(payments());
    let b = payments();
    let sql = define_query(&[a, b])?;

    let select = sql
        .strip_prefix("SELECT ")
        .and_then(|s| s.split(" FROM ").next())
        .expect("select list");
    let columns: Vec<&str> = select.split(", ").collect();
    assert_eq!(columns, vec!["a.id", "a.name", "b.id", "b.amount"]);

    assert_eq!(sql.matches("LEFT OUTER JOIN").count(), 1);
    assert!(sql.contains("LEFT OUTER JOIN payments b ON a.id=b.id"), "{sql}");
    assert!(sql.contains("FROM orders a "), "{sql}");
    Ok(())
}

#[test]
fn test_three_tables_with_composite_keys() -> anyhow::Result<()> {
    let customers = JoinTableDefinition::new("customers", "c")
        .column(JoinColumn::join_only("region"))
        .column(JoinColumn::join_only("customer_id"))
        .column(JoinColumn::selected("tier"));
    let sql = define_query(&[orders(), payments(), customers])?;
    assert_eq!(
        sql,
        "SELECT a.id, a.name, b.id, b.amount, c.tier FROM orders a \
         LEFT OUTER JOIN payments b ON a.id=b.id \
         LEFT OUTER JOIN customers c ON b.region=c.region AND b.customer_id=c.customer_id"
    );
    Ok(())
}

#[test]
fn test_join_partner_comes_from_join_table() -> anyhow::Result<()> {
    let customers = JoinTableDefinition::new("customers", "c")
        .column(JoinColumn::selected("id").joined())
        .join(JoinTableDefinition::new("orders", "x"));
    let sql = define_query(&[orders(), payments(), customers])?;
    assert!(sql.ends_with("LEFT OUTER JOIN customers c ON a.id=c.id"), "{sql}");
    Ok(())
}

#[test]
fn test_chain_query_follows_links() -> anyhow::Result<()> {
    let root = orders().join(payments());
    let names: Vec<&str> = chain(&root).map(|t| t.table_name.as_str()).collect();
    assert_eq!(names, vec!["orders", "payments"]);
    assert_eq!(define_chain_query(&root)?, define_query(&[orders().join(payments()), payments()])?);
    Ok(())
}

#[test]
fn test_plan_errors() {
    assert!(matches!(define_query(&[]), Err(IngestError::Plan(_))));

    let nothing_selected = JoinTableDefinition::new("t", "a").column(JoinColumn::join_only("id"));
    assert!(matches!(define_query(&[nothing_selected]), Err(IngestError::Plan(_))));

    let no_join_columns = JoinTableDefinition::new("payments", "b").column(JoinColumn::selected("id"));
    assert!(matches!(
        define_query(&[orders(), no_join_columns]),
        Err(IngestError::Plan(_))
    ));

    let same_alias = JoinTableDefinition::new("payments", "a")
        .column(JoinColumn::selected("id").joined());
    assert!(matches!(
        define_query(&[orders(), same_alias]),
        Err(IngestError::Plan(_))
    ));

    let injected = JoinTableDefinition::new("orders; DROP TABLE x", "a")
        .column(JoinColumn::selected("id"));
    assert!(matches!(define_query(&[injected]), Err(IngestError::Plan(_))));
}

#[test]
fn test_qualified_table_names() -> anyhow::Result<()> {
    let table = JoinTableDefinition::new("analytics.orders", "a").column(JoinColumn::selected("id"));
    assert_eq!(define_query(&[table])?, "SELECT a.id FROM analytics.orders a");
    Ok(())
}

#[test]
fn test_definitions_from_json() -> anyhow::Result<()> {
    let json = r#"[
        {"tableName": "orders", "tableAlias": "a", "columns": [
            {"columnName": "id", "isSelectedColumn": true, "isJoinColumn": true}
        ], "joinTable": {"tableName": "payments", "tableAlias": "b", "columns": []}},
        {"tableName": "payments", "tableAlias": "b", "columns": [
            {"columnName": "id", "isSelectedColumn": false, "isJoinColumn": true},
            {"columnName": "amount", "isSelectedColumn": true, "isJoinColumn": false}
        ]}
    ]"#;
    let tables: Vec<JoinTableDefinition> = serde_json::from_str(json)?;
    assert_eq!(
        define_query(&tables)?,
        "SELECT a.id, b.amount FROM orders a LEFT OUTER JOIN payments b ON a.id=b.id"
    );
    Ok(())
}

#[test]
fn test_materialize_reuses_current_result() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = JobContext::new("ws", "proj", store.clone(), IngestConfig::default());
    let hashes = MemoryHashStore::new();
    let engine = MockQueryEngine::with_columns(&["id", "name"]).row(&[Some("1"), None]);
    let tables = [orders(), payments()];
    let inputs = vec![FileEntry::new("orders/orders.csv", 10, 1)];

    let first = materialize(&ctx, &hashes, &engine, &tables, &inputs)?;
    assert!(!first.reused);
    assert!(first.key.starts_with("client/ws/proj/output/"));
    assert!(first.key.ends_with(".sdt"));
    assert!(store.exists(&first.key)?);

    let second = materialize(&ctx, &hashes, &engine, &tables, &inputs)?;
    assert!(second.reused);
    assert_eq!(second.key, first.key);
    assert_eq!(engine.executions().len(), 1);

    let result = load_result(&ctx, &first.key)?;
    assert_eq!(result.rows, vec![vec![Some("1".to_string()), None]]);
    Ok(())
}

#[test]
fn test_materialize_reruns_when_inputs_change() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = JobContext::new("ws", "proj", store, IngestConfig::default());
    let hashes = MemoryHashStore::new();
    let engine = MockQueryEngine::with_columns(&["id"]);
    let tables = [orders(), payments()];

    let mut inputs = vec![FileEntry::new("orders/orders.csv", 10, 1)];
    let first = materialize(&ctx, &hashes, &engine, &tables, &inputs)?;
    inputs.push(FileEntry::new("payments/payments.csv", 20, 2));
    let second = materialize(&ctx, &hashes, &engine, &tables, &inputs)?;

    assert!(!second.reused);
    assert_eq!(second.key, first.key);
    assert_ne!(second.input_hash, first.input_hash);
    assert_eq!(engine.executions().len(), 2);
    Ok(())
}

#[test]
fn test_materialize_reruns_when_artifact_missing() -> anyhow::Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    let ctx = JobContext::new("ws", "proj", store.clone(), IngestConfig::default());
    let hashes = MemoryHashStore::new();
    let engine = MockQueryEngine::with_columns(&["id"]);
    let tables = [orders(), payments()];
    let inputs = vec![FileEntry::new("orders/orders.csv", 10, 1)];

    let first = materialize(&ctx, &hashes, &engine, &tables, &inputs)?;
    // A different store with the same recorded hashes has no artifact.
    let empty = JobContext::new("ws", "proj", Arc::new(MemoryObjectStore::new()), IngestConfig::default());
    let second = materialize(&empty, &hashes, &engine, &tables, &inputs)?;
    assert!(!second.reused);
    assert_eq!(second.key, first.key);
    assert_eq!(engine.executions().len(), 2);
    Ok(())
}

#[test]
fn test_materialize_surfaces_engine_failure() {
    let ctx = JobContext::new("ws", "proj", Arc::new(MemoryObjectStore::new()), IngestConfig::default());
    let hashes = MemoryHashStore::new();
    let engine = MockQueryEngine::with_columns(&["id"]).failing("engine down");
    let result = materialize(&ctx, &hashes, &engine, &[orders(), payments()], &[]);
    assert!(matches!(result, Err(IngestError::Query(_))));
}
