//! Join query planning.
//!
//! Ingested tables are queried together as one logical table. The planner
//! turns a list of [`JoinTableDefinition`]s into a single `SELECT`: the first
//! table is the `FROM` table and every later one is attached with a
//! `LEFT OUTER JOIN` on its join columns.
//!
//! ```
//! use sluice::planner::{JoinColumn, JoinTableDefinition, define_query};
//!
//! let orders = JoinTableDefinition::new("orders", "a")
//!     .column(JoinColumn::selected("id").joined())
//!     .column(JoinColumn::selected("name"));
//! let payments = JoinTableDefinition::new("payments", "b")
//!     .column(JoinColumn::selected("id").joined())
//!     .column(JoinColumn::selected("amount"));
//!
//! let sql = define_query(&[orders, payments]).unwrap();
//! assert_eq!(
//!     sql,
//!     "SELECT a.id, a.name, b.id, b.amount FROM orders a LEFT OUTER JOIN payments b ON a.id=b.id"
//! );
//! ```
//!
//! # Join chains
//!
//! A definition may point at the table it joins to through `join_table`,
//! forming a chain. The planner walks chains without cycle detection, so a
//! chain must not name the same table twice. Owned `Box` links cannot form a
//! loop, but a chain that repeats a table name yields a query joining that
//! table to itself under two aliases, which is almost never what the caller
//! meant. Callers that build chains from user input must reject repeats.

use crate::error::{IngestError, Result};
use crate::paths::ArtifactKind;
use crate::pipeline::JobContext;
use crate::versioning::{ContentHash, FileEntry, HashResolver, HashStore, payload_hash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// A column of a table taking part in a join query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinColumn {
    pub column_name: String,
    pub is_selected_column: bool,
    pub is_join_column: bool,
}

impl JoinColumn {
    /// A column that appears in the `SELECT` list.
    pub fn selected(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            is_selected_column: true,
            is_join_column: false,
        }
    }

    /// A column only used to join.
    pub fn join_only(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            is_selected_column: false,
            is_join_column: true,
        }
    }

    /// Also use this column in the `ON` clause.
    #[must_use]
    pub fn joined(mut self) -> Self {
        self.is_join_column = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTableDefinition {
    pub table_name: String,
    pub table_alias: String,
    pub columns: Vec<JoinColumn>,
    /// The next table in the chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_table: Option<Box<JoinTableDefinition>>,
}

impl JoinTableDefinition {
    pub fn new(table_name: impl Into<String>, table_alias: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            table_alias: table_alias.into(),
            columns: Vec::new(),
            join_table: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column: JoinColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Link the next table of the chain.
    #[must_use]
    pub fn join(mut self, next: JoinTableDefinition) -> Self {
        self.join_table = Some(Box::new(next));
        self
    }

    fn join_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.is_join_column)
            .map(|c| c.column_name.as_str())
    }
}

/// Tables of a chain in link order, starting with `root`.
///
/// The chain must not repeat a table (see the module docs).
pub fn chain(root: &JoinTableDefinition) -> impl Iterator<Item = &JoinTableDefinition> {
    std::iter::successors(Some(root), |t| t.join_table.as_deref())
}

/// Build the join query for `tables`. The first table is the `FROM` table.
///
/// Each later table joins to the table its `join_table` names, or else to
/// the earlier table whose `join_table` names it, or else to the table right
/// before it. The `ON` clause conjoins `<partner>.<col>=<alias>.<col>` over
/// the later table's join columns.
///
/// # Errors
///
/// Returns [`IngestError::Plan`] when the list is empty, nothing is selected,
/// an alias repeats, an identifier is not a plain SQL name, or a joined table
/// has no join column.
pub fn define_query(tables: &[JoinTableDefinition]) -> Result<String> {
    build_query(&tables.iter().collect::<Vec<_>>())
}

/// Build the join query for the chain starting at `root`.
///
/// # Errors
///
/// See [`define_query`].
pub fn define_chain_query(root: &JoinTableDefinition) -> Result<String> {
    build_query(&chain(root).collect::<Vec<_>>())
}

fn build_query(tables: &[&JoinTableDefinition]) -> Result<String> {
    let Some((from, joined)) = tables.split_first() else {
        return Err(IngestError::Plan("no tables to query".to_string()));
    };
    validate(tables)?;

    let select: Vec<String> = tables
        .iter()
        .flat_map(|t| {
            t.columns
                .iter()
                .filter(|c| c.is_selected_column)
                .map(move |c| format!("{}.{}", t.table_alias, c.column_name))
        })
        .collect();
    if select.is_empty() {
        return Err(IngestError::Plan("no selected columns".to_string()));
    }

    let mut sql = format!(
        "SELECT {} FROM {} {}",
        select.join(", "),
        from.table_name,
        from.table_alias
    );
    for (i, table) in joined.iter().enumerate() {
        let preceding = &tables[..=i];
        let partner = join_partner(preceding, table).unwrap_or(tables[i]);
        let on: Vec<String> = table
            .join_columns()
            .map(|c| format!("{}.{c}={}.{c}", partner.table_alias, table.table_alias))
            .collect();
        if on.is_empty() {
            return Err(IngestError::Plan(format!(
                "table {} has no join columns",
                table.table_name
            )));
        }
        sql.push_str(&format!(
            " LEFT OUTER JOIN {} {} ON {}",
            table.table_name,
            table.table_alias,
            on.join(" AND ")
        ));
    }
    Ok(sql)
}

fn join_partner<'a>(
    preceding: &[&'a JoinTableDefinition],
    table: &JoinTableDefinition,
) -> Option<&'a JoinTableDefinition> {
    if let Some(target) = &table.join_table
        && let Some(p) = preceding.iter().find(|p| p.table_name == target.table_name)
    {
        return Some(*p);
    }
    preceding
        .iter()
        .find(|p| {
            p.join_table
                .as_ref()
                .is_some_and(|j| j.table_name == table.table_name)
        })
        .copied()
}

fn validate(tables: &[&JoinTableDefinition]) -> Result<()> {
    let mut aliases = HashSet::new();
    for table in tables {
        if !is_identifier(&table.table_alias) {
            return Err(IngestError::Plan(format!(
                "invalid alias {:?} for table {}",
                table.table_alias, table.table_name
            )));
        }
        if !table.table_name.split('.').all(is_identifier) {
            return Err(IngestError::Plan(format!(
                "invalid table name {:?}",
                table.table_name
            )));
        }
        if !aliases.insert(table.table_alias.as_str()) {
            return Err(IngestError::Plan(format!(
                "alias {} used more than once",
                table.table_alias
            )));
        }
        if let Some(column) = table.columns.iter().find(|c| !is_identifier(&c.column_name)) {
            return Err(IngestError::Plan(format!(
                "invalid column name {:?} in table {}",
                column.column_name, table.table_name
            )));
        }
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Execution
// ============================================================================

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultColumn {
    pub name: String,
    pub type_name: String,
}

/// A converted query result set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// SQL engine that runs generated plans.
pub trait QueryEngine: Send + Sync {
    /// Run `sql`, writing engine-side results under `results_dir`, and
    /// return the converted result set.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`IngestError::Query`].
    fn execute(&self, sql: &str, results_dir: &str) -> Result<QueryResult>;
}

/// Outcome of [`materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Key of the `.sdt` artifact.
    pub key: String,
    pub payload_hash: ContentHash,
    /// Hash of the input listing the artifact corresponds to.
    pub input_hash: ContentHash,
    /// `true` when the stored artifact was current and the engine was not run.
    pub reused: bool,
}

/// Make sure the result of joining `tables` is stored and current.
///
/// The artifact key is derived from the SQL text. The engine only runs when
/// `inputs` changed since the artifact was recorded or the artifact is
/// missing from the store.
///
/// # Errors
///
/// Returns an error if planning, execution, upload, or hash bookkeeping fails.
pub fn materialize(
    ctx: &JobContext,
    hashes: &dyn HashStore,
    engine: &dyn QueryEngine,
    tables: &[JoinTableDefinition],
    inputs: &[FileEntry],
) -> Result<Materialized> {
    let sql = define_query(tables)?;
    let payload_hash = payload_hash(sql.as_bytes());
    let key = ctx.keys.output_key(payload_hash.as_str(), ArtifactKind::Sdt);

    let resolver = HashResolver::new(hashes);
    let resolution = resolver.resolve(&key, inputs)?;
    if resolution.up_to_date && ctx.store.exists(&key)? {
        info!(key = %key, "query result is current");
        return Ok(Materialized {
            key,
            payload_hash,
            input_hash: resolution.current_hash,
            reused: true,
        });
    }

    let result = engine.execute(&sql, &ctx.keys.output_dir())?;
    let body = serde_json::to_vec(&result)?;
    ctx.store
        .put_bytes(&key, "application/json", &body)
        .map_err(|source| IngestError::Upload {
            key: key.clone(),
            source,
        })?;
    resolver.record(&key, &resolution.current_hash)?;
    info!(key = %key, rows = result.rows.len(), "query result materialized");

    Ok(Materialized {
        key,
        payload_hash,
        input_hash: resolution.current_hash,
        reused: false,
    })
}

/// Read back a result stored by [`materialize`].
///
/// # Errors
///
/// Returns an error if the object is missing or is not a result set.
pub fn load_result(ctx: &JobContext, key: &str) -> Result<QueryResult> {
    let bytes = ctx.store.get_bytes(key)?;
    Ok(serde_json::from_slice(&bytes)?)
}
