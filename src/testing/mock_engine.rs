//! Stand-in query engine.

use crate::error::{IngestError, Result};
use crate::planner::{QueryEngine, QueryResult, ResultColumn};
use std::sync::Mutex;

/// A [`QueryEngine`] that returns a fixed result and remembers what it ran.
///
/// # Example
///
/// ```
/// use sluice::planner::QueryEngine;
/// use sluice::testing::MockQueryEngine;
///
/// let engine = MockQueryEngine::with_columns(&["id"]).row(&[Some("1")]);
/// let result = engine.execute("SELECT a.id FROM t a", "out/").unwrap();
/// assert_eq!(result.rows.len(), 1);
/// assert_eq!(engine.executions(), vec!["SELECT a.id FROM t a".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct MockQueryEngine {
    result: QueryResult,
    fail_with: Option<String>,
    executed: Mutex<Vec<String>>,
}

impl MockQueryEngine {
    /// An engine whose result has string columns named `columns` and no rows.
    #[must_use]
    pub fn with_columns(columns: &[&str]) -> Self {
        Self {
            result: QueryResult {
                columns: columns
                    .iter()
                    .map(|name| ResultColumn {
                        name: (*name).to_string(),
                        type_name: "varchar".to_string(),
                    })
                    .collect(),
                rows: Vec::new(),
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn row(mut self, values: &[Option<&str>]) -> Self {
        self.result
            .rows
            .push(values.iter().map(|v| v.map(str::to_string)).collect());
        self
    }

    /// Make every execution fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// SQL of every execution so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn executions(&self) -> Vec<String> {
        self.executed.lock().expect("engine mutex poisoned").clone()
    }
}

impl QueryEngine for MockQueryEngine {
    fn execute(&self, sql: &str, _results_dir: &str) -> Result<QueryResult> {
        self.executed
            .lock()
            .expect("engine mutex poisoned")
            .push(sql.to_string());
        match &self.fail_with {
            Some(message) => Err(IngestError::Query(message.clone())),
            None => Ok(self.result.clone()),
        }
    }
}
