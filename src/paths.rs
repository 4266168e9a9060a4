//! Object key layout.
//!
//! ```text
//! client/<workspaceId>/<projectId>/input/<cleanTableName>/<cleanFileName>.csv
//! client/<workspaceId>/<projectId>/columnar/<cleanTableName>/<cleanFileName>-part-<nnnnn>.parquet
//! client/<workspaceId>/<projectId>/output/<payloadHash>.<sdt|sgn|sgc>
//! ```
//!
//! Table and file names passed in here are cleaned again, so callers may hand
//! over raw user input.

use crate::column_name::{clean_file_name, clean_table_name};
use std::fmt;

/// Extension of a derived artifact under `output/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Materialized query result set.
    Sdt,
    Sgn,
    Sgc,
}

impl ArtifactKind {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Sdt => "sdt",
            Self::Sgn => "sgn",
            Self::Sgc => "sgc",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Workspace/project scope every key lives under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    pub workspace_id: String,
    pub project_id: String,
}

impl KeySpace {
    pub fn new(workspace_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            project_id: project_id.into(),
        }
    }

    fn root(&self) -> String {
        format!("client/{}/{}", self.workspace_id, self.project_id)
    }

    /// Directory holding the raw uploads of one table.
    #[must_use]
    pub fn input_dir(&self, table: &str) -> String {
        format!("{}/input/{}/", self.root(), clean_table_name(table))
    }

    /// Key of a raw upload.
    #[must_use]
    pub fn input_key(&self, table: &str, file: &str) -> String {
        format!("{}{}.csv", self.input_dir(table), clean_file_name(file))
    }

    /// Directory holding the columnar blocks of one table.
    #[must_use]
    pub fn columnar_dir(&self, table: &str) -> String {
        format!("{}/columnar/{}/", self.root(), clean_table_name(table))
    }

    /// Key of one columnar block of a file.
    #[must_use]
    pub fn columnar_key(&self, table: &str, file: &str, part: usize) -> String {
        format!(
            "{}{}-part-{part:05}.parquet",
            self.columnar_dir(table),
            clean_file_name(file)
        )
    }

    /// Directory holding derived artifacts.
    #[must_use]
    pub fn output_dir(&self) -> String {
        format!("{}/output/", self.root())
    }

    /// Key of a derived artifact.
    #[must_use]
    pub fn output_key(&self, payload_hash: &str, kind: ArtifactKind) -> String {
        format!("{}{payload_hash}.{kind}", self.output_dir())
    }
}
