use serde::Deserialize;

use crate::core::error::PipelineResult;

/// One row of an MCP-style `fields.csv` / `methods.csv` export.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CsvEntry {
    /// Intermediate member name.
    pub searge: String,
    /// Human-readable member name.
    pub name: String,
    #[serde(default)]
    pub side: Option<u32>,
    #[serde(default)]
    pub desc: Option<String>,
}

/// Read all rows. Rows keep file order; duplicates are left to the table
/// builder, which treats differing names as conflicts.
pub fn parse_csv(contents: &str) -> PipelineResult<Vec<CsvEntry>> {
    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let rows = reader
        .deserialize::<CsvEntry>()
        .collect::<Result<Vec<_>, csv::Error>>()?;
    Ok(rows)
}
