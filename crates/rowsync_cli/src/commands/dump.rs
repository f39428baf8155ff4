//! Dump command implementation.

use rowsync_model::{RowState, Value};
use rowsync_storage::{BatchStorage, FileBatchStorage};
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// One dumped row.
#[derive(Debug, Serialize)]
pub struct DumpedRow {
    /// Table name.
    pub table: String,
    /// Row state.
    pub state: RowState,
    /// Column names, in value order.
    pub columns: Vec<String>,
    /// Column values.
    pub values: Vec<Value>,
}

/// Runs the dump command.
pub fn run(
    storage: &FileBatchStorage,
    directory: &Path,
    table: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let rows = collect(storage, directory, table, limit)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            for row in &rows {
                let values: Vec<_> = row
                    .columns
                    .iter()
                    .zip(&row.values)
                    .map(|(column, value)| format!("{column}={value}"))
                    .collect();
                println!("{} {:<24} {}", row.table, row.state.to_string(), values.join(" "));
            }
            tracing::info!(rows = rows.len(), "dumped rows");
        }
    }
    Ok(())
}

/// Reads rows of the batch in `directory`, in part order.
///
/// `table` matches either the bare or the schema-qualified table name.
pub fn collect(
    storage: &FileBatchStorage,
    directory: &Path,
    table: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<DumpedRow>, Box<dyn Error>> {
    let batch = storage.scan_batch(directory)?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();

    for part in &batch.parts {
        if let Some(wanted) = table {
            if part.table.name != wanted && part.table.to_string() != wanted {
                continue;
            }
        }
        let reader = storage.open_part(&batch.directory, part)?;
        let schema = reader.table().clone();
        let columns: Vec<_> = schema.columns.iter().map(|c| c.name.clone()).collect();
        for row in reader {
            if rows.len() >= limit {
                return Ok(rows);
            }
            let row = row?;
            rows.push(DumpedRow {
                table: schema.name.to_string(),
                state: row.state,
                columns: columns.clone(),
                values: row.values,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;
    use tempfile::tempdir;

    #[test]
    fn dump_filters_by_table() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let batch = fixtures::write_batch(&storage);

        let rows = collect(&storage, &batch.directory, Some("Product"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns, vec!["id"]);
        assert_eq!(rows[0].values, vec![Value::Integer(10)]);
    }

    #[test]
    fn dump_respects_limit() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let batch = fixtures::write_batch(&storage);

        let rows = collect(&storage, &batch.directory, None, Some(3)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].state, RowState::Deleted);
        assert_eq!(rows[2].table, "Customer");
    }
}
