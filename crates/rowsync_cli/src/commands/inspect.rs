//! Inspect command implementation.

use rowsync_model::{BatchInfo, BatchPartInfo};
use rowsync_storage::{BatchStorage, FileBatchStorage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

/// Batch inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Batch directory.
    pub directory: String,
    /// Total rows declared by part headers.
    pub row_count: u64,
    /// Rows per table.
    pub tables: BTreeMap<String, u64>,
    /// Per-part details.
    pub parts: Vec<PartSummary>,
}

/// Details of one part.
#[derive(Debug, Serialize)]
pub struct PartSummary {
    /// Part index.
    pub index: u32,
    /// File name.
    pub file_name: String,
    /// Table name.
    pub table: String,
    /// Rows declared by the header.
    pub row_count: u64,
    /// Rows read, per row state.
    pub states: BTreeMap<String, u64>,
    /// First read error, if the part is damaged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InspectResult {
    /// Returns true if every part was read without error.
    pub fn is_ok(&self) -> bool {
        self.parts.iter().all(|p| p.error.is_none())
    }
}

/// Runs the inspect command.
pub fn run(storage: &FileBatchStorage, directory: &Path, format: &str) -> Result<(), Box<dyn Error>> {
    let result = inspect(storage, directory)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Reads every part of the batch in `directory`.
pub fn inspect(storage: &FileBatchStorage, directory: &Path) -> Result<InspectResult, Box<dyn Error>> {
    let batch = storage.scan_batch(directory)?;
    let parts: Vec<_> = batch
        .parts
        .iter()
        .map(|part| summarize(storage, &batch, part))
        .collect();

    let mut tables = BTreeMap::new();
    for part in &parts {
        *tables.entry(part.table.clone()).or_insert(0) += part.row_count;
    }

    Ok(InspectResult {
        directory: directory.display().to_string(),
        row_count: batch.row_count(),
        tables,
        parts,
    })
}

fn summarize(storage: &dyn BatchStorage, batch: &BatchInfo, part: &BatchPartInfo) -> PartSummary {
    let mut states = BTreeMap::new();
    let mut error = None;
    match storage.open_part(&batch.directory, part) {
        Ok(reader) => {
            for row in reader {
                match row {
                    Ok(row) => *states.entry(row.state.to_string()).or_insert(0) += 1,
                    Err(e) => {
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
        }
        Err(e) => error = Some(e.to_string()),
    }

    PartSummary {
        index: part.index,
        file_name: part.file_name.clone(),
        table: part.table.to_string(),
        row_count: part.row_count,
        states,
        error,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("rowsync Batch Inspection");
    println!("========================");
    println!();
    println!("Directory: {}", result.directory);
    println!("Parts:     {}", result.parts.len());
    println!("Rows:      {}", result.row_count);
    println!();
    println!("Tables:");
    for (table, rows) in &result.tables {
        println!("  {table}: {rows} rows");
    }
    println!();
    println!("Parts:");
    for part in &result.parts {
        let states: Vec<_> = part
            .states
            .iter()
            .map(|(state, count)| format!("{state}={count}"))
            .collect();
        println!(
            "  [{}] {} ({}) {} rows: {}",
            part.index,
            part.file_name,
            part.table,
            part.row_count,
            states.join(", ")
        );
        if let Some(error) = &part.error {
            println!("      error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;
    use tempfile::tempdir;

    #[test]
    fn inspect_counts_states_per_part() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let batch = fixtures::write_batch(&storage);

        let result = inspect(&storage, &batch.directory).unwrap();

        assert!(result.is_ok());
        assert_eq!(result.row_count, 4);
        assert_eq!(result.parts.len(), 3);
        assert_eq!(result.tables["Customer"], 3);
        assert_eq!(result.tables["Product"], 1);
        assert_eq!(result.parts[0].states["Modified"], 2);
        assert_eq!(result.parts[1].states["Deleted"], 1);
    }

    #[test]
    fn inspect_reports_damaged_part() {
        let dir = tempdir().unwrap();
        let storage = FileBatchStorage::open(dir.path()).unwrap();
        let batch = fixtures::write_batch(&storage);
        let path = storage.part_path(&batch.directory, &batch.parts[0]);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = inspect(&storage, &batch.directory).unwrap();
        assert!(!result.is_ok());
        assert!(result.parts[0].error.is_some());
        assert!(result.parts[1].error.is_none());
    }
}
