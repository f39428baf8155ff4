//! Order command implementation.

use rowsync_model::{SyncSet, SyncTable};
use std::error::Error;
use std::fs;
use std::path::Path;

/// Upsert and delete order of a schema.
#[derive(Debug, PartialEq, Eq)]
pub struct ApplyOrder {
    /// Parents first.
    pub upserts: Vec<String>,
    /// Children first.
    pub deletes: Vec<String>,
}

/// Runs the order command.
pub fn run(schema_path: &Path) -> Result<(), Box<dyn Error>> {
    let schema: SyncSet = serde_json::from_str(&fs::read_to_string(schema_path)?)?;
    let order = apply_order(&schema)?;

    println!("Upsert order:");
    for (i, table) in order.upserts.iter().enumerate() {
        println!("  {}. {}", i + 1, table);
    }
    println!();
    println!("Delete order:");
    for (i, table) in order.deletes.iter().enumerate() {
        println!("  {}. {}", i + 1, table);
    }
    Ok(())
}

/// Validates `schema` and computes its apply order.
pub fn apply_order(schema: &SyncSet) -> Result<ApplyOrder, Box<dyn Error>> {
    schema.validate()?;
    Ok(ApplyOrder {
        upserts: names(schema.upsert_order()),
        deletes: names(schema.delete_order()),
    })
}

fn names(tables: Vec<&SyncTable>) -> Vec<String> {
    tables.into_iter().map(|t| t.name.to_string()).collect()
}
