//! Verify command implementation.

use super::inspect;
use rowsync_storage::FileBatchStorage;
use std::error::Error;
use std::path::Path;

/// Runs the verify command.
///
/// Fails if any part cannot be read to the end.
pub fn run(storage: &FileBatchStorage, directory: &Path) -> Result<(), Box<dyn Error>> {
    println!("Verifying batch at {:?}", directory);
    println!();

    let result = inspect::inspect(storage, directory)?;
    let mut corrupt = 0;
    for part in &result.parts {
        match &part.error {
            None => println!("  OK       {}", part.file_name),
            Some(error) => {
                corrupt += 1;
                println!("  CORRUPT  {}: {}", part.file_name, error);
            }
        }
    }

    println!();
    println!(
        "{} parts checked, {} corrupt, {} rows",
        result.parts.len(),
        corrupt,
        result.row_count
    );
    if corrupt > 0 {
        return Err(format!("{corrupt} corrupt parts").into());
    }
    Ok(())
}
