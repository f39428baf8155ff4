//! Batch part file format.
//!
//! ```text
//! | magic "RSBP" (4) | version (2) | header frame | row frame | row frame | ...
//! ```
//!
//! Every frame is `| length (4, LE) | CBOR payload (N) | crc32 (4, LE) |`.
//! The header frame carries the table schema and the row count; each row
//! frame carries one [`SyncRow`]. Readers stop after `row_count` rows, so a
//! torn tail is reported as corruption rather than silently accepted.

use crate::error::{StorageError, StorageResult};
use rowsync_model::{SyncRow, SyncTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Magic bytes identifying a batch part file.
pub const PART_MAGIC: [u8; 4] = *b"RSBP";

/// Current part format version.
pub const PART_VERSION: u16 = 1;

/// Maximum size of a single frame payload.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// First frame of a part file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartHeader {
    /// Schema of the rows that follow.
    pub table: SyncTable,
    /// Number of row frames that follow.
    pub row_count: u64,
}

/// Writes the file preamble and header frame.
pub fn write_preamble<W: Write>(writer: &mut W, header: &PartHeader) -> StorageResult<()> {
    writer.write_all(&PART_MAGIC)?;
    writer.write_all(&PART_VERSION.to_le_bytes())?;
    write_frame(writer, header)
}

/// Reads and validates the file preamble and header frame.
pub fn read_preamble<R: Read>(reader: &mut R) -> StorageResult<PartHeader> {
    let mut magic = [0u8; 4];
    read_exact_or_corrupt(reader, &mut magic, "magic")?;
    if magic != PART_MAGIC {
        return Err(StorageError::corrupted("bad part magic"));
    }
    let mut version = [0u8; 2];
    read_exact_or_corrupt(reader, &mut version, "version")?;
    let version = u16::from_le_bytes(version);
    if version != PART_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }
    read_frame(reader)
}

/// Writes one row frame.
pub fn write_row<W: Write>(writer: &mut W, row: &SyncRow) -> StorageResult<()> {
    write_frame(writer, row)
}

/// Reads one row frame.
pub fn read_row<R: Read>(reader: &mut R) -> StorageResult<SyncRow> {
    read_frame(reader)
}

/// Encodes a complete part into memory.
pub fn encode_part(table: &SyncTable, rows: &[SyncRow]) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let header = PartHeader {
        table: table.clone(),
        row_count: rows.len() as u64,
    };
    write_preamble(&mut buf, &header)?;
    for row in rows {
        write_row(&mut buf, row)?;
    }
    Ok(buf)
}

fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> StorageResult<()> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(value, &mut payload).map_err(StorageError::codec)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(StorageError::codec(format!(
            "frame of {} bytes exceeds maximum of {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    // Safe: bounded by MAX_FRAME_SIZE above
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&compute_crc32(&payload).to_le_bytes())?;
    Ok(())
}

fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> StorageResult<T> {
    let mut len = [0u8; 4];
    read_exact_or_corrupt(reader, &mut len, "frame length")?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(StorageError::corrupted(format!(
            "frame length {len} exceeds maximum"
        )));
    }

    let mut payload = vec![0u8; len];
    read_exact_or_corrupt(reader, &mut payload, "frame payload")?;

    let mut crc = [0u8; 4];
    read_exact_or_corrupt(reader, &mut crc, "frame checksum")?;
    let expected = u32::from_le_bytes(crc);
    let actual = compute_crc32(&payload);
    if expected != actual {
        return Err(StorageError::ChecksumMismatch { expected, actual });
    }

    ciborium::de::from_reader(payload.as_slice()).map_err(StorageError::codec)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> StorageResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            StorageError::corrupted(format!("truncated {what}"))
        } else {
            StorageError::Io(e)
        }
    })
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}
