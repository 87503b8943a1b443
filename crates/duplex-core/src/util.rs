//! Small helpers for control-thread code that shuffles sample bytes

use std::io::{Cursor, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult, ParameterKind};

/// Sleep the calling thread for `millis` milliseconds
pub fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

/// Copy `len` bytes of `source` starting at `source_offset` into
/// `destination` at `destination_offset`
///
/// The destination grows when the write runs past its end. Its position
/// ends up just after the copied bytes.
pub fn insert_buffer(
    source: &[u8],
    source_offset: usize,
    destination: &mut Cursor<Vec<u8>>,
    destination_offset: usize,
    len: usize,
) -> BridgeResult<()> {
    let bytes = source_offset
        .checked_add(len)
        .and_then(|end| source.get(source_offset..end))
        .ok_or_else(|| {
            BridgeError::invalid(
                ParameterKind::BufferSize,
                format!(
                    "{} bytes at offset {} exceed a {} byte source",
                    len,
                    source_offset,
                    source.len()
                ),
            )
        })?;
    destination
        .seek(SeekFrom::Start(destination_offset as u64))
        .and_then(|_| destination.write_all(bytes))
        .map_err(|_| BridgeError::InsufficientMemory)
}

/// Copy up to `len` bytes from the position of `source` to the position of
/// `destination`, advancing both
///
/// Clamps to what is left in `source` and returns the bytes copied.
pub fn write_buffer(
    source: &mut Cursor<Vec<u8>>,
    destination: &mut Cursor<Vec<u8>>,
    len: usize,
) -> BridgeResult<usize> {
    let start = (source.position() as usize).min(source.get_ref().len());
    let len = len.min(source.get_ref().len() - start);
    if len == 0 {
        return Ok(0);
    }
    let at = destination.position() as usize;
    insert_buffer(source.get_ref(), start, destination, at, len)?;
    source.set_position((start + len) as u64);
    Ok(len)
}
