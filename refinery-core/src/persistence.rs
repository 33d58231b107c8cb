//! JSON Lines files: one serialized value per line, appended in place.
//!
//! Each append is a single `write_all` on a file opened with `O_APPEND`, so
//! writers in separate processes never overwrite each other's lines and
//! need no shared lock or temp file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Append `value` as one JSON line, creating the file and parent directories
/// as needed.
///
/// If a previous writer died mid-line, the torn line is terminated first so
/// the new value starts on its own line.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(value).map_err(io::Error::other)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?;
    if ends_mid_line(&mut file)? {
        line.insert(0, '\n');
    }
    file.write_all(line.as_bytes())
}

fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Read every JSON line of `path`, oldest first.
///
/// A missing file or one holding only blank lines yields an empty vec.
/// Lines that fail to parse are skipped with a warning; a file in which no
/// line parses is `InvalidData`.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut values = Vec::new();
    let mut first_error = None;
    for (idx, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => values.push(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = idx + 1, error = %e, "Skipping malformed JSON line");
                first_error.get_or_insert(format!("line {}: {e}", idx + 1));
            }
        }
    }

    match first_error {
        Some(message) if values.is_empty() => {
            Err(io::Error::new(io::ErrorKind::InvalidData, message))
        }
        _ => Ok(values),
    }
}
