use crate::error::{ArchiveError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Creates `path`, discarding anything already there.
pub fn create_empty(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| ArchiveError::file_system(path, err))
}

/// Appends `content` plus a newline, creating the file on first write.
pub fn append_line(path: &Path, content: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| ArchiveError::file_system(path, err))?;

    let mut line = Vec::with_capacity(content.len() + 1);
    line.extend_from_slice(content.as_bytes());
    line.push(b'\n');
    file.write_all(&line)
        .map_err(|err| ArchiveError::file_system(path, err))
}
