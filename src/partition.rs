use crate::day_key::DayKey;
use std::path::{Path, PathBuf};

/// Inserts `_<day>` in front of the last `.` of the final path segment, or
/// appends it when that segment has no extension.
pub fn build_path(base: &str, day: &DayKey) -> String {
    insert_suffix(base, &day.to_string())
}

/// Like `build_path`, but generation `n > 0` of a day becomes `_<day>_<n>`.
/// Generation 0 is the plain day name.
pub fn build_sequenced_path(base: &str, day: &DayKey, sequence: u32) -> String {
    match sequence {
        0 => build_path(base, day),
        n => insert_suffix(base, &format!("{day}_{n}")),
    }
}

fn insert_suffix(base: &str, suffix: &str) -> String {
    let split_at = base
        .rfind(['/', std::path::MAIN_SEPARATOR])
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let (dir, name) = base.split_at(split_at);

    match name.rfind('.') {
        Some(dot) => {
            let (stem, ext) = name.split_at(dot);
            format!("{dir}{stem}_{suffix}{ext}")
        }
        None => format!("{base}_{suffix}"),
    }
}

pub fn partition_path(base: &Path, day: &DayKey, sequence: u32) -> PathBuf {
    PathBuf::from(build_sequenced_path(&base.to_string_lossy(), day, sequence))
}
