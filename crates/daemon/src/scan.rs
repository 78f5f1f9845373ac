//! Scanner module for discovering source videos.
//!
//! Lists the files directly inside a source directory whose extension is in a
//! configured set, grouped by extension in the order the set was given.

use std::path::{Path, PathBuf};

/// Extensions used when none are given.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mkv", "mp4", "ogm", "avi"];

/// Parse a comma-separated extension list such as `mkv,.MP4, avi`.
///
/// Leading dots and surrounding whitespace are dropped and entries are
/// lower-cased. Duplicates keep their first position. An empty list yields
/// [`DEFAULT_EXTENSIONS`].
pub fn parse_extensions(list: &str) -> Vec<String> {
    let mut extensions: Vec<String> = Vec::new();
    for ext in list.split(',') {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }

    if extensions.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    } else {
        extensions
    }
}

/// Checks if a file has the given extension (case-insensitive, without dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Enumerate source videos in `dir`.
///
/// Only regular files directly inside `dir` are considered. Files are grouped
/// by extension in the order of `extensions` and sorted by name within a
/// group. A `limit` of zero returns every match; otherwise at most `limit`
/// paths are returned. A missing directory yields an empty list.
pub fn enumerate_sources(dir: &Path, extensions: &[String], limit: usize) -> Vec<PathBuf> {
    use walkdir::WalkDir;

    if !dir.is_dir() {
        return Vec::new();
    }

    let files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    let mut sources = Vec::new();
    for extension in extensions {
        sources.extend(
            files
                .iter()
                .filter(|path| has_extension(path, extension))
                .cloned(),
        );
    }

    if limit > 0 {
        sources.truncate(limit);
    }
    sources
}
