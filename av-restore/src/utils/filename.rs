//! Naming helpers for work directories and derived output files.

use std::path::{Path, PathBuf};

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Sanitize a file stem for use as a directory name on every platform.
///
/// Invalid and control characters become a single `_`, leading/trailing
/// dots and spaces are trimmed, and an empty result becomes `"unnamed"`.
///
/// ```
/// use av_restore::utils::filename::sanitize_stem;
///
/// assert_eq!(sanitize_stem("tape 03: side?A"), "tape 03_ side_A");
/// assert_eq!(sanitize_stem(" .. "), "unnamed");
/// ```
pub fn sanitize_stem(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stem of `input` sanitized for use as a work directory name.
pub fn input_stem(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_stem(&stem)
}

/// `dir/movie.mkv` + (`upscaled`, `mp4`) -> `dir/movie_upscaled.mp4`.
///
/// When `extension` is `None` the input's own extension is kept.
pub fn derived_output(input: &Path, suffix: &str, extension: Option<&str>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = extension
        .map(str::to_string)
        .or_else(|| input.extension().map(|e| e.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "mkv".to_string());
    input.with_file_name(format!("{stem}_{suffix}.{ext}"))
}
