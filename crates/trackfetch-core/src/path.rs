//! Filesystem-safe output paths derived from track titles.
//!
//! Two titles that sanitize to the same stem map to the same file. There is
//! no collision avoidance here; callers own any dedup policy.

use std::path::{Path, PathBuf};

/// Extension of every file the pipeline produces.
pub const AUDIO_EXTENSION: &str = "mp3";

/// Characters that may not appear in a file stem on any supported platform.
const ILLEGAL_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn is_illegal(c: char) -> bool {
    ILLEGAL_CHARS.contains(&c) || c.is_ascii_control()
}

/// Sanitize a title for use as a file stem.
///
/// Every illegal character becomes a space, runs of spaces collapse to a
/// single space, and the ends are trimmed.
#[must_use]
pub fn sanitize_file_stem(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut last_was_space = false;

    for c in title.chars() {
        let c = if is_illegal(c) { ' ' } else { c };
        if c == ' ' {
            if !last_was_space {
                stem.push(' ');
            }
            last_was_space = true;
        } else {
            stem.push(c);
            last_was_space = false;
        }
    }

    stem.trim().to_string()
}

/// File name (stem plus audio extension) for a title.
#[must_use]
pub fn audio_file_name(title: &str) -> String {
    format!("{}.{AUDIO_EXTENSION}", sanitize_file_stem(title))
}

/// Final output path for a title inside `folder`.
#[must_use]
pub fn output_path(folder: &Path, title: &str) -> PathBuf {
    folder.join(audio_file_name(title))
}

/// Output template handed to the extraction service.
///
/// The service substitutes `%(ext)s` itself, so the converted file lands at
/// [`output_path`].
#[must_use]
pub fn output_template(folder: &Path, title: &str) -> String {
    folder
        .join(format!("{}.%(ext)s", sanitize_file_stem(title)))
        .to_string_lossy()
        .into_owned()
}
