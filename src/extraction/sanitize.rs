//! Archive entry name sanitization
//!
//! Entry names come from untrusted archives and from producers of download jobs. They are
//! turned into relative paths that cannot leave the directory they are joined onto.

use std::path::PathBuf;

/// Characters that may not appear in Windows file names
#[cfg(windows)]
const WINDOWS_RESERVED: &[char] = &[':', '<', '>', '|', '"', '?', '*'];

/// Turn an archive entry name into a safe relative path
///
/// Backslashes are treated as separators, a leading drive letter and any root are dropped,
/// and empty, `.` and `..` segments are removed. On Windows, reserved characters are replaced
/// with `_` and trailing dots and spaces are trimmed from each segment. The result may be empty
/// (for example for `"../"`), in which case the entry has no place in the output.
pub fn sanitize_entry_name(name: &str) -> PathBuf {
    let unified = name.replace('\\', "/");
    let without_drive = strip_drive_letter(&unified);

    without_drive
        .split('/')
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .filter_map(sanitize_segment)
        .collect()
}

fn strip_drive_letter(name: &str) -> &str {
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &name[2..]
    } else {
        name
    }
}

#[cfg(windows)]
fn sanitize_segment(segment: &str) -> Option<String> {
    let replaced: String = segment
        .chars()
        .map(|c| if WINDOWS_RESERVED.contains(&c) { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']);
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(not(windows))]
fn sanitize_segment(segment: &str) -> Option<String> {
    Some(segment.to_string())
}
