//! Extraction of one directory subtree of a ZIP archive

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use super::sanitize_entry_name;
use crate::error::{ExtractionError, Result};
use crate::progress::{ProgressMode, ProgressReporter};

/// What an extraction wrote to disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Files written, in archive order
    pub files: Vec<PathBuf>,
    /// Decompressed bytes written
    pub bytes: u64,
}

/// Subtree prefixes always name a directory
fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

fn failed(label: &str, reason: String) -> ExtractionError {
    ExtractionError::Failed {
        archive: label.to_string(),
        reason,
    }
}

/// Extract every entry under `prefix` into `output_dir`, with the prefix stripped
///
/// An empty prefix selects the whole archive. `progress` is configured as determinate over the
/// sum of the selected entries' uncompressed sizes and advanced once per written chunk of at
/// most `buffer_size` bytes.
pub fn extract_subtree<R: Read + Seek>(
    archive: R,
    prefix: &str,
    output_dir: &Path,
    progress: &dyn ProgressReporter,
    buffer_size: usize,
) -> Result<ExtractionSummary> {
    extract_labeled(archive, "<archive>", prefix, output_dir, progress, buffer_size)
}

pub(super) fn extract_labeled<R: Read + Seek>(
    archive: R,
    label: &str,
    prefix: &str,
    output_dir: &Path,
    progress: &dyn ProgressReporter,
    buffer_size: usize,
) -> Result<ExtractionSummary> {
    let mut zip = zip::ZipArchive::new(archive)
        .map_err(|e| failed(label, format!("failed to read ZIP archive: {e}")))?;
    let prefix = normalize_prefix(prefix);

    let mut selected = Vec::new();
    let mut total = 0u64;
    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|e| failed(label, format!("failed to read entry {index}: {e}")))?;
        if let Some(relative) = entry.name().strip_prefix(prefix.as_str()) {
            total += entry.size();
            selected.push((index, relative.to_string(), entry.is_dir()));
        }
    }

    tracing::debug!(
        archive = %label,
        prefix = %prefix,
        entries = selected.len(),
        bytes = total,
        "extracting subtree"
    );
    progress.configure(ProgressMode::Determinate, total);
    std::fs::create_dir_all(output_dir)?;

    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut summary = ExtractionSummary::default();

    for (index, relative, is_dir) in selected {
        let relative_path = sanitize_entry_name(&relative);
        if relative_path.as_os_str().is_empty() {
            continue;
        }
        let target = output_dir.join(&relative_path);
        if is_dir {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entry = zip
            .by_index(index)
            .map_err(|e| failed(label, format!("failed to open {relative}: {e}")))?;
        let mut out = File::create(&target)?;
        loop {
            let n = entry
                .read(&mut buffer)
                .map_err(|e| failed(label, format!("failed to decompress {relative}: {e}")))?;
            if n == 0 {
                break;
            }
            out.write_all(&buffer[..n])?;
            progress.report(n as u64);
            summary.bytes += n as u64;
        }
        summary.files.push(target);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::normalize_prefix;

    #[test]
    fn prefix_gains_trailing_slash() {
        assert_eq!(normalize_prefix("overrides"), "overrides/");
        assert_eq!(normalize_prefix("overrides/"), "overrides/");
        assert_eq!(normalize_prefix(""), "");
    }
}
