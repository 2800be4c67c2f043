//! Turning work items into requests and output files

use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::DownloadConfig;
use crate::error::{HttpError, Result};
use crate::extraction::sanitize_entry_name;
use crate::job::Destination;

/// Request path template of a server
///
/// `{}` takes the next request parameter, `{filename}` the destination's file name, both
/// percent-encoded. `{{` and `}}` produce literal braces.
#[derive(Clone, Debug)]
pub(crate) struct UrlTemplate {
    raw: String,
}

impl UrlTemplate {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Render the request path for one work item
    pub(crate) fn render(
        &self,
        params: &[String],
        filename: Option<&str>,
    ) -> std::result::Result<String, HttpError> {
        let invalid = |reason: String| HttpError::InvalidTemplate {
            template: self.raw.clone(),
            reason,
        };

        let mut out = String::with_capacity(self.raw.len() + 32);
        let mut args = params.iter();
        let mut rest = self.raw.as_str();

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("{{") {
                out.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                out.push('}');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{}") {
                let arg = args.next().ok_or_else(|| {
                    invalid(format!("needs more than {} parameter(s)", params.len()))
                })?;
                out.push_str(&urlencoding::encode(arg));
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{filename}") {
                let name =
                    filename.ok_or_else(|| invalid("{filename} used without a path".into()))?;
                out.push_str(&urlencoding::encode(name));
                rest = after;
            } else {
                return Err(invalid(format!("unsupported placeholder at offset {pos}")));
            }
        }
        out.push_str(rest);

        if args.next().is_some() {
            return Err(invalid(format!(
                "{} parameter(s) supplied, fewer placeholders",
                params.len()
            )));
        }
        Ok(out)
    }
}

impl std::fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// File a response body is written into
pub(crate) enum Target {
    /// `<final>.part`, renamed to `final` once complete
    Part {
        file: std::fs::File,
        part_path: PathBuf,
        final_path: PathBuf,
    },
    /// Anonymous staging file for a sink callback
    Staging { file: std::fs::File },
}

impl Target {
    /// Final path of a `Path` destination, without touching the filesystem
    pub(crate) fn resolve(destination: &Destination, output_dir: &Path) -> Option<PathBuf> {
        match destination {
            Destination::Path(rel) => {
                Some(output_dir.join(sanitize_entry_name(&rel.to_string_lossy())))
            }
            Destination::Sink(_) => None,
        }
    }

    /// Open the output for `destination`
    pub(crate) fn open(
        destination: &Destination,
        output_dir: &Path,
        config: &DownloadConfig,
    ) -> Result<Self> {
        match destination {
            Destination::Path(rel) => {
                let final_path = output_dir.join(sanitize_entry_name(&rel.to_string_lossy()));
                if final_path.as_path() == output_dir {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("destination {} has no file name", rel.display()),
                    )
                    .into());
                }
                if let Some(parent) = final_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let mut part_name = final_path.clone().into_os_string();
                part_name.push(".part");
                let part_path = PathBuf::from(part_name);

                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&part_path)?;

                Ok(Target::Part {
                    file,
                    part_path,
                    final_path,
                })
            }
            Destination::Sink(_) => {
                let file = match &config.staging_dir {
                    Some(dir) => {
                        std::fs::create_dir_all(dir)?;
                        tempfile::tempfile_in(dir)?
                    }
                    None => tempfile::tempfile()?,
                };
                Ok(Target::Staging { file })
            }
        }
    }

    /// Bytes already present, i.e. the offset a range request resumes from
    pub(crate) fn existing_len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    /// Discard existing content before a full download
    pub(crate) fn truncate(&mut self) -> Result<()> {
        let file = self.file_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Path the completed file is renamed to, if any
    pub(crate) fn final_path(&self) -> Option<&Path> {
        match self {
            Target::Part { final_path, .. } => Some(final_path),
            Target::Staging { .. } => None,
        }
    }

    /// Path of the partial file, if any
    pub(crate) fn part_path(&self) -> Option<&Path> {
        match self {
            Target::Part { part_path, .. } => Some(part_path),
            Target::Staging { .. } => None,
        }
    }

    pub(crate) fn file(&self) -> &std::fs::File {
        match self {
            Target::Part { file, .. } | Target::Staging { file } => file,
        }
    }

    fn file_mut(&mut self) -> &mut std::fs::File {
        match self {
            Target::Part { file, .. } | Target::Staging { file } => file,
        }
    }

    /// Handle for async writes sharing the underlying descriptor
    pub(crate) fn async_writer(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.file().try_clone()?))
    }
}
