//! Build context packaging.
//!
//! The context directory is walked depth-first in file-name order and every
//! entry that survives the ignore rules is appended to an uncompressed tar.
//! The archive is spooled in memory and moves to an anonymous temporary file
//! once it grows past [`SPOOL_THRESHOLD`]; dropping the returned
//! [`BuildContext`] releases it either way.

use std::fs;
use std::io::{self, Seek, SeekFrom};
use std::path::{Component, Path};

use tar::Builder;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::context::ignore::IgnorePatterns;
use crate::error::RequestError;

/// Archives larger than this are spooled to disk.
pub const SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Slash-separated form of a context-relative path, used for ignore
/// matching only. Archive entries keep the raw name.
fn slash_path(rel: &Path) -> String {
    let segments: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    segments.join("/")
}

/// Package `root` as a tar stream, leaving out every path `patterns` excludes.
///
/// An excluded directory is skipped wholesale unless a `!` rule could
/// re-include something below it; then the walk descends and only the
/// excluded entries themselves are left out.
pub fn archive_context(root: &Path, patterns: &IgnorePatterns) -> Result<BuildContext, RequestError> {
    let metadata = fs::metadata(root).map_err(|e| RequestError::archive(root, e))?;
    if !metadata.is_dir() {
        return Err(RequestError::archive(
            root,
            io::Error::other(format!("{} is not a directory", root.display())),
        ));
    }

    let mut builder = Builder::new(tempfile::spooled_tempfile(SPOOL_THRESHOLD));
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            RequestError::archive(path, e)
        })?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = slash_path(rel);

        if patterns.matches(&name) {
            if entry.file_type().is_dir()
                && !(patterns.has_negations() && patterns.may_reinclude_under(&name))
            {
                walker.skip_current_dir();
            }
            trace!(path = %name, "excluded from build context");
            continue;
        }

        builder
            .append_path_with_name(entry.path(), rel)
            .map_err(|e| RequestError::archive(entry.path(), e))?;
        entries += 1;
    }

    let mut spool = builder
        .into_inner()
        .map_err(|e| RequestError::archive(root, e))?;
    let size = spool
        .seek(SeekFrom::End(0))
        .and_then(|size| spool.rewind().map(|_| size))
        .map_err(|e| RequestError::archive(root, e))?;

    debug!(root = %root.display(), entries, size, "packaged build context");
    Ok(BuildContext::new(spool, Some(size)))
}
