pub mod archive;
pub mod ignore;

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::RequestError;
use crate::types::ContainerRequest;

/// A packaged build context, read once by whoever consumes the build plan.
///
/// Not re-readable. Dropping it without reading to the end is fine and
/// releases any spooled file.
pub struct BuildContext {
    reader: Box<dyn Read + Send>,
    size: Option<u64>,
}

impl BuildContext {
    pub fn new(reader: impl Read + Send + 'static, size: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            size,
        }
    }

    /// Total archive size in bytes, when known up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

impl Read for BuildContext {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Resolve the build context of a request.
///
/// A caller-supplied archive is handed out as is. Otherwise the context path
/// is made absolute (and written back to the request, so later reads agree),
/// its ignore file is loaded, and the directory is packaged.
pub fn get_context(req: &mut ContainerRequest) -> Result<BuildContext, RequestError> {
    let from_dockerfile = &mut req.from_dockerfile;
    if let Some(archive) = &from_dockerfile.context_archive {
        debug!(size = archive.len(), "using caller-supplied context archive");
        return Ok(BuildContext::new(archive.reader(), Some(archive.len() as u64)));
    }

    let context = from_dockerfile
        .context_path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let abs = std::path::absolute(&context).map_err(|source| RequestError::AbsolutePath {
        path: context.clone(),
        source,
    })?;
    from_dockerfile.context = Some(abs.clone());

    let patterns = ignore::load_ignore_patterns(&abs)?;
    archive::archive_context(&abs, &patterns)
}
