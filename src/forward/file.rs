//! Appends buffers to a local file.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ForwardError, Forwarder};
use crate::diagnostics::{default_diagnostics, Diagnostic, SharedDiagnostics};

/// Forwards buffers to a file, appending each one verbatim.
pub struct FileForwarder {
    path: PathBuf,
    file: Mutex<File>,
    diagnostics: SharedDiagnostics,
}

impl FileForwarder {
    /// Open `path` for appending, creating it and its parent directories if
    /// needed. Existing contents are kept.
    pub fn new(
        path: impl AsRef<Path>,
        diagnostics: Option<SharedDiagnostics>,
    ) -> Result<Self, ForwardError> {
        let path = path.as_ref().to_path_buf();
        let file = open_file(&path).map_err(|source| ForwardError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            path,
            file: Mutex::new(File::from_std(file)),
            diagnostics: diagnostics.unwrap_or_else(default_diagnostics),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, buffer: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(buffer).await?;
        file.flush().await
    }
}

fn open_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
}

impl Forwarder for FileForwarder {
    async fn deliver(&self, buffer: Bytes) {
        match self.write(&buffer).await {
            Ok(()) => debug!(
                len = buffer.len(),
                path = %self.path.display(),
                "Wrote buffer"
            ),
            Err(e) => self.diagnostics.report(Diagnostic::WriteFailed {
                destination: self.path.display().to_string(),
                error: e.to_string(),
            }),
        }
    }
}
