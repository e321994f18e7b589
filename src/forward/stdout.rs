//! Writes buffers to standard output.

use std::io;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::Forwarder;
use crate::diagnostics::{default_diagnostics, Diagnostic, SharedDiagnostics};

/// Forwards buffers to the process's standard output.
pub struct StdoutForwarder {
    diagnostics: SharedDiagnostics,
}

impl StdoutForwarder {
    pub fn new(diagnostics: Option<SharedDiagnostics>) -> Self {
        Self {
            diagnostics: diagnostics.unwrap_or_else(default_diagnostics),
        }
    }

    async fn write(&self, buffer: &[u8]) -> io::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(buffer).await?;
        stdout.flush().await
    }
}

impl Default for StdoutForwarder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Forwarder for StdoutForwarder {
    async fn deliver(&self, buffer: Bytes) {
        match self.write(&buffer).await {
            Ok(()) => debug!(len = buffer.len(), "Wrote buffer to stdout"),
            Err(e) => self.diagnostics.report(Diagnostic::WriteFailed {
                destination: "stdout".to_string(),
                error: e.to_string(),
            }),
        }
    }
}
