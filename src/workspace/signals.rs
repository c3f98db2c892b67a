use std::fs;
use std::io;
use std::path::PathBuf;

use crate::types::SignalKind;

/// One-way control channel into an agent workspace.
///
/// A signal is a marker file whose presence is the whole message. There is no
/// acknowledgement; the agent runtime polls for the file on its own schedule.
#[derive(Debug, Clone)]
pub struct SignalChannel {
    workspace: PathBuf,
}

impl SignalChannel {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn path(&self, kind: SignalKind) -> PathBuf {
        self.workspace.join(kind.file_name())
    }

    pub fn is_present(&self, kind: SignalKind) -> bool {
        self.path(kind).is_file()
    }

    /// Writes the marker. Returns false if it was already there.
    pub fn send(&self, kind: SignalKind) -> io::Result<bool> {
        let path = self.path(kind);
        if path.is_file() {
            return Ok(false);
        }
        fs::write(&path, format!("{}\n", kind.file_name()))?;
        log::info!("Wrote {} signal to {}", kind.file_name(), self.workspace.display());
        Ok(true)
    }

    /// Removes the marker. Returns false if there was nothing to remove.
    pub fn retract(&self, kind: SignalKind) -> io::Result<bool> {
        match fs::remove_file(self.path(kind)) {
            Ok(()) => {
                log::info!(
                    "Removed {} signal from {}",
                    kind.file_name(),
                    self.workspace.display()
                );
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
