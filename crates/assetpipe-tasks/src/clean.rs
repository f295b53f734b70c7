//! Output tree removal.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::TaskError;

/// Remove the output root and everything below it.
///
/// A missing output root is not an error.
pub fn clean(output_root: &Path) -> Result<(), TaskError> {
    match fs::remove_dir_all(output_root) {
        Ok(()) => {
            tracing::debug!("Removed {}", output_root.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TaskError::Remove {
            path: output_root.to_path_buf(),
            source,
        }),
    }
}
