//! Atomic publication of finished output files.

use crate::error::{PipelineError, Result};
use std::path::Path;
use tempfile::NamedTempFile;

/// Mode of every published model and raster; temporary files start out owner-only.
#[cfg(unix)]
pub(crate) const PUBLISHED_MODE: u32 = 0o644;

/// Rename a fully written temporary file onto `dest` with ordinary file permissions.
pub(crate) fn publish(tmp: NamedTempFile, dest: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(PUBLISHED_MODE))
            .map_err(|e| PipelineError::io(format!("cannot set permissions on {}", tmp.path().display()), e))?;
    }

    tmp.persist(dest)
        .map_err(|e| PipelineError::io(format!("cannot publish {}", dest.display()), e.error))?;
    Ok(())
}
