// file_utils.rs - Atomic archive publication
//
// New archives are written to a hidden temporary file in the destination's
// own directory and renamed into place once the writer has flushed every
// layer. A creation that dies partway through leaves nothing under the final
// name; the temp path's drop guard removes the partial file on every orderly
// failure path, including panics.
//
// The temp naming (leading `.`, trailing `.tmp`) doubles as the pattern the
// path planner uses to keep in-flight siblings out of new archives.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempPath;

use crate::error::{TzstError, TzstResult};

/// Reserve a hidden `.{random}.tmp` temp file next to `final_path`.
///
/// The parent directory is created if missing. The returned guard deletes
/// the file when dropped; call [`publish_temp_file`] to rename it into place
/// instead.
pub(crate) fn stage_temp_file(final_path: &Path) -> TzstResult<TempPath> {
    let parent = parent_dir(final_path);
    fs::create_dir_all(parent)?;

    let temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| {
            TzstError::Archive(format!(
                "failed to create temporary file for '{}': {e}",
                final_path.display()
            ))
        })?
        .into_temp_path();

    log::debug!("staged temporary archive {}", temp.display());
    Ok(temp)
}

/// Rename a staged temp file onto its final path, replacing any existing
/// file. On failure the temp file is deleted before the error surfaces.
pub(crate) fn publish_temp_file(temp: TempPath, final_path: &Path) -> TzstResult<()> {
    // persist() renames atomically where the OS supports it; its error
    // carries the TempPath back, whose drop removes the orphan.
    temp.persist(final_path).map_err(|e| {
        TzstError::Archive(format!(
            "failed to publish archive '{}': {}",
            final_path.display(),
            e.error
        ))
    })?;

    // The temp file was created owner-only; published archives get the
    // conventional read permissions.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(final_path, fs::Permissions::from_mode(0o644));
    }

    Ok(())
}

/// Whether a directory entry name matches the sibling-temp pattern.
pub(crate) fn is_sibling_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Move a file, falling back to copy-and-delete when rename fails (for
/// example across filesystems).
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "rename {} -> {} failed ({rename_err}); copying instead",
                src.display(),
                dst.display()
            );
            match fs::copy(src, dst) {
                Ok(_) => fs::remove_file(src),
                Err(_) => Err(rename_err),
            }
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
