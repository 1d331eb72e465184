// lib.rs - tzst library
//
// Create, inspect, and extract `.tzst`/`.tar.zst` archives: POSIX tar
// containers compressed with Zstandard frames. The archive engine streams
// between the two codecs, applies security filters on extraction, resolves
// on-disk conflicts, and publishes new archives atomically.
//
// The four convenience functions below cover the common cases; TzstArchive
// is the underlying handle for callers that need member-level control.

pub mod archive;
pub mod cli;
pub mod conflict;
pub mod error;
pub mod file_utils;
pub mod interrupt;
pub mod planner;
pub mod security;

use std::path::{Path, PathBuf};

pub use archive::member::{MemberInfo, MemberKind, MemberRecord};
pub use archive::{
    ArchiveMode, ExtractOptions, TzstArchive, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL,
    MIN_COMPRESSION_LEVEL,
};
pub use conflict::{ConflictResolution, ConflictResolutionState};
pub use error::{TzstError, TzstResult};
pub use file_utils::move_file;
pub use planner::normalize_archive_extension;
pub use security::{ExtractFilter, FilterPolicy};

/// Create a new archive containing `files`.
///
/// The archive path gets the canonical extension if it lacks one
/// (`backup` -> `backup.tzst`, `backup.tar` -> `backup.tar.zst`). Member
/// names are relativized against the inputs' common parent directory; a
/// single input naming the current directory stores its children under
/// their bare names, excluding the archive itself and in-flight temps.
///
/// With `use_temp_file` (the default for the CLI) the archive is written to
/// a hidden sibling temp file and renamed into place on success, so an
/// aborted creation never leaves a partial archive under the final name.
///
/// Returns the final archive path.
pub fn create_archive(
    archive_path: &Path,
    files: &[PathBuf],
    compression_level: i32,
    use_temp_file: bool,
) -> TzstResult<PathBuf> {
    // Reject bad levels before touching the filesystem.
    if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&compression_level) {
        return Err(TzstError::InvalidArgument(format!(
            "Invalid compression level '{compression_level}'. Must be between 1 and 22."
        )));
    }

    let final_path = planner::normalize_archive_extension(archive_path);
    let planned = planner::plan_members(files, &final_path)?;

    log::info!(
        "creating archive {} ({} top-level member(s), level {compression_level})",
        final_path.display(),
        planned.len()
    );

    if use_temp_file {
        let temp = file_utils::stage_temp_file(&final_path)?;
        write_members(&temp, compression_level, &planned)?;
        file_utils::publish_temp_file(temp, &final_path)?;
    } else {
        write_members(&final_path, compression_level, &planned)?;
    }

    Ok(final_path)
}

fn write_members(
    path: &Path,
    compression_level: i32,
    planned: &[planner::PlannedMember],
) -> TzstResult<()> {
    let mut archive = TzstArchive::open(path, ArchiveMode::Write, compression_level, false)?;
    let added: TzstResult<()> = planned
        .iter()
        .try_for_each(|member| archive.add(&member.path, Some(&member.arcname), true));
    let closed = archive.close();
    added.and(closed)
}

/// Extract members from an archive into `destination`.
///
/// `members` selects specific members by exact name (requires non-streaming
/// mode); `None` extracts everything. Filtering, conflict handling,
/// flattening, and ownership restoration are controlled by `options`.
pub fn extract_archive(
    archive_path: &Path,
    destination: &Path,
    members: Option<&[String]>,
    streaming: bool,
    mut options: ExtractOptions<'_>,
) -> TzstResult<()> {
    let mut archive = TzstArchive::open(
        archive_path,
        ArchiveMode::Read,
        DEFAULT_COMPRESSION_LEVEL,
        streaming,
    )?;
    let extracted = match members {
        Some(members) => archive.extract_members(members, destination, &mut options),
        None => archive.extract_all(destination, &mut options),
    };
    let closed = archive.close();
    extracted.and(closed)
}

/// List the contents of an archive.
pub fn list_archive(
    archive_path: &Path,
    verbose: bool,
    streaming: bool,
) -> TzstResult<Vec<MemberInfo>> {
    let mut archive = TzstArchive::open(
        archive_path,
        ArchiveMode::Read,
        DEFAULT_COMPRESSION_LEVEL,
        streaming,
    )?;
    let listed = archive.list(verbose);
    let closed = archive.close();
    match listed {
        Ok(listing) => closed.map(|_| listing),
        Err(error) => Err(error),
    }
}

/// Test the integrity of an archive.
///
/// Returns `Ok(false)` when the archive opens but its contents fail to
/// decode; opening failures (missing file, undecodable stream) surface as
/// errors.
pub fn test_archive(archive_path: &Path, streaming: bool) -> TzstResult<bool> {
    let mut archive = TzstArchive::open(
        archive_path,
        ArchiveMode::Read,
        DEFAULT_COMPRESSION_LEVEL,
        streaming,
    )?;
    let verdict = archive.test();
    let closed = archive.close();
    match verdict {
        Ok(passed) => closed.map(|_| passed),
        Err(error) => Err(error),
    }
}
