// archive/mod.rs - The tzst archive handle
//
// A TzstArchive owns the tar <-> zstd pipeline for one archive file. Read
// mode either buffers the whole decompressed image in memory (random access,
// restartable iteration) or wraps the decoder in a sequential tar reader
// (streaming mode: bounded memory, forward-only). Write mode layers a tar
// builder over a zstd encoder over the file.
//
// State machine: open() -> {reading | writing} -> close() -> closed. Any
// operation against a closed handle or in the wrong mode fails with a
// Runtime error; a handle is never reopened.

pub mod member;
pub(crate) mod pipeline;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::conflict::{
    resolve_conflict, ConflictCallback, ConflictOutcome, ConflictResolution,
    ConflictResolutionState,
};
use crate::error::{TzstError, TzstResult};
use crate::interrupt;
use crate::security::ExtractFilter;
use self::member::{MemberInfo, MemberKind, MemberRecord};

/// Lowest accepted Zstandard compression level.
pub const MIN_COMPRESSION_LEVEL: i32 = 1;
/// Highest accepted Zstandard compression level.
pub const MAX_COMPRESSION_LEVEL: i32 = 22;
/// Default compression level (balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Mode an archive handle is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    Read,
    Write,
    /// Rejected at open time; kept in the type so callers get the
    /// explanatory NotImplemented error instead of a parse failure.
    Append,
}

impl FromStr for ArchiveMode {
    type Err = TzstError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" | "read" => Ok(ArchiveMode::Read),
            "w" | "write" => Ok(ArchiveMode::Write),
            "a" | "append" => Ok(ArchiveMode::Append),
            _ => Err(TzstError::InvalidArgument(format!(
                "Invalid mode '{s}'. Must be one of: r, w, a"
            ))),
        }
    }
}

/// Options controlling extraction.
pub struct ExtractOptions<'cb> {
    /// Security filter applied to every member (default: `data`).
    pub filter: ExtractFilter,
    /// Policy for targets that already exist (default: replace).
    pub conflict_resolution: ConflictResolution,
    /// Callback consulted when the policy is `ask`.
    pub on_conflict: Option<Box<ConflictCallback<'cb>>>,
    /// Restore numeric uid/gid on Unix (best effort, needs privileges).
    pub numeric_owner: bool,
    /// Drop directory parts and extract file members into the destination
    /// root.
    pub flatten: bool,
}

impl Default for ExtractOptions<'_> {
    fn default() -> Self {
        ExtractOptions {
            filter: ExtractFilter::default(),
            conflict_resolution: ConflictResolution::Replace,
            on_conflict: None,
            numeric_owner: false,
            flatten: false,
        }
    }
}

type StreamReader = tar::Archive<zstd::Decoder<'static, BufReader<File>>>;
type TarWriter = tar::Builder<zstd::Encoder<'static, BufWriter<File>>>;

enum ReadBacking {
    /// Whole decompressed image held in memory; every operation reads it
    /// through a fresh tar reader, so iteration is restartable and members
    /// are addressable by name.
    Buffered(Vec<u8>),
    /// Sequential reader; `None` once an operation has consumed it.
    Streaming(Option<StreamReader>),
}

enum HandleState {
    Reading(ReadBacking),
    Writing(TarWriter),
    Closed,
}

/// Handle for one `.tzst`/`.tar.zst` archive.
///
/// Obtained via [`TzstArchive::open`]; released via [`TzstArchive::close`]
/// (drop is a best-effort safety net that cannot report flush errors, so
/// explicit close is the supported way to finish a written archive).
pub struct TzstArchive {
    path: PathBuf,
    mode: ArchiveMode,
    compression_level: i32,
    streaming: bool,
    state: HandleState,
}

impl std::fmt::Debug for TzstArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TzstArchive")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("compression_level", &self.compression_level)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl TzstArchive {
    /// Open an archive for reading or writing.
    ///
    /// `compression_level` must be within [1, 22]; `streaming` is only
    /// meaningful for read mode. Append mode is rejected: create a new
    /// archive, recreate it from scratch, or append to an uncompressed tar
    /// and recompress.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: ArchiveMode,
        compression_level: i32,
        streaming: bool,
    ) -> TzstResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !(MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&compression_level) {
            return Err(TzstError::InvalidArgument(format!(
                "Invalid compression level '{compression_level}'. Must be between 1 and 22."
            )));
        }
        if mode == ArchiveMode::Append {
            return Err(TzstError::NotImplemented(
                "Append mode is not supported for compressed tar archives. \
                 Create a new archive, recreate it from scratch, or append to \
                 an uncompressed tar and recompress it."
                    .to_string(),
            ));
        }

        let state = match mode {
            ArchiveMode::Read => {
                let file = File::open(&path).map_err(|e| open_error(&path, e))?;
                if streaming {
                    let decoder = pipeline::streaming_decoder(file)?;
                    HandleState::Reading(ReadBacking::Streaming(Some(tar::Archive::new(decoder))))
                } else {
                    let data = pipeline::decompress_to_memory(file)?;
                    HandleState::Reading(ReadBacking::Buffered(data))
                }
            }
            ArchiveMode::Write => {
                let file = File::create(&path).map_err(|e| {
                    TzstError::Archive(format!(
                        "failed to create archive '{}': {e}",
                        path.display()
                    ))
                })?;
                let encoder = pipeline::encoder(file, compression_level)?;
                let mut builder = tar::Builder::new(encoder);
                builder.follow_symlinks(false);
                HandleState::Writing(builder)
            }
            ArchiveMode::Append => unreachable!(),
        };

        log::debug!(
            "opened archive {} ({mode:?}, level {compression_level}, streaming {streaming})",
            path.display()
        );

        Ok(TzstArchive {
            path,
            mode,
            compression_level,
            streaming,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> ArchiveMode {
        self.mode
    }

    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Add a file, directory, or symlink to the archive under `arcname`
    /// (defaults to the path as given). Directories descend depth-first when
    /// `recursive`.
    pub fn add<P: AsRef<Path>>(
        &mut self,
        path: P,
        arcname: Option<&Path>,
        recursive: bool,
    ) -> TzstResult<()> {
        let path = path.as_ref();
        let builder = self.writer()?;
        interrupt::check()?;

        let metadata = fs::symlink_metadata(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TzstError::NotFound(path.to_path_buf())
            } else {
                TzstError::Archive(format!("cannot access '{}': {e}", path.display()))
            }
        })?;

        let arcname = arcname.unwrap_or(path);
        let added = if metadata.is_dir() {
            if recursive {
                builder.append_dir_all(arcname, path)
            } else {
                builder.append_dir(arcname, path)
            }
        } else {
            builder.append_path_with_name(path, arcname)
        };

        added.map_err(|e| TzstError::Archive(format!("failed to add '{}': {e}", path.display())))
    }

    /// All member records, in archive order.
    ///
    /// Restartable in non-streaming mode; in streaming mode this consumes
    /// the single forward pass.
    pub fn members(&mut self) -> TzstResult<Vec<MemberRecord>> {
        match self.read_backing()? {
            ReadBacking::Buffered(data) => {
                let mut archive = tar::Archive::new(Cursor::new(&data[..]));
                collect_members(&mut archive)
            }
            ReadBacking::Streaming(slot) => {
                let mut archive = slot.take().ok_or_else(stream_consumed_error)?;
                collect_members(&mut archive)
            }
        }
    }

    /// Project each member to a listing record.
    pub fn list(&mut self, verbose: bool) -> TzstResult<Vec<MemberInfo>> {
        Ok(self
            .members()?
            .iter()
            .map(|record| MemberInfo::from_record(record, verbose))
            .collect())
    }

    /// Payload bytes of the file member called `name`, or `None` when no
    /// file member has that name. Requires non-streaming mode.
    pub fn read_member(&mut self, name: &str) -> TzstResult<Option<Vec<u8>>> {
        match self.read_backing()? {
            ReadBacking::Buffered(data) => {
                let mut archive = tar::Archive::new(Cursor::new(&data[..]));
                for entry in archive.entries().map_err(tar_read_error)? {
                    interrupt::check()?;
                    let mut entry = entry.map_err(tar_read_error)?;
                    let record = MemberRecord::from_entry(&entry)?;
                    if record.name == name {
                        if !record.is_file() {
                            return Ok(None);
                        }
                        let mut payload = Vec::with_capacity(record.size as usize);
                        entry.read_to_end(&mut payload).map_err(tar_read_error)?;
                        return Ok(Some(payload));
                    }
                }
                Ok(None)
            }
            ReadBacking::Streaming(_) => Err(streaming_seek_error("read a member's payload")),
        }
    }

    /// Extract every member into `destination`.
    pub fn extract_all(
        &mut self,
        destination: &Path,
        options: &mut ExtractOptions<'_>,
    ) -> TzstResult<()> {
        self.extract_inner(destination, None, options)
    }

    /// Extract the single member called `member` into `destination`.
    ///
    /// Selecting a member requires random access, so this fails in
    /// streaming mode.
    pub fn extract_one(
        &mut self,
        member: &str,
        destination: &Path,
        options: &mut ExtractOptions<'_>,
    ) -> TzstResult<()> {
        let selection = [member.to_string()];
        self.extract_inner(destination, Some(&selection), options)
    }

    /// Extract the named members into `destination`. Fails with `NotFound`
    /// if any requested name is absent from the archive.
    pub fn extract_members(
        &mut self,
        members: &[String],
        destination: &Path,
        options: &mut ExtractOptions<'_>,
    ) -> TzstResult<()> {
        self.extract_inner(destination, Some(members), options)
    }

    fn extract_inner(
        &mut self,
        destination: &Path,
        selection: Option<&[String]>,
        options: &mut ExtractOptions<'_>,
    ) -> TzstResult<()> {
        if self.streaming && selection.is_some() {
            return Err(streaming_seek_error("extract specific members"));
        }

        fs::create_dir_all(destination).map_err(|e| {
            TzstError::Archive(format!(
                "failed to create destination '{}': {e}",
                destination.display()
            ))
        })?;

        match self.read_backing()? {
            ReadBacking::Buffered(data) => {
                let mut archive = tar::Archive::new(Cursor::new(&data[..]));
                extract_entries(&mut archive, destination, selection, options)
            }
            ReadBacking::Streaming(slot) => {
                let mut archive = slot.take().ok_or_else(stream_consumed_error)?;
                extract_entries(&mut archive, destination, selection, options)
            }
        }
    }

    /// Verify the archive: walk every member and, in non-streaming mode,
    /// read every file payload to its end. Returns false on any
    /// decompression or tar error.
    ///
    /// In streaming mode only the header walk is performed; the sequential
    /// reader still consumes the payload bytes while advancing, so frame
    /// corruption anywhere in the stream is caught, but this is a weaker
    /// per-file check than the non-streaming mode's full payload read.
    pub fn test(&mut self) -> TzstResult<bool> {
        match self.read_backing()? {
            ReadBacking::Buffered(data) => {
                let mut archive = tar::Archive::new(Cursor::new(&data[..]));
                let entries = match archive.entries() {
                    Ok(entries) => entries,
                    Err(_) => return Ok(false),
                };
                for entry in entries {
                    interrupt::check()?;
                    let mut entry = match entry {
                        Ok(entry) => entry,
                        Err(_) => return Ok(false),
                    };
                    if entry.header().entry_type().is_file()
                        && io::copy(&mut entry, &mut io::sink()).is_err()
                    {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ReadBacking::Streaming(slot) => {
                let mut archive = slot.take().ok_or_else(stream_consumed_error)?;
                let entries = match archive.entries() {
                    Ok(entries) => entries,
                    Err(_) => return Ok(false),
                };
                for entry in entries {
                    interrupt::check()?;
                    if entry.is_err() {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Close the handle, releasing the tar layer, the zstd layer, and the
    /// file, in that order. Every layer is released even if an earlier one
    /// fails; the first error is surfaced. Idempotent.
    pub fn close(&mut self) -> TzstResult<()> {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Writing(builder) => {
                // into_inner finishes the tar stream (terminator blocks);
                // finish() flushes the zstd frame; the file closes on drop.
                let mut first_error = None;
                match builder.into_inner() {
                    Ok(encoder) => match encoder.finish() {
                        Ok(mut writer) => {
                            if let Err(e) = writer.flush() {
                                first_error = Some(TzstError::Archive(format!(
                                    "failed to flush archive '{}': {e}",
                                    self.path.display()
                                )));
                            }
                        }
                        Err(e) => {
                            first_error = Some(TzstError::Compression(format!(
                                "failed to finish zstd frame for '{}': {e}",
                                self.path.display()
                            )));
                        }
                    },
                    Err(e) => {
                        first_error = Some(TzstError::Archive(format!(
                            "failed to finish tar stream for '{}': {e}",
                            self.path.display()
                        )));
                    }
                }
                match first_error {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
            // Read layers unwind on drop; nothing to flush.
            HandleState::Reading(_) | HandleState::Closed => Ok(()),
        }
    }

    fn read_backing(&mut self) -> TzstResult<&mut ReadBacking> {
        match &mut self.state {
            HandleState::Reading(backing) => Ok(backing),
            HandleState::Writing(_) => {
                Err(TzstError::Runtime("Archive not open for reading".to_string()))
            }
            HandleState::Closed => Err(TzstError::Runtime("Archive not open".to_string())),
        }
    }

    fn writer(&mut self) -> TzstResult<&mut TarWriter> {
        match &mut self.state {
            HandleState::Writing(builder) => Ok(builder),
            HandleState::Reading(_) => {
                Err(TzstError::Runtime("Archive not open for writing".to_string()))
            }
            HandleState::Closed => Err(TzstError::Runtime("Archive not open".to_string())),
        }
    }
}

impl Drop for TzstArchive {
    fn drop(&mut self) {
        if matches!(self.state, HandleState::Writing(_)) {
            log::warn!(
                "archive handle for {} dropped without close; flushing best-effort",
                self.path.display()
            );
            let _ = self.close();
        }
    }
}

fn open_error(path: &Path, error: io::Error) -> TzstError {
    if error.kind() == io::ErrorKind::NotFound {
        TzstError::NotFound(path.to_path_buf())
    } else {
        TzstError::Archive(format!("failed to open archive '{}': {error}", path.display()))
    }
}

fn tar_read_error(error: io::Error) -> TzstError {
    TzstError::Archive(format!("failed to read archive: {error}"))
}

fn stream_consumed_error() -> TzstError {
    TzstError::Runtime(
        "archive stream already consumed; reopen the archive to read it again".to_string(),
    )
}

fn streaming_seek_error(operation: &str) -> TzstError {
    TzstError::Runtime(format!(
        "cannot {operation} in streaming mode; open the archive in \
         non-streaming mode for random access"
    ))
}

fn collect_members<R: Read>(archive: &mut tar::Archive<R>) -> TzstResult<Vec<MemberRecord>> {
    let mut members = Vec::new();
    for entry in archive.entries().map_err(tar_read_error)? {
        interrupt::check()?;
        let entry = entry.map_err(tar_read_error)?;
        members.push(MemberRecord::from_entry(&entry)?);
    }
    Ok(members)
}

fn extract_entries<R: Read>(
    archive: &mut tar::Archive<R>,
    destination: &Path,
    selection: Option<&[String]>,
    options: &mut ExtractOptions<'_>,
) -> TzstResult<()> {
    let mut state = ConflictResolutionState::new(options.conflict_resolution);
    let mut matched: HashSet<&str> = HashSet::new();
    let mut halted = false;

    for entry in archive.entries().map_err(tar_read_error)? {
        interrupt::check()?;
        let mut entry = entry.map_err(tar_read_error)?;
        let record = MemberRecord::from_entry(&entry)?;

        if let Some(selection) = selection {
            match selection.iter().find(|name| **name == record.name) {
                Some(name) => {
                    matched.insert(name.as_str());
                }
                None => continue,
            }
        }

        let filtered = match options.filter.apply(&record, destination)? {
            Some(filtered) => filtered,
            None => continue,
        };

        if options.flatten && filtered.kind != MemberKind::File {
            continue;
        }
        let target = if options.flatten {
            match Path::new(&filtered.name).file_name() {
                Some(file_name) => destination.join(file_name),
                None => continue,
            }
        } else {
            destination.join(&filtered.name)
        };

        // Conflicts apply to anything that would overwrite an existing
        // non-directory entry; symlink_metadata also sees dangling links.
        let target = if target.symlink_metadata().is_ok()
            && filtered.kind != MemberKind::Directory
        {
            match resolve_conflict(&target, &mut state, options.on_conflict.as_deref_mut())? {
                ConflictOutcome::Replace(path) => {
                    let _ = fs::remove_file(&path);
                    path
                }
                ConflictOutcome::Renamed(path) => path,
                ConflictOutcome::Skip => continue,
                ConflictOutcome::Halt => {
                    halted = true;
                    break;
                }
            }
        } else {
            target
        };

        write_member(&mut entry, &filtered, destination, &target, options.numeric_owner)?;
    }

    if !halted {
        if let Some(selection) = selection {
            if let Some(missing) =
                selection.iter().find(|name| !matched.contains(name.as_str()))
            {
                return Err(TzstError::NotFound(PathBuf::from(missing)));
            }
        }
    }

    Ok(())
}

fn write_member<R: Read>(
    entry: &mut tar::Entry<R>,
    filtered: &MemberRecord,
    destination: &Path,
    target: &Path,
    numeric_owner: bool,
) -> TzstResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            TzstError::Archive(format!(
                "failed to create directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    match filtered.kind {
        MemberKind::Directory => {
            fs::create_dir_all(target).map_err(|e| {
                TzstError::Archive(format!(
                    "failed to create directory '{}': {e}",
                    target.display()
                ))
            })?;
            set_mode(target, filtered.mode);
        }
        MemberKind::File => {
            entry.unpack(target).map_err(|e| {
                TzstError::Archive(format!(
                    "failed to extract '{}': {e}",
                    filtered.name
                ))
            })?;
            set_mode(target, filtered.mode);
        }
        MemberKind::Symlink => {
            let linkname = link_target(filtered)?;
            create_symlink(&linkname, target).map_err(|e| {
                TzstError::Archive(format!(
                    "failed to create symlink '{}': {e}",
                    target.display()
                ))
            })?;
        }
        MemberKind::HardLink => {
            // Hard link targets name another member, resolved from the
            // destination root.
            let linkname = link_target(filtered)?;
            let source = destination.join(linkname.trim_start_matches(['/', '\\']));
            fs::hard_link(&source, target).map_err(|e| {
                TzstError::Archive(format!(
                    "failed to create hard link '{}': {e}",
                    target.display()
                ))
            })?;
        }
        // Only reachable when the filter allows special files; defer to the
        // tar layer's platform support.
        MemberKind::CharDevice | MemberKind::BlockDevice | MemberKind::Fifo => {
            entry.unpack(target).map_err(|e| {
                TzstError::Archive(format!(
                    "failed to extract special file '{}': {e}",
                    filtered.name
                ))
            })?;
        }
    }

    if numeric_owner {
        restore_owner(target, filtered);
    }

    Ok(())
}

fn link_target(filtered: &MemberRecord) -> TzstResult<String> {
    filtered
        .linkname
        .clone()
        .filter(|linkname| !linkname.is_empty())
        .ok_or_else(|| {
            TzstError::Archive(format!("link member '{}' has no target", filtered.name))
        })
}

#[cfg(unix)]
fn create_symlink(linkname: &str, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(linkname, target)
}

#[cfg(windows)]
fn create_symlink(linkname: &str, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(linkname, target)
}

#[cfg(unix)]
fn set_mode(target: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777)) {
        log::debug!("failed to set mode on {}: {e}", target.display());
    }
}

#[cfg(not(unix))]
fn set_mode(_target: &Path, _mode: u32) {}

#[cfg(unix)]
fn restore_owner(target: &Path, filtered: &MemberRecord) {
    if let Err(e) = std::os::unix::fs::chown(
        target,
        Some(filtered.uid as u32),
        Some(filtered.gid as u32),
    ) {
        log::debug!("failed to restore owner on {}: {e}", target.display());
    }
}

#[cfg(not(unix))]
fn restore_owner(_target: &Path, _filtered: &MemberRecord) {}
