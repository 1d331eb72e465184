// conflict.rs - Conflict resolution for extraction targets
//
// When an extraction target already exists on disk, the resolver decides
// whether to replace it, skip it, auto-rename the incoming file, consult an
// interactive callback, or halt the extraction. The *_ALL variants become
// sticky for the remainder of the extraction call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{TzstError, TzstResult};

/// Maximum number of `_N` candidates probed when auto-renaming.
const MAX_RENAME_ATTEMPTS: u32 = 1000;

/// How to handle a target path that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Overwrite the existing file.
    #[default]
    Replace,
    /// Leave the existing file untouched and skip the member.
    Skip,
    /// Overwrite this and every later conflict.
    ReplaceAll,
    /// Skip this and every later conflict.
    SkipAll,
    /// Extract to a `<stem>_<N><suffix>` sibling.
    AutoRename,
    /// Auto-rename this and every later conflict.
    AutoRenameAll,
    /// Consult the caller's callback (defaults to Replace without one).
    Ask,
    /// Halt the extraction cleanly.
    Exit,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictResolution::Replace => "replace",
            ConflictResolution::Skip => "skip",
            ConflictResolution::ReplaceAll => "replace_all",
            ConflictResolution::SkipAll => "skip_all",
            ConflictResolution::AutoRename => "auto_rename",
            ConflictResolution::AutoRenameAll => "auto_rename_all",
            ConflictResolution::Ask => "ask",
            ConflictResolution::Exit => "exit",
        }
    }

    /// Whether this value applies to all subsequent conflicts once chosen.
    pub fn is_sticky(self) -> bool {
        matches!(
            self,
            ConflictResolution::ReplaceAll
                | ConflictResolution::SkipAll
                | ConflictResolution::AutoRenameAll
        )
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = TzstError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(ConflictResolution::Replace),
            "skip" => Ok(ConflictResolution::Skip),
            "replace_all" => Ok(ConflictResolution::ReplaceAll),
            "skip_all" => Ok(ConflictResolution::SkipAll),
            "auto_rename" => Ok(ConflictResolution::AutoRename),
            "auto_rename_all" => Ok(ConflictResolution::AutoRenameAll),
            "ask" => Ok(ConflictResolution::Ask),
            "exit" => Ok(ConflictResolution::Exit),
            _ => Err(TzstError::InvalidArgument(format!(
                "Invalid conflict resolution '{s}'"
            ))),
        }
    }
}

/// Callback consulted for `Ask`; receives the conflicting path.
pub type ConflictCallback<'a> = dyn FnMut(&Path) -> ConflictResolution + 'a;

/// Per-extraction resolver state: the current policy and whether the
/// extraction should keep going. Created at the start of an extraction call
/// and dropped when it returns.
#[derive(Debug)]
pub struct ConflictResolutionState {
    current: ConflictResolution,
    continue_flag: bool,
}

impl ConflictResolutionState {
    pub fn new(initial: ConflictResolution) -> Self {
        ConflictResolutionState {
            current: initial,
            continue_flag: true,
        }
    }

    pub fn current(&self) -> ConflictResolution {
        self.current
    }

    pub fn should_continue(&self) -> bool {
        self.continue_flag
    }

    /// Record a produced resolution: sticky values replace the policy so
    /// later conflicts bypass the callback; `Exit` stops the extraction.
    pub fn update(&mut self, resolution: ConflictResolution) {
        if resolution == ConflictResolution::Exit {
            self.continue_flag = false;
        } else if resolution.is_sticky() {
            self.current = resolution;
        }
    }
}

/// Outcome of resolving one conflicting target path.
#[derive(Debug, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Write over the existing file at this path.
    Replace(PathBuf),
    /// Write to this freshly chosen sibling path instead.
    Renamed(PathBuf),
    /// Leave the target alone and move on to the next member.
    Skip,
    /// Stop the extraction.
    Halt,
}

/// Decide what to do about `target`, which exists on disk.
pub fn resolve_conflict(
    target: &Path,
    state: &mut ConflictResolutionState,
    callback: Option<&mut ConflictCallback<'_>>,
) -> TzstResult<ConflictOutcome> {
    let mut choice = state.current();

    if choice == ConflictResolution::Ask {
        choice = match callback {
            Some(callback) => callback(target),
            None => ConflictResolution::Replace,
        };
    }

    state.update(choice);

    match choice {
        ConflictResolution::Replace | ConflictResolution::ReplaceAll => {
            Ok(ConflictOutcome::Replace(target.to_path_buf()))
        }
        ConflictResolution::Skip | ConflictResolution::SkipAll => {
            log::debug!("skipping existing file {}", target.display());
            Ok(ConflictOutcome::Skip)
        }
        ConflictResolution::AutoRename | ConflictResolution::AutoRenameAll => {
            let renamed = unique_filename(target)?;
            log::debug!(
                "auto-renaming {} -> {}",
                target.display(),
                renamed.display()
            );
            Ok(ConflictOutcome::Renamed(renamed))
        }
        ConflictResolution::Exit => Ok(ConflictOutcome::Halt),
        // A callback that answers `ask` with `ask` gets the no-callback default
        ConflictResolution::Ask => Ok(ConflictOutcome::Replace(target.to_path_buf())),
    }
}

/// Find the first `<stem>_<N><suffix>` sibling of `path` that does not
/// exist, with N counting up from 1.
///
/// `test.txt` becomes `test_1.txt`, `README` becomes `README_1`, and a
/// dotfile like `.gitignore` becomes `.gitignore_1`. The check is a plain
/// existence probe; there is no protection against races with other
/// processes.
pub fn unique_filename(path: &Path) -> TzstResult<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        TzstError::Runtime(format!(
            "cannot auto-rename '{}': no file name",
            path.display()
        ))
    })?;

    let stem = path.file_stem().unwrap_or(file_name).to_string_lossy();
    let suffix = path.extension().map(|ext| ext.to_string_lossy());

    for index in 1..=MAX_RENAME_ATTEMPTS {
        let candidate_name = match &suffix {
            Some(ext) => format!("{stem}_{index}.{ext}"),
            None => format!("{stem}_{index}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(TzstError::Runtime(format!(
        "unable to find an available name for '{}' after {MAX_RENAME_ATTEMPTS} attempts",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolution_round_trips_through_str() {
        for value in [
            ConflictResolution::Replace,
            ConflictResolution::Skip,
            ConflictResolution::ReplaceAll,
            ConflictResolution::SkipAll,
            ConflictResolution::AutoRename,
            ConflictResolution::AutoRenameAll,
            ConflictResolution::Ask,
            ConflictResolution::Exit,
        ] {
            assert_eq!(
                ConflictResolution::from_str(value.as_str()).unwrap(),
                value
            );
        }
        assert!(ConflictResolution::from_str("merge").is_err());
    }

    #[test]
    fn test_unique_filename_basic() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("test.txt");
        fs::write(&original, "original").unwrap();

        let unique = unique_filename(&original).unwrap();
        assert_eq!(unique, dir.path().join("test_1.txt"));
        assert!(!unique.exists());
    }

    #[test]
    fn test_unique_filename_counts_past_existing_candidates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), "0").unwrap();
        fs::write(dir.path().join("test_1.txt"), "1").unwrap();
        fs::write(dir.path().join("test_2.txt"), "2").unwrap();

        let unique = unique_filename(&dir.path().join("test.txt")).unwrap();
        assert_eq!(unique, dir.path().join("test_3.txt"));
    }

    #[test]
    fn test_unique_filename_without_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README"), "readme").unwrap();

        let unique = unique_filename(&dir.path().join("README")).unwrap();
        assert_eq!(unique, dir.path().join("README_1"));
    }

    #[test]
    fn test_unique_filename_dotfile() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/").unwrap();

        let unique = unique_filename(&dir.path().join(".gitignore")).unwrap();
        assert_eq!(unique, dir.path().join(".gitignore_1"));
    }

    #[test]
    fn test_state_initial_values() {
        let state = ConflictResolutionState::new(ConflictResolution::Ask);
        assert_eq!(state.current(), ConflictResolution::Ask);
        assert!(state.should_continue());
    }

    #[test]
    fn test_state_sticky_update() {
        let mut state = ConflictResolutionState::new(ConflictResolution::Ask);
        state.update(ConflictResolution::ReplaceAll);
        assert_eq!(state.current(), ConflictResolution::ReplaceAll);
        assert!(state.should_continue());
    }

    #[test]
    fn test_state_non_sticky_update_keeps_policy() {
        let mut state = ConflictResolutionState::new(ConflictResolution::Ask);
        state.update(ConflictResolution::Replace);
        assert_eq!(state.current(), ConflictResolution::Ask);
    }

    #[test]
    fn test_state_exit_clears_continue_flag() {
        let mut state = ConflictResolutionState::new(ConflictResolution::Ask);
        state.update(ConflictResolution::Exit);
        assert!(!state.should_continue());
    }

    #[test]
    fn test_resolve_replace() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "existing").unwrap();

        let mut state = ConflictResolutionState::new(ConflictResolution::Replace);
        let outcome = resolve_conflict(&target, &mut state, None).unwrap();
        assert_eq!(outcome, ConflictOutcome::Replace(target));
    }

    #[test]
    fn test_resolve_skip_all_sticks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "existing").unwrap();

        let mut state = ConflictResolutionState::new(ConflictResolution::SkipAll);
        let outcome = resolve_conflict(&target, &mut state, None).unwrap();
        assert_eq!(outcome, ConflictOutcome::Skip);
        assert_eq!(state.current(), ConflictResolution::SkipAll);
    }

    #[test]
    fn test_resolve_auto_rename() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("existing.txt");
        fs::write(&target, "existing").unwrap();

        let mut state = ConflictResolutionState::new(ConflictResolution::AutoRename);
        let outcome = resolve_conflict(&target, &mut state, None).unwrap();
        assert_eq!(
            outcome,
            ConflictOutcome::Renamed(dir.path().join("existing_1.txt"))
        );
    }

    #[test]
    fn test_resolve_ask_without_callback_replaces() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "existing").unwrap();

        let mut state = ConflictResolutionState::new(ConflictResolution::Ask);
        let outcome = resolve_conflict(&target, &mut state, None).unwrap();
        assert_eq!(outcome, ConflictOutcome::Replace(target));
    }

    #[test]
    fn test_resolve_ask_consults_callback_and_sticks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "existing").unwrap();

        let mut asked = 0;
        let mut callback = |_path: &Path| {
            asked += 1;
            ConflictResolution::AutoRenameAll
        };
        let mut state = ConflictResolutionState::new(ConflictResolution::Ask);
        let outcome = resolve_conflict(&target, &mut state, Some(&mut callback)).unwrap();
        assert!(matches!(outcome, ConflictOutcome::Renamed(_)));
        assert_eq!(state.current(), ConflictResolution::AutoRenameAll);

        // Second conflict bypasses the callback: the sticky value answers.
        let outcome = resolve_conflict(&target, &mut state, Some(&mut callback)).unwrap();
        assert!(matches!(outcome, ConflictOutcome::Renamed(_)));
        assert_eq!(asked, 1);
    }

    #[test]
    fn test_resolve_exit_halts() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file.txt");
        fs::write(&target, "existing").unwrap();

        let mut state = ConflictResolutionState::new(ConflictResolution::Exit);
        let outcome = resolve_conflict(&target, &mut state, None).unwrap();
        assert_eq!(outcome, ConflictOutcome::Halt);
        assert!(!state.should_continue());
    }
}
