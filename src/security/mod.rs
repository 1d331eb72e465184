// security/mod.rs - Extraction security filters
//
// Every member passes through a filter before anything is written to disk.
// The three named policies mirror classic tar hardening levels:
// - fully_trusted: identity, honor everything in the archive
// - tar: strip leading separators, reject absolute paths and destination
//   escapes (for names and link targets), drop setuid/setgid/sticky and
//   group/other write bits
// - data (default): everything `tar` does, plus reject device/FIFO members
//   and normalize ownership and permissions for data-only payloads
//
// Path-escape detection is purely lexical: the destination and the joined
// member path are normalized and compared at path-component granularity,
// so `/a/b` is never treated as a prefix of `/a/bb`.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::archive::member::{MemberKind, MemberRecord};
use crate::error::{TzstError, TzstResult};

/// Named security policy applied to each member during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicy {
    /// Honor all metadata as stored. Only for archives you created yourself.
    FullyTrusted,
    /// Refuse path escapes and strip dangerous permission bits.
    Tar,
    /// Safest choice for archives from untrusted sources.
    #[default]
    Data,
}

impl FilterPolicy {
    pub fn name(self) -> &'static str {
        match self {
            FilterPolicy::FullyTrusted => "fully_trusted",
            FilterPolicy::Tar => "tar",
            FilterPolicy::Data => "data",
        }
    }
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterPolicy {
    type Err = TzstError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fully_trusted" => Ok(FilterPolicy::FullyTrusted),
            "tar" => Ok(FilterPolicy::Tar),
            "data" => Ok(FilterPolicy::Data),
            _ => Err(TzstError::InvalidArgument(format!(
                "Invalid filter '{s}'. Must be one of: data, tar, fully_trusted"
            ))),
        }
    }
}

/// Caller-supplied filter function.
///
/// Returns the rewritten member, `Ok(None)` to skip the member, or an error
/// to reject it - the same contract the built-in policies follow.
pub type CustomFilter = Box<dyn Fn(&MemberRecord, &Path) -> TzstResult<Option<MemberRecord>>>;

/// Filter applied during extraction: a named policy or a custom function.
pub enum ExtractFilter {
    Policy(FilterPolicy),
    Custom(CustomFilter),
}

impl Default for ExtractFilter {
    fn default() -> Self {
        ExtractFilter::Policy(FilterPolicy::Data)
    }
}

impl From<FilterPolicy> for ExtractFilter {
    fn from(policy: FilterPolicy) -> Self {
        ExtractFilter::Policy(policy)
    }
}

impl fmt::Debug for ExtractFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractFilter::Policy(policy) => write!(f, "ExtractFilter::Policy({policy})"),
            ExtractFilter::Custom(_) => f.write_str("ExtractFilter::Custom(..)"),
        }
    }
}

impl ExtractFilter {
    /// Run the filter over one member.
    pub fn apply(
        &self,
        member: &MemberRecord,
        destination: &Path,
    ) -> TzstResult<Option<MemberRecord>> {
        match self {
            ExtractFilter::Policy(policy) => apply_policy(*policy, member, destination),
            ExtractFilter::Custom(filter) => filter(member, destination),
        }
    }
}

fn apply_policy(
    policy: FilterPolicy,
    member: &MemberRecord,
    destination: &Path,
) -> TzstResult<Option<MemberRecord>> {
    if policy == FilterPolicy::FullyTrusted {
        return Ok(Some(member.clone()));
    }

    let mut filtered = member.clone();

    // Leading separators are stripped rather than rejected so archives that
    // merely stored absolute names still extract under the destination.
    let stripped = member.name.trim_start_matches(['/', '\\']);
    if stripped.is_empty() || Path::new(stripped).is_absolute() {
        return Err(TzstError::AbsolutePath {
            name: member.name.clone(),
        });
    }
    filtered.name = stripped.to_string();

    let dest_abs = normalize_path(&absolutize(destination)?);
    let target = normalize_path(&dest_abs.join(&filtered.name));
    if !target.starts_with(&dest_abs) {
        return Err(TzstError::OutsideDestination {
            name: member.name.clone(),
        });
    }

    if matches!(filtered.kind, MemberKind::HardLink | MemberKind::Symlink) {
        check_link_target(&filtered, &dest_abs)?;
    }

    // setuid, setgid, sticky, group-write, other-write
    filtered.mode &= !0o7022;

    if policy == FilterPolicy::Data {
        match filtered.kind {
            MemberKind::CharDevice | MemberKind::BlockDevice | MemberKind::Fifo => {
                return Err(TzstError::SpecialFile {
                    name: member.name.clone(),
                });
            }
            MemberKind::File | MemberKind::HardLink => {
                filtered.mode |= 0o600;
                if filtered.mode & 0o100 == 0 {
                    filtered.mode &= !0o011;
                }
            }
            MemberKind::Directory | MemberKind::Symlink => {
                filtered.mode = 0o755;
            }
        }
        filtered.uid = 0;
        filtered.gid = 0;
        filtered.uname = "root".to_string();
        filtered.gname = "root".to_string();
    }

    Ok(Some(filtered))
}

fn check_link_target(member: &MemberRecord, dest_abs: &Path) -> TzstResult<()> {
    let linkname = match member.linkname.as_deref() {
        Some(linkname) if !linkname.is_empty() => linkname,
        _ => return Ok(()),
    };

    if linkname.starts_with(['/', '\\']) || Path::new(linkname).is_absolute() {
        return Err(TzstError::AbsoluteLink {
            name: member.name.clone(),
            linkname: linkname.to_string(),
        });
    }

    // Symlink targets resolve relative to the member's directory; hard link
    // targets name another member, so they resolve from the destination root.
    let base = match member.kind {
        MemberKind::Symlink => match Path::new(&member.name).parent() {
            Some(parent) => dest_abs.join(parent),
            None => dest_abs.to_path_buf(),
        },
        _ => dest_abs.to_path_buf(),
    };

    let resolved = normalize_path(&base.join(linkname));
    if !resolved.starts_with(dest_abs) {
        return Err(TzstError::LinkOutsideDestination {
            name: member.name.clone(),
            linkname: linkname.to_string(),
        });
    }

    Ok(())
}

/// Make a path absolute against the current working directory without
/// touching the filesystem beyond the cwd lookup.
pub(crate) fn absolutize(path: &Path) -> TzstResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Normalize a path by resolving `..` and `.` lexically, without requiring
/// the path to exist.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            _ => {
                result.push(component);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_member(name: &str) -> MemberRecord {
        MemberRecord {
            name: name.to_string(),
            kind: MemberKind::File,
            size: 0,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            uname: "user".to_string(),
            gname: "user".to_string(),
            mtime: 0,
            linkname: None,
        }
    }

    fn link_member(name: &str, linkname: &str, kind: MemberKind) -> MemberRecord {
        MemberRecord {
            linkname: Some(linkname.to_string()),
            kind,
            ..file_member(name)
        }
    }

    #[test]
    fn test_normalize_path() {
        let path = PathBuf::from("/home/user/../user/./docs/file.txt");
        assert_eq!(
            normalize_path(&path),
            PathBuf::from("/home/user/docs/file.txt")
        );
    }

    #[test]
    fn test_prefix_check_is_component_granular() {
        // "/a/bb" must not count as inside "/a/b"
        let inside = normalize_path(Path::new("/a/bb"));
        assert!(!inside.starts_with(Path::new("/a/b")));
    }

    #[test]
    fn test_fully_trusted_is_identity() {
        let member = file_member("/abs/evil");
        let filtered = apply_policy(FilterPolicy::FullyTrusted, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.name, "/abs/evil");
        assert_eq!(filtered.mode, 0o644);
    }

    #[test]
    fn test_tar_strips_leading_slash() {
        let member = file_member("/etc/config");
        let filtered = apply_policy(FilterPolicy::Tar, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.name, "etc/config");
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let member = file_member("../evil.sh");
        let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
        assert!(matches!(
            result,
            Err(TzstError::OutsideDestination { .. })
        ));
    }

    #[test]
    fn test_nested_traversal_rejected() {
        let member = file_member("safe/../../evil.sh");
        let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
        assert!(matches!(
            result,
            Err(TzstError::OutsideDestination { .. })
        ));
    }

    #[test]
    fn test_internal_dotdot_allowed_when_it_stays_inside() {
        let member = file_member("a/b/../c.txt");
        let filtered = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.name, "a/b/../c.txt");
    }

    #[test]
    fn test_absolute_symlink_rejected() {
        let member = link_member("link", "/etc/passwd", MemberKind::Symlink);
        let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
        assert!(matches!(result, Err(TzstError::AbsoluteLink { .. })));
    }

    #[test]
    fn test_escaping_symlink_rejected() {
        let member = link_member("d/link", "../../outside", MemberKind::Symlink);
        let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
        assert!(matches!(
            result,
            Err(TzstError::LinkOutsideDestination { .. })
        ));
    }

    #[test]
    fn test_symlink_inside_destination_allowed() {
        let member = link_member("d/link", "../target.txt", MemberKind::Symlink);
        let filtered = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.linkname.as_deref(), Some("../target.txt"));
    }

    #[test]
    fn test_hard_link_resolves_from_destination_root() {
        let member = link_member("d/link", "../outside", MemberKind::HardLink);
        let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
        assert!(matches!(
            result,
            Err(TzstError::LinkOutsideDestination { .. })
        ));

        let member = link_member("d/link", "other.txt", MemberKind::HardLink);
        assert!(apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out")).is_ok());
    }

    #[test]
    fn test_data_rejects_special_files() {
        for kind in [
            MemberKind::CharDevice,
            MemberKind::BlockDevice,
            MemberKind::Fifo,
        ] {
            let member = MemberRecord {
                kind,
                ..file_member("dev/node")
            };
            let result = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"));
            assert!(matches!(result, Err(TzstError::SpecialFile { .. })));
        }
    }

    #[test]
    fn test_tar_allows_special_files() {
        let member = MemberRecord {
            kind: MemberKind::Fifo,
            ..file_member("dev/pipe")
        };
        assert!(apply_policy(FilterPolicy::Tar, &member, Path::new("/tmp/out")).is_ok());
    }

    #[test]
    fn test_tar_clears_dangerous_mode_bits() {
        let member = MemberRecord {
            mode: 0o6777,
            ..file_member("bin/tool")
        };
        let filtered = apply_policy(FilterPolicy::Tar, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.mode, 0o755);
    }

    #[test]
    fn test_data_normalizes_file_mode_and_ownership() {
        let member = MemberRecord {
            mode: 0o011,
            ..file_member("data.bin")
        };
        let filtered = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        // owner rw forced on, group/other execute cleared without owner x
        assert_eq!(filtered.mode, 0o600);
        assert_eq!(filtered.uid, 0);
        assert_eq!(filtered.gid, 0);
        assert_eq!(filtered.uname, "root");
        assert_eq!(filtered.gname, "root");
    }

    #[test]
    fn test_data_keeps_group_execute_for_executables() {
        let member = MemberRecord {
            mode: 0o755,
            ..file_member("bin/tool")
        };
        let filtered = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.mode, 0o755);
    }

    #[test]
    fn test_data_sets_directory_mode() {
        let member = MemberRecord {
            kind: MemberKind::Directory,
            mode: 0o700,
            ..file_member("d")
        };
        let filtered = apply_policy(FilterPolicy::Data, &member, Path::new("/tmp/out"))
            .unwrap()
            .unwrap();
        assert_eq!(filtered.mode, 0o755);
    }

    #[test]
    fn test_filter_policy_from_str() {
        assert_eq!(
            FilterPolicy::from_str("data").unwrap(),
            FilterPolicy::Data
        );
        assert_eq!(FilterPolicy::from_str("tar").unwrap(), FilterPolicy::Tar);
        assert_eq!(
            FilterPolicy::from_str("fully_trusted").unwrap(),
            FilterPolicy::FullyTrusted
        );
        assert!(matches!(
            FilterPolicy::from_str("paranoid"),
            Err(TzstError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_custom_filter_can_skip_members() {
        let filter = ExtractFilter::Custom(Box::new(|member, _dest| {
            if member.name.ends_with(".log") {
                Ok(None)
            } else {
                Ok(Some(member.clone()))
            }
        }));

        let skipped = filter
            .apply(&file_member("debug.log"), Path::new("/tmp/out"))
            .unwrap();
        assert!(skipped.is_none());

        let kept = filter
            .apply(&file_member("data.txt"), Path::new("/tmp/out"))
            .unwrap();
        assert_eq!(kept.unwrap().name, "data.txt");
    }
}
