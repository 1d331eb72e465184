// archive/member.rs - Typed member records
//
// Two views of a tar entry live here:
// - MemberRecord: the full metadata the security filter inspects and rewrites
//   before anything touches the filesystem.
// - MemberInfo: the listing projection returned by `list`, with the verbose
//   fields modeled as explicit options rather than a dynamic map.

use std::io::Read;

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::error::{TzstError, TzstResult};

/// Kind of a tar member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Directory,
    HardLink,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

impl MemberKind {
    pub(crate) fn from_entry_type(kind: tar::EntryType) -> Self {
        use tar::EntryType;
        match kind {
            EntryType::Directory => MemberKind::Directory,
            EntryType::Link => MemberKind::HardLink,
            EntryType::Symlink => MemberKind::Symlink,
            EntryType::Char => MemberKind::CharDevice,
            EntryType::Block => MemberKind::BlockDevice,
            EntryType::Fifo => MemberKind::Fifo,
            // Regular, Continuous, GNU sparse, and anything exotic the tar
            // reader surfaces as a payload-carrying entry
            _ => MemberKind::File,
        }
    }

    pub fn is_special(self) -> bool {
        matches!(
            self,
            MemberKind::CharDevice | MemberKind::BlockDevice | MemberKind::Fifo
        )
    }
}

/// Full metadata of one tar member, as read from its header.
///
/// `name` uses forward slashes and is what the security filter rewrites;
/// `size` is the number of payload bytes following the header.
#[derive(Debug, Clone)]
pub struct MemberRecord {
    pub name: String,
    pub kind: MemberKind,
    pub size: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: String,
    pub gname: String,
    pub mtime: u64,
    pub linkname: Option<String>,
}

impl MemberRecord {
    /// Read the metadata of `entry` into an owned record.
    pub(crate) fn from_entry<R: Read>(entry: &tar::Entry<R>) -> TzstResult<Self> {
        let header = entry.header();
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let linkname = entry
            .link_name_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let mode = header
            .mode()
            .map_err(|e| TzstError::Archive(format!("bad mode for member '{name}': {e}")))?;
        let uid = header
            .uid()
            .map_err(|e| TzstError::Archive(format!("bad uid for member '{name}': {e}")))?;
        let gid = header
            .gid()
            .map_err(|e| TzstError::Archive(format!("bad gid for member '{name}': {e}")))?;
        let mtime = header
            .mtime()
            .map_err(|e| TzstError::Archive(format!("bad mtime for member '{name}': {e}")))?;
        let uname = header
            .username()
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_string();
        let gname = header
            .groupname()
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_string();

        Ok(MemberRecord {
            name,
            kind: MemberKind::from_entry_type(header.entry_type()),
            size: entry.size(),
            mode,
            uid,
            gid,
            uname,
            gname,
            mtime,
            linkname,
        })
    }

    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == MemberKind::Directory
    }
}

/// One row of a `list` result.
///
/// The base fields are always present; the remaining fields are populated
/// only for verbose listings.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_link: bool,
    pub is_symlink: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gname: Option<String>,
}

impl MemberInfo {
    pub(crate) fn from_record(record: &MemberRecord, verbose: bool) -> Self {
        let mut info = MemberInfo {
            name: record.name.clone(),
            size: record.size,
            is_file: record.is_file(),
            is_dir: record.is_dir(),
            is_link: record.kind == MemberKind::HardLink,
            is_symlink: record.kind == MemberKind::Symlink,
            mode: None,
            uid: None,
            gid: None,
            mtime: None,
            mtime_formatted: None,
            linkname: None,
            uname: None,
            gname: None,
        };

        if verbose {
            info.mode = Some(record.mode);
            info.uid = Some(record.uid);
            info.gid = Some(record.gid);
            info.mtime = Some(record.mtime);
            info.mtime_formatted = Some(format_mtime(record.mtime));
            info.linkname = Some(record.linkname.clone().unwrap_or_default());
            info.uname = Some(record.uname.clone());
            info.gname = Some(record.gname.clone());
        }

        info
    }
}

/// Format an epoch timestamp as `YYYY-MM-DD HH:MM:SS` in local time.
fn format_mtime(mtime: u64) -> String {
    match Local.timestamp_opt(mtime as i64, 0).single() {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(kind: MemberKind) -> MemberRecord {
        MemberRecord {
            name: "docs/readme.txt".to_string(),
            kind,
            size: 42,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            uname: "user".to_string(),
            gname: "user".to_string(),
            mtime: 1_700_000_000,
            linkname: None,
        }
    }

    #[test]
    fn test_member_kind_mapping() {
        assert_eq!(
            MemberKind::from_entry_type(tar::EntryType::Regular),
            MemberKind::File
        );
        assert_eq!(
            MemberKind::from_entry_type(tar::EntryType::Directory),
            MemberKind::Directory
        );
        assert_eq!(
            MemberKind::from_entry_type(tar::EntryType::Symlink),
            MemberKind::Symlink
        );
        assert!(MemberKind::from_entry_type(tar::EntryType::Fifo).is_special());
    }

    #[test]
    fn test_minimal_listing_omits_verbose_fields() {
        let info = MemberInfo::from_record(&sample_record(MemberKind::File), false);
        assert_eq!(info.name, "docs/readme.txt");
        assert_eq!(info.size, 42);
        assert!(info.is_file);
        assert!(info.mode.is_none());
        assert!(info.mtime_formatted.is_none());
    }

    #[test]
    fn test_verbose_listing_populates_fields() {
        let info = MemberInfo::from_record(&sample_record(MemberKind::File), true);
        assert_eq!(info.mode, Some(0o644));
        assert_eq!(info.uid, Some(1000));
        let formatted = info.mtime_formatted.unwrap();
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(formatted.len(), 19);
        assert_eq!(&formatted[4..5], "-");
    }

    #[test]
    fn test_minimal_listing_serializes_without_verbose_keys() {
        let info = MemberInfo::from_record(&sample_record(MemberKind::File), false);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"name\""));
        assert!(!json.contains("\"mode\""));
        assert!(!json.contains("\"uname\""));
    }
}
