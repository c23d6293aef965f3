//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use crate::path::parent_device;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub fstype: String,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <id> <parent> <major:minor> <root> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let fstype = post_fields.next()?.to_string();
            let source = unescape_mount_path(post_fields.next()?);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                fstype,
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mountpoints whose source is `device` itself or one of its partitions.
pub fn mounts_of_device(device: &Path, entries: &[MountInfo]) -> Vec<PathBuf> {
    let wanted = normalize_path(device);
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|entry| {
            let source = Path::new(&entry.source);
            normalize_path(source) == wanted
                || parent_device(source)
                    .map(|parent| normalize_path(&parent) == wanted)
                    .unwrap_or(false)
        })
        .map(|entry| entry.mount_point.clone())
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
