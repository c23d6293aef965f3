//! Partitioning operations (wipefs/parted).

use crate::HalResult;
use std::path::Path;

/// A high-level partition operation executed via `parted --script`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartedOp {
    MkLabel {
        label: String,
    },
    /// `start`/`end` may be negative sector offsets counted from the end of the
    /// disk (e.g. `-2049s`).
    MkPart {
        part_type: String,
        fs_type: String,
        start: String,
        end: String,
        /// `false` maps to `--align none`, needed for the tail partition.
        align: bool,
    },
    SetFlag {
        part_num: u32,
        flag: String,
        state: String,
    },
    Print,
}

impl PartedOp {
    /// Command-line arguments that follow `parted --script <disk>`.
    ///
    /// Global options (`--align`) have to come before the disk, so they are
    /// returned separately.
    pub fn to_args(&self) -> (Vec<String>, Vec<String>) {
        match self {
            PartedOp::MkLabel { label } => (Vec::new(), vec!["mklabel".to_string(), label.clone()]),
            PartedOp::MkPart {
                part_type,
                fs_type,
                start,
                end,
                align,
            } => {
                let global = if *align {
                    vec!["--align".to_string(), "optimal".to_string()]
                } else {
                    vec!["--align".to_string(), "none".to_string()]
                };
                // `--` stops parted from reading a negative offset as an option.
                let args = vec![
                    "mkpart".to_string(),
                    part_type.clone(),
                    fs_type.clone(),
                    "--".to_string(),
                    start.clone(),
                    end.clone(),
                ];
                (global, args)
            }
            PartedOp::SetFlag {
                part_num,
                flag,
                state,
            } => (
                Vec::new(),
                vec![
                    "set".to_string(),
                    part_num.to_string(),
                    flag.clone(),
                    state.clone(),
                ],
            ),
            PartedOp::Print => (Vec::new(), vec!["print".to_string()]),
        }
    }
}

pub trait PartitionOps {
    /// Erase every partition-table and filesystem signature on `disk`.
    fn wipefs_all(&self, disk: &Path) -> HalResult<()>;

    /// Execute a single `parted` operation on the given disk.
    fn parted(&self, disk: &Path, op: PartedOp) -> HalResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkpart_places_separator_before_offsets() {
        let op = PartedOp::MkPart {
            part_type: "primary".to_string(),
            fs_type: "fat16".to_string(),
            start: "-2048s".to_string(),
            end: "-1s".to_string(),
            align: false,
        };
        let (global, args) = op.to_args();
        assert_eq!(global, vec!["--align", "none"]);
        assert_eq!(args, vec!["mkpart", "primary", "fat16", "--", "-2048s", "-1s"]);
    }

    #[test]
    fn set_flag_args() {
        let op = PartedOp::SetFlag {
            part_num: 1,
            flag: "boot".to_string(),
            state: "on".to_string(),
        };
        let (global, args) = op.to_args();
        assert!(global.is_empty());
        assert_eq!(args, vec!["set", "1", "boot", "on"]);
    }
}
