//! Tree copier behind [`LinuxHal`](super::LinuxHal)'s `CopyOps`.
//!
//! Regular files are copied in fixed-size chunks so a cancellation request is
//! seen within one chunk even for multi-gigabyte `install.wim` files.

use super::copy_ops::{CopyOptions, CopyProgress};
use crate::{HalError, HalResult};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// errnos that only mean "the target filesystem can't represent this attribute".
const COSMETIC_ERRNOS: [i32; 4] = [libc::EPERM, libc::EOPNOTSUPP, libc::ENOTSUP, libc::ENOSYS];

fn is_cosmetic(err: &io::Error) -> bool {
    err.raw_os_error()
        .map(|code| COSMETIC_ERRNOS.contains(&code))
        .unwrap_or(false)
}

fn classify(path: &Path, err: io::Error) -> HalError {
    if err.raw_os_error() == Some(libc::ENOSPC) {
        return HalError::NoSpace(path.to_path_buf());
    }
    HalError::CopyFailed {
        path: path.to_path_buf(),
        source: err,
    }
}

fn walk_err(err: walkdir::Error) -> HalError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    match err.into_io_error() {
        Some(io_err) => classify(&path, io_err),
        None => HalError::Other(format!("filesystem loop detected at {}", path.display())),
    }
}

/// Count regular files and their total size under `root`.
pub fn measure_tree(root: &Path) -> HalResult<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(walk_err)?;
        if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(walk_err)?;
            files += 1;
            bytes = bytes.saturating_add(meta.len());
        }
    }
    Ok((files, bytes))
}

pub fn copy_tree(
    src: &Path,
    dst: &Path,
    opts: &CopyOptions,
    on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
) -> HalResult<()> {
    let (files_total, bytes_total) = measure_tree(src)?;
    let mut progress = CopyProgress {
        bytes_total,
        files_total,
        ..Default::default()
    };
    log::debug!(
        "copy {} -> {}: {} files, {} bytes",
        src.display(),
        dst.display(),
        files_total,
        bytes_total
    );

    fs::create_dir_all(dst).map_err(|e| classify(dst, e))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    // Directory modes are applied last: a read-only ISO directory would
    // otherwise block writing its own children.
    let mut dir_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(walk_err)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| HalError::Other(e.to_string()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = dst.join(rel);
        progress.current = rel.to_path_buf();
        if !on_progress(&progress) {
            return Err(HalError::Cancelled);
        }

        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| classify(&dest, e))?;
            if opts.preserve_perms {
                let meta = entry.metadata().map_err(walk_err)?;
                dir_modes.push((dest, meta.permissions()));
            }
        } else if ft.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else if ft.is_file() {
            copy_file(entry.path(), &dest, &mut buf, &mut progress, on_progress)?;
            apply_file_metadata(entry.path(), &dest, opts);
            progress.files_copied += 1;
        } else {
            log::warn!("⚠️ Skipping special file {}", entry.path().display());
        }
    }

    for (dir, perms) in dir_modes.into_iter().rev() {
        if let Err(err) = fs::set_permissions(&dir, perms) {
            if !is_cosmetic(&err) {
                return Err(classify(&dir, err));
            }
            log::debug!("permissions not kept on {}: {}", dir.display(), err);
        }
    }

    on_progress(&progress);
    Ok(())
}

fn copy_file(
    src: &Path,
    dest: &Path,
    buf: &mut [u8],
    progress: &mut CopyProgress,
    on_progress: &mut dyn FnMut(&CopyProgress) -> bool,
) -> HalResult<()> {
    let mut input = File::open(src).map_err(|e| classify(src, e))?;
    let mut output = File::create(dest).map_err(|e| classify(dest, e))?;
    loop {
        let read = match input.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(src, e)),
        };
        output
            .write_all(&buf[..read])
            .map_err(|e| classify(dest, e))?;
        progress.bytes_copied += read as u64;
        if !on_progress(progress) {
            return Err(HalError::Cancelled);
        }
    }
    output.flush().map_err(|e| classify(dest, e))?;
    Ok(())
}

fn copy_symlink(src: &Path, dest: &Path) -> HalResult<()> {
    let target = fs::read_link(src).map_err(|e| classify(src, e))?;
    match std::os::unix::fs::symlink(&target, dest) {
        Ok(()) => Ok(()),
        Err(err) if is_cosmetic(&err) => {
            log::warn!(
                "⚠️ Target filesystem does not support symlinks, skipping {}",
                dest.display()
            );
            Ok(())
        }
        Err(err) => Err(classify(dest, err)),
    }
}

fn apply_file_metadata(src: &Path, dest: &Path, opts: &CopyOptions) {
    if !opts.preserve_perms && !opts.preserve_times {
        return;
    }
    let meta = match fs::metadata(src) {
        Ok(m) => m,
        Err(err) => {
            log::debug!("metadata unavailable for {}: {}", src.display(), err);
            return;
        }
    };
    if opts.preserve_times {
        if let Ok(mtime) = meta.modified() {
            let result = File::options()
                .write(true)
                .open(dest)
                .and_then(|f| f.set_modified(mtime));
            if let Err(err) = result {
                log::debug!("mtime not kept on {}: {}", dest.display(), err);
            }
        }
    }
    if opts.preserve_perms {
        if let Err(err) = fs::set_permissions(dest, meta.permissions()) {
            log::debug!("permissions not kept on {}: {}", dest.display(), err);
        }
    }
}
