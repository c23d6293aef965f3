//! Renders [`ProgressUpdate`]s on stderr.

use super::style::Palette;
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, queue};
use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use woeusb_core::{CopyStatus, ProgressUpdate, Stage};

const DEFAULT_WIDTH: usize = 80;

pub fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::PreInit => "Preparing",
        Stage::EnterInit => "Checking parameters and dependencies",
        Stage::StartMounting => "Mounting and preparing the target",
        Stage::StartCopying => "Copying installer files",
        Stage::StartUnmounting => "Unmounting",
        Stage::Finalized => "Finalizing",
        Stage::Failed => "Failed",
    }
}

/// One line of copy progress, cut to `width` columns.
pub fn render_copy_line(status: &CopyStatus, width: usize) -> String {
    let percent = match status.percent {
        Some(p) => format!("{:5.1}%", p),
        None => "  ...%".to_string(),
    };
    let mut line = match &status.current_item {
        Some(item) => format!("{} {}", percent, item.display()),
        None => percent,
    };
    if status.cancel_requested && status.running {
        line.push_str(" (cancelling)");
    }
    if line.chars().count() > width {
        line = line.chars().take(width.saturating_sub(1)).collect();
        line.push('…');
    }
    line
}

pub struct ProgressPrinter {
    handle: JoinHandle<()>,
}

impl ProgressPrinter {
    /// Print updates from `rx` until the run finishes or the sender goes away.
    pub fn spawn(rx: Receiver<ProgressUpdate>, palette: Palette) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("woeusb-progress".to_string())
            .spawn(move || print_updates(rx, palette))?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            log::debug!("progress printer panicked");
        }
    }
}

fn print_updates(rx: Receiver<ProgressUpdate>, palette: Palette) {
    let mut stderr = io::stderr();
    let width = terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(DEFAULT_WIDTH);
    let mut copy_line_open = false;

    for update in rx {
        match update {
            ProgressUpdate::Copy(status) => {
                let _ = queue!(
                    stderr,
                    cursor::MoveToColumn(0),
                    terminal::Clear(ClearType::CurrentLine)
                );
                let _ = write!(stderr, "{}", render_copy_line(&status, width));
                copy_line_open = status.running;
                if !status.running {
                    let _ = writeln!(stderr);
                }
                let _ = stderr.flush();
            }
            other => {
                if copy_line_open {
                    let _ = writeln!(stderr);
                    copy_line_open = false;
                }
                match other {
                    ProgressUpdate::StageEntered(stage) => {
                        let _ = writeln!(stderr, "{}", palette.stage(stage_message(stage)));
                    }
                    ProgressUpdate::FilesystemChanged { from, to } => {
                        let msg = format!("Source has files too large for {}, using {}", from, to);
                        let _ = writeln!(stderr, "{}", palette.warning(&msg));
                    }
                    ProgressUpdate::Status(_) => {}
                    ProgressUpdate::Finished { .. } => break,
                    ProgressUpdate::Copy(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn copy_line_shows_percent_and_item() {
        let status = CopyStatus {
            running: true,
            current_item: Some(PathBuf::from("sources/install.wim")),
            percent: Some(42.0),
            ..Default::default()
        };
        assert_eq!(render_copy_line(&status, 80), " 42.0% sources/install.wim");
    }

    #[test]
    fn unknown_percent_is_indeterminate() {
        let status = CopyStatus {
            running: true,
            ..Default::default()
        };
        assert_eq!(render_copy_line(&status, 80), "  ...%");
    }

    #[test]
    fn long_lines_are_truncated() {
        let status = CopyStatus {
            running: true,
            current_item: Some(PathBuf::from("a".repeat(200))),
            percent: Some(1.0),
            cancel_requested: true,
            ..Default::default()
        };
        let line = render_copy_line(&status, 40);
        assert_eq!(line.chars().count(), 40);
        assert!(line.ends_with('…'));
    }
}
