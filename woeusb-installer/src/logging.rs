use env_logger::Target;
use std::fs;
use std::io;
use std::path::Path;

/// `RUST_LOG` wins over `verbose` when set. With a `log_file`, output is
/// appended there; if it cannot be opened logs go to stderr.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let target = log_file
        .map(|path| open_log_file(path).map(|file| Target::Pipe(Box::new(file))))
        .and_then(|opened| match opened {
            Ok(target) => Some(target),
            Err(err) => {
                eprintln!("⚠️ Cannot open log file, logging to stderr: {}", err);
                None
            }
        })
        .unwrap_or(Target::Stderr);

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(level(verbose));
    }
    builder.target(target).init();
}

pub fn level(verbose: bool) -> log::LevelFilter {
    if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}
