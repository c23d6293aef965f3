use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use woeusb_core::{InstallOutcome, Installer, Settings};
use woeusb_hal::LinuxHal;
use woeusb_installer::cli::{Cli, Command, InstallArgs};
use woeusb_installer::logging;
use woeusb_installer::ui::{cancel, progress::ProgressPrinter, style::Palette};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let palette = Palette::detect(cli.no_color);
    match run(cli, palette) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", palette.failure(&format!("{:#}", err)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, palette: Palette) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    logging::init(cli.verbose, settings.log_file.as_deref());

    match cli.command {
        Command::Install(args) => install(&args, settings, palette),
    }
}

fn install(args: &InstallArgs, settings: Settings, palette: Palette) -> anyhow::Result<ExitCode> {
    let (tx, rx) = mpsc::channel();
    let installer = Installer::new(Arc::new(LinuxHal::new()), settings).with_progress(tx);
    let cancel = installer.cancel_token();
    cancel::install_ctrlc_handler(move || cancel.cancel())?;
    let printer = ProgressPrinter::spawn(rx, palette).context("starting progress output")?;

    let outcome = installer.run(&args.to_request());
    drop(installer);
    printer.join();

    report(&outcome, palette);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn report(outcome: &InstallOutcome, palette: Palette) {
    for path in &outcome.cleanup.unclean {
        eprintln!(
            "{}",
            palette.warning(&format!(
                "{} is still mounted, unmount it manually",
                path.display()
            ))
        );
    }
    if outcome.cleanup.target_unsafe_to_detach || outcome.cleanup.device_still_busy {
        eprintln!(
            "{}",
            palette.warning("The target is still in use, do not unplug it yet")
        );
    }

    match &outcome.result {
        Ok(()) => eprintln!(
            "{}",
            palette.success(&format!(
                "Installation succeeded ({}), the target can now be removed",
                outcome.filesystem
            ))
        ),
        Err(err) if err.is_cancelled() => {
            eprintln!("{}", palette.cancelled("Installation cancelled"))
        }
        Err(err) => eprintln!(
            "{}",
            palette.failure(&format!(
                "Installation failed during {}: {}",
                outcome.last_stage, err
            ))
        ),
    }
}
