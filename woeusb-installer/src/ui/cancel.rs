//! Ctrl+C cancellation handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static HANDLER_SET: OnceLock<()> = OnceLock::new();

/// Call `on_cancel` on the first Ctrl+C. A second Ctrl+C exits at once,
/// leaving any mounts behind.
pub fn install_ctrlc_handler<F>(on_cancel: F) -> anyhow::Result<()>
where
    F: Fn() + Send + Sync + 'static,
{
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    let pressed = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::SeqCst) {
            eprintln!("\n🛑 Aborted");
            std::process::exit(130);
        }
        on_cancel();
        log::warn!("Cancellation requested (Ctrl+C), waiting for the current step to stop");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}
