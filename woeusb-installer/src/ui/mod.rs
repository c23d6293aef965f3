pub mod cancel;
pub mod progress;
pub mod style;
