//! The `woeusb` command line front end.

pub mod cli;
pub mod logging;
pub mod ui;
