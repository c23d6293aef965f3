//! WoeUSB Hardware Abstraction Layer (HAL).
//!
//! Everything that touches the outside world (block devices, mount tables,
//! external partitioning/formatting tools, the network) goes through the traits
//! in [`hal`], so the installation pipeline can be exercised against
//! [`FakeHal`] without root privileges or real hardware.

pub mod error;
pub mod hal;
pub mod path;
pub mod procfs;
pub mod tools;

pub use error::{HalError, HalResult};
pub use hal::*;
pub use tools::{FatFormatter, GrubInstaller};
