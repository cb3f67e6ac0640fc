//! Linux device enumeration, attributes and hotplug events, with a
//! libudev-style object model
//!
//! # Implementation details
//!
//! Devices are read from sysfs and the udev runtime database in
//! `/run/udev`, events come from the kernels uevent netlink socket. Nothing
//! here talks to udev itself, so this works with or without it running.
//!
//! Most of the sysfs interfaces are undocumented, and some may change
//! between kernel versions.
//!
//! This crate attempts to correctly document these interfaces, and provide
//! kernel documentation sources where possible.
//! This is done on a best effort basis.
//!
//! # Example
//!
//! ```rust,no_run
//! use linudev::{Context, Enumerate};
//!
//! # fn main() -> linudev::Result<()> {
//! let ctx = Context::new();
//! let mut e = Enumerate::new(&ctx);
//! e.match_subsystem("block")?;
//! e.match_property("DEVTYPE", Some("disk"))?;
//! e.scan_devices()?;
//! for dev in e.devices() {
//!     println!("{} {:?}", dev.sysname(), dev.devnode());
//! }
//! # Ok(())
//! # }
//! ```
#![doc(html_root_url = "https://docs.rs/linudev/0.1.0")]

pub mod context;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod hwdb;
pub mod list;
pub mod monitor;
pub mod queue;
mod util;

pub use context::{Context, ContextBuilder, Priority, Record};
pub use device::{Action, DevNodeKind, DevNum, Device, DeviceId};
pub use enumerate::Enumerate;
pub use error::{Error, Result};
pub use hwdb::Hwdb;
pub use list::{List, ListEntry};
pub use monitor::{Monitor, UEvent};
pub use queue::Queue;
pub use util::{
    encode_string,
    encode_string_into,
    CONF_PATH,
    DEV_PATH,
    HWDB_PATHS,
    RUN_PATH,
    SYSFS_PATH,
};
