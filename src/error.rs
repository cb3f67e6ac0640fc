//! Error handling stuff
use displaydoc::Display;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for everything in [`crate`]
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum Error {
    /// IO Failed: {0}
    Io(#[from] io::Error),

    /// Device not found: `{0}`
    NotFound(String),

    /// Invalid argument: {0}
    InvalidArgument(String),

    /// Invalid device id `{0}`
    InvalidDeviceId(String),

    /// Operation not valid while the monitor is {0}
    InvalidState(&'static str),

    /// Monitor was closed
    Closed,

    /// Malformed native data: {0}
    Malformed(String),
}

impl Error {
    /// Negative errno equivalent of this error.
    ///
    /// For callers keeping the "negative is failure" convention of the C
    /// interface.
    pub fn errno(&self) -> i32 {
        let e = match self {
            Self::Io(e) => return -e.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) => libc::ENODEV,
            Self::InvalidArgument(_) | Self::InvalidDeviceId(_) => libc::EINVAL,
            Self::InvalidState(_) => libc::EBUSY,
            Self::Closed => libc::EBADF,
            Self::Malformed(_) => libc::EBADMSG,
        };
        -e
    }

    /// Whether this is [`Error::NotFound`], or an I/O not-found error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Self::Io(e.into())
    }
}

/// Error text.
pub(crate) mod text {
    pub const EMPTY_NAME: &str = "name cannot be empty";

    pub const BAD_SYSATTR: &str = "invalid sysattr name";

    pub const NOT_DEVICE: &str = "not a device";

    pub const OUTSIDE_SYSFS: &str = "path is outside of sysfs";

    pub const MISSING_DEVPATH: &str = "missing DEVPATH";

    pub const BAD_DEVPATH: &str = "DEVPATH must be an absolute path inside sysfs";

    pub const MISSING_SUBSYSTEM: &str = "missing SUBSYSTEM";

    pub const FOREIGN_CONTEXT: &str = "device belongs to a different context";
}
