//! Device numbers and compact device ids
use crate::error::{Error, Result};
use nix::sys::stat;
use std::{fmt, str::FromStr};

/// Device number, `major:minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevNum {
    pub major: u64,
    pub minor: u64,
}

impl DevNum {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// From a raw `dev_t`
    pub fn from_raw(dev: libc::dev_t) -> Self {
        Self {
            major: stat::major(dev),
            minor: stat::minor(dev),
        }
    }

    /// As a raw `dev_t`
    pub fn as_raw(&self) -> libc::dev_t {
        stat::makedev(self.major, self.minor)
    }

    /// Parse the `major:minor` format of the `dev` attribute
    pub(crate) fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once(':')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// From `MAJOR` and `MINOR` property values
    pub(crate) fn from_pair(major: Option<&str>, minor: Option<&str>) -> Option<Self> {
        Some(Self {
            major: major?.trim().parse().ok()?,
            minor: minor?.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Kind of device node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevNodeKind {
    /// `c`
    Char,

    /// `b`
    Block,
}

impl DevNodeKind {
    /// From the type characters `c` and `b`
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' => Some(Self::Char),
            'b' => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Char => 'c',
            Self::Block => 'b',
        }
    }

    /// Directory name under `<SYSFS>/dev`
    pub(crate) fn dir(&self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Block => "block",
        }
    }
}

/// Compact device id
///
/// The string form is `<type><payload>`, and also names the devices udev
/// database record, so it is stable.
///
/// # Example
///
/// - `b8:0`, block device `8:0`
/// - `c189:1`, character device `189:1`
/// - `n2`, network interface with index 2
/// - `+pci:0000:00:14.0`, device `0000:00:14.0` in subsystem `pci`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Block(DevNum),
    Char(DevNum),
    Net(u32),
    Subsystem { subsystem: String, sysname: String },
}

impl DeviceId {
    pub fn devnum(kind: DevNodeKind, devnum: DevNum) -> Self {
        match kind {
            DevNodeKind::Char => Self::Char(devnum),
            DevNodeKind::Block => Self::Block(devnum),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(d) => write!(f, "b{d}"),
            Self::Char(d) => write!(f, "c{d}"),
            Self::Net(i) => write!(f, "n{i}"),
            Self::Subsystem { subsystem, sysname } => write!(f, "+{subsystem}:{sysname}"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidDeviceId(s.to_owned());
        let mut chars = s.chars();
        let ty = chars.next().ok_or_else(invalid)?;
        let payload = chars.as_str();
        match ty {
            'b' | 'c' => {
                let devnum = DevNum::parse(payload).ok_or_else(invalid)?;
                Ok(Self::devnum(
                    DevNodeKind::from_char(ty).ok_or_else(invalid)?,
                    devnum,
                ))
            }
            'n' => {
                let index: u32 = payload.parse().map_err(|_| invalid())?;
                if index == 0 {
                    return Err(invalid());
                }
                Ok(Self::Net(index))
            }
            '+' => {
                // sysnames may contain `:`, subsystems never do
                let (subsystem, sysname) = payload.split_once(':').ok_or_else(invalid)?;
                if subsystem.is_empty() || sysname.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Subsystem {
                    subsystem: subsystem.to_owned(),
                    sysname: sysname.to_owned(),
                })
            }
            _ => Err(invalid()),
        }
    }
}
