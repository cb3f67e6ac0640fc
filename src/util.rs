//! Utility functions
use crate::{
    device::Action,
    error::{Error, Result},
};
use nix::time::{clock_gettime, ClockId};
use std::{
    ffi::CString,
    fs,
    io::{self, prelude::*},
    path::Path,
};

/// Technically Linux requires sysfs to be at `/sys`, calling it a system
/// configuration error otherwise.
///
/// But our upcoming distro is planning to experiment with filesystem layout
/// changes, including of `/sys`, so [`crate::Context`] allows changing it.
pub const SYSFS_PATH: &str = "/sys";

/// Device file location. Same reasons as [`SYSFS_PATH`].
pub const DEV_PATH: &str = "/dev";

/// udev runtime directory, holding the device database. Same reasons as
/// [`SYSFS_PATH`].
pub const RUN_PATH: &str = "/run/udev";

/// udev configuration file.
pub const CONF_PATH: &str = "/etc/udev/udev.conf";

/// Directories searched for `*.hwdb` files, in priority order.
pub const HWDB_PATHS: &[&str] = &["/etc/udev/hwdb.d", "/usr/lib/udev/hwdb.d"];

/// Helper to read the `attribute` at `base`. Trims trailing whitespace.
pub(crate) fn read_attribute<P: AsRef<Path>>(base: P, attribute: &str) -> io::Result<String> {
    fs::read_to_string(base.as_ref().join(attribute)).map(|s| s.trim_end().to_owned())
}

/// File name of the target of the symlink at `path`, if it is one.
pub(crate) fn link_name(path: &Path) -> Option<String> {
    fs::read_link(path)
        .ok()?
        .file_name()?
        .to_str()
        .map(ToOwned::to_owned)
}

/// Read a uevent file
///
/// Key order is preserved.
///
/// # Arguments
///
/// - `path`, path to the uevent file.
pub(crate) fn read_uevent(path: &Path) -> io::Result<Vec<(String, String)>> {
    Ok(parse_uevent(&fs::read_to_string(path)?))
}

/// Parse `KEY=VALUE` lines. Lines without `=` are skipped.
pub(crate) fn parse_uevent(data: &str) -> Vec<(String, String)> {
    data.split_terminator('\n')
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

/// Write a synthetic uevent
///
/// # Arguments
///
/// - `path`, path to the uevent file.
pub(crate) fn write_uevent(
    path: &Path,
    action: Action,
    uuid: Option<&str>,
    args: &[(&str, &str)],
) -> io::Result<()> {
    let mut data = String::from(action.as_str());
    data.push(' ');
    if let Some(uuid) = uuid {
        data.push_str(uuid);
        data.push(' ');
    }
    for (k, v) in args {
        data.push_str(k);
        data.push('=');
        data.push_str(v);
        data.push(' ');
    }
    let mut f = fs::OpenOptions::new().write(true).open(path)?;
    f.write_all(data.trim().as_bytes())
}

/// Shell-style glob match, as `fnmatch(3)` with no flags.
///
/// Strings with interior NUL bytes never match.
pub(crate) fn fnmatch(pattern: &str, s: &str) -> bool {
    let (pattern, s) = match (CString::new(pattern), CString::new(s)) {
        (Ok(p), Ok(s)) => (p, s),
        _ => return false,
    };
    // Safety: both are valid NUL terminated strings that outlive the call.
    unsafe { libc::fnmatch(pattern.as_ptr(), s.as_ptr(), 0) == 0 }
}

/// Microseconds on `CLOCK_MONOTONIC`, which is what the udev database
/// records initialization times in.
pub(crate) fn now_usec() -> u64 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|t| t.tv_sec() as u64 * 1_000_000 + t.tv_nsec() as u64 / 1_000)
        .unwrap_or(0)
}

fn is_whitelisted(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"#+-.:=@_".contains(&b)
}

/// Length of a valid multi-byte UTF-8 sequence at the start of `bytes`.
fn utf8_seq_len(bytes: &[u8]) -> Option<usize> {
    let len = match bytes.first()? {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let seq = bytes.get(..len)?;
    std::str::from_utf8(seq).ok().map(|_| len)
}

/// Encode `s` so it is safe to use as a device node or property name.
///
/// Bytes in `[A-Za-z0-9#+-.:=@_]` and valid multi-byte UTF-8 sequences are
/// kept, everything else becomes `\xNN`.
///
/// # Example
///
/// `"My Disk/1"` becomes `"My\x20Disk\x2f1"`
pub fn encode_string(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some(len) = utf8_seq_len(&bytes[i..]) {
            out.push_str(&s[i..i + len]);
            i += len;
            continue;
        }
        let b = bytes[i];
        if is_whitelisted(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
        i += 1;
    }
    out
}

/// Like [`encode_string`], writing into `buf` and returning the number of
/// bytes written.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if `buf` is too small. `buf` is left
///   untouched.
pub fn encode_string_into(s: &str, buf: &mut [u8]) -> Result<usize> {
    let enc = encode_string(s);
    let dst = buf
        .get_mut(..enc.len())
        .ok_or_else(|| Error::InvalidArgument(format!("buffer too small for `{}`", enc)))?;
    dst.copy_from_slice(enc.as_bytes());
    Ok(enc.len())
}
