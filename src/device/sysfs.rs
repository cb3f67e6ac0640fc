//! Finding devices in sysfs
//!
//! See the [sysfs rules][1] and [sysfs-devices][2] file for details
//!
//! Besides real devices under `<SYSFS>/devices`, subsystems, drivers and
//! modules are exposed as pseudo-devices.
//!
//! [1]: https://www.kernel.org/doc/html/latest/admin-guide/sysfs-rules.html
//! [2]: https://www.kernel.org/doc/Documentation/ABI/stable/sysfs-devices
use crate::{
    context::Context,
    error::{text::*, Error, Result},
    util::link_name,
};
use std::{
    fs,
    io,
    os::unix::fs::PermissionsExt,
    path::{Component, Path, PathBuf},
};
use walkdir::WalkDir;

/// What a sysfs directory represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    /// `<SYSFS>/devices/...`
    Device,

    /// `<SYSFS>/bus/<name>`, `<SYSFS>/class/<name>` or
    /// `<SYSFS>/subsystem/<name>`
    Subsystem,

    /// `<SYSFS>/bus/<bus>/drivers/<name>`
    Driver { bus: String },

    /// `<SYSFS>/module/<name>`
    Module,
}

impl Kind {
    /// Subsystem implied by the kind, if it's a pseudo-device
    pub fn pseudo_subsystem(&self) -> Option<&'static str> {
        match self {
            Self::Device => None,
            Self::Subsystem => Some("subsystem"),
            Self::Driver { .. } => Some("drivers"),
            Self::Module => Some("module"),
        }
    }
}

/// Canonical sysfs root
pub(crate) fn root(ctx: &Context) -> io::Result<PathBuf> {
    ctx.sys_path().canonicalize()
}

/// Classify `path`, which must be canonical and under `root`
pub(crate) fn classify(root: &Path, path: &Path) -> Option<Kind> {
    let rel = path.strip_prefix(root).ok()?;
    let c: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    match c.as_slice() {
        ["bus" | "class" | "subsystem", _] => Some(Kind::Subsystem),
        ["bus" | "subsystem", bus, "drivers", _] => Some(Kind::Driver {
            bus: (*bus).to_owned(),
        }),
        ["module", _] => Some(Kind::Module),
        ["devices", _, ..] if path.join("uevent").exists() => Some(Kind::Device),
        _ => None,
    }
}

/// Resolve `path` to a canonical device path
///
/// # Errors
///
/// - [`Error::NotFound`] if `path` doesn't exist
/// - [`Error::InvalidArgument`] if `path` is not under sysfs
/// - [`Error::NotFound`] if `path` is not a device
pub(crate) fn resolve(ctx: &Context, path: &Path) -> Result<(PathBuf, Kind)> {
    let root = root(ctx)?;
    let canonical = match path.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !canonical.starts_with(&root) {
        return Err(Error::InvalidArgument(format!(
            "{}: {OUTSIDE_SYSFS}",
            path.display()
        )));
    }
    match classify(&root, &canonical) {
        Some(kind) => Ok((canonical, kind)),
        None => Err(Error::NotFound(format!("{}: {NOT_DEVICE}", path.display()))),
    }
}

/// Subsystem of the device at `path`
pub(crate) fn subsystem(path: &Path, kind: &Kind) -> Option<String> {
    match kind.pseudo_subsystem() {
        Some(s) => Some(s.to_owned()),
        None => link_name(&path.join("subsystem")),
    }
}

/// Ancestors of `path` that are devices, nearest first
///
/// Never goes above `<SYSFS>/devices`.
pub(crate) fn ancestors<'a>(root: &'a Path, path: &'a Path) -> impl Iterator<Item = &'a Path> {
    let top = root.join("devices");
    path.ancestors()
        .skip(1)
        .take_while(move |p| p.starts_with(&top) && *p != top)
        .filter(|p| p.join("uevent").exists())
}

/// Candidate paths for `sysname` in `subsystem`
///
/// `sysname` must already have `/` translated to `!`.
pub(crate) fn subsystem_sysname_paths(root: &Path, subsystem: &str, sysname: &str) -> Vec<PathBuf> {
    match subsystem {
        "subsystem" => vec![
            root.join("subsystem").join(sysname),
            root.join("bus").join(sysname),
            root.join("class").join(sysname),
        ],
        "module" => vec![root.join("module").join(sysname)],
        "drivers" => match sysname.split_once(':') {
            Some((bus, driver)) => vec![
                root.join("subsystem").join(bus).join("drivers").join(driver),
                root.join("bus").join(bus).join("drivers").join(driver),
            ],
            None => Vec::new(),
        },
        _ => vec![
            root.join("subsystem").join(subsystem).join("devices").join(sysname),
            root.join("bus").join(subsystem).join("devices").join(sysname),
            root.join("class").join(subsystem).join(sysname),
        ],
    }
}

/// Attribute names of the device at `path`, sorted.
///
/// Includes readable regular files, the `driver`, `subsystem` and `module`
/// links, and files inside subdirectories that aren't child devices.
///
/// Attributes you don't have permission to see are skipped.
pub(crate) fn sysattr_names(path: &Path) -> Vec<String> {
    let walk = WalkDir::new(path)
        .min_depth(1)
        .max_depth(2)
        .follow_links(false)
        .into_iter()
        // Don't descend into child devices
        .filter_entry(|e| !(e.file_type().is_dir() && e.path().join("uevent").exists()));

    let mut v = Vec::new();
    for entry in walk {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::trace!(path = %path.display(), "skipping attribute: {e}");
                continue;
            }
        };
        let name = match entry.path().strip_prefix(path).ok().and_then(Path::to_str) {
            Some(n) => n,
            None => continue,
        };
        let ty = entry.file_type();
        if ty.is_symlink() {
            if matches!(name, "driver" | "subsystem" | "module") {
                v.push(name.to_owned());
            }
            continue;
        }
        if !ty.is_file() || name == "uevent" {
            continue;
        }
        let readable = entry
            .metadata()
            .map(|m| m.permissions().mode() & 0o444 != 0)
            .unwrap_or(false);
        if readable {
            v.push(name.to_owned());
        }
    }
    v.sort_unstable();
    v
}

/// Devices of the subsystem directories under `dir`, canonical and sorted.
///
/// `dir` is laid out as `<dir>/<subsystem>/<devices>/<name>`, with `devices`
/// the empty string for `/sys/class` style layouts. `keep` filters on the
/// subsystem directory name, before any device is looked at.
pub(crate) fn scan_subsystem_dir<F>(dir: &Path, devices: &str, keep: F) -> io::Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut out = Vec::new();
    for sub in fs::read_dir(dir)? {
        let sub = sub?;
        let name = sub.file_name();
        match name.to_str() {
            Some(n) if keep(n) => (),
            _ => continue,
        }
        let path = sub.path().join(devices);
        let entries = match fs::read_dir(&path) {
            Ok(e) => e,
            // Not every class/bus has devices
            Err(_) => continue,
        };
        for dev in entries {
            let dev = dev?;
            // This dance is required because `/sys/class/<x>` also holds
            // non-device attributes
            if !dev.path().join("uevent").exists() {
                continue;
            }
            match dev.path().canonicalize() {
                Ok(p) => out.push(p),
                // Raced with removal
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Every device below `path`, including `path` itself
pub(crate) fn subtree(path: &Path) -> Vec<PathBuf> {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path().join("uevent").exists())
        .map(|e| e.into_path())
        .collect()
}
