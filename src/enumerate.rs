//! Enumerating devices
//!
//! An [`Enumerate`] collects filters, then scans sysfs once for everything
//! matching them.
//!
//! Values of the same kind are OR'd, different kinds are AND'd. So
//! subsystems `usb` and `block` with sysname `sd*` matches every `usb`
//! device and every `block` device, as long as its name starts with `sd`.
//!
//! Globs are shell style, as in `fnmatch(3)`.
use crate::{
    context::{ctx_log, Context, Priority},
    device::{self, sysfs, Device},
    error::{text::*, Error, Result},
    list::List,
    util::fnmatch,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

/// Attribute or property filter, [`None`] matching any value
type ValueMatch = (String, Option<String>);

/// Device enumerator
#[derive(Debug)]
pub struct Enumerate {
    ctx: Context,
    subsystems: Vec<String>,
    no_subsystems: Vec<String>,
    sysnames: Vec<String>,
    sysattrs: Vec<ValueMatch>,
    no_sysattrs: Vec<ValueMatch>,
    properties: Vec<ValueMatch>,
    tags: Vec<String>,
    parent: Option<Device>,
    initialized: bool,
    /// Results, keyed by syspath
    devices: BTreeMap<String, Device>,
}

// Constructors
impl Enumerate {
    /// New enumerator matching every device
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            subsystems: Vec::new(),
            no_subsystems: Vec::new(),
            sysnames: Vec::new(),
            sysattrs: Vec::new(),
            no_sysattrs: Vec::new(),
            properties: Vec::new(),
            tags: Vec::new(),
            parent: None,
            initialized: false,
            devices: BTreeMap::new(),
        }
    }
}

// Filters
impl Enumerate {
    /// Match devices in subsystems matching `glob`
    pub fn match_subsystem(&mut self, glob: &str) -> Result<()> {
        self.subsystems.push(non_empty(glob)?);
        Ok(())
    }

    /// Exclude devices in subsystems matching `glob`
    pub fn nomatch_subsystem(&mut self, glob: &str) -> Result<()> {
        self.no_subsystems.push(non_empty(glob)?);
        Ok(())
    }

    /// Match devices whose sysname matches `glob`
    pub fn match_sysname(&mut self, glob: &str) -> Result<()> {
        self.sysnames.push(non_empty(glob)?);
        Ok(())
    }

    /// Match devices with the attribute `name`, whose value matches `glob` if
    /// given
    pub fn match_sysattr(&mut self, name: &str, glob: Option<&str>) -> Result<()> {
        self.sysattrs.push(value_match(name, glob)?);
        Ok(())
    }

    /// Exclude devices with the attribute `name`, whose value matches `glob`
    /// if given
    pub fn nomatch_sysattr(&mut self, name: &str, glob: Option<&str>) -> Result<()> {
        self.no_sysattrs.push(value_match(name, glob)?);
        Ok(())
    }

    /// Match devices with the property `name`, whose value matches `glob` if
    /// given
    pub fn match_property(&mut self, name: &str, glob: Option<&str>) -> Result<()> {
        self.properties.push(value_match(name, glob)?);
        Ok(())
    }

    pub fn match_tag(&mut self, tag: &str) -> Result<()> {
        self.tags.push(non_empty(tag)?);
        Ok(())
    }

    /// Match `parent` and the devices below it
    ///
    /// Replaces any previous parent.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `parent` is from a different
    ///   [`Context`]
    pub fn match_parent(&mut self, parent: &Device) -> Result<()> {
        if !Context::same(&self.ctx, parent.context()) {
            return Err(Error::InvalidArgument(format!(
                "{}: {FOREIGN_CONTEXT}",
                parent.devpath()
            )));
        }
        self.parent = Some(parent.clone());
        Ok(())
    }

    /// Match devices udev has processed
    pub fn match_is_initialized(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    /// Add the device at `path` to the results, ignoring all filters
    ///
    /// # Errors
    ///
    /// - See [`Device::from_syspath`]
    pub fn add_syspath<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let dev = Device::from_syspath(&self.ctx, path)?;
        self.insert(dev);
        Ok(())
    }
}

// Operations
impl Enumerate {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Scan for devices matching the filters
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if none of the sysfs device directories can be read
    pub fn scan_devices(&mut self) -> Result<()> {
        let candidates = if !self.tags.is_empty() {
            self.tagged()?
        } else if let Some(parent) = &self.parent {
            self.load(sysfs::subtree(parent.syspath()))
        } else {
            let paths = self.registry()?;
            self.load(paths)
        };
        self.add_matching(candidates);
        Ok(())
    }

    /// Scan for subsystem, driver and module pseudo-devices matching the
    /// filters
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if none of the sysfs subsystem directories can be
    ///   read
    pub fn scan_subsystems(&mut self) -> Result<()> {
        let sys = self.ctx.sys_path();
        let mut paths = Vec::new();
        let mut readable = false;

        let mut dirs = Vec::new();
        if self.subsystem_allowed("module") {
            dirs.push(sys.join("module"));
        }
        if self.subsystem_allowed("subsystem") {
            dirs.push(sys.join("bus"));
            dirs.push(sys.join("class"));
        }
        for dir in dirs {
            match children(&dir) {
                Ok(v) => {
                    readable = true;
                    paths.extend(v);
                }
                Err(e) => tracing::trace!(dir = %dir.display(), "skipping: {e}"),
            }
        }
        if self.subsystem_allowed("drivers") {
            match children(&sys.join("bus")) {
                Ok(buses) => {
                    readable = true;
                    for bus in buses {
                        paths.extend(children(&bus.join("drivers")).unwrap_or_default());
                    }
                }
                Err(e) => tracing::trace!("skipping drivers: {e}"),
            }
        }
        if !readable {
            return Err(Error::NotFound(format!(
                "{}: no subsystems",
                sys.display()
            )));
        }
        let candidates = self.load(paths);
        self.add_matching(candidates);
        Ok(())
    }

    /// Syspaths of the results, sorted
    pub fn list(&self) -> List {
        self.devices
            .keys()
            .map(|k| (k.as_str(), None::<String>))
            .collect()
    }

    /// The results, sorted by syspath
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

// Private
impl Enumerate {
    fn insert(&mut self, dev: Device) {
        let key = dev.syspath().to_string_lossy().into_owned();
        self.devices.insert(key, dev);
    }

    fn add_matching(&mut self, candidates: Vec<Device>) {
        let before = self.devices.len();
        for dev in candidates {
            if self.matches(&dev) {
                self.insert(dev);
            }
        }
        ctx_log!(
            self.ctx,
            Priority::Debug,
            "scan found {} new devices",
            self.devices.len() - before
        );
    }

    fn load(&self, paths: Vec<PathBuf>) -> Vec<Device> {
        paths
            .into_iter()
            .filter_map(|p| match Device::from_syspath(&self.ctx, &p) {
                Ok(d) => Some(d),
                // Devices come and go during a scan
                Err(e) => {
                    tracing::trace!(path = %p.display(), "skipping candidate: {e}");
                    None
                }
            })
            .collect()
    }

    /// Devices carrying any of the tags, from the udev tag index
    fn tagged(&self) -> Result<Vec<Device>> {
        let mut ids = BTreeSet::new();
        for tag in &self.tags {
            ids.extend(device::tagged(self.ctx.run_path(), tag)?);
        }
        Ok(ids
            .into_iter()
            .filter_map(|id| match Device::from_device_id(&self.ctx, &id) {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::trace!(%id, "stale tag index entry: {e}");
                    None
                }
            })
            .collect())
    }

    /// Every device in a subsystem the filters allow
    fn registry(&self) -> Result<Vec<PathBuf>> {
        let sys = self.ctx.sys_path();
        let keep = |name: &str| self.subsystem_allowed(name);

        let subsystem = sys.join("subsystem");
        if subsystem.is_dir() {
            return Ok(sysfs::scan_subsystem_dir(&subsystem, "devices", keep)?);
        }

        let mut paths = Vec::new();
        let mut err = None;
        let mut readable = false;
        // `/sys/bus/<subsystem>` is laid out differently from
        // `/sys/class/<subsystem>`
        let sources = [(sys.join("bus"), "devices"), (sys.join("class"), "")];
        for (dir, devices) in &sources {
            match sysfs::scan_subsystem_dir(dir, devices, &keep) {
                Ok(v) => {
                    readable = true;
                    paths.extend(v);
                }
                Err(e) => err = Some(e),
            }
        }
        // block is weird.
        if !sys.join("class/block").exists() {
            if let Ok(v) = sysfs::scan_subsystem_dir(sys, "", |n| n == "block" && keep(n)) {
                paths.extend(v);
            }
        }
        if !readable {
            if let Some(e) = err {
                return Err(e.into());
            }
        }
        paths.sort_unstable();
        paths.dedup();
        Ok(paths)
    }

    fn subsystem_allowed(&self, subsystem: &str) -> bool {
        if self.no_subsystems.iter().any(|g| fnmatch(g, subsystem)) {
            return false;
        }
        self.subsystems.is_empty() || self.subsystems.iter().any(|g| fnmatch(g, subsystem))
    }

    fn matches(&self, dev: &Device) -> bool {
        match dev.subsystem() {
            Some(s) if !self.subsystem_allowed(s) => return false,
            None if !self.subsystems.is_empty() => return false,
            _ => (),
        }
        if !self.sysnames.is_empty() && !self.sysnames.iter().any(|g| fnmatch(g, dev.sysname())) {
            return false;
        }
        if let Some(parent) = &self.parent {
            if !dev.syspath().starts_with(parent.syspath()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| dev.has_tag(t)) {
            return false;
        }
        if self.initialized && !dev.is_initialized() {
            return false;
        }
        if !self.properties.is_empty()
            && !self
                .properties
                .iter()
                .any(|(k, g)| value_matches(g.as_deref(), dev.property_value(k)))
        {
            return false;
        }
        let sysattr = |(k, g): &ValueMatch| value_matches(g.as_deref(), dev.sysattr_value(k).as_deref());
        if !self.sysattrs.is_empty() && !self.sysattrs.iter().any(sysattr) {
            return false;
        }
        !self.no_sysattrs.iter().any(sysattr)
    }
}

fn non_empty(s: &str) -> Result<String> {
    if s.is_empty() {
        return Err(Error::InvalidArgument(EMPTY_NAME.into()));
    }
    Ok(s.to_owned())
}

fn value_match(name: &str, glob: Option<&str>) -> Result<ValueMatch> {
    Ok((non_empty(name)?, glob.map(ToOwned::to_owned)))
}

/// A missing value never matches, a missing glob matches any value
fn value_matches(glob: Option<&str>, value: Option<&str>) -> bool {
    match (glob, value) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(g), Some(v)) => fnmatch(g, v),
    }
}

/// Subdirectories of `dir`, sorted
fn children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut v = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            v.push(entry.path());
        }
    }
    v.sort_unstable();
    Ok(v)
}
