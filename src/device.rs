//! Devices
//!
//! A [`Device`] is a snapshot of one kernel device, taken from sysfs and the
//! udev database when it is looked up, or from the properties of an event.
//!
//! Everything except attribute values is read when the [`Device`] is
//! created. Attribute values are read on first access and cached, see
//! [`Device::sysattr_value`].
//!
//! See the [sysfs rules][1] for how sysfs is laid out.
//!
//! [1]: https://www.kernel.org/doc/html/latest/admin-guide/sysfs-rules.html
use crate::{
    context::{ctx_log, Context, Priority},
    error::{text::*, Error, Result},
    list::{List, ListBuilder},
    util::{link_name, now_usec, read_attribute, read_uevent, write_uevent},
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    env,
    fmt,
    fs,
    io::prelude::*,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

mod db;
mod id;
pub(crate) mod sysfs;

use self::{db::Record, sysfs::Kind};

pub use id::{DevNodeKind, DevNum, DeviceId};

pub(crate) use db::tagged;

/// Kernel uevent action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Remove,
    Change,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Move => "move",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            "move" => Self::Move,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "bind" => Self::Bind,
            "unbind" => Self::Unbind,
            _ => return Err(Error::Malformed(format!("unknown action `{s}`"))),
        })
    }
}

/// Cached state of one attribute
#[derive(Debug, Clone)]
enum Sysattr {
    /// Written since last read
    Unfetched,
    Fetched(String),
    Absent,
}

/// Everything read at construction
#[derive(Debug)]
struct Snapshot {
    ctx: Context,
    syspath: PathBuf,
    devpath: String,
    /// Last component of `syspath`, untranslated
    kernel_name: String,
    sysname: String,
    subsystem: Option<String>,
    /// Bus of a `drivers` pseudo-device
    driver_subsystem: Option<String>,
    devtype: Option<String>,
    driver: Option<String>,
    devnum: Option<DevNum>,
    devnode: Option<PathBuf>,
    ifindex: Option<u32>,
    seqnum: Option<u64>,
    action: Option<Action>,
    initialized: bool,
    usec_initialized: Option<u64>,
    properties: List,
    tags: List,
    current_tags: List,
    devlinks: List,
}

impl Snapshot {
    fn device_id(&self) -> Option<DeviceId> {
        let subsystem = self.subsystem.as_deref()?;
        if let Some(devnum) = self.devnum {
            let kind = if subsystem == "block" {
                DevNodeKind::Block
            } else {
                DevNodeKind::Char
            };
            return Some(DeviceId::devnum(kind, devnum));
        }
        if let Some(index) = self.ifindex.filter(|i| *i > 0) {
            return Some(DeviceId::Net(index));
        }
        let sysname = match &self.driver_subsystem {
            Some(bus) => format!("{bus}:{}", self.kernel_name),
            None => self.kernel_name.clone(),
        };
        Some(DeviceId::Subsystem {
            subsystem: subsystem.to_owned(),
            sysname,
        })
    }
}

struct Inner {
    snap: Snapshot,
    sysattrs: Mutex<HashMap<String, Sysattr>>,
    sysattr_names: OnceCell<List>,
    parent: OnceCell<Option<Device>>,
}

/// A kernel device
///
/// Cloning is cheap, clones share attribute caches.
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snap();
        f.debug_struct("Device")
            .field("syspath", &s.syspath)
            .field("subsystem", &s.subsystem)
            .field("devnum", &s.devnum)
            .field("action", &s.action)
            .field("seqnum", &s.seqnum)
            .finish_non_exhaustive()
    }
}

// Constructors
impl Device {
    /// Device at `path`
    ///
    /// Symlinks are resolved, so `/sys/class/net/lo` and
    /// `/sys/devices/virtual/net/lo` are the same device.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `path` is not under the contexts sysfs
    /// - [`Error::NotFound`] if there is no device at `path`
    pub fn from_syspath<P: AsRef<Path>>(ctx: &Context, path: P) -> Result<Self> {
        let (syspath, kind) = sysfs::resolve(ctx, path.as_ref())?;
        let root = sysfs::root(ctx)?;
        Self::from_sysfs(ctx, &root, syspath, kind)
    }

    /// Device `sysname` in `subsystem`
    ///
    /// The subsystems `subsystem`, `module` and `drivers` name pseudo-devices,
    /// for `drivers` the sysname is `<bus>:<driver>`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if either name is empty
    /// - [`Error::NotFound`] if there is no such device
    pub fn from_subsystem_sysname(ctx: &Context, subsystem: &str, sysname: &str) -> Result<Self> {
        if subsystem.is_empty() || sysname.is_empty() {
            return Err(Error::InvalidArgument(EMPTY_NAME.into()));
        }
        let name = sysname.replace('/', "!");
        for path in sysfs::subsystem_sysname_paths(ctx.sys_path(), subsystem, &name) {
            if !path.exists() {
                continue;
            }
            match Self::from_syspath(ctx, &path) {
                Ok(dev) => return Ok(dev),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(format!("{subsystem}:{sysname}")))
    }

    /// Device with device number `devnum`
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if there is no such device, or it is not of
    ///   `kind`
    pub fn from_devnum(ctx: &Context, kind: DevNodeKind, devnum: DevNum) -> Result<Self> {
        let path = ctx.sys_path().join("dev").join(kind.dir()).join(devnum.to_string());
        let not_found = || Error::NotFound(format!("{}{devnum}", kind.as_char()));
        let dev = match Self::from_syspath(ctx, &path) {
            Ok(d) => d,
            Err(e) if e.is_not_found() => return Err(not_found()),
            Err(e) => return Err(e),
        };
        let is_block = dev.subsystem() == Some("block");
        if is_block != (kind == DevNodeKind::Block) || dev.devnum() != Some(devnum) {
            return Err(not_found());
        }
        Ok(dev)
    }

    /// Device identified by the compact id `id`, see [`DeviceId`]
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDeviceId`] if `id` is malformed
    /// - [`Error::NotFound`] if there is no such device
    pub fn from_device_id(ctx: &Context, id: &str) -> Result<Self> {
        match id.parse::<DeviceId>()? {
            DeviceId::Block(d) => Self::from_devnum(ctx, DevNodeKind::Block, d),
            DeviceId::Char(d) => Self::from_devnum(ctx, DevNodeKind::Char, d),
            DeviceId::Net(index) => Self::from_ifindex(ctx, index),
            DeviceId::Subsystem { subsystem, sysname } => {
                Self::from_subsystem_sysname(ctx, &subsystem, &sysname)
            }
        }
    }

    /// Device described by the `KEY=VALUE` pairs of an event
    ///
    /// This is how udev hands a device to the programs it runs.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if `DEVPATH` or `SUBSYSTEM` is missing, or
    ///   `ACTION` is unknown
    pub fn from_environment<I, K, V>(ctx: &Context, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut props = ListBuilder::new();
        for (k, v) in pairs {
            props.insert(k, Some(v));
        }
        Self::from_properties(ctx, props)
    }

    /// [`Device::from_environment`] on the process environment
    pub fn from_process_environment(ctx: &Context) -> Result<Self> {
        Self::from_environment(ctx, env::vars())
    }
}

// Attributes
impl Device {
    pub fn context(&self) -> &Context {
        &self.snap().ctx
    }

    /// Full path to the device
    ///
    /// # Example
    ///
    /// `/sys/devices/pci0000:00/0000:00:08.1/0000:08:00.0/drm/card1`
    pub fn syspath(&self) -> &Path {
        &self.snap().syspath
    }

    /// Unique key identifying the device under sysfs.
    ///
    /// Always starts with a `/`.
    ///
    /// # Example
    ///
    /// `/devices/pci0000:00/0000:00:08.1/0000:08:00.0/drm/card1`
    pub fn devpath(&self) -> &str {
        &self.snap().devpath
    }

    /// Kernel name of the device, with `!` translated to `/`
    ///
    /// # Example
    ///
    /// `card1`
    pub fn sysname(&self) -> &str {
        &self.snap().sysname
    }

    /// Instance number of the device, the trailing digits of
    /// [`Device::sysname`]
    ///
    /// # Example
    ///
    /// `1` for `card1`
    pub fn sysnum(&self) -> Option<&str> {
        let name = self.sysname();
        let start = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        (start != 0 && start < name.len()).then(|| &name[start..])
    }

    /// Kernel subsystem
    ///
    /// # Example
    ///
    /// `drm`
    pub fn subsystem(&self) -> Option<&str> {
        self.snap().subsystem.as_deref()
    }

    /// Device type within the subsystem
    ///
    /// # Example
    ///
    /// `partition`
    pub fn devtype(&self) -> Option<&str> {
        self.snap().devtype.as_deref()
    }

    /// Device node
    ///
    /// Only devices with a device number have one.
    ///
    /// # Example
    ///
    /// `/dev/dri/card1`
    pub fn devnode(&self) -> Option<&Path> {
        self.snap().devnode.as_deref()
    }

    pub fn devnum(&self) -> Option<DevNum> {
        self.snap().devnum
    }

    /// Driver bound to the device, if any
    pub fn driver(&self) -> Option<&str> {
        self.snap().driver.as_deref()
    }

    /// Network interface index, for network devices
    pub fn ifindex(&self) -> Option<u32> {
        self.snap().ifindex
    }

    /// Sequence number of the event this device came from
    pub fn seqnum(&self) -> Option<u64> {
        self.snap().seqnum
    }

    /// Action of the event this device came from
    pub fn action(&self) -> Option<Action> {
        self.snap().action
    }

    /// Whether udev has processed this device
    pub fn is_initialized(&self) -> bool {
        self.snap().initialized
    }

    /// Microseconds since udev first processed this device
    pub fn usec_since_initialized(&self) -> Option<u64> {
        let s = self.snap();
        if !s.initialized {
            return None;
        }
        s.usec_initialized.map(|u| now_usec().saturating_sub(u))
    }

    /// Compact id of the device
    ///
    /// [`None`] for devices without a subsystem.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.snap().device_id()
    }

    pub fn property_value(&self, key: &str) -> Option<&str> {
        self.snap().properties.value(key)
    }

    /// Properties, as set by the kernel and udev
    pub fn properties(&self) -> &List {
        &self.snap().properties
    }

    pub fn tags(&self) -> &List {
        &self.snap().tags
    }

    /// Tags set by the most recent udev processing of this device
    pub fn current_tags(&self) -> &List {
        &self.snap().current_tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.snap().tags.contains(tag)
    }

    pub fn has_current_tag(&self, tag: &str) -> bool {
        self.snap().current_tags.contains(tag)
    }

    /// Symlinks pointing to [`Device::devnode`]
    pub fn devlinks(&self) -> &List {
        &self.snap().devlinks
    }

    /// Value of the sysfs attribute `name`
    ///
    /// Read on first access and cached afterwards. Trailing whitespace is
    /// trimmed.
    ///
    /// The `driver`, `subsystem` and `module` links resolve to the name of
    /// their target. Other links, directories, and files that can't be read
    /// are [`None`].
    pub fn sysattr_value(&self, name: &str) -> Option<String> {
        check_sysattr_name(name).ok()?;
        let mut cache = self.inner.sysattrs.lock();
        match cache.get(name) {
            Some(Sysattr::Fetched(v)) => return Some(v.clone()),
            Some(Sysattr::Absent) => return None,
            Some(Sysattr::Unfetched) | None => (),
        }
        let attr = self.fetch_sysattr(name);
        let value = match &attr {
            Sysattr::Fetched(v) => Some(v.clone()),
            _ => None,
        };
        cache.insert(name.to_owned(), attr);
        value
    }

    /// Names of all sysfs attributes of the device, sorted
    ///
    /// Values are not read, see [`Device::sysattr_value`].
    pub fn sysattrs(&self) -> List {
        self.inner
            .sysattr_names
            .get_or_init(|| {
                sysfs::sysattr_names(self.syspath())
                    .into_iter()
                    .map(|n| (n, None::<String>))
                    .collect()
            })
            .clone()
    }
}

// Operations
impl Device {
    /// Write `value` to the sysfs attribute `name`
    ///
    /// The next [`Device::sysattr_value`] call reads the attribute again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `name` is empty, escapes the device
    ///   directory, or is a directory
    /// - [`Error::Io`] if writing fails, such as for missing attributes or
    ///   bad permissions
    pub fn set_sysattr_value(&self, name: &str, value: &str) -> Result<()> {
        check_sysattr_name(name)?;
        let path = self.syspath().join(name);
        if path.is_dir() {
            return Err(Error::InvalidArgument(format!("{name}: {BAD_SYSATTR}")));
        }
        let mut cache = self.inner.sysattrs.lock();
        let res = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .and_then(|mut f| f.write_all(value.as_bytes()));
        if let Err(e) = res {
            ctx_log!(
                self.context(),
                Priority::Debug,
                "{}: failed to write `{name}`: {e}",
                self.devpath()
            );
            return Err(e.into());
        }
        cache.insert(name.to_owned(), Sysattr::Unfetched);
        Ok(())
    }

    /// Ask the kernel to emit a synthetic `action` event for this device
    ///
    /// `uuid` and `args` are passed along in the event.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the `uevent` attribute can't be written
    pub fn trigger(&self, action: Action, uuid: Option<&str>, args: &[(&str, &str)]) -> Result<()> {
        write_uevent(&self.syspath().join("uevent"), action, uuid, args)?;
        tracing::debug!(devpath = self.devpath(), %action, "triggered uevent");
        Ok(())
    }

    /// Nearest ancestor device
    ///
    /// [`None`] for top-level devices and pseudo-devices.
    pub fn parent(&self) -> Option<Device> {
        self.inner
            .parent
            .get_or_init(|| self.find_parent())
            .clone()
    }

    /// Nearest ancestor device in `subsystem`, and of `devtype` if given
    pub fn parent_with_subsystem_devtype(
        &self,
        subsystem: &str,
        devtype: Option<&str>,
    ) -> Option<Device> {
        let mut cur = self.parent();
        while let Some(dev) = cur {
            if dev.subsystem() == Some(subsystem)
                && devtype.map_or(true, |t| dev.devtype() == Some(t))
            {
                return Some(dev);
            }
            cur = dev.parent();
        }
        None
    }
}

// Private
impl Device {
    fn snap(&self) -> &Snapshot {
        &self.inner.snap
    }

    fn new(snap: Snapshot) -> Self {
        Self {
            inner: Arc::new(Inner {
                snap,
                sysattrs: Mutex::new(HashMap::new()),
                sysattr_names: OnceCell::new(),
                parent: OnceCell::new(),
            }),
        }
    }

    fn from_ifindex(ctx: &Context, index: u32) -> Result<Self> {
        let net = ctx.sys_path().join("class/net");
        let entries = match fs::read_dir(&net) {
            Ok(e) => e,
            Err(_) => return Err(Error::NotFound(format!("n{index}"))),
        };
        for entry in entries {
            let path = entry?.path();
            let found = read_attribute(&path, "ifindex")
                .ok()
                .and_then(|i| i.parse::<u32>().ok());
            if found == Some(index) {
                return Self::from_syspath(ctx, &path);
            }
        }
        Err(Error::NotFound(format!("n{index}")))
    }

    /// Snapshot of the sysfs device at the canonical `syspath`
    fn from_sysfs(ctx: &Context, root: &Path, syspath: PathBuf, kind: Kind) -> Result<Self> {
        let devpath = devpath_of(root, &syspath)?;
        let kernel_name = syspath
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("{}: {NOT_DEVICE}", syspath.display())))?
            .to_owned();

        let uevent = match read_uevent(&syspath.join("uevent")) {
            Ok(u) => u,
            Err(e) => {
                tracing::trace!(syspath = %syspath.display(), "no uevent: {e}");
                Vec::new()
            }
        };
        let get = |key: &str| {
            uevent
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let subsystem = sysfs::subsystem(&syspath, &kind);
        let driver_subsystem = match &kind {
            Kind::Driver { bus } => Some(bus.clone()),
            _ => None,
        };
        let driver = match kind {
            Kind::Device => {
                link_name(&syspath.join("driver")).or_else(|| get("DRIVER").map(Into::into))
            }
            _ => None,
        };
        let devnum = DevNum::from_pair(get("MAJOR"), get("MINOR")).or_else(|| {
            read_attribute(&syspath, "dev")
                .ok()
                .and_then(|d| DevNum::parse(&d))
        });
        let devnode = match (devnum, get("DEVNAME")) {
            (Some(_), Some(name)) => Some(devnode_path(ctx, name)),
            _ => None,
        };
        let ifindex = get("IFINDEX").and_then(|i| i.parse().ok()).or_else(|| {
            if subsystem.as_deref() == Some("net") {
                read_attribute(&syspath, "ifindex").ok()?.parse().ok()
            } else {
                None
            }
        });

        let mut snap = Snapshot {
            ctx: ctx.clone(),
            syspath,
            devpath,
            sysname: kernel_name.replace('!', "/"),
            kernel_name,
            subsystem,
            driver_subsystem,
            devtype: get("DEVTYPE").map(Into::into),
            driver,
            devnum,
            devnode,
            ifindex,
            seqnum: None,
            action: None,
            initialized: false,
            usec_initialized: None,
            properties: List::default(),
            tags: List::default(),
            current_tags: List::default(),
            devlinks: List::default(),
        };

        let record = match snap.device_id() {
            Some(id) => match Record::read(ctx.run_path(), &id) {
                Ok(r) => r,
                Err(e) => {
                    ctx_log!(
                        ctx,
                        Priority::Warning,
                        "{}: unreadable udev database record {id}: {e}",
                        snap.devpath
                    );
                    None
                }
            },
            None => None,
        };

        let mut props = ListBuilder::new();
        props.insert("DEVPATH", Some(&snap.devpath));
        if let Some(s) = &snap.subsystem {
            props.insert("SUBSYSTEM", Some(s));
        }
        for (k, v) in &uevent {
            if k == "DEVNAME" {
                let node = devnode_path(ctx, v);
                props.insert(k.as_str(), Some(node.to_string_lossy()));
            } else {
                props.insert(k.as_str(), Some(v.as_str()));
            }
        }
        if let Some(d) = snap.devnum {
            if !props.contains("MAJOR") {
                props
                    .insert("MAJOR", Some(d.major.to_string()))
                    .insert("MINOR", Some(d.minor.to_string()));
            }
        }
        if let Some(d) = &snap.driver {
            if !props.contains("DRIVER") {
                props.insert("DRIVER", Some(d));
            }
        }
        if let Some(i) = snap.ifindex {
            if !props.contains("IFINDEX") {
                props.insert("IFINDEX", Some(i.to_string()));
            }
        }

        if let Some(record) = record {
            for (k, v) in &record.properties {
                props.insert(k.as_str(), Some(v.as_str()));
            }
            let devlinks: Vec<String> = record
                .devlinks
                .iter()
                .map(|l| devnode_path(ctx, l).to_string_lossy().into_owned())
                .collect();
            if !devlinks.is_empty() {
                props.insert("DEVLINKS", Some(devlinks.join(" ")));
            }
            if !record.tags.is_empty() {
                props.insert("TAGS", Some(join_tags(&record.tags[..])));
            }
            let current = record.effective_current_tags();
            if !current.is_empty() {
                props.insert("CURRENT_TAGS", Some(join_tags(current)));
            }
            if let Some(usec) = record.usec_initialized {
                props.insert("USEC_INITIALIZED", Some(usec.to_string()));
            }

            snap.devlinks = names(devlinks);
            snap.tags = names(record.tags.iter());
            snap.current_tags = names(current.iter());
            snap.usec_initialized = record.usec_initialized;
            snap.initialized = true;
        }
        snap.properties = props.build();

        tracing::trace!(devpath = %snap.devpath, "read device from sysfs");
        Ok(Self::new(snap))
    }

    /// Snapshot from event properties
    fn from_properties(ctx: &Context, mut props: ListBuilder) -> Result<Self> {
        let devpath = props
            .get("DEVPATH")
            .ok_or_else(|| Error::Malformed(MISSING_DEVPATH.into()))?
            .to_owned();
        check_devpath(&devpath)?;
        let subsystem = props
            .get("SUBSYSTEM")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Malformed(format!("{devpath}: {MISSING_SUBSYSTEM}")))?
            .to_owned();
        let action = props.get("ACTION").map(str::parse::<Action>).transpose()?;
        let parse = |key: &str| props.get(key).and_then(|v| v.trim().parse::<u64>().ok());
        let seqnum = parse("SEQNUM");
        let usec_initialized = parse("USEC_INITIALIZED");
        let ifindex = parse("IFINDEX")
            .and_then(|i| u32::try_from(i).ok())
            .filter(|i| *i > 0);
        let devnum = DevNum::from_pair(props.get("MAJOR"), props.get("MINOR"));
        let devtype = props.get("DEVTYPE").map(ToOwned::to_owned);
        let driver = props.get("DRIVER").map(ToOwned::to_owned);
        let devlinks: Vec<String> = props
            .get("DEVLINKS")
            .map(|l| l.split_whitespace().map(Into::into).collect())
            .unwrap_or_default();
        let tags = split_tags(props.get("TAGS"));
        let current_tags = match props.get("CURRENT_TAGS") {
            Some(t) => split_tags(Some(t)),
            None => tags.clone(),
        };

        let devname = props.get("DEVNAME").map(|n| devnode_path(ctx, n));
        if let Some(node) = &devname {
            props.insert("DEVNAME", Some(node.to_string_lossy()));
        }
        let devnode = devnum.and(devname);

        let root = sys_root(ctx);
        let syspath = root.join(devpath.trim_start_matches('/'));
        let kernel_name = devpath.rsplit('/').next().unwrap_or_default().to_owned();
        let driver_subsystem = if subsystem == "drivers" {
            // /bus/<bus>/drivers/<driver>
            devpath.split('/').nth(2).map(ToOwned::to_owned)
        } else {
            None
        };

        Ok(Self::new(Snapshot {
            ctx: ctx.clone(),
            syspath,
            devpath,
            sysname: kernel_name.replace('!', "/"),
            kernel_name,
            subsystem: Some(subsystem),
            driver_subsystem,
            devtype,
            driver,
            devnum,
            devnode,
            ifindex,
            seqnum,
            action,
            initialized: usec_initialized.is_some(),
            usec_initialized,
            properties: props.build(),
            tags: names(tags),
            current_tags: names(current_tags),
            devlinks: names(devlinks),
        }))
    }

    pub(crate) fn with_seqnum(self, seqnum: u64) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.snap.seqnum = Some(seqnum);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    fn fetch_sysattr(&self, name: &str) -> Sysattr {
        let path = self.syspath().join(name);
        let meta = match path.symlink_metadata() {
            Ok(m) => m,
            Err(_) => return Sysattr::Absent,
        };
        if meta.file_type().is_symlink() {
            return match name {
                "driver" | "subsystem" | "module" => {
                    link_name(&path).map_or(Sysattr::Absent, Sysattr::Fetched)
                }
                _ => Sysattr::Absent,
            };
        }
        if meta.is_dir() {
            return Sysattr::Absent;
        }
        match read_attribute(self.syspath(), name) {
            Ok(v) => Sysattr::Fetched(v),
            Err(e) => {
                tracing::trace!(devpath = self.devpath(), attr = name, "unreadable: {e}");
                Sysattr::Absent
            }
        }
    }

    fn find_parent(&self) -> Option<Device> {
        let ctx = self.context();
        let root = sys_root(ctx);
        for path in sysfs::ancestors(&root, self.syspath()) {
            match Self::from_syspath(ctx, path) {
                Ok(dev) => return Some(dev),
                Err(e) => ctx_log!(
                    ctx,
                    Priority::Debug,
                    "{}: skipping parent {}: {e}",
                    self.devpath(),
                    path.display()
                ),
            }
        }
        None
    }
}

/// Canonical sysfs root, or the configured one if it can't be resolved
fn sys_root(ctx: &Context) -> PathBuf {
    sysfs::root(ctx).unwrap_or_else(|_| ctx.sys_path().to_owned())
}

fn devpath_of(root: &Path, syspath: &Path) -> Result<String> {
    let rel = syspath
        .strip_prefix(root)
        .ok()
        .and_then(Path::to_str)
        .ok_or_else(|| Error::InvalidArgument(format!("{}: {OUTSIDE_SYSFS}", syspath.display())))?;
    Ok(format!("/{rel}"))
}

/// `devpath` must name a path below the sysfs root
fn check_devpath(devpath: &str) -> Result<()> {
    let confined = devpath
        .strip_prefix('/')
        .map_or(false, |rel| {
            rel.split('/').all(|c| !c.is_empty() && c != "." && c != "..")
        });
    if !confined {
        return Err(Error::Malformed(format!("`{devpath}`: {BAD_DEVPATH}")));
    }
    Ok(())
}

fn devnode_path(ctx: &Context, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_owned()
    } else {
        ctx.dev_path().join(path)
    }
}

fn check_sysattr_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(EMPTY_NAME.into()));
    }
    if name.starts_with('/') || name.contains('\0') || name.split('/').any(|c| c == "..") {
        return Err(Error::InvalidArgument(format!("{name}: {BAD_SYSATTR}")));
    }
    Ok(())
}

/// `:a:b:` form of a tag set
fn join_tags<S: AsRef<str>>(tags: &[S]) -> String {
    let mut s = String::from(":");
    for t in tags {
        s.push_str(t.as_ref());
        s.push(':');
    }
    s
}

fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| {
        t.split(':')
            .filter(|t| !t.is_empty())
            .map(Into::into)
            .collect()
    })
    .unwrap_or_default()
}

fn names<I>(iter: I) -> List
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut b = ListBuilder::new();
    for n in iter {
        b.name(n);
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        Context::builder()
            .sys_path(dir.path().join("sys"))
            .dev_path("/dev")
            .run_path(dir.path().join("run"))
            .conf_path(None::<PathBuf>)
            .read_env(false)
            .build()
    }

    /// A usb host controller with one disk below it
    fn tree() -> Result<TempDir> {
        let dir = tempfile::tempdir()?;
        let sys = dir.path().join("sys");
        let hc = sys.join("devices/pci0000:00/0000:00:14.0");
        let disk = hc.join("usb1/1-1/host0/block/sda");
        fs::create_dir_all(&disk)?;
        fs::create_dir_all(sys.join("bus/pci/drivers/xhci_hcd"))?;
        fs::create_dir_all(sys.join("class/block"))?;

        fs::write(hc.join("uevent"), "PCI_ID=8086:A36D\n")?;
        fs::write(hc.join("vendor"), "0x8086\n")?;
        symlink(sys.join("bus/pci"), hc.join("subsystem"))?;
        symlink(sys.join("bus/pci/drivers/xhci_hcd"), hc.join("driver"))?;
        symlink(sys.join("bus/pci"), hc.join("firmware_node"))?;

        fs::create_dir_all(sys.join("bus/usb"))?;
        fs::write(hc.join("usb1/1-1/uevent"), "DEVTYPE=usb_device\n")?;
        symlink(sys.join("bus/usb"), hc.join("usb1/1-1/subsystem"))?;

        fs::write(
            disk.join("uevent"),
            "MAJOR=8\nMINOR=0\nDEVNAME=sda\nDEVTYPE=disk\n",
        )?;
        fs::write(disk.join("size"), "1000\n")?;
        symlink(sys.join("class/block"), disk.join("subsystem"))?;

        fs::create_dir_all(dir.path().join("run/data"))?;
        fs::write(
            dir.path().join("run/data/b8:0"),
            "S:disk/by-id/usb-disk\nE:ID_BUS=usb\nG:systemd\nI:10\n",
        )?;
        Ok(dir)
    }

    fn disk(dir: &TempDir) -> Result<Device> {
        let ctx = context(dir);
        let path = dir
            .path()
            .join("sys/devices/pci0000:00/0000:00:14.0/usb1/1-1/host0/block/sda");
        Ok(Device::from_syspath(&ctx, path)?)
    }

    #[test]
    fn action() {
        assert_eq!("bind".parse::<Action>().unwrap(), Action::Bind);
        assert_eq!(Action::Offline.to_string(), "offline");
        assert!(matches!("explode".parse::<Action>(), Err(Error::Malformed(_))));
    }

    #[test]
    fn sysfs_snapshot() -> Result<()> {
        let dir = tree()?;
        let dev = disk(&dir)?;
        assert_eq!(
            dev.devpath(),
            "/devices/pci0000:00/0000:00:14.0/usb1/1-1/host0/block/sda"
        );
        assert_eq!(dev.sysname(), "sda");
        assert_eq!(dev.sysnum(), None);
        assert_eq!(dev.subsystem(), Some("block"));
        assert_eq!(dev.devtype(), Some("disk"));
        assert_eq!(dev.devnum(), Some(DevNum::new(8, 0)));
        assert_eq!(dev.devnode(), Some(Path::new("/dev/sda")));
        assert_eq!(dev.device_id(), Some(DeviceId::Block(DevNum::new(8, 0))));
        assert_eq!(dev.property_value("DEVNAME"), Some("/dev/sda"));
        assert_eq!(dev.property_value("DEVPATH"), Some(dev.devpath()));
        assert_eq!(dev.property_value("ID_BUS"), Some("usb"));
        assert_eq!(dev.property_value("DEVLINKS"), Some("/dev/disk/by-id/usb-disk"));
        assert_eq!(dev.property_value("TAGS"), Some(":systemd:"));
        assert_eq!(dev.property_value("CURRENT_TAGS"), Some(":systemd:"));
        assert!(dev.has_tag("systemd"));
        assert!(dev.has_current_tag("systemd"));
        assert!(dev.is_initialized());
        assert!(dev.usec_since_initialized().is_some());
        assert_eq!(dev.devlinks().len(), 1);
        Ok(())
    }

    #[test]
    fn sysattrs() -> Result<()> {
        let dir = tree()?;
        let dev = disk(&dir)?;
        let hc = dev.parent_with_subsystem_devtype("pci", None).unwrap();

        assert_eq!(hc.sysattr_value("vendor").as_deref(), Some("0x8086"));
        assert_eq!(hc.sysattr_value("driver").as_deref(), Some("xhci_hcd"));
        assert_eq!(hc.sysattr_value("subsystem").as_deref(), Some("pci"));
        assert_eq!(hc.sysattr_value("firmware_node"), None);
        assert_eq!(hc.sysattr_value("usb1"), None);
        assert_eq!(hc.sysattr_value("missing"), None);
        assert_eq!(hc.sysattr_value("../pci0000:00"), None);
        assert_eq!(hc.driver(), Some("xhci_hcd"));

        // Cached until written through the device
        fs::write(hc.syspath().join("vendor"), "0x1022\n")?;
        assert_eq!(hc.sysattr_value("vendor").as_deref(), Some("0x8086"));
        hc.set_sysattr_value("vendor", "0x10de")?;
        assert_eq!(hc.sysattr_value("vendor").as_deref(), Some("0x10de"));

        assert!(matches!(
            hc.set_sysattr_value("", "x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            hc.set_sysattr_value("usb1", "x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(hc.set_sysattr_value("nope", "x"), Err(Error::Io(_))));

        let names: Vec<_> = dev.sysattrs().names().map(ToOwned::to_owned).collect();
        assert_eq!(names, ["size", "subsystem"]);
        Ok(())
    }

    #[test]
    fn parents() -> Result<()> {
        let dir = tree()?;
        let dev = disk(&dir)?;
        // host0 and block have no uevent, so they're not devices
        let usb = dev.parent().unwrap();
        assert_eq!(usb.sysname(), "1-1");
        assert_eq!(usb.sysnum(), Some("1"));
        assert_eq!(usb.devtype(), Some("usb_device"));
        let hc = usb.parent().unwrap();
        assert_eq!(hc.sysname(), "0000:00:14.0");
        assert!(hc.parent().is_none());
        assert!(dev
            .parent_with_subsystem_devtype("usb", Some("usb_device"))
            .is_some());
        assert!(dev
            .parent_with_subsystem_devtype("pci", Some("usb_device"))
            .is_none());
        assert!(dev.parent_with_subsystem_devtype("scsi", None).is_none());
        Ok(())
    }

    #[test]
    fn environment() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = context(&dir);
        let env = [
            ("ACTION", "add"),
            ("DEVPATH", "/devices/virtual/tty/tty1"),
            ("SUBSYSTEM", "tty"),
            ("SEQNUM", "4711"),
            ("MAJOR", "4"),
            ("MINOR", "1"),
            ("DEVNAME", "tty1"),
            ("TAGS", ":seat:uaccess:"),
            ("CURRENT_TAGS", ":seat:"),
            ("USEC_INITIALIZED", "100"),
        ];
        let dev = Device::from_environment(&ctx, env)?;
        assert_eq!(dev.action(), Some(Action::Add));
        assert_eq!(dev.seqnum(), Some(4711));
        assert_eq!(dev.sysname(), "tty1");
        assert_eq!(dev.devnode(), Some(Path::new("/dev/tty1")));
        assert_eq!(dev.device_id(), Some(DeviceId::Char(DevNum::new(4, 1))));
        assert!(dev.has_tag("uaccess"));
        assert!(!dev.has_current_tag("uaccess"));
        assert!(dev.is_initialized());
        assert!(dev.syspath().ends_with("devices/virtual/tty/tty1"));

        let missing = Device::from_environment(&ctx, [("DEVPATH", "/devices/x")]);
        assert!(matches!(missing, Err(Error::Malformed(_))));
        // Must stay inside sysfs
        let devpaths = ["x", "/", "/..", "/devices/../../etc", "/devices/./tty", "/devices//tty1"];
        for devpath in devpaths {
            let dev = Device::from_environment(&ctx, [("DEVPATH", devpath), ("SUBSYSTEM", "misc")]);
            assert!(matches!(dev, Err(Error::Malformed(_))), "{devpath}");
        }
        Ok(())
    }

    #[test]
    fn not_found() -> Result<()> {
        let dir = tree()?;
        let ctx = context(&dir);
        let e = Device::from_syspath(&ctx, dir.path().join("sys/devices/nope")).unwrap_err();
        assert!(e.is_not_found());
        let e = Device::from_syspath(&ctx, dir.path().join("run")).unwrap_err();
        assert!(matches!(e, Error::InvalidArgument(_)));
        let e = Device::from_devnum(&ctx, DevNodeKind::Char, DevNum::new(8, 0)).unwrap_err();
        assert!(e.is_not_found());
        Ok(())
    }

    #[test]
    fn pseudo_devices() -> Result<()> {
        let dir = tree()?;
        let ctx = context(&dir);
        let drv = Device::from_subsystem_sysname(&ctx, "drivers", "pci:xhci_hcd")?;
        assert_eq!(drv.subsystem(), Some("drivers"));
        assert_eq!(drv.sysname(), "xhci_hcd");
        assert_eq!(drv.device_id().unwrap().to_string(), "+drivers:pci:xhci_hcd");
        assert!(drv.parent().is_none());

        let bus = Device::from_subsystem_sysname(&ctx, "subsystem", "pci")?;
        assert_eq!(bus.subsystem(), Some("subsystem"));
        assert_eq!(bus.devpath(), "/bus/pci");
        Ok(())
    }
}
