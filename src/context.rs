//! The library context
//!
//! Every other object is created from, and keeps alive, a [`Context`].
//! It holds the filesystem roots everything is read from, and the
//! diagnostic settings.
//!
//! # Configuration
//!
//! [`Context::new`] reads `udev_log=` from `/etc/udev/udev.conf`, then the
//! `UDEV_LOG` environment variable, which wins.
use crate::util::{CONF_PATH, DEV_PATH, HWDB_PATHS, RUN_PATH, SYSFS_PATH};
use parking_lot::RwLock;
use std::{
    any::Any,
    env,
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

/// Log a message through the contexts log sink and [`tracing`].
macro_rules! ctx_log {
    ($ctx:expr, $prio:expr, $($arg:tt)+) => {
        $ctx.log($prio, file!(), line!(), module_path!(), format_args!($($arg)+))
    };
}
pub(crate) use ctx_log;

/// Syslog style message priority
///
/// Lower is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Priority {
    fn from_u8(p: u8) -> Self {
        match p {
            0 => Self::Emerg,
            1 => Self::Alert,
            2 => Self::Crit,
            3 => Self::Err,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            _ => Self::Debug,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    /// Numeric priorities, or syslog names like `err` and `debug`
    fn from_str(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return if n <= 7 {
                Ok(Priority::from_u8(n))
            } else {
                Err(format!("log priority out of range: {n}"))
            };
        }
        match s {
            "emerg" => Ok(Priority::Emerg),
            "alert" => Ok(Priority::Alert),
            "crit" => Ok(Priority::Crit),
            "err" | "error" => Ok(Priority::Err),
            "warning" | "warn" => Ok(Priority::Warning),
            "notice" => Ok(Priority::Notice),
            "info" => Ok(Priority::Info),
            "debug" => Ok(Priority::Debug),
            s => Err(format!("unknown log priority `{s}`")),
        }
    }
}

/// One diagnostic message, as handed to a log sink
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub priority: Priority,
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
    pub args: fmt::Arguments<'a>,
}

/// Log sink set with [`Context::set_log_fn`]
///
/// May be called from any thread. The sink receives the logging [`Context`],
/// so it has no need to capture one.
pub type LogFn = dyn Fn(&Context, &Record<'_>) + Send + Sync;

type UserData = Arc<dyn Any + Send + Sync>;

struct Inner {
    sys_path: PathBuf,
    dev_path: PathBuf,
    run_path: PathBuf,
    hwdb_paths: Vec<PathBuf>,
    priority: AtomicU8,
    log_fn: RwLock<Option<Arc<LogFn>>>,
    userdata: RwLock<Option<UserData>>,
}

/// Library context
///
/// Cloning is cheap, all clones refer to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("sys_path", &self.inner.sys_path)
            .field("dev_path", &self.inner.dev_path)
            .field("run_path", &self.inner.run_path)
            .field("priority", &self.log_priority())
            .finish_non_exhaustive()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// Constructors
impl Context {
    /// New context using the system paths and configuration
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Configure a new context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }
}

// Attributes
impl Context {
    /// sysfs mount point, `/sys` by default
    pub fn sys_path(&self) -> &Path {
        &self.inner.sys_path
    }

    /// Device node directory, `/dev` by default
    pub fn dev_path(&self) -> &Path {
        &self.inner.dev_path
    }

    /// udev runtime directory, `/run/udev` by default
    pub fn run_path(&self) -> &Path {
        &self.inner.run_path
    }

    /// Directories searched for `*.hwdb` files
    pub fn hwdb_paths(&self) -> &[PathBuf] {
        &self.inner.hwdb_paths
    }

    /// Messages less important than this are not passed to the log sink
    pub fn log_priority(&self) -> Priority {
        Priority::from_u8(self.inner.priority.load(Ordering::Relaxed))
    }

    pub fn set_log_priority(&self, priority: Priority) {
        self.inner.priority.store(priority as u8, Ordering::Relaxed);
    }

    /// Replace the log sink.
    ///
    /// Messages are always emitted through [`tracing`] as well.
    ///
    /// The context owns `f`, so a closure capturing a clone of this context
    /// keeps it alive forever. Use the `&Context` argument instead.
    pub fn set_log_fn<F>(&self, f: F)
    where
        F: Fn(&Context, &Record<'_>) + Send + Sync + 'static,
    {
        *self.inner.log_fn.write() = Some(Arc::new(f));
    }

    /// Opaque caller data
    pub fn userdata(&self) -> Option<UserData> {
        self.inner.userdata.read().clone()
    }

    pub fn set_userdata(&self, data: Option<UserData>) {
        *self.inner.userdata.write() = data;
    }
}

// Private
impl Context {
    pub(crate) fn log(
        &self,
        priority: Priority,
        file: &'static str,
        line: u32,
        function: &'static str,
        args: fmt::Arguments<'_>,
    ) {
        match priority {
            Priority::Emerg | Priority::Alert | Priority::Crit | Priority::Err => {
                tracing::error!(target: "linudev", "{}", args)
            }
            Priority::Warning => tracing::warn!(target: "linudev", "{}", args),
            Priority::Notice | Priority::Info => tracing::info!(target: "linudev", "{}", args),
            Priority::Debug => tracing::debug!(target: "linudev", "{}", args),
        }
        if priority > self.log_priority() {
            return;
        }
        // Clone out so the sink can call back into the context.
        let sink = self.inner.log_fn.read().clone();
        if let Some(sink) = sink {
            let record = Record {
                priority,
                file,
                line,
                function,
                args,
            };
            sink(self, &record);
        }
    }

    /// Whether `a` and `b` are clones of the same context
    pub(crate) fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Builder for [`Context`]
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    sys_path: PathBuf,
    dev_path: PathBuf,
    run_path: PathBuf,
    hwdb_paths: Vec<PathBuf>,
    conf_path: Option<PathBuf>,
    priority: Option<Priority>,
    read_env: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            sys_path: SYSFS_PATH.into(),
            dev_path: DEV_PATH.into(),
            run_path: RUN_PATH.into(),
            hwdb_paths: HWDB_PATHS.iter().map(PathBuf::from).collect(),
            conf_path: Some(CONF_PATH.into()),
            priority: None,
            read_env: true,
        }
    }
}

impl ContextBuilder {
    pub fn sys_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sys_path = path.into();
        self
    }

    pub fn dev_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.dev_path = path.into();
        self
    }

    pub fn run_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.run_path = path.into();
        self
    }

    pub fn hwdb_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.hwdb_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Configuration file to read, or [`None`] to skip it
    pub fn conf_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.conf_path = path.map(Into::into);
        self
    }

    /// Whether to honor `UDEV_LOG`. Defaults to `true`
    pub fn read_env(mut self, read_env: bool) -> Self {
        self.read_env = read_env;
        self
    }

    /// Fixed log priority, overriding configuration and environment
    pub fn log_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn build(self) -> Context {
        let mut priority = Priority::Err;
        let mut invalid = Vec::new();

        if let Some(conf) = &self.conf_path {
            match fs::read_to_string(conf) {
                Ok(data) => match parse_conf(&data) {
                    Ok(Some(p)) => priority = p,
                    Ok(None) => (),
                    Err(e) => invalid.push(format!("{}: {e}", conf.display())),
                },
                Err(e) => tracing::trace!(path = %conf.display(), "no udev.conf: {e}"),
            }
        }
        if self.read_env {
            if let Ok(v) = env::var("UDEV_LOG") {
                match v.parse() {
                    Ok(p) => priority = p,
                    Err(e) => invalid.push(format!("UDEV_LOG: {e}")),
                }
            }
        }
        if let Some(p) = self.priority {
            priority = p;
        }

        let ctx = Context {
            inner: Arc::new(Inner {
                sys_path: self.sys_path,
                dev_path: self.dev_path,
                run_path: self.run_path,
                hwdb_paths: self.hwdb_paths,
                priority: AtomicU8::new(priority as u8),
                log_fn: RwLock::new(None),
                userdata: RwLock::new(None),
            }),
        };
        for e in invalid {
            ctx_log!(ctx, Priority::Warning, "ignoring invalid log priority, {e}");
        }
        ctx_log!(ctx, Priority::Debug, "context created, {:?}", ctx);
        ctx
    }
}

/// Parse `udev.conf`, returning the `udev_log` priority if set
fn parse_conf(data: &str) -> Result<Option<Priority>, String> {
    let mut priority = None;
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if key.trim() == "udev_log" {
            priority = Some(value.parse()?);
        }
    }
    Ok(priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;

    fn quiet() -> ContextBuilder {
        Context::builder()
            .conf_path(None::<PathBuf>)
            .read_env(false)
    }

    #[test]
    fn priority_parse() {
        assert_eq!("3".parse::<Priority>(), Ok(Priority::Err));
        assert_eq!("debug".parse::<Priority>(), Ok(Priority::Debug));
        assert_eq!(" info ".parse::<Priority>(), Ok(Priority::Info));
        assert!("8".parse::<Priority>().is_err());
        assert!("loud".parse::<Priority>().is_err());
    }

    #[test]
    fn conf() {
        let conf = "# comment\nudev_log=\"debug\"\nother=1\n";
        assert_eq!(parse_conf(conf), Ok(Some(Priority::Debug)));
        assert_eq!(parse_conf("children_max=8"), Ok(None));
        assert!(parse_conf("udev_log=shouting").is_err());
    }

    #[test]
    fn conf_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let conf = dir.path().join("udev.conf");
        fs::write(&conf, "udev_log=info\n")?;
        let ctx = Context::builder()
            .conf_path(Some(&conf))
            .read_env(false)
            .build();
        assert_eq!(ctx.log_priority(), Priority::Info);
        Ok(())
    }

    #[test]
    fn log_sink_threshold() {
        let ctx = quiet().log_priority(Priority::Info).build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        ctx.set_log_fn(move |_, r| {
            s.lock().unwrap().push((r.priority, r.args.to_string()));
        });

        ctx_log!(ctx, Priority::Debug, "hidden {}", 1);
        ctx_log!(ctx, Priority::Info, "shown {}", 2);
        ctx_log!(ctx, Priority::Err, "shown {}", 3);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (Priority::Info, "shown 2".to_owned()),
                (Priority::Err, "shown 3".to_owned())
            ]
        );
    }

    #[test]
    fn userdata() {
        let ctx = quiet().build();
        assert!(ctx.userdata().is_none());
        ctx.set_userdata(Some(Arc::new(42u32)));
        let data = ctx.userdata().unwrap();
        assert_eq!(data.downcast_ref::<u32>(), Some(&42));
        let clone = ctx.clone();
        assert!(Context::same(&ctx, &clone));
        assert!(clone.userdata().is_some());
    }
}
