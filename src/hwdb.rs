//! The hardware database
//!
//! Maps modalias-style keys to properties, from `*.hwdb` source files.
//!
//! ```text
//! # Comment
//! usb:v046DpC52B*
//! usb:v046DpC534*
//!  ID_VENDOR_FROM_DATABASE=Logitech, Inc.
//!  ID_INPUT_MOUSE=1
//! ```
//!
//! A record is one or more match lines, followed by indented properties.
//! Records are separated by blank lines.
use crate::{
    context::{ctx_log, Context, Priority},
    error::Result,
    list::{List, ListBuilder},
    util::fnmatch,
};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt,
    fs,
    io,
    path::PathBuf,
    sync::Arc,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Record {
    matches: Vec<String>,
    properties: Vec<(String, String)>,
}

struct Inner {
    ctx: Context,
    records: Vec<Record>,
}

/// Hardware database
///
/// Cloning is cheap.
#[derive(Clone)]
pub struct Hwdb {
    inner: Arc<Inner>,
}

impl fmt::Debug for Hwdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hwdb")
            .field("records", &self.inner.records.len())
            .finish_non_exhaustive()
    }
}

// Constructors
impl Hwdb {
    /// Load every `*.hwdb` file in the contexts hwdb directories
    ///
    /// Files are read in name order. A file hides same-named files in later
    /// directories.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Io`] if a directory exists but can't be read
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut files: BTreeMap<OsString, PathBuf> = BTreeMap::new();
        for dir in ctx.hwdb_paths() {
            let entries = match fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if path.extension().map_or(true, |e| e != "hwdb") {
                    continue;
                }
                if let Some(name) = path.file_name() {
                    files.entry(name.to_owned()).or_insert(path);
                }
            }
        }

        let mut records = Vec::new();
        for path in files.values() {
            let data = match fs::read_to_string(path) {
                Ok(d) => d,
                Err(e) => {
                    ctx_log!(ctx, Priority::Warning, "{}: skipping: {e}", path.display());
                    continue;
                }
            };
            let (parsed, errors) = parse(&data);
            for (line, e) in errors {
                ctx_log!(ctx, Priority::Warning, "{}:{line}: {e}", path.display());
            }
            records.extend(parsed);
        }
        tracing::debug!(files = files.len(), records = records.len(), "loaded hwdb");

        Ok(Self {
            inner: Arc::new(Inner {
                ctx: ctx.clone(),
                records,
            }),
        })
    }
}

// Operations
impl Hwdb {
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Properties of every record matching `modalias`
    ///
    /// Later records override earlier ones.
    pub fn properties(&self, modalias: &str) -> List {
        let mut b = ListBuilder::new();
        for r in &self.inner.records {
            if r.matches.iter().any(|m| fnmatch(m, modalias)) {
                for (k, v) in &r.properties {
                    b.insert(k.as_str(), Some(v.as_str()));
                }
            }
        }
        b.build()
    }
}

/// Parse hwdb source, returning the records and `(line, error)` pairs for
/// lines that were skipped
fn parse(data: &str) -> (Vec<Record>, Vec<(usize, &'static str)>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    let mut cur = Record::default();

    for (i, line) in data.lines().enumerate() {
        let line = line.trim_end();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !cur.matches.is_empty() {
                records.push(std::mem::take(&mut cur));
            }
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if cur.matches.is_empty() {
                errors.push((i + 1, "property without a match"));
                continue;
            }
            match line.trim_start().split_once('=') {
                Some((k, v)) if !k.is_empty() => {
                    cur.properties.push((k.to_owned(), v.to_owned()));
                }
                _ => errors.push((i + 1, "invalid property")),
            }
        } else {
            // A match after properties starts the next record
            if !cur.properties.is_empty() {
                records.push(std::mem::take(&mut cur));
            }
            cur.matches.push(line.to_owned());
        }
    }
    if !cur.matches.is_empty() {
        records.push(cur);
    }
    (records, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const MICE: &str = "\
# Logitech receivers
usb:v046DpC52B*
usb:v046DpC534*
 ID_VENDOR_FROM_DATABASE=Logitech, Inc.
 ID_INPUT_MOUSE=1

usb:v046DpC534*
 ID_MODEL_FROM_DATABASE=Unifying Receiver
 MOUSE_DPI=1000@125
";

    #[test]
    fn parse_records() {
        let (records, errors) = parse(MICE);
        assert!(errors.is_empty());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].matches.len(), 2);
        assert_eq!(
            records[1].properties[1],
            ("MOUSE_DPI".to_owned(), "1000@125".to_owned())
        );
    }

    #[test]
    fn parse_errors() {
        let (records, errors) = parse(" ORPHAN=1\n\nkey:*\n =nothing\n GOOD=1\n");
        assert_eq!(errors, [(1, "property without a match"), (4, "invalid property")]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].properties.len(), 1);
    }

    #[test]
    fn lookup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let etc = dir.path().join("etc");
        let lib = dir.path().join("lib");
        fs::create_dir_all(&etc)?;
        fs::create_dir_all(&lib)?;
        fs::write(lib.join("70-mouse.hwdb"), MICE)?;
        fs::write(lib.join("README"), "usb:*\n X=1\n")?;
        // Hides the file of the same name in `lib`
        fs::write(etc.join("60-keyboard.hwdb"), "usb:v046D*\n ID_VENDOR_FROM_DATABASE=Logi\n")?;
        fs::write(lib.join("60-keyboard.hwdb"), "usb:*\n HIDDEN=1\n")?;

        let ctx = Context::builder()
            .hwdb_paths([&etc, &lib])
            .conf_path(None::<PathBuf>)
            .read_env(false)
            .build();
        let hwdb = Hwdb::new(&ctx)?;

        let p = hwdb.properties("usb:v046DpC534d2901dc00dsc00dp00ic03isc01ip02in00");
        assert_eq!(p.value("ID_VENDOR_FROM_DATABASE"), Some("Logitech, Inc."));
        assert_eq!(p.value("ID_MODEL_FROM_DATABASE"), Some("Unifying Receiver"));
        assert_eq!(p.value("ID_INPUT_MOUSE"), Some("1"));
        assert!(!p.contains("HIDDEN"));
        assert!(!p.contains("X"));
        // 60-keyboard comes first, 70-mouse overrides it
        assert_eq!(p.names().next(), Some("ID_VENDOR_FROM_DATABASE"));

        assert!(hwdb.properties("pci:v00008086d*").is_empty());
        Ok(())
    }
}
