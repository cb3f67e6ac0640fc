//! The udev runtime database
//!
//! udev records what it knows about each device it has processed in
//! `<RUN>/data/<device id>`, one record per line:
//!
//! - `S:<link>`, a devlink, relative to the device node directory
//! - `E:<KEY>=<VALUE>`, a property
//! - `G:<tag>`, a tag
//! - `Q:<tag>`, a current tag
//! - `I:<usec>`, `CLOCK_MONOTONIC` time the device was first initialized
//!
//! Other record types exist and are ignored.
//!
//! Tagged devices are also indexed as `<RUN>/tags/<tag>/<device id>`.
use super::id::DeviceId;
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

/// One devices database record
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub devlinks: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub current_tags: Vec<String>,
    pub usec_initialized: Option<u64>,
}

impl Record {
    pub fn parse(data: &str) -> Self {
        let mut r = Self::default();
        for line in data.lines() {
            let (key, value) = match line.split_once(':') {
                Some(kv) => kv,
                None => continue,
            };
            match key {
                "S" if !value.is_empty() => r.devlinks.push(value.to_owned()),
                "E" => {
                    if let Some((k, v)) = value.split_once('=') {
                        r.properties.push((k.to_owned(), v.to_owned()));
                    }
                }
                "G" if !value.is_empty() => r.tags.push(value.to_owned()),
                "Q" if !value.is_empty() => r.current_tags.push(value.to_owned()),
                "I" => r.usec_initialized = value.trim().parse().ok(),
                _ => (),
            }
        }
        r
    }

    /// Read the record for `id`
    ///
    /// Returns [`None`] if udev has no record of the device.
    pub fn read(run: &Path, id: &DeviceId) -> io::Result<Option<Self>> {
        match fs::read_to_string(record_path(run, id)) {
            Ok(data) => Ok(Some(Self::parse(&data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current tags, which older udev versions never recorded
    pub fn effective_current_tags(&self) -> &[String] {
        if self.current_tags.is_empty() {
            &self.tags
        } else {
            &self.current_tags
        }
    }
}

pub(crate) fn record_path(run: &Path, id: &DeviceId) -> PathBuf {
    run.join("data").join(id.to_string())
}

/// Ids of every device tagged `tag`, sorted
pub(crate) fn tagged(run: &Path, tag: &str) -> io::Result<Vec<String>> {
    let dir = run.join("tags").join(tag);
    let mut ids = Vec::new();
    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_owned());
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DevNum;
    use anyhow::Result;

    const RECORD: &str = "\
S:disk/by-id/ata-WDC_WD10EZEX
S:disk/by-path/pci-0000:00:17.0-ata-1
I:1234567
E:ID_BUS=ata
E:ID_MODEL=WDC_WD10EZEX
E:ID_FS_LABEL=a=b
G:systemd
G:uaccess
Q:systemd
V:1
W:42
";

    #[test]
    fn parse() {
        let r = Record::parse(RECORD);
        assert_eq!(r.devlinks.len(), 2);
        assert_eq!(r.devlinks[0], "disk/by-id/ata-WDC_WD10EZEX");
        assert_eq!(r.usec_initialized, Some(1234567));
        assert_eq!(
            r.properties,
            vec![
                ("ID_BUS".into(), "ata".into()),
                ("ID_MODEL".into(), "WDC_WD10EZEX".into()),
                ("ID_FS_LABEL".into(), "a=b".into()),
            ]
        );
        assert_eq!(r.tags, ["systemd", "uaccess"]);
        assert_eq!(r.effective_current_tags(), ["systemd"]);
    }

    #[test]
    fn current_tags_fallback() {
        let r = Record::parse("G:seat\nG:uaccess\n");
        assert_eq!(r.effective_current_tags(), ["seat", "uaccess"]);
    }

    #[test]
    fn read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let id = DeviceId::Block(DevNum::new(8, 0));
        assert_eq!(Record::read(dir.path(), &id)?, None);

        fs::create_dir_all(dir.path().join("data"))?;
        fs::write(dir.path().join("data/b8:0"), RECORD)?;
        let r = Record::read(dir.path(), &id)?.unwrap();
        assert_eq!(r.tags.len(), 2);

        fs::create_dir_all(dir.path().join("tags/systemd"))?;
        fs::write(dir.path().join("tags/systemd/c4:1"), "")?;
        fs::write(dir.path().join("tags/systemd/b8:0"), "")?;
        assert_eq!(tagged(dir.path(), "systemd")?, ["b8:0", "c4:1"]);
        assert!(tagged(dir.path(), "nothing")?.is_empty());
        Ok(())
    }
}
