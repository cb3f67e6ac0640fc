//! Fake sysfs, device and udev runtime trees
#![allow(dead_code)]
use anyhow::Result;
use linudev::Context;
use std::{
    fs,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub struct Tree {
    dir: TempDir,
    pub ctx: Context,
}

impl Tree {
    /// An empty tree
    pub fn empty() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        for d in ["sys/bus", "sys/class", "sys/dev/block", "sys/dev/char", "sys/kernel", "run"] {
            fs::create_dir_all(dir.path().join(d))?;
        }
        let ctx = Context::builder()
            .sys_path(dir.path().join("sys"))
            .dev_path("/dev")
            .run_path(dir.path().join("run"))
            .hwdb_paths([dir.path().join("hwdb")])
            .conf_path(None::<PathBuf>)
            .read_env(false)
            .build();
        Ok(Self { dir, ctx })
    }

    /// A usb disk, a terminal and loopback
    ///
    /// ```text
    /// /devices/pci0000:00/0000:00:14.0                      pci
    ///   usb1                                                usb, c189:0
    ///     1-1                                               usb, c189:1
    ///       1-1:1.0                                         usb
    ///         host0/target0:0:0/0:0:0:0/block/sda           block, b8:0
    ///           sda1                                        block, b8:1
    /// /devices/virtual/net/lo                               net, n1
    /// /devices/virtual/tty/tty1                             tty, c4:1
    /// ```
    pub fn standard() -> Result<Self> {
        let t = Self::empty()?;
        let hc = "/devices/pci0000:00/0000:00:14.0";
        t.bus_device(hc, "pci", "DRIVER=xhci_hcd\nPCI_CLASS=C0330\n")?;
        t.attr(hc, "vendor", "0x8086\n")?;
        t.attr(hc, "power/control", "auto\n")?;

        let usb1 = format!("{hc}/usb1");
        t.bus_device(
            &usb1,
            "usb",
            "MAJOR=189\nMINOR=0\nDEVNAME=bus/usb/001/001\nDEVTYPE=usb_device\n",
        )?;
        let port = format!("{usb1}/1-1");
        t.bus_device(
            &port,
            "usb",
            "MAJOR=189\nMINOR=1\nDEVNAME=bus/usb/001/002\nDEVTYPE=usb_device\n",
        )?;
        t.attr(&port, "idVendor", "0781\n")?;
        t.attr(&port, "product", "Cruzer Blade\n")?;
        let intf = format!("{port}/1-1:1.0");
        t.bus_device(&intf, "usb", "DEVTYPE=usb_interface\nMODALIAS=usb:v0781p5567\n")?;

        let sda = format!("{intf}/host0/target0:0:0/0:0:0:0/block/sda");
        t.class_device(&sda, "block", "MAJOR=8\nMINOR=0\nDEVNAME=sda\nDEVTYPE=disk\n")?;
        t.attr(&sda, "size", "30031872\n")?;
        t.attr(&sda, "removable", "1\n")?;
        t.class_device(
            &format!("{sda}/sda1"),
            "block",
            "MAJOR=8\nMINOR=1\nDEVNAME=sda1\nDEVTYPE=partition\nPARTN=1\n",
        )?;

        t.class_device("/devices/virtual/net/lo", "net", "INTERFACE=lo\nIFINDEX=1\n")?;
        t.attr("/devices/virtual/net/lo", "ifindex", "1\n")?;
        t.class_device(
            "/devices/virtual/tty/tty1",
            "tty",
            "MAJOR=4\nMINOR=1\nDEVNAME=tty1\n",
        )?;

        t.db(
            "b8:0",
            "S:disk/by-id/usb-SanDisk_Cruzer_Blade\nE:ID_BUS=usb\nE:ID_MODEL=Cruzer_Blade\nG:systemd\nI:1000\n",
        )?;
        t.tag("systemd", "b8:0")?;
        t.db("b8:1", "E:ID_BUS=usb\nE:ID_PART_ENTRY_NUMBER=1\nI:1000\n")?;
        t.db("n1", "G:systemd\nI:1000\n")?;
        t.tag("systemd", "n1")?;
        t.db("c4:1", "G:uaccess\nG:seat\nQ:seat\nI:1000\n")?;
        t.tag("uaccess", "c4:1")?;
        t.tag("seat", "c4:1")?;

        t.kernel_seqnum(10)?;
        Ok(t)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn sys(&self) -> PathBuf {
        self.dir.path().join("sys")
    }

    pub fn run(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    /// `devpath` as a path in the tree
    pub fn syspath(&self, devpath: &str) -> PathBuf {
        self.sys().join(devpath.trim_start_matches('/'))
    }

    /// Device on bus `bus`, listed in `/sys/bus/<bus>/devices`
    pub fn bus_device(&self, devpath: &str, bus: &str, uevent: &str) -> Result<PathBuf> {
        let index = self.sys().join("bus").join(bus).join("devices");
        fs::create_dir_all(self.sys().join("bus").join(bus).join("drivers"))?;
        self.device(devpath, &self.sys().join("bus").join(bus), &index, uevent, false)
    }

    /// Device of class `class`, listed in `/sys/class/<class>`
    pub fn class_device(&self, devpath: &str, class: &str, uevent: &str) -> Result<PathBuf> {
        let index = self.sys().join("class").join(class);
        self.device(devpath, &index, &index, uevent, class == "block")
    }

    pub fn attr(&self, devpath: &str, name: &str, value: &str) -> Result<()> {
        let path = self.syspath(devpath).join(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, value)?;
        Ok(())
    }

    /// udev database record for device `id`
    pub fn db(&self, id: &str, record: &str) -> Result<()> {
        fs::create_dir_all(self.run().join("data"))?;
        fs::write(self.run().join("data").join(id), record)?;
        Ok(())
    }

    pub fn tag(&self, tag: &str, id: &str) -> Result<()> {
        let dir = self.run().join("tags").join(tag);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(id), "")?;
        Ok(())
    }

    pub fn kernel_seqnum(&self, seqnum: u64) -> Result<()> {
        fs::write(self.sys().join("kernel/uevent_seqnum"), format!("{seqnum}\n"))?;
        Ok(())
    }

    fn device(
        &self,
        devpath: &str,
        subsystem: &Path,
        index: &Path,
        uevent: &str,
        block: bool,
    ) -> Result<PathBuf> {
        let path = self.syspath(devpath);
        fs::create_dir_all(&path)?;
        fs::create_dir_all(index)?;
        fs::write(path.join("uevent"), uevent)?;
        symlink(subsystem, path.join("subsystem"))?;

        let name = path.file_name().expect("devpath has a name");
        symlink(&path, index.join(name))?;

        let get = |key: &str| {
            uevent
                .lines()
                .find_map(|l| l.strip_prefix(key)?.strip_prefix('='))
        };
        if let (Some(major), Some(minor)) = (get("MAJOR"), get("MINOR")) {
            let dev = format!("{major}:{minor}");
            fs::write(path.join("dev"), format!("{dev}\n"))?;
            let kind = if block { "block" } else { "char" };
            symlink(&path, self.sys().join("dev").join(kind).join(dev))?;
        }
        Ok(path)
    }
}
