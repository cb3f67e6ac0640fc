//! Receiving device events
//!
//! A [`Monitor`] subscribes to the kernels uevent netlink socket, either to
//! raw kernel events or to events udev has finished processing.
//!
//! # Example
//!
//! ```rust,no_run
//! # use linudev::{Context, Monitor};
//! # fn main() -> linudev::Result<()> {
//! let ctx = Context::new();
//! let mon = Monitor::new(&ctx, "udev")?;
//! mon.filter_add_match_subsystem_devtype("block", Some("disk"))?;
//! mon.enable_receiving()?;
//! while let Some(dev) = mon.receive_device()? {
//!     println!("{:?} {}", dev.action(), dev.syspath().display());
//! }
//! # Ok(())
//! # }
//! ```
use crate::{
    context::{ctx_log, Context, Priority},
    device::Device,
    error::{text::*, Error, Result},
};
use bitflags::bitflags;
use nix::{
    cmsg_space,
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    poll::{poll, PollFd, PollFlags},
    sys::{
        eventfd::{eventfd, EfdFlags},
        socket::{
            bind,
            recv,
            recvmsg,
            setsockopt,
            shutdown,
            socket,
            sockopt,
            AddressFamily,
            ControlMessageOwned,
            MsgFlags,
            NetlinkAddr,
            Shutdown,
            SockFlag,
            SockProtocol,
            SockType,
            UnixCredentials,
        },
    },
    unistd,
};
use parking_lot::Mutex;
use std::{
    fmt,
    io::IoSliceMut,
    os::unix::{
        io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        net::UnixDatagram,
    },
    sync::Arc,
};

mod uevent;

pub use uevent::UEvent;

/// Largest message udev sends
const RECV_BUFFER_LEN: usize = 8192;

bitflags! {
    /// `NETLINK_KOBJECT_UEVENT` multicast groups
    pub(crate) struct Groups: u32 {
        /// Raw kernel events
        const KERNEL = 1;

        /// Events processed by udev
        const UDEV = 2;
    }
}

/// Where events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Netlink(Groups),

    /// Caller provided socket
    Socket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Enabled,
    Closed,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Enabled => "enabled",
            Self::Closed => "closed",
        }
    }
}

/// Which events get delivered
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Filter {
    /// `(subsystem, devtype)`, [`None`] matching any devtype
    subsystems: Vec<(String, Option<String>)>,
    tags: Vec<String>,
}

impl Filter {
    fn matches(&self, dev: &Device) -> bool {
        let subsystem = self.subsystems.is_empty()
            || self.subsystems.iter().any(|(s, t)| {
                dev.subsystem() == Some(s.as_str())
                    && t.as_deref().map_or(true, |t| dev.devtype() == Some(t))
            });
        let tag = self.tags.is_empty() || self.tags.iter().any(|t| dev.has_tag(t));
        subsystem && tag
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    /// Edited by the `filter_add_*` methods
    staged: Filter,
    /// Applied to received events
    committed: Filter,
    last_seqnum: u64,
}

struct Inner {
    ctx: Context,
    fd: OwnedFd,
    /// Readable once the monitor is closed
    wake: OwnedFd,
    source: Source,
    state: Mutex<State>,
}

/// Device event monitor
///
/// Cloning is cheap, all clones share one subscription. The socket is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("fd", &self.inner.fd.as_raw_fd())
            .field("source", &self.inner.source)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

// Constructors
impl Monitor {
    /// New monitor for events from `source`
    ///
    /// `source` is `"udev"` for events udev has processed, or `"kernel"` for
    /// raw kernel events. Raw events race with udev, so the devices may not
    /// be initialized yet.
    ///
    /// Only multicast messages sent by root are accepted, and for `"kernel"`
    /// only those sent by the kernel itself.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for any other `source`
    /// - [`Error::Io`] if the socket can't be created
    pub fn new(ctx: &Context, source: &str) -> Result<Self> {
        let groups = match source {
            "udev" => Groups::UDEV,
            "kernel" => Groups::KERNEL,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown event source `{source}`"
                )))
            }
        };
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkKObjectUEvent,
        )?;
        // Safety: `socket` just returned it and nothing else owns it
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // Credentials of the sender, checked on every message
        setsockopt(fd.as_raw_fd(), sockopt::PassCred, &true)?;
        tracing::debug!(source, fd = fd.as_raw_fd(), "created uevent socket");
        Self::with_fd(ctx, fd, Source::Netlink(groups))
    }

    /// Monitor receiving from an already connected `socket`
    ///
    /// The socket must carry one encoded [`UEvent`] per datagram, in either
    /// framing. Senders are not checked, the caller vouches for the peer.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the wakeup descriptor can't be created
    pub fn from_socket(ctx: &Context, socket: UnixDatagram) -> Result<Self> {
        Self::with_fd(ctx, OwnedFd::from(socket), Source::Socket)
    }
}

// Operations
impl Monitor {
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Only deliver devices in `subsystem`, and of `devtype` if given
    ///
    /// Before [`Monitor::enable_receiving`] this takes effect immediately,
    /// afterwards only on [`Monitor::filter_update`].
    pub fn filter_add_match_subsystem_devtype(
        &self,
        subsystem: &str,
        devtype: Option<&str>,
    ) -> Result<()> {
        if subsystem.is_empty() {
            return Err(Error::InvalidArgument(EMPTY_NAME.into()));
        }
        let entry = (subsystem.to_owned(), devtype.map(ToOwned::to_owned));
        self.edit_filter(|f| f.subsystems.push(entry.clone()))
    }

    /// Only deliver devices with `tag`
    ///
    /// Takes effect like [`Monitor::filter_add_match_subsystem_devtype`].
    pub fn filter_add_match_tag(&self, tag: &str) -> Result<()> {
        if tag.is_empty() {
            return Err(Error::InvalidArgument(EMPTY_NAME.into()));
        }
        self.edit_filter(|f| f.tags.push(tag.to_owned()))
    }

    /// Apply filters added since [`Monitor::enable_receiving`]
    pub fn filter_update(&self) -> Result<()> {
        let mut state = self.state()?;
        state.committed = state.staged.clone();
        ctx_log!(
            self.inner.ctx,
            Priority::Debug,
            "monitor filter updated, {:?}",
            state.committed
        );
        Ok(())
    }

    /// Remove all filters, delivering every event
    pub fn filter_remove(&self) -> Result<()> {
        let mut state = self.state()?;
        state.staged = Filter::default();
        state.committed = Filter::default();
        Ok(())
    }

    /// Start receiving events
    ///
    /// Does nothing if already receiving.
    pub fn enable_receiving(&self) -> Result<()> {
        let mut state = self.state()?;
        if state.phase == Phase::Enabled {
            return Ok(());
        }
        if let Source::Netlink(groups) = self.inner.source {
            bind(self.as_raw_fd(), &NetlinkAddr::new(0, groups.bits()))?;
        }
        state.phase = Phase::Enabled;
        tracing::debug!(fd = self.as_raw_fd(), "monitor enabled");
        Ok(())
    }

    /// Set the socket receive buffer size, in bytes
    ///
    /// Privileged callers can go past the system limit.
    pub fn set_receive_buffer_size(&self, size: usize) -> Result<()> {
        self.state()?;
        let fd = self.as_raw_fd();
        if let Err(e) = setsockopt(fd, sockopt::RcvBufForce, &size) {
            tracing::trace!("SO_RCVBUFFORCE failed, trying SO_RCVBUF: {e}");
            setsockopt(fd, sockopt::RcvBuf, &size)?;
        }
        Ok(())
    }

    /// Set whether [`Monitor::receive_device`] blocks
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.state()?;
        let fd = self.as_raw_fd();
        let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        flags.set(OFlag::O_NONBLOCK, nonblocking);
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
        Ok(())
    }

    /// Receive the next device event that passes the filters
    ///
    /// Blocks unless the socket is non-blocking.
    ///
    /// Returns [`None`] if no event is pending on a non-blocking socket, or
    /// the sending side went away.
    ///
    /// Undecodable and filtered events are skipped, as are messages from
    /// untrusted senders. If the kernel had to drop events the gap shows in
    /// [`Device::seqnum`].
    ///
    /// [`Device::seqnum`] strictly increases across the monitors lifetime.
    /// Events without a `SEQNUM`, or whose `SEQNUM` is not past the last one
    /// delivered, are numbered one past it. The `SEQNUM` property keeps the
    /// original value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if receiving isn't enabled yet
    /// - [`Error::Closed`] after [`Monitor::close`], including for a receiver
    ///   blocked here when it is called
    /// - [`Error::Io`] if receiving fails
    pub fn receive_device(&self) -> Result<Option<Device>> {
        {
            let state = self.state()?;
            if state.phase != Phase::Enabled {
                return Err(Error::InvalidState(state.phase.as_str()));
            }
        }
        let ctx = &self.inner.ctx;
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut hangup = false;
        loop {
            let len = match self.recv_datagram(&mut buf) {
                Ok(Some(0)) => return Ok(None),
                Ok(Some(len)) => len,
                // Untrusted sender
                Ok(None) => continue,
                Err(Errno::EAGAIN) => {
                    if hangup || self.is_nonblocking()? {
                        return Ok(None);
                    }
                    hangup = self.wait()?;
                    continue;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ENOBUFS) => {
                    ctx_log!(ctx, Priority::Warning, "uevent socket overrun, events were lost");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let event = match UEvent::decode(&buf[..len]) {
                Ok(ev) => ev,
                Err(e) => {
                    ctx_log!(ctx, Priority::Debug, "ignoring message: {e}");
                    continue;
                }
            };
            let dev = match Device::from_environment(ctx, event.into_properties()) {
                Ok(d) => d,
                Err(e) => {
                    ctx_log!(ctx, Priority::Debug, "ignoring event: {e}");
                    continue;
                }
            };

            let mut state = self.state()?;
            if !state.committed.matches(&dev) {
                tracing::trace!(devpath = dev.devpath(), "event filtered");
                continue;
            }
            let seqnum = match dev.seqnum() {
                Some(n) if n > state.last_seqnum => n,
                native => {
                    if let Some(n) = native {
                        ctx_log!(
                            ctx,
                            Priority::Debug,
                            "{}: seqnum {n} is not after {}, renumbering",
                            dev.devpath(),
                            state.last_seqnum
                        );
                    }
                    state.last_seqnum + 1
                }
            };
            state.last_seqnum = seqnum;
            drop(state);

            tracing::debug!(
                devpath = dev.devpath(),
                action = ?dev.action(),
                seqnum,
                "received device event"
            );
            return Ok(Some(dev.with_seqnum(seqnum)));
        }
    }

    /// Stop receiving
    ///
    /// Receivers blocked in [`Monitor::receive_device`] on other threads wake
    /// up and fail with [`Error::Closed`], as does every later call.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Closed {
            return;
        }
        state.phase = Phase::Closed;
        if let Err(e) = unistd::write(self.inner.wake.as_raw_fd(), &1u64.to_ne_bytes()) {
            ctx_log!(self.inner.ctx, Priority::Err, "failed to wake receivers: {e}");
        }
        // Netlink sockets don't support this
        if let Err(e) = shutdown(self.as_raw_fd(), Shutdown::Both) {
            tracing::trace!("shutdown failed: {e}");
        }
        tracing::debug!(fd = self.as_raw_fd(), "monitor closed");
    }
}

// Private
impl Monitor {
    fn with_fd(ctx: &Context, fd: OwnedFd, source: Source) -> Result<Self> {
        let wake = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        // Safety: `eventfd` just returned it and nothing else owns it
        let wake = unsafe { OwnedFd::from_raw_fd(wake) };
        Ok(Self {
            inner: Arc::new(Inner {
                ctx: ctx.clone(),
                fd,
                wake,
                source,
                state: Mutex::new(State {
                    phase: Phase::Created,
                    staged: Filter::default(),
                    committed: Filter::default(),
                    last_seqnum: 0,
                }),
            }),
        })
    }

    /// Receive one datagram without blocking
    ///
    /// Returns [`None`] for netlink messages from untrusted senders.
    fn recv_datagram(&self, buf: &mut [u8]) -> nix::Result<Option<usize>> {
        let fd = self.as_raw_fd();
        let groups = match self.inner.source {
            Source::Socket => return recv(fd, buf, MsgFlags::MSG_DONTWAIT).map(Some),
            Source::Netlink(groups) => groups,
        };
        let mut cmsg = cmsg_space!(UnixCredentials);
        let mut iov = [IoSliceMut::new(buf)];
        let msg = recvmsg::<NetlinkAddr>(fd, &mut iov, Some(&mut cmsg), MsgFlags::MSG_DONTWAIT)?;
        let uid = msg.cmsgs().find_map(|c| match c {
            ControlMessageOwned::ScmCredentials(cred) => Some(cred.uid()),
            _ => None,
        });
        match check_sender(groups, msg.address.as_ref(), uid) {
            Ok(()) => Ok(Some(msg.bytes)),
            Err(reason) => {
                ctx_log!(
                    self.inner.ctx,
                    Priority::Debug,
                    "ignoring message: {reason}"
                );
                Ok(None)
            }
        }
    }

    fn is_nonblocking(&self) -> Result<bool> {
        let flags = OFlag::from_bits_truncate(fcntl(self.as_raw_fd(), FcntlArg::F_GETFL)?);
        Ok(flags.contains(OFlag::O_NONBLOCK))
    }

    /// Block until the socket is readable, returning whether the peer hung up
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the monitor was closed meanwhile
    fn wait(&self) -> Result<bool> {
        let mut fds = [
            PollFd::new(self.as_raw_fd(), PollFlags::POLLIN),
            PollFd::new(self.inner.wake.as_raw_fd(), PollFlags::POLLIN),
        ];
        loop {
            match poll(&mut fds, -1) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let revents = |fd: &PollFd| fd.revents().unwrap_or_else(PollFlags::empty);
        if !revents(&fds[1]).is_empty() {
            return Err(Error::Closed);
        }
        Ok(revents(&fds[0]).intersects(PollFlags::POLLHUP | PollFlags::POLLERR))
    }

    /// Lock the state, unless closed
    fn state(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let state = self.inner.state.lock();
        if state.phase == Phase::Closed {
            return Err(Error::Closed);
        }
        Ok(state)
    }

    fn edit_filter<F: Fn(&mut Filter)>(&self, f: F) -> Result<()> {
        let mut state = self.state()?;
        f(&mut state.staged);
        if state.phase == Phase::Created {
            f(&mut state.committed);
        }
        Ok(())
    }
}

/// Whether a netlink message may be trusted
///
/// It must be multicast and sent by root. Raw kernel events must also come
/// from the kernel, port id 0.
fn check_sender(
    groups: Groups,
    addr: Option<&NetlinkAddr>,
    uid: Option<libc::uid_t>,
) -> std::result::Result<(), &'static str> {
    let addr = addr.ok_or("no sender address")?;
    if addr.groups() == 0 {
        return Err("unicast message");
    }
    if groups.contains(Groups::KERNEL) && addr.pid() != 0 {
        return Err("kernel event sent from userspace");
    }
    match uid {
        Some(0) => Ok(()),
        Some(_) => Err("sender is not root"),
        None => Err("no sender credentials"),
    }
}

impl AsRawFd for Monitor {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::path::PathBuf;

    fn pair() -> Result<(Monitor, UnixDatagram)> {
        let ctx = Context::builder()
            .sys_path("/nonexistent/sys")
            .conf_path(None::<PathBuf>)
            .read_env(false)
            .build();
        let (rx, tx) = UnixDatagram::pair()?;
        rx.set_nonblocking(true)?;
        Ok((Monitor::from_socket(&ctx, rx)?, tx))
    }

    fn send(tx: &UnixDatagram, props: &[(&str, &str)]) -> Result<()> {
        let ev = UEvent::new(props.iter().copied());
        tx.send(&ev.encode_udev())?;
        Ok(())
    }

    #[test]
    fn unknown_source() {
        let ctx = Context::builder()
            .conf_path(None::<PathBuf>)
            .read_env(false)
            .build();
        assert!(matches!(
            Monitor::new(&ctx, "bluetooth"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn states() -> Result<()> {
        let (mon, _tx) = pair()?;
        assert!(matches!(mon.receive_device(), Err(Error::InvalidState("created"))));
        mon.enable_receiving()?;
        mon.enable_receiving()?;
        assert!(mon.receive_device()?.is_none());

        let clone = mon.clone();
        clone.close();
        assert!(matches!(mon.receive_device(), Err(Error::Closed)));
        assert!(matches!(mon.filter_update(), Err(Error::Closed)));
        assert!(matches!(
            mon.filter_add_match_tag("seat"),
            Err(Error::Closed)
        ));
        Ok(())
    }

    #[test]
    fn filters() -> Result<()> {
        let (mon, tx) = pair()?;
        mon.filter_add_match_subsystem_devtype("block", Some("disk"))?;
        mon.filter_add_match_subsystem_devtype("net", None)?;
        mon.enable_receiving()?;

        let block = |devtype| {
            [
                ("ACTION", "add"),
                ("DEVPATH", "/devices/virtual/block/loop0"),
                ("SUBSYSTEM", "block"),
                ("DEVTYPE", devtype),
            ]
        };
        send(&tx, &block("partition"))?;
        send(&tx, &block("disk"))?;
        send(
            &tx,
            &[
                ("ACTION", "remove"),
                ("DEVPATH", "/devices/virtual/net/tun0"),
                ("SUBSYSTEM", "net"),
                ("DEVTYPE", "tun"),
            ],
        )?;

        let dev = mon.receive_device()?.unwrap();
        assert_eq!(dev.devtype(), Some("disk"));
        let dev = mon.receive_device()?.unwrap();
        assert_eq!(dev.subsystem(), Some("net"));
        assert!(mon.receive_device()?.is_none());
        Ok(())
    }

    #[test]
    fn tags_and_subsystems() -> Result<()> {
        let (mon, tx) = pair()?;
        mon.filter_add_match_subsystem_devtype("input", None)?;
        mon.filter_add_match_tag("seat")?;
        mon.enable_receiving()?;

        let input = |tags| {
            [
                ("ACTION", "add"),
                ("DEVPATH", "/devices/virtual/input/input3"),
                ("SUBSYSTEM", "input"),
                ("TAGS", tags),
            ]
        };
        send(&tx, &input(":uaccess:"))?;
        send(&tx, &input(":seat:uaccess:"))?;
        let dev = mon.receive_device()?.unwrap();
        assert!(dev.has_tag("seat"));
        assert!(mon.receive_device()?.is_none());
        Ok(())
    }

    #[test]
    fn seqnums() -> Result<()> {
        let (mon, tx) = pair()?;
        mon.enable_receiving()?;
        let ev = |seqnum| {
            [
                ("ACTION", "change"),
                ("DEVPATH", "/devices/virtual/misc/rfkill"),
                ("SUBSYSTEM", "misc"),
                ("SEQNUM", seqnum),
            ]
        };
        send(&tx, &ev("41"))?;
        send(&tx, &[
            ("ACTION", "change"),
            ("DEVPATH", "/devices/virtual/misc/rfkill"),
            ("SUBSYSTEM", "misc"),
        ])?;
        tx.send(b"garbage")?;
        tx.send(b"libudev\0garbage")?;
        send(&tx, &ev("50"))?;

        let seqnums: Vec<_> = std::iter::from_fn(|| mon.receive_device().ok().flatten())
            .map(|d| d.seqnum())
            .collect();
        assert_eq!(seqnums, [Some(41), Some(42), Some(50)]);
        Ok(())
    }

    #[test]
    fn seqnums_never_repeat() -> Result<()> {
        let (mon, tx) = pair()?;
        mon.enable_receiving()?;
        let ev = |seqnum: Option<&'static str>| {
            let mut props = vec![
                ("ACTION", "change"),
                ("DEVPATH", "/devices/virtual/misc/rfkill"),
                ("SUBSYSTEM", "misc"),
            ];
            props.extend(seqnum.map(|n| ("SEQNUM", n)));
            props
        };
        for seqnum in [None, Some("1"), Some("50"), Some("41")] {
            send(&tx, &ev(seqnum))?;
        }

        let devs: Vec<_> = std::iter::from_fn(|| mon.receive_device().ok().flatten()).collect();
        let seqnums: Vec<_> = devs.iter().map(|d| d.seqnum()).collect();
        assert_eq!(seqnums, [Some(1), Some(2), Some(50), Some(51)]);
        assert_eq!(devs[3].property_value("SEQNUM"), Some("41"));
        Ok(())
    }

    #[test]
    fn close_wakes_receiver() -> Result<()> {
        let (mon, _tx) = pair()?;
        mon.set_nonblocking(false)?;
        mon.enable_receiving()?;

        let (done, result) = std::sync::mpsc::channel();
        let receiver = mon.clone();
        let handle = std::thread::spawn(move || {
            let _ = done.send(receiver.receive_device().map(|d| d.is_some()));
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        mon.close();

        let got = result.recv_timeout(std::time::Duration::from_secs(2))?;
        assert!(matches!(got, Err(Error::Closed)));
        handle.join().map_err(|_| anyhow::anyhow!("receiver panicked"))?;
        Ok(())
    }

    #[test]
    fn trusted_senders() {
        let udev = NetlinkAddr::new(1234, Groups::UDEV.bits());
        let kernel = NetlinkAddr::new(0, Groups::KERNEL.bits());
        let unicast = NetlinkAddr::new(1234, 0);

        assert_eq!(check_sender(Groups::UDEV, Some(&udev), Some(0)), Ok(()));
        assert_eq!(check_sender(Groups::KERNEL, Some(&kernel), Some(0)), Ok(()));

        assert!(check_sender(Groups::UDEV, Some(&udev), Some(1000)).is_err());
        assert!(check_sender(Groups::UDEV, Some(&udev), None).is_err());
        assert!(check_sender(Groups::UDEV, Some(&unicast), Some(0)).is_err());
        assert!(check_sender(Groups::UDEV, None, Some(0)).is_err());
        // Root, but not the kernel
        let spoofed = NetlinkAddr::new(1234, Groups::KERNEL.bits());
        assert!(check_sender(Groups::KERNEL, Some(&spoofed), Some(0)).is_err());
    }

    #[test]
    fn hangup() -> Result<()> {
        let (mon, tx) = pair()?;
        mon.enable_receiving()?;
        tx.send(&UEvent::new([
            ("ACTION", "add"),
            ("DEVPATH", "/devices/virtual/tty/tty1"),
            ("SUBSYSTEM", "tty"),
        ])
        .encode_kernel()?)?;
        drop(tx);
        assert_eq!(mon.receive_device()?.unwrap().action(), Some(crate::Action::Add));
        Ok(())
    }
}
