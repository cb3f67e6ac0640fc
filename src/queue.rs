//! The udev event queue
//!
//! The kernel numbers every event it emits, udev records how far it has
//! got. Comparing the two tells whether udev is still busy.
use crate::{
    context::Context,
    error::Result,
    util::read_attribute,
};
use nix::{
    errno::Errno,
    sys::inotify::{AddWatchFlags, InitFlags, Inotify},
    unistd,
};
use once_cell::sync::OnceCell;
use std::os::unix::io::{AsRawFd, RawFd};

/// View of the udev event queue
#[derive(Debug)]
pub struct Queue {
    ctx: Context,
    inotify: OnceCell<Inotify>,
}

// Constructors
impl Queue {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            inotify: OnceCell::new(),
        }
    }
}

// Attributes
impl Queue {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Sequence number of the last event the kernel emitted
    ///
    /// 0 if it can't be read.
    pub fn kernel_seqnum(&self) -> u64 {
        read_attribute(self.ctx.sys_path(), "kernel/uevent_seqnum")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Sequence number of the last event udev processed
    ///
    /// Without a queue file udev is idle, so it has caught up with the
    /// kernel.
    pub fn udev_seqnum(&self) -> u64 {
        let run = self.ctx.run_path();
        if !run.join("queue").exists() {
            return self.kernel_seqnum();
        }
        read_attribute(run, "queue")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether udev is running
    pub fn udev_is_active(&self) -> bool {
        self.ctx.run_path().join("control").exists()
    }

    /// Whether udev has processed every event
    pub fn is_empty(&self) -> bool {
        self.kernel_seqnum() == self.udev_seqnum()
    }

    /// Whether udev has processed event `seqnum`
    pub fn seqnum_is_finished(&self, seqnum: u64) -> bool {
        self.is_empty() || seqnum <= self.udev_seqnum()
    }

    /// Whether udev has processed events `start..=end`
    pub fn seqnum_sequence_is_finished(&self, start: u64, end: u64) -> bool {
        if start > end {
            return true;
        }
        self.is_empty() || end <= self.udev_seqnum()
    }
}

// Operations
impl Queue {
    /// Descriptor that becomes readable when the queue changes
    ///
    /// Created on first use. Call [`Queue::flush`] after it becomes
    /// readable.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Io`] if the udev runtime directory can't be watched
    pub fn fd(&self) -> Result<RawFd> {
        let inotify = self.inotify.get_or_try_init(|| -> Result<Inotify> {
            let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)?;
            let flags = AddWatchFlags::IN_CREATE | AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_TO;
            if let Err(e) = inotify.add_watch(self.ctx.run_path(), flags) {
                let _ = unistd::close(inotify.as_raw_fd());
                return Err(e.into());
            }
            tracing::debug!(
                run = %self.ctx.run_path().display(),
                fd = inotify.as_raw_fd(),
                "watching udev queue"
            );
            Ok(inotify)
        })?;
        Ok(inotify.as_raw_fd())
    }

    /// Drain pending notifications from [`Queue::fd`]
    pub fn flush(&self) -> Result<()> {
        let inotify = match self.inotify.get() {
            Some(i) => i,
            None => return Ok(()),
        };
        loop {
            match inotify.read_events() {
                Ok(events) if events.is_empty() => return Ok(()),
                Ok(events) => tracing::trace!(count = events.len(), "flushed queue events"),
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(inotify) = self.inotify.get() {
            let _ = unistd::close(inotify.as_raw_fd());
        }
    }
}
