//! Waiting on "device readable" or "interrupt requested".
//!
//! SIGINT is turned into a readable byte on a socket pair by signal-hook, so
//! the session only ever sees it between two drain passes. Linux waits with
//! `poll(2)`, the BSDs with `kqueue(2)`.

use std::{
    io::{self, Read},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
};

use log::debug;
use signal_hook::{SigId, consts::SIGINT};

use crate::session::{Wake, Waiter};

/// Read end of the self-pipe fed by the SIGINT handler.
pub struct InterruptPipe {
    read: UnixStream,
    id: SigId,
}

impl InterruptPipe {
    pub fn install() -> io::Result<Self> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        let id = signal_hook::low_level::pipe::register(SIGINT, write)?;
        Ok(Self { read, id })
    }

    fn clear(&mut self) {
        let mut buf = [0u8; 16];
        while let Ok(n) = self.read.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl AsRawFd for InterruptPipe {
    fn as_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

impl Drop for InterruptPipe {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.id);
    }
}

#[cfg(target_os = "linux")]
pub use self::poll::PollWaiter as PlatformWaiter;

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos"
))]
pub use self::kqueue::KqueueWaiter as PlatformWaiter;

#[cfg(target_os = "linux")]
mod poll {
    use super::*;

    pub struct PollWaiter {
        device: RawFd,
        interrupt: InterruptPipe,
    }

    impl PollWaiter {
        pub fn new(device: RawFd, interrupt: InterruptPipe) -> io::Result<Self> {
            Ok(Self { device, interrupt })
        }
    }

    impl Waiter for PollWaiter {
        fn wait(&mut self) -> io::Result<Wake> {
            let mut fds = [
                libc::pollfd {
                    fd: self.device,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.interrupt.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            loop {
                // SAFETY: `fds` is a live array of initialised pollfd structs.
                let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        // the handler ran; its byte is now on the pipe
                        continue;
                    }
                    return Err(err);
                }

                if fds[1].revents != 0 {
                    self.interrupt.clear();
                    return Ok(Wake::Interrupted);
                }
                if fds[0].revents != 0 {
                    return Ok(Wake::Readable);
                }
                debug!("poll returned {rc} without readiness");
            }
        }
    }
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos"
))]
mod kqueue {
    use std::os::fd::{FromRawFd, OwnedFd};

    use super::*;

    pub struct KqueueWaiter {
        kq: OwnedFd,
        interrupt: InterruptPipe,
    }

    fn read_filter(fd: RawFd) -> libc::kevent {
        // SAFETY: kevent is plain data; all-zero is a valid value.
        let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
        ev.ident = fd as _;
        ev.filter = libc::EVFILT_READ;
        ev.flags = libc::EV_ADD;
        ev
    }

    impl KqueueWaiter {
        pub fn new(device: RawFd, interrupt: InterruptPipe) -> io::Result<Self> {
            // SAFETY: kqueue takes no arguments and returns a new fd or -1.
            let raw = unsafe { libc::kqueue() };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: `raw` was just returned by kqueue and is owned by nobody else.
            let kq = unsafe { OwnedFd::from_raw_fd(raw) };

            let changes = [read_filter(interrupt.as_raw_fd()), read_filter(device)];
            // SAFETY: `changes` outlives the call; no events are requested back.
            let rc = unsafe {
                libc::kevent(
                    kq.as_raw_fd(),
                    changes.as_ptr(),
                    changes.len() as _,
                    std::ptr::null_mut(),
                    0,
                    std::ptr::null(),
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { kq, interrupt })
        }
    }

    impl Waiter for KqueueWaiter {
        fn wait(&mut self) -> io::Result<Wake> {
            loop {
                // SAFETY: as above.
                let mut out: libc::kevent = unsafe { std::mem::zeroed() };
                // SAFETY: `out` is a valid buffer for one event.
                let rc = unsafe {
                    libc::kevent(
                        self.kq.as_raw_fd(),
                        std::ptr::null(),
                        0,
                        &mut out,
                        1,
                        std::ptr::null(),
                    )
                };
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                if rc == 0 {
                    continue;
                }
                if out.ident as RawFd == self.interrupt.as_raw_fd() {
                    self.interrupt.clear();
                    return Ok(Wake::Interrupted);
                }
                return Ok(Wake::Readable);
            }
        }
    }
}

/// The wait mechanism for the current target, watching `device` and SIGINT.
pub fn platform_waiter(device: RawFd) -> io::Result<PlatformWaiter> {
    let interrupt = InterruptPipe::install()?;
    PlatformWaiter::new(device, interrupt)
}
