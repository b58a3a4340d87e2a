//! Signal delivery lewat loopback socket
//!
//! Handler sinyal hanya menulis satu byte (nomor sinyal) ke write end;
//! read end terdaftar di readiness set dispatcher sehingga sinyal diproses
//! di loop yang sama dengan I/O.
//!
//! - `SIGALRM` -> timer sweep due
//! - `SIGTERM` / `SIGINT` -> stop
//! - `SIGPIPE` diabaikan

use mio::net::UnixStream;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Write end yang dipakai handler; -1 = belum di-install
static SIGNAL_FD: AtomicI32 = AtomicI32::new(-1);

/// Flags accumulated while draining the channel
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignalFlags {
    pub sweep: bool,
    pub stop: bool,
}

pub struct SignalChannel {
    rx: UnixStream,
    tx: Arc<UnixStream>,
}

impl SignalChannel {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        Ok(Self {
            rx,
            tx: Arc::new(tx),
        })
    }

    /// Read end, registered with the poll
    pub fn receiver_mut(&mut self) -> &mut UnixStream {
        &mut self.rx
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Route SIGALRM/SIGTERM/SIGINT of this process into the channel and
    /// ignore SIGPIPE. Only one channel per process can own the handlers.
    pub fn install_process_handlers(&self) -> io::Result<()> {
        SIGNAL_FD.store(self.tx.as_raw_fd(), Ordering::SeqCst);
        for sig in [libc::SIGALRM, libc::SIGTERM, libc::SIGINT] {
            set_handler(sig, on_signal as usize)?;
        }
        set_handler(libc::SIGPIPE, libc::SIG_IGN)?;
        Ok(())
    }

    /// Drain every pending byte into `flags`
    pub fn drain(&mut self, flags: &mut SignalFlags) {
        let mut buf = [0u8; 1024];
        loop {
            match self.rx.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &sig in &buf[..n] {
                        match sig as libc::c_int {
                            libc::SIGALRM => flags.sweep = true,
                            libc::SIGTERM | libc::SIGINT => flags.stop = true,
                            other => tracing::debug!(signal = other, "ignoring signal byte"),
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("signal channel read failed: {e}");
                    break;
                }
            }
        }
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        let _ = SIGNAL_FD.compare_exchange(
            self.tx.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Cloneable way to poke the dispatcher from other threads
#[derive(Clone)]
pub struct ServerHandle {
    tx: Arc<UnixStream>,
}

impl ServerHandle {
    /// Ask the dispatcher to stop after the current pass
    pub fn stop(&self) -> io::Result<()> {
        self.send(libc::SIGTERM)
    }

    /// Request a timer sweep, same as an alarm tick
    pub fn sweep(&self) -> io::Result<()> {
        self.send(libc::SIGALRM)
    }

    fn send(&self, sig: libc::c_int) -> io::Result<()> {
        match (&*self.tx).write(&[sig as u8]) {
            Ok(_) => Ok(()),
            // channel penuh, dispatcher pasti akan bangun
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Schedule the next SIGALRM `timeslot` from now (whole seconds, at least one)
pub fn arm_alarm(timeslot: Duration) {
    let secs = timeslot.as_secs().clamp(1, libc::c_uint::MAX as u64) as libc::c_uint;
    unsafe {
        libc::alarm(secs);
    }
}

fn set_handler(sig: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn on_signal(sig: libc::c_int) {
    let fd = SIGNAL_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    // write(2) bisa menimpa errno milik kode yang terinterupsi
    unsafe {
        let errno = errno_location();
        let saved = *errno;
        let byte = sig as u8;
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        *errno = saved;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}
