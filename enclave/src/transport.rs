// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Outbound vsock transport towards the host's vsock-proxy.
//!
//! Every remote API is reachable as plain TCP bytes on `(CID 3, proxy_port)`;
//! the host proxy blindly tunnels them to `remote:443` (or `:80`). This
//! module wraps the blocking [`VsockStream`] with a wall-clock deadline so a
//! stalled upstream cannot pin the enclave past its fetch budget: each read
//! and write re-arms the kernel socket timeout with the remaining time.

use std::io::{self, Read, Write};
use std::mem::size_of;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use vsock::{VsockAddr, VsockStream};

use crate::constants::HOST_CID;

/// A deadline-bounded byte-duplex over vsock, usable directly for plain
/// HTTP or as the underlying stream of a rustls session.
pub struct ProxyStream {
    inner: VsockStream,
    deadline: Instant,
}

impl ProxyStream {
    /// Connects to the host proxy port with the given total time budget.
    pub fn connect(proxy_port: u32, budget: Duration) -> io::Result<Self> {
        let inner = VsockStream::connect(&VsockAddr::new(HOST_CID, proxy_port))?;
        Ok(Self {
            inner,
            deadline: Instant::now() + budget,
        })
    }

    fn remaining(&self) -> io::Result<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "fetch deadline exceeded"))
    }

    fn arm(&self, option: libc::c_int) -> io::Result<()> {
        set_socket_timeout(self.inner.as_raw_fd(), option, self.remaining()?)
    }
}

impl Read for ProxyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm(libc::SO_RCVTIMEO)?;
        self.inner.read(buf).map_err(map_timeout)
    }
}

impl Write for ProxyStream {
    /// Writes the whole buffer, looping over short writes, so callers see
    /// either full progress or an error.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            self.arm(libc::SO_SNDTIMEO)?;
            match self.inner.write(&buf[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "vsock peer stopped accepting bytes",
                    ));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_timeout(e)),
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// SO_RCVTIMEO/SO_SNDTIMEO deliver `EAGAIN` on expiry; surface it uniformly
/// as `TimedOut`.
fn map_timeout(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, "vsock I/O timed out")
    } else {
        e
    }
}

fn set_socket_timeout(fd: RawFd, option: libc::c_int, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        // A zero timeval disables the timeout entirely; round up instead.
        tv_usec: timeout.subsec_micros().max(1) as libc::suseconds_t,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &tv as *const libc::timeval as *const libc::c_void,
            size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
