// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Unified non-blocking byte source/sink.
//!
//! A device owns exactly one descriptor and exposes one-shot, never-blocking
//! reads and writes plus the async readiness probes the reactor's demux
//! waits on. Descriptors inherited from a parent process (frontier sockets,
//! the executor control socket) are adopted through the `adopt_*`
//! constructors, which re-establish the non-blocking contract.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;

use tokio::net::{TcpStream, UnixStream};

/// One descriptor, readable and writable without ever blocking the caller.
#[derive(Debug)]
pub enum Device {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Device {
    /// Dial a TCP endpoint. The connect itself awaits; the resulting
    /// device follows the non-blocking contract.
    pub async fn connect(host: &str, port: u16) -> io::Result<Device> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Device::Tcp(stream))
    }

    /// A connected socket pair; the backbone of every intra stream and of
    /// the agent-to-executor control channel.
    pub fn pair() -> io::Result<(Device, Device)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Device::Unix(a), Device::Unix(b)))
    }

    /// Adopt an inherited TCP descriptor (frontier sockets, stdout/stderr
    /// tunnels).
    ///
    /// # Safety
    /// `fd` must be an open, connected TCP socket owned by nobody else.
    pub unsafe fn adopt_tcp(fd: RawFd) -> io::Result<Device> {
        let std_stream = std::net::TcpStream::from_raw_fd(fd);
        std_stream.set_nonblocking(true)?;
        Ok(Device::Tcp(TcpStream::from_std(std_stream)?))
    }

    /// Adopt an inherited Unix-domain descriptor (the executor's control
    /// socket).
    ///
    /// # Safety
    /// `fd` must be an open, connected Unix socket owned by nobody else.
    pub unsafe fn adopt_unix(fd: RawFd) -> io::Result<Device> {
        let std_stream = std::os::unix::net::UnixStream::from_raw_fd(fd);
        std_stream.set_nonblocking(true)?;
        Ok(Device::Unix(UnixStream::from_std(std_stream)?))
    }

    /// One non-blocking read. `Ok(0)` is end-of-stream; a not-ready device
    /// surfaces as `ErrorKind::WouldBlock`.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Device::Tcp(s) => s.try_read(buf),
            Device::Unix(s) => s.try_read(buf),
        }
    }

    /// One non-blocking write; `ErrorKind::WouldBlock` when the kernel
    /// buffer is full.
    pub fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Device::Tcp(s) => s.try_write(buf),
            Device::Unix(s) => s.try_write(buf),
        }
    }

    /// Resolve when the device has readable bytes (or a pending error).
    pub async fn readable(&self) -> io::Result<()> {
        match self {
            Device::Tcp(s) => s.readable().await,
            Device::Unix(s) => s.readable().await,
        }
    }

    /// Resolve when the device can accept writes.
    pub async fn writable(&self) -> io::Result<()> {
        match self {
            Device::Tcp(s) => s.writable().await,
            Device::Unix(s) => s.writable().await,
        }
    }

    /// Half-close the write side, letting the peer observe end-of-stream
    /// while keeping reads alive.
    pub fn close_write(&self) {
        unsafe {
            libc::shutdown(self.as_raw_fd(), libc::SHUT_WR);
        }
    }

    /// Whether the peer is still attached.
    pub fn is_connected(&self) -> bool {
        match self {
            Device::Tcp(s) => s.peer_addr().is_ok(),
            Device::Unix(s) => s.peer_addr().is_ok(),
        }
    }
}

impl AsRawFd for Device {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Device::Tcp(s) => s.as_raw_fd(),
            Device::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl From<TcpStream> for Device {
    fn from(stream: TcpStream) -> Self {
        Device::Tcp(stream)
    }
}

impl From<UnixStream> for Device {
    fn from(stream: UnixStream) -> Self {
        Device::Unix(stream)
    }
}

/// Clear `FD_CLOEXEC` so a descriptor survives into an exec'd child. The
/// effect is undone by [`restore_cloexec`] once the child is away.
pub fn share_with_child(device: &Arc<Device>) -> io::Result<()> {
    set_cloexec(device.as_raw_fd(), false)
}

/// Re-establish `FD_CLOEXEC` on a descriptor previously shared.
pub fn restore_cloexec(device: &Arc<Device>) -> io::Result<()> {
    set_cloexec(device.as_raw_fd(), true)
}

fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if on {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_moves_bytes_both_ways() {
        let (a, b) = Device::pair().unwrap();
        a.writable().await.unwrap();
        assert_eq!(a.try_write(b"ping").unwrap(), 4);

        b.readable().await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.try_read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
    }

    #[tokio::test]
    async fn close_write_delivers_eof() {
        let (a, b) = Device::pair().unwrap();
        a.close_write();
        b.readable().await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.try_read(&mut buf).unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_pair_read_would_block() {
        let (_a, b) = Device::pair().unwrap();
        let mut buf = [0u8; 8];
        let err = b.try_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}
