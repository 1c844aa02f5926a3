//! Pseudo-terminal endpoint
//!
//! Lets a serial-only client (a panel simulator, a DCS-BIOS library build
//! for the desktop) attach to the bridge by opening the PTY slave as if it
//! were a serial port. The slave is put in raw 8N1 mode so bytes pass
//! through without line discipline translation. The bridge holds the slave
//! open itself, so the master never reports EIO while no client is attached.

use super::EndpointIo;
use crate::config::EndpointConfig;
use crate::error::{BridgeError, Result};
use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

/// PTY endpoint transport
pub struct PtyTransport;

impl PtyTransport {
    pub fn open(config: &EndpointConfig) -> Result<EndpointIo> {
        let map_err = |e: io::Error| BridgeError::EndpointOpen {
            name: config.name.clone(),
            source: e,
        };

        let (master, slave) = open_pair().map_err(map_err)?;
        make_raw(&slave).map_err(map_err)?;
        set_nonblocking(&master).map_err(map_err)?;
        let slave_name = tty_name(&slave).map_err(map_err)?;

        let symlink = match &config.symlink {
            Some(link) => match replace_symlink(&slave_name, link) {
                Ok(()) => Some(link.clone()),
                Err(e) => {
                    warn!(link = %link.display(), error = %e, "Cannot create PTY symlink, use the slave path");
                    None
                }
            },
            None => None,
        };
        info!(
            endpoint = %config.name,
            slave = %slave_name.display(),
            link = ?symlink,
            "PTY endpoint ready"
        );

        let master = File::from(master);
        let writer = master.try_clone().map_err(map_err)?;
        Ok(EndpointIo {
            reader: Box::new(PtyReader {
                master,
                _slave: slave,
                symlink,
            }),
            writer: Box::new(PtyWriter { master: writer }),
        })
    }
}

struct PtyReader {
    master: File,
    _slave: OwnedFd,
    symlink: Option<PathBuf>,
}

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.master.read(buf)
    }
}

impl Drop for PtyReader {
    fn drop(&mut self) {
        if let Some(link) = &self.symlink {
            let _ = std::fs::remove_file(link);
        }
    }
}

struct PtyWriter {
    master: File,
}

impl Write for PtyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.master.write(buf) {
            // Nobody is draining the slave: drop the data like a serial line would
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(bytes = buf.len(), "PTY slave full, dropping data");
                Ok(buf.len())
            }
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn open_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // openpty returned two fresh descriptors that we now own
    Ok(unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) })
}

fn make_raw(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    unsafe {
        let mut attrs: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(raw, &mut attrs) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut attrs);
        attrs.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
        attrs.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::PARODD);
        attrs.c_cflag |= libc::CS8;
        attrs.c_cc[libc::VMIN] = 1;
        attrs.c_cc[libc::VTIME] = 0;
        if libc::tcsetattr(raw, libc::TCSANOW, &attrs) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL);
        if flags < 0 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn tty_name(fd: &OwnedFd) -> io::Result<PathBuf> {
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::ttyname_r(fd.as_raw_fd(), buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}

fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(link) {
        Ok(_) => std::fs::remove_file(link)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, link)
}
