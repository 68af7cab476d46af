//! Raw socket and fd helpers.
//!
//! Everything the loop's callers need to hand non-blocking, close-on-exec
//! descriptors to an [`fd watcher`](crate::Reactor::fd_init): atomic flag
//! setting where the kernel supports it, fcntl fallbacks where it does
//! not, and interrupt-safe accept.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::c_int;

/// Open a socket in non-blocking close-on-exec mode, atomically if the
/// kernel supports the combined type flags.
pub fn socket(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<OwnedFd> {
    #[cfg(target_os = "linux")]
    {
        let fd =
            unsafe { libc::socket(domain, ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, protocol) };
        if fd >= 0 {
            return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
        }
        let err = io::Error::last_os_error();
        // EINVAL means the kernel predates the combined flags; fall
        // through to the fcntl path. Anything else is a real failure.
        if err.raw_os_error() != Some(libc::EINVAL) {
            return Err(err);
        }
    }

    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    set_nonblocking(owned.as_raw_fd(), true)?;
    set_cloexec(owned.as_raw_fd(), true)?;
    Ok(owned)
}

/// Accept one connection, retrying on `EINTR`. The peer comes back
/// non-blocking and close-on-exec: atomically via `accept4` where
/// available, by fcntl otherwise.
pub fn accept(fd: RawFd) -> io::Result<(OwnedFd, SocketAddr)> {
    assert!(fd >= 0);
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        #[cfg(target_os = "linux")]
        {
            let peer = unsafe {
                libc::accept4(
                    fd,
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if peer >= 0 {
                let owned = unsafe { OwnedFd::from_raw_fd(peer) };
                return Ok((owned, raw_to_socket_addr(&storage)?));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                // Kernel without accept4: take the plain path below.
                Some(libc::ENOSYS) => {}
                _ => return Err(err),
            }
        }

        let peer = unsafe {
            libc::accept(
                fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if peer < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        let owned = unsafe { OwnedFd::from_raw_fd(peer) };
        set_cloexec(owned.as_raw_fd(), true)?;
        set_nonblocking(owned.as_raw_fd(), true)?;
        return Ok((owned, raw_to_socket_addr(&storage)?));
    }
}

/// Duplicate a descriptor with close-on-exec set. There is a window
/// between `dup` and the fcntl; this helper is not execve-safe.
pub fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(io::Error::last_os_error());
    }
    let owned = unsafe { OwnedFd::from_raw_fd(duped) };
    set_cloexec(owned.as_raw_fd(), true)?;
    Ok(owned)
}

/// Set or clear `O_NONBLOCK`.
pub fn set_nonblocking(fd: RawFd, on: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if on {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set or clear `FD_CLOEXEC`.
pub fn set_cloexec(fd: RawFd, on: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if on {
        flags | libc::FD_CLOEXEC
    } else {
        flags & !libc::FD_CLOEXEC
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn raw_to_socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(sin.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unknown address family",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_flag_fl(fd: RawFd, flag: c_int) -> bool {
        (unsafe { libc::fcntl(fd, libc::F_GETFL) }) & flag != 0
    }

    fn has_flag_fd(fd: RawFd, flag: c_int) -> bool {
        (unsafe { libc::fcntl(fd, libc::F_GETFD) }) & flag != 0
    }

    #[test]
    fn socket_is_nonblocking_and_cloexec() {
        let sock = socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        assert!(has_flag_fl(sock.as_raw_fd(), libc::O_NONBLOCK));
        assert!(has_flag_fd(sock.as_raw_fd(), libc::FD_CLOEXEC));
    }

    #[test]
    fn dup_sets_cloexec() {
        let sock = socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        let duped = dup(sock.as_raw_fd()).unwrap();
        assert_ne!(duped.as_raw_fd(), sock.as_raw_fd());
        assert!(has_flag_fd(duped.as_raw_fd(), libc::FD_CLOEXEC));
    }

    #[test]
    fn nonblocking_toggles() {
        let sock = socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        set_nonblocking(sock.as_raw_fd(), false).unwrap();
        assert!(!has_flag_fl(sock.as_raw_fd(), libc::O_NONBLOCK));
        set_nonblocking(sock.as_raw_fd(), true).unwrap();
        assert!(has_flag_fl(sock.as_raw_fd(), libc::O_NONBLOCK));
    }
}
