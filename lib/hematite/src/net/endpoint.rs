use crate::net::{NetError, NetResult};
use flux::time::timestamp_secs;
use mio::net::{TcpListener, TcpStream};
use mio::unix::EventedFd;
use mio::{Events, Poll, PollOpt, Ready, Token};
use net2::TcpBuilder;
use std::io::{Read, Write};
use std::net::{self, SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

const LISTEN_BACKLOG: i32 = 32;
/// Readiness is re-polled at this granularity while a sync helper waits
/// out its deadline.
const SYNC_POLL_MS: u64 = 1000;

/// Build the accepting socket: REUSEADDR, bound to the optional address
/// (any-interface otherwise), fixed backlog, non-blocking.
pub fn tcp_server(port: u16, bindaddr: Option<&str>) -> NetResult<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", bindaddr.unwrap_or("0.0.0.0"), port).parse()?;
    let builder = TcpBuilder::new_v4()?;
    builder.reuse_address(true)?;
    builder.bind(addr)?;
    let listener = builder.listen(LISTEN_BACKLOG)?;
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(listener)?)
}

/// Per-connection socket setup. Streams handed out by the listener are
/// already non-blocking.
#[inline]
pub fn setup_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
}

/// Blocking dial, resolving the host. Used only during replica bootstrap.
pub fn tcp_connect(host: &str, port: u16) -> NetResult<net::TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(NetError::AddrParse)?;
    Ok(net::TcpStream::connect(addr)?)
}

/// Non-blocking dial: hands the socket back with the connect in progress.
pub fn tcp_nonblock_connect(host: &str, port: u16) -> NetResult<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(NetError::AddrParse)?;
    Ok(TcpStream::connect(&addr)?)
}

/// Wait until the descriptor reports the wanted readiness, at most
/// `timeout_ms`. Returns whether it became ready.
pub fn wait_ready(fd: i32, interest: Ready, timeout_ms: u64) -> NetResult<bool> {
    let poll = Poll::new()?;
    let mut events = Events::with_capacity(4);
    poll.register(&EventedFd(&fd), Token(0), interest, PollOpt::level())?;
    poll.poll(&mut events, Some(Duration::from_millis(timeout_ms)))?;
    Ok(events.iter().next().is_some())
}

/// Write the whole buffer, polling writability in one-second slices and
/// giving up when `timeout` seconds have elapsed.
pub fn sync_write<S: Write + AsRawFd>(
    stream: &mut S,
    mut buf: &[u8],
    timeout: u64,
) -> NetResult<()> {
    let deadline = timestamp_secs() + timeout + 1;
    while !buf.is_empty() {
        if wait_ready(stream.as_raw_fd(), Ready::writable(), SYNC_POLL_MS)? {
            match stream.write(buf) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        if timestamp_secs() > deadline {
            return Err(NetError::Timeout);
        }
    }
    Ok(())
}

/// Fill the whole buffer, with the same deadline discipline as
/// [`sync_write`].
pub fn sync_read<S: Read + AsRawFd>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: u64,
) -> NetResult<()> {
    let deadline = timestamp_secs() + timeout + 1;
    let mut filled = 0;
    while filled < buf.len() {
        if wait_ready(stream.as_raw_fd(), Ready::readable(), SYNC_POLL_MS)? {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        if timestamp_secs() > deadline {
            return Err(NetError::Timeout);
        }
    }
    Ok(())
}

/// Read a line terminated by LF, stripping the terminator and an optional
/// CR before it. At most `max` bytes are accepted.
pub fn sync_read_line<S: Read + AsRawFd>(
    stream: &mut S,
    max: usize,
    timeout: u64,
) -> NetResult<Vec<u8>> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        sync_read(stream, &mut byte, timeout)?;
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(line);
        }
        line.push(byte[0]);
        if line.len() >= max {
            return Ok(line);
        }
    }
}
