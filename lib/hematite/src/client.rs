use crate::command;
use crate::object::Blob;
use crate::protocol;
use crate::server::{EventLoop, Server};
use flux::logging;
use flux::time::timestamp_secs;
use mio::net::TcpStream;
use mio::Ready;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

pub type ClientId = usize;

/// Connection is torn down once the current command finishes.
pub const CLOSE: u8 = 1;
/// The peer is a replica; it receives the mutation feed and is exempt from
/// the idle sweep.
pub const SLAVE: u8 = 2;
/// The peer is the replication source; replies to its commands are
/// swallowed at the write stage.
pub const MASTER: u8 = 4;

/// Reply fragments below this total are merged into one write.
const GLUE_LIMIT: usize = 1024;

/// Per-connection state: input accumulator, parsed argument vector, bulk
/// cursor, and the outbound queue of shared string fragments.
pub struct Client {
    pub stream: TcpStream,
    pub db: usize,
    pub querybuf: Vec<u8>,
    pub argv: Vec<Blob>,
    /// Remaining bulk bytes including the trailing CRLF; -1 outside bulk
    /// mode.
    pub bulklen: i64,
    pub reply: VecDeque<Blob>,
    /// Bytes of the queue head already written.
    pub sentlen: usize,
    pub lastinteraction: u64,
    pub flags: u8,
    /// Database the replication feed last selected for this slave.
    pub slave_seldb: usize,
}

impl Client {
    pub fn new(stream: TcpStream) -> Client {
        Client {
            stream,
            db: 0,
            querybuf: Vec::new(),
            argv: Vec::new(),
            bulklen: -1,
            reply: VecDeque::new(),
            sentlen: 0,
            lastinteraction: timestamp_secs(),
            flags: 0,
            slave_seldb: 0,
        }
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Prepare for the next command.
    #[inline]
    pub fn reset(&mut self) {
        self.argv.clear();
        self.bulklen = -1;
    }

    /// Merge the queued fragments into a single fresh string when their
    /// total stays small. The length check runs to completion before any
    /// byte is copied.
    pub fn glue_reply_buffers(&mut self) {
        let mut totlen = 0;
        for fragment in &self.reply {
            totlen += fragment.len();
            // Pointless to copy large replies around.
            if totlen > GLUE_LIMIT {
                return;
            }
        }
        if totlen > 0 {
            let mut glued = Vec::with_capacity(totlen);
            for fragment in &self.reply {
                glued.extend_from_slice(fragment);
            }
            self.reply.clear();
            self.reply.push_back(Rc::new(glued));
        }
    }

    /// Drain the reply queue head-first. Returns the bytes accounted as
    /// written; stops silently on a full socket buffer. A MASTER session
    /// never touches the socket: writing into the replication source would
    /// corrupt the feed, so its fragments count as already delivered.
    pub fn flush_reply(&mut self, glue: bool) -> io::Result<usize> {
        if glue && self.reply.len() > 1 {
            self.glue_reply_buffers();
        }

        let mut totwritten = 0;
        loop {
            let head = match self.reply.front() {
                Some(fragment) => fragment.clone(),
                None => break,
            };
            let objlen = head.len();
            if objlen == 0 {
                self.reply.pop_front();
                continue;
            }

            let nwritten = if self.has_flag(MASTER) {
                objlen - self.sentlen
            } else {
                match self.stream.write(&head[self.sentlen..]) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            };

            self.sentlen += nwritten;
            totwritten += nwritten;
            if self.sentlen == objlen {
                self.reply.pop_front();
                self.sentlen = 0;
            }
        }

        if totwritten > 0 {
            self.lastinteraction = timestamp_secs();
        }
        Ok(totwritten)
    }
}

/// Queue a reply fragment, registering write interest when the queue was
/// empty until now.
pub fn add_reply(el: &mut EventLoop, srv: &mut Server, id: ClientId, fragment: Blob) {
    if srv.client(id).reply.is_empty() {
        let token = Server::token_for(id);
        let client = srv.client(id);
        if el
            .create_file_event(&client.stream, token, Ready::writable(), send_reply_to_client)
            .is_err()
        {
            return;
        }
    }
    srv.client_mut(id).reply.push_back(fragment);
}

/// Queue a freshly built fragment.
#[inline]
pub fn add_reply_bytes(el: &mut EventLoop, srv: &mut Server, id: ClientId, bytes: Vec<u8>) {
    add_reply(el, srv, id, Rc::new(bytes));
}

/// Queue a bulk reply: length line, payload, CRLF.
pub fn add_reply_bulk(el: &mut EventLoop, srv: &mut Server, id: ClientId, payload: Blob) {
    let crlf = srv.shared.crlf.clone();
    add_reply_bytes(el, srv, id, protocol::bulk_header(payload.len() as i64));
    add_reply(el, srv, id, payload);
    add_reply(el, srv, id, crlf);
}

/// Queue an integer reply.
#[inline]
pub fn add_reply_integer(el: &mut EventLoop, srv: &mut Server, id: ClientId, value: i64) {
    add_reply_bytes(el, srv, id, protocol::integer(value));
}

/// Tear a session down: interest deregistered, socket dropped, lists
/// updated. A vanished MASTER session sends replication back to the
/// connect state.
pub fn free_client(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let client = srv.take_client(id);
    let token = Server::token_for(id);
    el.delete_file_event(&client.stream, token, Ready::readable());
    el.delete_file_event(&client.stream, token, Ready::writable());

    srv.slaves.retain(|&slave| slave != id);
    if srv.master == Some(id) {
        srv.master = None;
        srv.repl_lost_master();
    }
}

/// Readable handler for client sockets: pull a chunk, then parse as many
/// complete commands as the buffer holds.
pub fn read_query_from_client(el: &mut EventLoop, srv: &mut Server, token: usize, _mask: Ready) {
    let id = Server::client_for(token);
    let mut chunk = [0u8; protocol::QUERY_CHUNK];

    let nread = match srv.client_mut(id).stream.read(&mut chunk) {
        Ok(0) => {
            logging::debug!(srv.log, "client closed connection"; "client" => id);
            free_client(el, srv, id);
            return;
        }
        Ok(n) => n,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            logging::debug!(srv.log, "error reading from client"; "client" => id, "error" => %e);
            free_client(el, srv, id);
            return;
        }
    };

    {
        let client = srv.client_mut(id);
        client.querybuf.extend_from_slice(&chunk[..nread]);
        client.lastinteraction = timestamp_secs();
    }

    loop {
        let client = srv.client_mut(id);
        if client.bulklen == -1 {
            // Awaiting a command line.
            match protocol::extract_line(&client.querybuf) {
                Some((line, consumed)) => {
                    let argv: Vec<Blob> = protocol::split_inline(line)
                        .into_iter()
                        .map(Rc::new)
                        .collect();
                    client.querybuf.drain(..consumed);
                    if argv.is_empty() {
                        // Ignore empty query lines.
                        return;
                    }
                    client.argv = argv;
                    if !command::process_command(el, srv, id) {
                        return;
                    }
                }
                None => {
                    if client.querybuf.len() > protocol::MAX_INLINE_SIZE {
                        logging::debug!(srv.log, "client protocol error"; "client" => id);
                        free_client(el, srv, id);
                    }
                    return;
                }
            }
        } else {
            // Accumulating the bulk payload that forms the last argument.
            let needed = client.bulklen as usize;
            if client.querybuf.len() < needed {
                return;
            }
            let payload = client.querybuf[..needed - 2].to_vec();
            client.querybuf.drain(..needed);
            client.argv.push(Rc::new(payload));
            if !command::process_command(el, srv, id) {
                return;
            }
        }

        if srv.client(id).querybuf.is_empty() {
            return;
        }
    }
}

/// Writable handler: drain the queue, dropping the registration once it
/// empties so interest stays lazy.
pub fn send_reply_to_client(el: &mut EventLoop, srv: &mut Server, token: usize, _mask: Ready) {
    let id = Server::client_for(token);
    let glue = srv.cfg.glue_output_buf;

    match srv.client_mut(id).flush_reply(glue) {
        Ok(_) => {
            let client = srv.client(id);
            if client.reply.is_empty() {
                el.delete_file_event(&client.stream, token, Ready::writable());
            }
        }
        Err(e) => {
            logging::debug!(srv.log, "error writing to client"; "client" => id, "error" => %e);
            free_client(el, srv, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::blob;
    use std::net;

    fn mio_pair() -> (TcpStream, net::TcpStream) {
        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (TcpStream::from_stream(server).unwrap(), client)
    }

    fn read_some(peer: &mut net::TcpStream, len: usize) -> Vec<u8> {
        peer.set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();
        let mut out = vec![0u8; len];
        let mut got = 0;
        while got < len {
            match peer.read(&mut out[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(_) => break,
            }
        }
        out.truncate(got);
        out
    }

    #[test]
    fn test_flush_writes_queue_in_order() {
        let (stream, mut peer) = mio_pair();
        let mut client = Client::new(stream);
        client.reply.push_back(blob(b"3\r\n"));
        client.reply.push_back(blob(b"bar"));
        client.reply.push_back(blob(b"\r\n"));

        let written = client.flush_reply(false).unwrap();
        assert_eq!(written, 8);
        assert!(client.reply.is_empty());
        assert_eq!(client.sentlen, 0);
        assert_eq!(read_some(&mut peer, 8), b"3\r\nbar\r\n");
    }

    #[test]
    fn test_glue_merges_small_fragments() {
        let (stream, _peer) = mio_pair();
        let mut client = Client::new(stream);
        client.reply.push_back(blob(b"+OK\r\n"));
        client.reply.push_back(blob(b"3\r\n"));
        client.reply.push_back(blob(b"bar"));

        client.glue_reply_buffers();
        assert_eq!(client.reply.len(), 1);
        assert_eq!(&client.reply[0][..], b"+OK\r\n3\r\nbar");
    }

    #[test]
    fn test_glue_leaves_large_queues_alone() {
        let (stream, _peer) = mio_pair();
        let mut client = Client::new(stream);
        client.reply.push_back(blob(&[b'a'; 800]));
        client.reply.push_back(blob(&[b'b'; 800]));

        client.glue_reply_buffers();
        assert_eq!(client.reply.len(), 2);
    }

    #[test]
    fn test_master_write_path_short_circuits() {
        let (stream, mut peer) = mio_pair();
        let mut client = Client::new(stream);
        client.flags |= MASTER;
        client.reply.push_back(blob(b"+OK\r\n"));

        let written = client.flush_reply(false).unwrap();
        assert_eq!(written, 5);
        assert!(client.reply.is_empty());
        // Nothing must reach the socket.
        assert_eq!(read_some(&mut peer, 1), b"");
    }

    #[test]
    fn test_reset_clears_parse_state() {
        let (stream, _peer) = mio_pair();
        let mut client = Client::new(stream);
        client.argv.push(blob(b"get"));
        client.bulklen = 7;
        client.reset();
        assert!(client.argv.is_empty());
        assert_eq!(client.bulklen, -1);
    }
}
