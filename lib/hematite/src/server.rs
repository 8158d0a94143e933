//! Global server state and the handlers gluing it to the reactor: the
//! accept path, the once-per-second maintenance cron, and snapshot
//! orchestration.

use crate::alloc;
use crate::client::{self, Client, ClientId, SLAVE};
use crate::config::ServerConfig;
use crate::db::Database;
use crate::net::{endpoint, NetError};
use crate::object::Shared;
use crate::reactor::{Reactor, TimerAction};
use crate::repl;
use crate::snapshot::{self, DumpResult};
use flux::logging::{self, Logger};
use flux::time::timestamp_secs;
use mio::net::{TcpListener, TcpStream};
use mio::Ready;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, ForkResult};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub type EventLoop = Reactor<Server>;

/// Reactor token of the accepting socket; client tokens start above it.
pub const SERVER_TOKEN: usize = 0;

/// Replica side of the replication state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    None,
    /// Must (re)connect to the master on the next cron tick.
    Connect,
    Connected,
}

pub struct Server {
    pub log: Logger,
    pub cfg: ServerConfig,
    pub listener: TcpListener,
    pub dbs: Vec<Database>,
    /// Session slot pool; freed slots are reused and double as reactor
    /// token sources.
    clients: Vec<Option<Client>>,
    free_slots: Vec<ClientId>,
    pub slaves: Vec<ClientId>,
    pub master: Option<ClientId>,
    pub shared: Shared,
    /// Mutations since the last successful save.
    pub dirty: u64,
    pub lastsave: u64,
    pub bgsave_in_progress: bool,
    pub replstate: ReplState,
    pub used_memory: usize,
    cronloops: u64,
    pub stat_starttime: u64,
    pub stat_numcommands: u64,
    pub stat_numconnections: u64,
}

impl Server {
    pub fn new(cfg: ServerConfig, log: Logger) -> Result<Server, NetError> {
        // A dead client would otherwise kill the process on the next write.
        unsafe {
            let _ = signal(Signal::SIGHUP, SigHandler::SigIgn);
            let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
        }

        let listener = endpoint::tcp_server(cfg.port, cfg.bindaddr.as_deref())?;
        let dbs = (0..cfg.dbnum).map(|_| Database::new()).collect();
        let replstate = if cfg.masterhost.is_some() {
            ReplState::Connect
        } else {
            ReplState::None
        };
        let now = timestamp_secs();

        Ok(Server {
            log,
            cfg,
            listener,
            dbs,
            clients: Vec::new(),
            free_slots: Vec::new(),
            slaves: Vec::new(),
            master: None,
            shared: Shared::new(),
            dirty: 0,
            lastsave: now,
            bgsave_in_progress: false,
            replstate,
            used_memory: 0,
            cronloops: 0,
            stat_starttime: now,
            stat_numcommands: 0,
            stat_numconnections: 0,
        })
    }

    #[inline]
    pub fn token_for(id: ClientId) -> usize {
        id + 1
    }

    #[inline]
    pub fn client_for(token: usize) -> ClientId {
        token - 1
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[inline]
    pub fn client(&self, id: ClientId) -> &Client {
        self.clients[id].as_ref().expect("no client in slot")
    }

    #[inline]
    pub fn client_mut(&mut self, id: ClientId) -> &mut Client {
        self.clients[id].as_mut().expect("no client in slot")
    }

    /// Empty the slot, handing it to the free pool for reuse.
    pub fn take_client(&mut self, id: ClientId) -> Client {
        let client = self.clients[id].take().expect("no client in slot");
        self.free_slots.push(id);
        client
    }

    pub fn num_clients(&self) -> usize {
        self.clients.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect()
    }

    /// Wrap an accepted (or dialed-back) stream as a session and register
    /// read interest for it.
    pub fn create_client(&mut self, el: &mut EventLoop, stream: TcpStream) -> Option<ClientId> {
        endpoint::setup_stream(&stream);
        let session = Client::new(stream);
        let id = match self.free_slots.pop() {
            Some(id) => {
                self.clients[id] = Some(session);
                id
            }
            None => {
                self.clients.push(Some(session));
                self.clients.len() - 1
            }
        };

        let registered = el.create_file_event(
            &self.client(id).stream,
            Self::token_for(id),
            Ready::readable(),
            client::read_query_from_client,
        );
        if registered.is_err() {
            let _ = self.take_client(id);
            return None;
        }
        self.stat_numconnections += 1;
        Some(id)
    }

    /// The master session vanished; reconnect from the cron.
    pub fn repl_lost_master(&mut self) {
        self.replstate = ReplState::Connect;
    }

    /// Register the accept handler and the maintenance cron.
    pub fn install(&mut self, el: &mut EventLoop) -> io::Result<()> {
        el.create_file_event(&self.listener, SERVER_TOKEN, Ready::readable(), accept_handler)?;
        el.create_time_event(1000, server_cron);
        Ok(())
    }

    /// Restore the keyspace from the dump file. Missing file: a fresh
    /// server. Anything else wrong with the file is for the caller to
    /// treat as fatal.
    pub fn load_db(&mut self) -> DumpResult<bool> {
        snapshot::load(&mut self.dbs, Path::new(&self.cfg.dbfilename))
    }

    /// Foreground save; on success the dirty counter starts over.
    pub fn save_db(&mut self) -> DumpResult<()> {
        match snapshot::save(&self.dbs, Path::new(&self.cfg.dbfilename)) {
            Ok(()) => {
                logging::info!(self.log, "DB saved on disk");
                self.dirty = 0;
                self.lastsave = timestamp_secs();
                Ok(())
            }
            Err(error) => {
                logging::warn!(self.log, "failed saving the DB"; "error" => %error);
                Err(error)
            }
        }
    }

    /// Fork a child to write the dump. The child shares the keyspace pages
    /// copy-on-write, closes the accepting socket, and exits with the save
    /// outcome; the cron reaps it.
    pub fn save_db_background(&mut self) -> Result<(), ()> {
        if self.bgsave_in_progress {
            return Err(());
        }
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let _ = close(self.listener.as_raw_fd());
                let code = match snapshot::save(&self.dbs, Path::new(&self.cfg.dbfilename)) {
                    Ok(()) => 0,
                    Err(_) => 1,
                };
                std::process::exit(code);
            }
            Ok(ForkResult::Parent { child }) => {
                logging::info!(self.log, "background saving started"; "pid" => child.as_raw());
                self.bgsave_in_progress = true;
                Ok(())
            }
            Err(error) => {
                logging::warn!(self.log, "can't save in background, fork failed"; "error" => %error);
                Err(())
            }
        }
    }
}

/// Readable handler on the accepting socket.
pub fn accept_handler(el: &mut EventLoop, srv: &mut Server, _token: usize, _mask: Ready) {
    let (stream, peer) = match srv.listener.accept() {
        Ok(pair) => pair,
        Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => return,
        Err(error) => {
            logging::debug!(srv.log, "accepting client connection"; "error" => %error);
            return;
        }
    };
    logging::debug!(srv.log, "accepted connection"; "peer" => %peer);
    if srv.create_client(el, stream).is_none() {
        logging::warn!(srv.log, "error allocating resources for the client");
    }
}

fn close_timeout_clients(el: &mut EventLoop, srv: &mut Server) {
    let now = timestamp_secs();
    let maxidle = srv.cfg.maxidletime;
    let idle: Vec<ClientId> = srv
        .client_ids()
        .into_iter()
        .filter(|&id| {
            let session = srv.client(id);
            // Slaves legitimately sit quiet between mutations.
            !session.has_flag(SLAVE) && now.saturating_sub(session.lastinteraction) > maxidle
        })
        .collect();
    for id in idle {
        logging::debug!(srv.log, "closing idle client"; "client" => id);
        client::free_client(el, srv, id);
    }
}

/// The once-per-second maintenance tick.
pub fn server_cron(el: &mut EventLoop, srv: &mut Server, _id: u64) -> TimerAction {
    let loops = srv.cronloops;
    srv.cronloops += 1;

    srv.used_memory = alloc::used_memory();

    if loops % 5 == 0 {
        for index in 0..srv.dbs.len() {
            let used = srv.dbs[index].len();
            let size = srv.dbs[index].capacity();
            if used > 0 {
                logging::debug!(srv.log, "database occupancy";
                    "db" => index, "keys" => used, "slots" => size);
            }
            if srv.dbs[index].shrink_if_sparse() {
                logging::info!(srv.log, "hash table was too sparse, resized"; "db" => index);
            }
        }
        logging::debug!(srv.log, "connected clients";
            "clients" => srv.num_clients() - srv.slaves.len(),
            "slaves" => srv.slaves.len(),
            "bytes_in_use" => srv.used_memory);
    }

    if loops % 10 == 0 {
        close_timeout_clients(el, srv);
    }

    if srv.bgsave_in_progress {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(WaitStatus::Exited(_, 0)) => {
                logging::info!(srv.log, "background saving terminated with success");
                srv.dirty = 0;
                srv.lastsave = timestamp_secs();
                srv.bgsave_in_progress = false;
            }
            Ok(_) => {
                logging::warn!(srv.log, "background saving error");
                srv.bgsave_in_progress = false;
            }
            Err(_) => {
                srv.bgsave_in_progress = false;
            }
        }
    } else {
        let now = timestamp_secs();
        for param in srv.cfg.save_params.clone() {
            if srv.dirty >= param.changes && now - srv.lastsave > param.seconds {
                logging::info!(srv.log, "save point reached, saving";
                    "changes" => param.changes, "seconds" => param.seconds);
                let _ = srv.save_db_background();
                break;
            }
        }
    }

    if srv.replstate == ReplState::Connect {
        logging::info!(srv.log, "connecting to MASTER");
        if repl::sync_with_master(el, srv).is_ok() {
            logging::info!(srv.log, "MASTER <-> SLAVE sync succeeded");
        }
    }

    TimerAction::Rearm(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn test_config(dir: &Path) -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.port = 0;
        cfg.bindaddr = Some("127.0.0.1".to_string());
        cfg.dbfilename = dir.join("dump.rdb").to_string_lossy().into_owned();
        cfg
    }

    fn spawn_server(cfg: ServerConfig) -> SocketAddr {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut el = EventLoop::new().unwrap();
            let mut srv = Server::new(cfg, logging::null()).unwrap();
            tx.send(srv.local_addr().unwrap()).unwrap();
            srv.load_db().unwrap();
            srv.install(&mut el).unwrap();
            el.run(&mut srv);
        });
        rx.recv().unwrap()
    }

    fn connect(addr: SocketAddr) -> net::TcpStream {
        let stream = net::TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn roundtrip(stream: &mut net::TcpStream, send: &[u8], expect: &[u8]) {
        stream.write_all(send).unwrap();
        expect_reply(stream, expect);
    }

    fn expect_reply(stream: &mut net::TcpStream, expect: &[u8]) {
        let mut reply = vec![0u8; expect.len()];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(
            reply,
            expect,
            "got {:?}, wanted {:?}",
            String::from_utf8_lossy(&reply),
            String::from_utf8_lossy(expect)
        );
    }

    #[test]
    fn test_ping() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"ping\r\n", b"+PONG\r\n");
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"set foo 3\r\nbar\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"get foo\r\n", b"3\r\nbar\r\n");
        roundtrip(&mut stream, b"get missing\r\n", b"nil\r\n");
    }

    #[test]
    fn test_setnx_collision() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"set k 1\r\na\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"setnx k 1\r\nb\r\n", b"0\r\n");
        roundtrip(&mut stream, b"get k\r\n", b"1\r\na\r\n");
        roundtrip(&mut stream, b"setnx fresh 1\r\nc\r\n", b"1\r\n");
    }

    #[test]
    fn test_unknown_command_and_arity() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"frobnicate\r\n", b"-ERR unknown command\r\n");
        roundtrip(&mut stream, b"get\r\n", b"-ERR wrong number of arguments\r\n");
        roundtrip(&mut stream, b"echo\r\n", b"-ERR wrong number of arguments\r\n");
    }

    #[test]
    fn test_invalid_bulk_count() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(
            &mut stream,
            b"set k 1073741825\r\n",
            b"-ERR invalid bulk write count\r\n",
        );
    }

    #[test]
    fn test_pipelining() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"ping\r\nping\r\n", b"+PONG\r\n+PONG\r\n");
    }

    #[test]
    fn test_command_name_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"PING\r\n", b"+PONG\r\n");
    }

    #[test]
    fn test_protocol_error_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        stream.write_all(&[b'a'; 1500]).unwrap();
        let mut buf = [0u8; 1];
        // Either a clean EOF or a reset, depending on timing.
        match stream.read(&mut buf) {
            Ok(0) => {}
            Ok(_) => panic!("server replied to a protocol error"),
            Err(_) => {}
        }
    }

    #[test]
    fn test_quit_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        stream.write_all(b"quit\r\n").unwrap();
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => {}
            Ok(_) => panic!("quit must not produce a reply"),
        }
    }

    #[test]
    fn test_incr_decr() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"incr counter\r\n", b"1\r\n");
        roundtrip(&mut stream, b"incrby counter 41\r\n", b"42\r\n");
        roundtrip(&mut stream, b"decr counter\r\n", b"41\r\n");
        roundtrip(&mut stream, b"get counter\r\n", b"2\r\n41\r\n");
    }

    #[test]
    fn test_del_exists_type() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"exists k\r\n", b"0\r\n");
        roundtrip(&mut stream, b"type k\r\n", b"+none\r\n");
        roundtrip(&mut stream, b"set k 1\r\nv\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"exists k\r\n", b"1\r\n");
        roundtrip(&mut stream, b"type k\r\n", b"+string\r\n");
        roundtrip(&mut stream, b"del k\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"exists k\r\n", b"0\r\n");
    }

    #[test]
    fn test_select_moves_between_databases() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"set k 1\r\nv\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"select 1\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"get k\r\n", b"nil\r\n");
        roundtrip(&mut stream, b"select 0\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"get k\r\n", b"1\r\nv\r\n");
        roundtrip(&mut stream, b"select 99\r\n", b"-ERR invalid DB index\r\n");
        roundtrip(&mut stream, b"move k 1\r\n", b"1\r\n");
        roundtrip(&mut stream, b"get k\r\n", b"nil\r\n");
        roundtrip(&mut stream, b"select 1\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"get k\r\n", b"1\r\nv\r\n");
    }

    #[test]
    fn test_list_operations() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"rpush l 1\r\nx\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"rpush l 2\r\nyy\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"lpush l 5\r\nfront\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"llen l\r\n", b"3\r\n");
        roundtrip(&mut stream, b"lindex l 0\r\n", b"5\r\nfront\r\n");
        roundtrip(&mut stream, b"lindex l -1\r\n", b"2\r\nyy\r\n");
        roundtrip(
            &mut stream,
            b"lrange l 0 -1\r\n",
            b"3\r\n5\r\nfront\r\n1\r\nx\r\n2\r\nyy\r\n",
        );
        roundtrip(&mut stream, b"lpop l\r\n", b"5\r\nfront\r\n");
        roundtrip(&mut stream, b"rpop l\r\n", b"2\r\nyy\r\n");
        roundtrip(&mut stream, b"llen l\r\n", b"1\r\n");
        roundtrip(&mut stream, b"llen missing\r\n", b"0\r\n");
        roundtrip(&mut stream, b"set s 1\r\nv\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"llen s\r\n", b"-2\r\n");
    }

    #[test]
    fn test_set_operations() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"sadd s 1\r\na\r\n", b"1\r\n");
        roundtrip(&mut stream, b"sadd s 1\r\na\r\n", b"0\r\n");
        roundtrip(&mut stream, b"sadd s 1\r\nb\r\n", b"1\r\n");
        roundtrip(&mut stream, b"scard s\r\n", b"2\r\n");
        roundtrip(&mut stream, b"sismember s 1\r\na\r\n", b"1\r\n");
        roundtrip(&mut stream, b"sismember s 1\r\nz\r\n", b"0\r\n");
        roundtrip(&mut stream, b"srem s 1\r\na\r\n", b"1\r\n");
        roundtrip(&mut stream, b"srem s 1\r\na\r\n", b"0\r\n");
        roundtrip(&mut stream, b"scard s\r\n", b"1\r\n");
    }

    #[test]
    fn test_rename_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"set one 1\r\na\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"rename one one\r\n", b"-3\r\n");
        roundtrip(&mut stream, b"rename missing x\r\n", b"-ERR no such key\r\n");
        roundtrip(&mut stream, b"rename one two\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"get two\r\n", b"1\r\na\r\n");
        roundtrip(&mut stream, b"keys *\r\n", b"3\r\ntwo\r\n");
        roundtrip(&mut stream, b"dbsize\r\n", b"1\r\n");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());

        let addr = spawn_server(cfg.clone());
        let mut stream = connect(addr);
        roundtrip(&mut stream, b"set foo 3\r\nbar\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"rpush l 1\r\nx\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"rpush l 2\r\nyy\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"save\r\n", b"+OK\r\n");

        // A second process generation pointed at the same dump file.
        let addr2 = spawn_server(cfg);
        let mut stream2 = connect(addr2);
        roundtrip(&mut stream2, b"get foo\r\n", b"3\r\nbar\r\n");
        roundtrip(
            &mut stream2,
            b"lrange l 0 -1\r\n",
            b"2\r\n1\r\nx\r\n2\r\nyy\r\n",
        );
    }

    #[test]
    fn test_lastsave_advances_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(test_config(dir.path()));
        let mut stream = connect(addr);

        stream.write_all(b"lastsave\r\n").unwrap();
        let mut first = Vec::new();
        read_line(&mut stream, &mut first);
        roundtrip(&mut stream, b"save\r\n", b"+OK\r\n");
        stream.write_all(b"lastsave\r\n").unwrap();
        let mut second = Vec::new();
        read_line(&mut stream, &mut second);

        let first: i64 = String::from_utf8_lossy(&first).trim().parse().unwrap();
        let second: i64 = String::from_utf8_lossy(&second).trim().parse().unwrap();
        assert!(second >= first);
    }

    fn read_line(stream: &mut net::TcpStream, out: &mut Vec<u8>) {
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).unwrap();
            out.push(byte[0]);
            if byte[0] == b'\n' {
                return;
            }
        }
    }

    #[test]
    fn test_replication_bootstrap_and_feed() {
        let master_dir = tempfile::tempdir().unwrap();
        let master_addr = spawn_server(test_config(master_dir.path()));
        let mut master = connect(master_addr);
        roundtrip(&mut master, b"set seeded 4\r\ndata\r\n", b"+OK\r\n");

        let slave_dir = tempfile::tempdir().unwrap();
        let mut slave_cfg = test_config(slave_dir.path());
        slave_cfg.masterhost = Some("127.0.0.1".to_string());
        slave_cfg.masterport = master_addr.port();
        let slave_addr = spawn_server(slave_cfg);

        // The slave connects from its cron; give the bootstrap a moment.
        let mut slave = connect(slave_addr);
        assert!(poll_for(&mut slave, b"get seeded\r\n", b"4\r\ndata\r\n", 50));

        // A mutation on the master must flow through the feed.
        roundtrip(&mut master, b"set later 5\r\nvalue\r\n", b"+OK\r\n");
        assert!(poll_for(&mut slave, b"get later\r\n", b"5\r\nvalue\r\n", 50));
    }

    /// Retry a query until the expected reply shows up.
    fn poll_for(
        stream: &mut net::TcpStream,
        send: &[u8],
        expect: &[u8],
        attempts: u32,
    ) -> bool {
        for _ in 0..attempts {
            stream.write_all(send).unwrap();
            let mut reply = Vec::new();
            read_line(stream, &mut reply);
            if reply == b"nil\r\n" {
                thread::sleep(Duration::from_millis(200));
                continue;
            }
            // A bulk reply: length line already read, now the payload.
            let len: usize = String::from_utf8_lossy(&reply).trim().parse().unwrap();
            let mut payload = vec![0u8; len + 2];
            stream.read_exact(&mut payload).unwrap();
            let mut full = reply.clone();
            full.extend_from_slice(&payload);
            return full == expect;
        }
        false
    }
}
