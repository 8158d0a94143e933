//! Replication: the mutation feed to attached slaves, the master side of
//! SYNC, and the replica bootstrap that pulls a full dump and attaches to
//! the master as a passive session.

use crate::client::{self, ClientId, CLOSE, MASTER, SLAVE};
use crate::command::Command;
use crate::net::{endpoint, NetError, NetResult};
use crate::object::Blob;
use crate::protocol;
use crate::server::{EventLoop, ReplState, Server};
use crate::snapshot;
use flux::logging;
use flux::time::timestamp_secs;
use mio::net::TcpStream;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::net;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Handshake steps give up after this many seconds.
const SYNC_IO_TIMEOUT: u64 = 5;
/// A slave that cannot take the whole dump within this budget is dropped.
const MAX_SYNC_TIME: u64 = 60;
/// Dump transfer chunk size.
const SYNC_CHUNK: usize = 1024;

/// Rebuild the just-executed command as protocol text and enqueue it on
/// every attached slave, prefixed with a `select` whenever the slave's
/// replicated database differs from the executing client's.
pub fn feed_slaves(el: &mut EventLoop, srv: &mut Server, cmd: &Command, db: usize, argv: &[Blob]) {
    let mut fragments: Vec<Blob> = Vec::new();
    for (index, arg) in argv.iter().enumerate() {
        if index != 0 {
            fragments.push(srv.shared.space.clone());
        }
        if cmd.is_bulk() && index == argv.len() - 1 {
            fragments.push(Rc::new(protocol::bulk_header(arg.len() as i64)));
        }
        fragments.push(arg.clone());
    }
    fragments.push(srv.shared.crlf.clone());

    let slaves = srv.slaves.clone();
    for slave in slaves {
        if srv.client(slave).slave_seldb != db {
            let select = if db < srv.shared.select.len() {
                srv.shared.select[db].clone()
            } else {
                Rc::new(format!("select {}\r\n", db).into_bytes())
            };
            client::add_reply(el, srv, slave, select);
            srv.client_mut(slave).slave_seldb = db;
        }
        for fragment in &fragments {
            client::add_reply(el, srv, slave, fragment.clone());
        }
    }
}

/// Master side of SYNC: foreground-save, stream the dump as one bulk
/// through the timed writers, then flag the session as a slave. Any
/// failure closes the connection; half a dump is useless to the peer.
pub fn sync(_el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    logging::info!(srv.log, "slave asks for synchronization");

    if !srv.client(id).reply.is_empty() {
        logging::warn!(srv.log, "SYNC failed, slave has pending replies"; "client" => id);
        srv.client_mut(id).flags |= CLOSE;
        return;
    }
    if srv.save_db().is_err() {
        logging::warn!(srv.log, "SYNC failed, can't save the DB"; "client" => id);
        srv.client_mut(id).flags |= CLOSE;
        return;
    }

    let path = srv.cfg.dbfilename.clone();
    match stream_dump(srv, id, Path::new(&path)) {
        Ok(()) => {
            let client = srv.client_mut(id);
            client.flags |= SLAVE;
            client.slave_seldb = 0;
            srv.slaves.push(id);
            logging::info!(srv.log, "synchronization with slave succeeded"; "client" => id);
        }
        Err(error) => {
            logging::warn!(srv.log, "SYNC failed streaming the dump"; "client" => id, "error" => %error);
            srv.client_mut(id).flags |= CLOSE;
        }
    }
}

fn stream_dump(srv: &mut Server, id: ClientId, path: &Path) -> NetResult<()> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = timestamp_secs();

    let client = srv.client_mut(id);
    let header = format!("{}\r\n", len);
    endpoint::sync_write(&mut client.stream, header.as_bytes(), SYNC_IO_TIMEOUT)?;

    let mut remaining = len;
    let mut chunk = [0u8; SYNC_CHUNK];
    while remaining > 0 {
        if timestamp_secs() - start > MAX_SYNC_TIME {
            return Err(NetError::Timeout);
        }
        let want = remaining.min(SYNC_CHUNK as u64) as usize;
        file.read_exact(&mut chunk[..want])?;
        endpoint::sync_write(&mut client.stream, &chunk[..want], SYNC_IO_TIMEOUT)?;
        remaining -= want as u64;
    }
    Ok(())
}

/// Pull the dump into a temp file next to the configured dump path.
fn download_dump(stream: &mut net::TcpStream, tmp: &Path, mut remaining: u64) -> NetResult<()> {
    let mut file = File::create(tmp)?;
    let mut chunk = [0u8; SYNC_CHUNK];
    let result = loop {
        if remaining == 0 {
            break Ok(());
        }
        let want = remaining.min(SYNC_CHUNK as u64) as usize;
        match stream.read(&mut chunk[..want]) {
            Ok(0) => break Err(NetError::Closed),
            Ok(n) => {
                if let Err(error) = file.write_all(&chunk[..n]) {
                    break Err(error.into());
                }
                remaining -= n as u64;
            }
            Err(error) => break Err(error.into()),
        }
    };
    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

/// Replica bootstrap: dial the master, request the dump, replace local
/// state with it, and keep the surviving socket as a MASTER-flagged
/// session feeding the apply stream. Any failure leaves the replica state
/// untouched so the next cron tick retries.
pub fn sync_with_master(el: &mut EventLoop, srv: &mut Server) -> Result<(), ()> {
    let (host, port) = match &srv.cfg.masterhost {
        Some(host) => (host.clone(), srv.cfg.masterport),
        None => return Err(()),
    };

    let mut stream = match endpoint::tcp_connect(&host, port) {
        Ok(stream) => stream,
        Err(error) => {
            logging::warn!(srv.log, "unable to connect to MASTER"; "error" => %error);
            return Err(());
        }
    };

    if let Err(error) = endpoint::sync_write(&mut stream, b"SYNC \r\n", SYNC_IO_TIMEOUT) {
        logging::warn!(srv.log, "I/O error writing to MASTER"; "error" => %error);
        return Err(());
    }
    let line = match endpoint::sync_read_line(&mut stream, 1024, SYNC_IO_TIMEOUT) {
        Ok(line) => line,
        Err(error) => {
            logging::warn!(srv.log, "I/O error reading bulk count from MASTER"; "error" => %error);
            return Err(());
        }
    };
    let dumpsize = protocol::atoi(&line);
    if dumpsize < 0 {
        logging::warn!(srv.log, "MASTER sent an invalid dump size"; "size" => dumpsize);
        return Err(());
    }
    logging::info!(srv.log, "receiving data dump from MASTER"; "bytes" => dumpsize);

    let target = PathBuf::from(&srv.cfg.dbfilename);
    let tmp = snapshot::temp_path(&target, "temp");
    if let Err(error) = download_dump(&mut stream, &tmp, dumpsize as u64) {
        logging::warn!(srv.log, "I/O error transferring the dump from MASTER"; "error" => %error);
        return Err(());
    }
    if let Err(error) = fs::rename(&tmp, &target) {
        logging::warn!(srv.log, "failed renaming the temp dump file"; "error" => %error);
        let _ = fs::remove_file(&tmp);
        return Err(());
    }

    for db in &mut srv.dbs {
        db.clear();
    }
    if let Err(error) = snapshot::load(&mut srv.dbs, &target) {
        logging::warn!(srv.log, "failed loading the MASTER synchronization DB"; "error" => %error);
        return Err(());
    }

    if stream.set_nonblocking(true).is_err() {
        return Err(());
    }
    let stream = match TcpStream::from_stream(stream) {
        Ok(stream) => stream,
        Err(_) => return Err(()),
    };
    let id = match srv.create_client(el, stream) {
        Some(id) => id,
        None => {
            logging::warn!(srv.log, "error allocating resources for the MASTER session");
            return Err(());
        }
    };
    srv.client_mut(id).flags |= MASTER;
    srv.master = Some(id);
    srv.replstate = ReplState::Connected;
    Ok(())
}
