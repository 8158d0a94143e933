use crate::client::{self, ClientId};
use crate::protocol;
use crate::server::{EventLoop, ReplState, Server};
use crate::VERSION;
use flux::logging;
use flux::time::timestamp_secs;

pub fn ping(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let pong = srv.shared.pong.clone();
    client::add_reply(el, srv, id, pong);
}

pub fn echo(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let payload = srv.client(id).argv[1].clone();
    client::add_reply_bulk(el, srv, id, payload);
}

pub fn save(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    if srv.bgsave_in_progress {
        client::add_reply_bytes(el, srv, id, protocol::error("background save in progress"));
        return;
    }
    let reply = if srv.save_db().is_ok() {
        srv.shared.ok.clone()
    } else {
        srv.shared.err.clone()
    };
    client::add_reply(el, srv, id, reply);
}

pub fn bgsave(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    if srv.bgsave_in_progress {
        client::add_reply_bytes(el, srv, id, protocol::error("background save in progress"));
        return;
    }
    if srv.save_db_background().is_ok() {
        client::add_reply_bytes(el, srv, id, protocol::status("Background saving started"));
    } else {
        let err = srv.shared.err.clone();
        client::add_reply(el, srv, id, err);
    }
}

pub fn lastsave(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let lastsave = srv.lastsave as i64;
    client::add_reply_integer(el, srv, id, lastsave);
}

pub fn shutdown(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    logging::warn!(srv.log, "user requested shutdown, saving DB");
    match srv.save_db() {
        Ok(()) => {
            logging::warn!(srv.log, "server exit now, bye bye");
            std::process::exit(0);
        }
        Err(_) => {
            client::add_reply_bytes(
                el,
                srv,
                id,
                protocol::error("can't quit, problems saving the DB"),
            );
        }
    }
}

pub fn info(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let clients = srv.num_clients();
    let slaves = srv.slaves.len();
    let role = match srv.replstate {
        ReplState::None => "master",
        _ => "slave",
    };
    let body = format!(
        "version:{}\r\n\
         uptime_in_seconds:{}\r\n\
         connected_clients:{}\r\n\
         connected_slaves:{}\r\n\
         used_memory:{}\r\n\
         changes_since_last_save:{}\r\n\
         last_save_time:{}\r\n\
         total_connections_received:{}\r\n\
         total_commands_processed:{}\r\n\
         role:{}\r\n",
        VERSION,
        timestamp_secs() - srv.stat_starttime,
        clients - slaves,
        slaves,
        srv.used_memory,
        srv.dirty,
        srv.lastsave,
        srv.stat_numconnections,
        srv.stat_numcommands,
        role,
    );
    let crlf = srv.shared.crlf.clone();
    client::add_reply_bytes(el, srv, id, protocol::bulk_header(body.len() as i64));
    client::add_reply_bytes(el, srv, id, body.into_bytes());
    client::add_reply(el, srv, id, crlf);
}

pub fn flushdb(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let dbi = srv.client(id).db;
    srv.dbs[dbi].clear();
    srv.dirty += 1;
    let ok = srv.shared.ok.clone();
    client::add_reply(el, srv, id, ok);
}

pub fn flushall(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    for db in &mut srv.dbs {
        db.clear();
    }
    srv.dirty += 1;
    let ok = srv.shared.ok.clone();
    client::add_reply(el, srv, id, ok);
}
