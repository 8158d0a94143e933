use crate::client::{self, ClientId};
use crate::glob::glob_match;
use crate::object::Blob;
use crate::protocol;
use crate::server::{EventLoop, Server};

pub fn del(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };
    if srv.dbs[dbi].remove(&key) {
        srv.dirty += 1;
    }
    let ok = srv.shared.ok.clone();
    client::add_reply(el, srv, id, ok);
}

pub fn exists(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };
    let reply = if srv.dbs[dbi].contains(&key) {
        srv.shared.one.clone()
    } else {
        srv.shared.zero.clone()
    };
    client::add_reply(el, srv, id, reply);
}

pub fn type_(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };
    let name = match srv.dbs[dbi].find(&key) {
        None => "none",
        Some(value) => value.type_name(),
    };
    client::add_reply_bytes(el, srv, id, protocol::status(name));
}

/// All keys matching the glob pattern, space-joined into one bulk reply.
pub fn keys(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, pattern) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    let mut joined: Vec<u8> = Vec::new();
    for (key, _) in srv.dbs[dbi].iter() {
        if glob_match(&pattern, key) {
            if !joined.is_empty() {
                joined.push(b' ');
            }
            joined.extend_from_slice(key);
        }
    }

    let crlf = srv.shared.crlf.clone();
    client::add_reply_bytes(el, srv, id, protocol::bulk_header(joined.len() as i64));
    client::add_reply_bytes(el, srv, id, joined);
    client::add_reply(el, srv, id, crlf);
}

pub fn randomkey(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let dbi = srv.client(id).db;
    let len = srv.dbs[dbi].len();
    if len == 0 {
        let nil = srv.shared.nil.clone();
        client::add_reply(el, srv, id, nil);
        return;
    }
    let pick = rand::random::<usize>() % len;
    let key: Blob = srv.dbs[dbi]
        .nth_key(pick)
        .expect("picked index below len")
        .clone();
    client::add_reply_bulk(el, srv, id, key);
}

pub fn rename(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    rename_generic(el, srv, id, false)
}

pub fn renamenx(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    rename_generic(el, srv, id, true)
}

fn rename_generic(el: &mut EventLoop, srv: &mut Server, id: ClientId, nx: bool) {
    let (dbi, src, dst) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    if *src == *dst {
        let minus3 = srv.shared.minus3.clone();
        client::add_reply(el, srv, id, minus3);
        return;
    }
    if !srv.dbs[dbi].contains(&src) {
        let nokey = srv.shared.nokey_err.clone();
        client::add_reply(el, srv, id, nokey);
        return;
    }
    if nx && srv.dbs[dbi].contains(&dst) {
        let zero = srv.shared.zero.clone();
        client::add_reply(el, srv, id, zero);
        return;
    }

    if let Some((_, value)) = srv.dbs[dbi].take(&src) {
        srv.dbs[dbi].replace(dst, value);
        srv.dirty += 1;
    }
    let reply = if nx { srv.shared.one.clone() } else { srv.shared.ok.clone() };
    client::add_reply(el, srv, id, reply);
}

pub fn move_(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, target) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), protocol::atoi(&c.argv[2]))
    };

    if target < 0 || target as usize >= srv.dbs.len() {
        let minus4 = srv.shared.minus4.clone();
        client::add_reply(el, srv, id, minus4);
        return;
    }
    let target = target as usize;
    if target == dbi {
        let minus3 = srv.shared.minus3.clone();
        client::add_reply(el, srv, id, minus3);
        return;
    }
    if !srv.dbs[dbi].contains(&key) || srv.dbs[target].contains(&key) {
        let zero = srv.shared.zero.clone();
        client::add_reply(el, srv, id, zero);
        return;
    }

    if let Some((key, value)) = srv.dbs[dbi].take(&key) {
        srv.dbs[target].replace(key, value);
        srv.dirty += 1;
    }
    let one = srv.shared.one.clone();
    client::add_reply(el, srv, id, one);
}

pub fn select(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let index = protocol::atoi(&srv.client(id).argv[1]);
    if index < 0 || index as usize >= srv.dbs.len() {
        client::add_reply_bytes(el, srv, id, protocol::error("invalid DB index"));
        return;
    }
    srv.client_mut(id).db = index as usize;
    let ok = srv.shared.ok.clone();
    client::add_reply(el, srv, id, ok);
}

pub fn dbsize(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let dbi = srv.client(id).db;
    let len = srv.dbs[dbi].len() as i64;
    client::add_reply_integer(el, srv, id, len);
}
