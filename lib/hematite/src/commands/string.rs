use crate::client::{self, ClientId};
use crate::object::{Blob, Value};
use crate::protocol;
use crate::server::{EventLoop, Server};
use std::rc::Rc;

pub fn set(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    set_generic(el, srv, id, false)
}

pub fn setnx(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    set_generic(el, srv, id, true)
}

fn set_generic(el: &mut EventLoop, srv: &mut Server, id: ClientId, nx: bool) {
    let (dbi, key, value) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    if nx && srv.dbs[dbi].contains(&key) {
        let zero = srv.shared.zero.clone();
        client::add_reply(el, srv, id, zero);
        return;
    }
    srv.dbs[dbi].replace(key, Value::Str(value));
    srv.dirty += 1;

    let reply = if nx { srv.shared.one.clone() } else { srv.shared.ok.clone() };
    client::add_reply(el, srv, id, reply);
}

pub fn get(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    enum Found {
        Missing,
        WrongType,
        Str(Blob),
    }

    let found = match srv.dbs[dbi].find(&key) {
        None => Found::Missing,
        Some(Value::Str(s)) => Found::Str(s.clone()),
        Some(_) => Found::WrongType,
    };

    match found {
        Found::Missing => {
            let nil = srv.shared.nil.clone();
            client::add_reply(el, srv, id, nil);
        }
        Found::WrongType => {
            let error = srv.shared.wrongtype_err_bulk.clone();
            client::add_reply(el, srv, id, error);
        }
        Found::Str(s) => client::add_reply_bulk(el, srv, id, s),
    }
}

pub fn incr(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    incr_decr(el, srv, id, 1)
}

pub fn decr(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    incr_decr(el, srv, id, -1)
}

pub fn incrby(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let delta = protocol::atoi(&srv.client(id).argv[2]);
    incr_decr(el, srv, id, delta)
}

pub fn decrby(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let delta = protocol::atoi(&srv.client(id).argv[2]);
    incr_decr(el, srv, id, -delta)
}

/// Strings that do not parse as integers count as zero, like the original.
fn incr_decr(el: &mut EventLoop, srv: &mut Server, id: ClientId, delta: i64) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    let current = match srv.dbs[dbi].find(&key) {
        Some(Value::Str(s)) => protocol::atoi(s),
        _ => 0,
    };
    let value = current.wrapping_add(delta);

    srv.dbs[dbi].replace(key, Value::Str(Rc::new(value.to_string().into_bytes())));
    srv.dirty += 1;
    client::add_reply_integer(el, srv, id, value);
}
