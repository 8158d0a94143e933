use crate::client::{self, ClientId};
use crate::object::{Blob, Value};
use crate::protocol;
use crate::server::{EventLoop, Server};
use hashbrown::HashSet;

pub fn sadd(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, member) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    enum Added {
        Fresh,
        New,
        Already,
        WrongType,
    }

    let added = match srv.dbs[dbi].find_mut(&key) {
        None => Added::Fresh,
        Some(Value::Set(set)) => {
            if set.insert(member.clone()) {
                Added::New
            } else {
                Added::Already
            }
        }
        Some(_) => Added::WrongType,
    };

    match added {
        Added::Fresh => {
            let mut set = HashSet::new();
            set.insert(member);
            srv.dbs[dbi].replace(key, Value::Set(set));
            srv.dirty += 1;
            let one = srv.shared.one.clone();
            client::add_reply(el, srv, id, one);
        }
        Added::New => {
            srv.dirty += 1;
            let one = srv.shared.one.clone();
            client::add_reply(el, srv, id, one);
        }
        Added::Already => {
            let zero = srv.shared.zero.clone();
            client::add_reply(el, srv, id, zero);
        }
        Added::WrongType => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

pub fn srem(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, member) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    let removed = match srv.dbs[dbi].find_mut(&key) {
        None => Some(false),
        Some(Value::Set(set)) => Some(set.remove(&*member)),
        Some(_) => None,
    };

    match removed {
        Some(true) => {
            srv.dirty += 1;
            let one = srv.shared.one.clone();
            client::add_reply(el, srv, id, one);
        }
        Some(false) => {
            let zero = srv.shared.zero.clone();
            client::add_reply(el, srv, id, zero);
        }
        None => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

pub fn sismember(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key, member) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone(), c.argv[2].clone())
    };

    let is_member = match srv.dbs[dbi].find(&key) {
        None => Some(false),
        Some(Value::Set(set)) => Some(set.contains(&*member)),
        Some(_) => None,
    };

    match is_member {
        Some(true) => {
            let one = srv.shared.one.clone();
            client::add_reply(el, srv, id, one);
        }
        Some(false) => {
            let zero = srv.shared.zero.clone();
            client::add_reply(el, srv, id, zero);
        }
        None => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

pub fn scard(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    let cardinality = match srv.dbs[dbi].find(&key) {
        None => Some(0),
        Some(Value::Set(set)) => Some(set.len() as i64),
        Some(_) => None,
    };

    match cardinality {
        Some(cardinality) => client::add_reply_integer(el, srv, id, cardinality),
        None => {
            let minus2 = srv.shared.minus2.clone();
            client::add_reply(el, srv, id, minus2);
        }
    }
}

pub fn smembers(el: &mut EventLoop, srv: &mut Server, id: ClientId) {
    let (dbi, key) = {
        let c = srv.client(id);
        (c.db, c.argv[1].clone())
    };

    enum Found {
        Missing,
        WrongType,
        Members(Vec<Blob>),
    }

    let found = match srv.dbs[dbi].find(&key) {
        None => Found::Missing,
        Some(Value::Set(set)) => Found::Members(set.iter().cloned().collect()),
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
        Found::Members(members) => {
            client::add_reply_bytes(el, srv, id, protocol::multibulk_header(members.len() as i64));
            for member in members {
                client::add_reply_bulk(el, srv, id, member);
            }
        }
    }
}
